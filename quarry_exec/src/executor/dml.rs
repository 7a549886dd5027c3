//! Row-mutating executors. Each drains its child once, applies the change
//! to the table heap and every index on the table in lockstep, and emits a
//! single one-column tuple with the affected row count. Conflict detection
//! belongs to the transaction layer; the handle is only carried through.

use std::sync::Arc;

use flint::page::TupleMeta;
use flint::Rid;

use crate::catalog::{IndexInfo, TableInfo};
use crate::errors::ExecutionError;
use crate::expr::Expr;
use crate::tuple::{Schema, Tuple};
use crate::value::Value;
use crate::Transaction;

use super::{Executor, BATCH_SIZE};

fn count_schema() -> Schema {
    vec![crate::tuple::Column::new("count", crate::value::DataType::Int)]
}

pub struct InsertExecutor {
    child: Box<dyn Executor>,
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    _txn: Transaction,
    schema: Schema,
    finished: bool,
}

impl InsertExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        table: Arc<TableInfo>,
        indexes: Vec<Arc<IndexInfo>>,
        txn: Transaction,
    ) -> Self {
        Self {
            child,
            table,
            indexes,
            _txn: txn,
            schema: count_schema(),
            finished: false,
        }
    }
}

impl Executor for InsertExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.finished = false;
        Ok(())
    }

    fn next(
        &mut self,
        tuple_batch: &mut Vec<Tuple>,
        rid_batch: &mut Vec<Rid>,
        batch_size: usize,
    ) -> Result<bool, ExecutionError> {
        tuple_batch.clear();
        rid_batch.clear();
        if self.finished {
            return Ok(false);
        }

        let mut count = 0i64;
        let mut child_tuples = Vec::new();
        let mut child_rids = Vec::new();
        while self
            .child
            .next(&mut child_tuples, &mut child_rids, batch_size.max(BATCH_SIZE))?
        {
            for tuple in &child_tuples {
                let rid = self
                    .table
                    .heap
                    .insert_tuple(TupleMeta { is_deleted: false }, tuple)?;
                for index in &self.indexes {
                    index.insert_entry(tuple, rid)?;
                }
                count += 1;
            }
        }

        tuple_batch.push(Tuple::new(vec![Value::Int(count)]));
        self.finished = true;
        Ok(true)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

pub struct UpdateExecutor {
    child: Box<dyn Executor>,
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    target_exprs: Vec<Expr>,
    _txn: Transaction,
    schema: Schema,
    finished: bool,
}

impl UpdateExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        table: Arc<TableInfo>,
        indexes: Vec<Arc<IndexInfo>>,
        target_exprs: Vec<Expr>,
        txn: Transaction,
    ) -> Self {
        Self {
            child,
            table,
            indexes,
            target_exprs,
            _txn: txn,
            schema: count_schema(),
            finished: false,
        }
    }
}

impl Executor for UpdateExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.finished = false;
        Ok(())
    }

    /// Updates are a delete of the old version plus an insert of the new
    /// one, with index entries retargeted alongside.
    fn next(
        &mut self,
        tuple_batch: &mut Vec<Tuple>,
        rid_batch: &mut Vec<Rid>,
        batch_size: usize,
    ) -> Result<bool, ExecutionError> {
        tuple_batch.clear();
        rid_batch.clear();
        if self.finished {
            return Ok(false);
        }

        let mut count = 0i64;
        let mut child_tuples = Vec::new();
        let mut child_rids = Vec::new();
        while self
            .child
            .next(&mut child_tuples, &mut child_rids, batch_size.max(BATCH_SIZE))?
        {
            for (old_tuple, old_rid) in child_tuples.iter().zip(&child_rids) {
                let mut values = Vec::with_capacity(self.target_exprs.len());
                for expr in &self.target_exprs {
                    values.push(expr.evaluate(old_tuple)?);
                }
                let new_tuple = Tuple::new(values);

                self.table
                    .heap
                    .update_tuple_meta(*old_rid, TupleMeta { is_deleted: true })?;
                for index in &self.indexes {
                    index.delete_entry(old_tuple)?;
                }

                let new_rid = self
                    .table
                    .heap
                    .insert_tuple(TupleMeta { is_deleted: false }, &new_tuple)?;
                for index in &self.indexes {
                    index.insert_entry(&new_tuple, new_rid)?;
                }
                count += 1;
            }
        }

        tuple_batch.push(Tuple::new(vec![Value::Int(count)]));
        self.finished = true;
        Ok(true)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

pub struct DeleteExecutor {
    child: Box<dyn Executor>,
    table: Arc<TableInfo>,
    indexes: Vec<Arc<IndexInfo>>,
    _txn: Transaction,
    schema: Schema,
    finished: bool,
}

impl DeleteExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        table: Arc<TableInfo>,
        indexes: Vec<Arc<IndexInfo>>,
        txn: Transaction,
    ) -> Self {
        Self {
            child,
            table,
            indexes,
            _txn: txn,
            schema: count_schema(),
            finished: false,
        }
    }
}

impl Executor for DeleteExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.finished = false;
        Ok(())
    }

    fn next(
        &mut self,
        tuple_batch: &mut Vec<Tuple>,
        rid_batch: &mut Vec<Rid>,
        batch_size: usize,
    ) -> Result<bool, ExecutionError> {
        tuple_batch.clear();
        rid_batch.clear();
        if self.finished {
            return Ok(false);
        }

        let mut count = 0i64;
        let mut child_tuples = Vec::new();
        let mut child_rids = Vec::new();
        while self
            .child
            .next(&mut child_tuples, &mut child_rids, batch_size.max(BATCH_SIZE))?
        {
            for (tuple, rid) in child_tuples.iter().zip(&child_rids) {
                self.table
                    .heap
                    .update_tuple_meta(*rid, TupleMeta { is_deleted: true })?;
                for index in &self.indexes {
                    index.delete_entry(tuple)?;
                }
                count += 1;
            }
        }

        tuple_batch.push(Tuple::new(vec![Value::Int(count)]));
        self.finished = true;
        Ok(true)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
