//! Table and index scans.

use std::sync::Arc;

use flint::btree::TreeIterator;
use flint::{PageId, Rid, INVALID_PAGE_ID};

use crate::catalog::{IndexInfo, TableInfo};
use crate::errors::ExecutionError;
use crate::expr::Expr;
use crate::tuple::{Schema, Tuple};

use super::Executor;

/// Walks the table heap in physical order, skipping tuples whose meta marks
/// them deleted, with an optional residual filter. The scan's extent is
/// frozen at `init`, so rows appended while the scan runs are not visited.
pub struct SeqScanExecutor {
    table: Arc<TableInfo>,
    filter: Option<Expr>,
    schema: Schema,
    page_id: PageId,
    slot: u16,
    stop: (PageId, u16),
}

impl SeqScanExecutor {
    pub fn new(table: Arc<TableInfo>, filter: Option<Expr>, schema: Schema) -> Self {
        let first = table.heap.first_page_id();
        Self {
            table,
            filter,
            schema,
            page_id: first,
            slot: 0,
            stop: (first, 0),
        }
    }
}

impl Executor for SeqScanExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.page_id = self.table.heap.first_page_id();
        self.slot = 0;
        self.stop = self.table.heap.end_position()?;
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

        let mut iter = self.table.heap.resume((self.page_id, self.slot), self.stop);
        while tuple_batch.len() < batch_size {
            let Some((rid, meta, tuple)) = iter.next()? else {
                break;
            };
            if meta.is_deleted {
                continue;
            }
            if let Some(predicate) = &self.filter {
                if !predicate.evaluate(&tuple)?.is_true() {
                    continue;
                }
            }
            tuple_batch.push(tuple);
            rid_batch.push(rid);
        }
        let (page_id, slot) = iter.position();
        self.page_id = page_id;
        self.slot = slot;

        Ok(!tuple_batch.is_empty())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Fetches rows through a B+Tree index: either the union of RIDs for a set
/// of point keys, or a full range walk of the tree iterator. Heap tuples
/// marked deleted are skipped and an optional predicate is applied after
/// the fetch.
pub struct IndexScanExecutor {
    table: Arc<TableInfo>,
    index: Arc<IndexInfo>,
    pred_keys: Vec<Expr>,
    filter: Option<Expr>,
    schema: Schema,
    rids: Vec<Rid>,
    rid_cursor: usize,
    range: Option<TreeIterator>,
}

impl IndexScanExecutor {
    pub fn new(
        table: Arc<TableInfo>,
        index: Arc<IndexInfo>,
        pred_keys: Vec<Expr>,
        filter: Option<Expr>,
        schema: Schema,
    ) -> Self {
        Self {
            table,
            index,
            pred_keys,
            filter,
            schema,
            rids: Vec::new(),
            rid_cursor: 0,
            range: None,
        }
    }

    fn fetch_rid(&mut self) -> Result<Option<Rid>, ExecutionError> {
        if !self.pred_keys.is_empty() {
            if self.rid_cursor < self.rids.len() {
                self.rid_cursor += 1;
                return Ok(Some(self.rids[self.rid_cursor - 1]));
            }
            return Ok(None);
        }
        let Some(iter) = self.range.as_mut() else {
            return Ok(None);
        };
        match iter.next() {
            Some(entry) => Ok(Some(entry?.1)),
            None => Ok(None),
        }
    }
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.rids.clear();
        self.rid_cursor = 0;
        self.range = None;

        if self.pred_keys.is_empty() {
            self.range = Some(self.index.tree.iter()?);
            return Ok(());
        }

        let empty = Tuple::new(Vec::new());
        for key_expr in &self.pred_keys {
            let value = key_expr.evaluate(&empty)?;
            let crate::value::Value::Int(key) = value else {
                continue;
            };
            if let Some(rid) = self.index.tree.get_value(key)? {
                self.rids.push(rid);
            }
        }
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

        while tuple_batch.len() < batch_size {
            let Some(rid) = self.fetch_rid()? else {
                break;
            };
            if rid.0 == INVALID_PAGE_ID {
                continue;
            }
            let Some((meta, tuple)) = self.table.heap.tuple(rid)? else {
                continue;
            };
            if meta.is_deleted {
                continue;
            }
            if let Some(predicate) = &self.filter {
                if !predicate.evaluate(&tuple)?.is_true() {
                    continue;
                }
            }
            tuple_batch.push(tuple);
            rid_batch.push(rid);
        }

        Ok(!tuple_batch.is_empty())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
