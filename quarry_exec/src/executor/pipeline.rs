//! Row-shaping executors: filter, literal values, and limit/offset.

use flint::{Rid, INVALID_PAGE_ID};

use crate::errors::ExecutionError;
use crate::expr::Expr;
use crate::tuple::{Schema, Tuple};

use super::Executor;

pub struct FilterExecutor {
    child: Box<dyn Executor>,
    predicate: Expr,
    schema: Schema,
}

impl FilterExecutor {
    pub fn new(child: Box<dyn Executor>, predicate: Expr) -> Self {
        let schema = child.schema().clone();
        Self {
            child,
            predicate,
            schema,
        }
    }
}

impl Executor for FilterExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()
    }

    fn next(
        &mut self,
        tuple_batch: &mut Vec<Tuple>,
        rid_batch: &mut Vec<Rid>,
        batch_size: usize,
    ) -> Result<bool, ExecutionError> {
        tuple_batch.clear();
        rid_batch.clear();

        let mut child_tuples = Vec::new();
        let mut child_rids = Vec::new();
        while tuple_batch.is_empty() {
            if !self.child.next(&mut child_tuples, &mut child_rids, batch_size)? {
                return Ok(false);
            }
            for (tuple, rid) in child_tuples.drain(..).zip(child_rids.drain(..)) {
                if self.predicate.evaluate(&tuple)?.is_true() {
                    tuple_batch.push(tuple);
                    rid_batch.push(rid);
                }
            }
        }
        Ok(true)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Emits a fixed set of literal rows. The leaf under INSERT plans and the
/// usual source in executor tests.
pub struct ValuesExecutor {
    rows: Vec<Vec<Expr>>,
    schema: Schema,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(rows: Vec<Vec<Expr>>, schema: Schema) -> Self {
        Self {
            rows,
            schema,
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.cursor = 0;
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

        let empty = Tuple::new(Vec::new());
        while self.cursor < self.rows.len() && tuple_batch.len() < batch_size {
            let row = &self.rows[self.cursor];
            self.cursor += 1;
            let mut values = Vec::with_capacity(row.len());
            for expr in row {
                values.push(expr.evaluate(&empty)?);
            }
            tuple_batch.push(Tuple::new(values));
            rid_batch.push((INVALID_PAGE_ID, 0));
        }
        Ok(!tuple_batch.is_empty())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

pub struct LimitExecutor {
    child: Box<dyn Executor>,
    limit: Option<usize>,
    offset: usize,
    schema: Schema,
    rows_skipped: usize,
    rows_returned: usize,
}

impl LimitExecutor {
    pub fn new(child: Box<dyn Executor>, limit: Option<usize>, offset: usize) -> Self {
        let schema = child.schema().clone();
        Self {
            child,
            limit,
            offset,
            schema,
            rows_skipped: 0,
            rows_returned: 0,
        }
    }
}

impl Executor for LimitExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.rows_skipped = 0;
        self.rows_returned = 0;
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

        let mut child_tuples = Vec::new();
        let mut child_rids = Vec::new();
        loop {
            if let Some(limit) = self.limit {
                if self.rows_returned >= limit {
                    return Ok(!tuple_batch.is_empty());
                }
            }
            if tuple_batch.len() >= batch_size {
                return Ok(true);
            }

            // Pull exactly what can still be skipped plus emitted, so no
            // child tuple is consumed without a destination.
            let remaining_offset = self.offset.saturating_sub(self.rows_skipped);
            let mut want = remaining_offset + (batch_size - tuple_batch.len());
            if let Some(limit) = self.limit {
                want = want.min(remaining_offset + (limit - self.rows_returned));
            }
            if !self.child.next(&mut child_tuples, &mut child_rids, want)? {
                return Ok(!tuple_batch.is_empty());
            }
            for (tuple, rid) in child_tuples.drain(..).zip(child_rids.drain(..)) {
                if self.rows_skipped < self.offset {
                    self.rows_skipped += 1;
                    continue;
                }
                tuple_batch.push(tuple);
                rid_batch.push(rid);
                self.rows_returned += 1;
            }
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, Expr};
    use crate::tuple::Column;
    use crate::value::{DataType, Value};

    fn number_rows(n: i64) -> ValuesExecutor {
        let rows = (0..n)
            .map(|i| vec![Expr::literal(Value::Int(i))])
            .collect();
        ValuesExecutor::new(rows, vec![Column::new("n", DataType::Int)])
    }

    fn collect(executor: &mut dyn Executor) -> Vec<Tuple> {
        super::super::drain(executor).unwrap()
    }

    #[test]
    fn filter_keeps_matching_rows() {
        let child = Box::new(number_rows(10));
        let predicate = Expr::binary(
            BinaryOp::Lt,
            Expr::column(0),
            Expr::literal(Value::Int(3)),
        );
        let mut filter = FilterExecutor::new(child, predicate);
        let rows = collect(&mut filter);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].values, vec![Value::Int(0)]);
        assert_eq!(rows[2].values, vec![Value::Int(2)]);
    }

    #[test]
    fn limit_and_offset_compose() {
        let child = Box::new(number_rows(10));
        let mut limit = LimitExecutor::new(child, Some(3), 2);
        let rows = collect(&mut limit);
        assert_eq!(
            rows.iter().map(|t| t.values[0].clone()).collect::<Vec<_>>(),
            vec![Value::Int(2), Value::Int(3), Value::Int(4)]
        );
    }

    #[test]
    fn offset_past_the_end_yields_nothing() {
        let child = Box::new(number_rows(2));
        let mut limit = LimitExecutor::new(child, None, 5);
        assert!(collect(&mut limit).is_empty());
    }

    #[test]
    fn init_resets_the_stream() {
        let mut values = number_rows(4);
        let first = collect(&mut values);
        let second = collect(&mut values);
        assert_eq!(first, second);
    }
}
