//! Nested-loop join. The right side is buffered in memory once; each left
//! tuple is compared against every right tuple. INNER and LEFT only.

use flint::{Rid, INVALID_PAGE_ID};

use crate::errors::ExecutionError;
use crate::expr::Expr;
use crate::plan::JoinType;
use crate::tuple::{Schema, Tuple};
use crate::value::Value;

use super::Executor;

pub struct NestedLoopJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    predicate: Expr,
    join_type: JoinType,
    schema: Schema,
    right_width: usize,

    right_tuples: Vec<Tuple>,
    left_batch: Vec<Tuple>,
    left_cursor: usize,
    right_cursor: usize,
    left_matched: bool,
}

impl NestedLoopJoinExecutor {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        predicate: Expr,
        join_type: JoinType,
    ) -> Result<Self, ExecutionError> {
        if !matches!(join_type, JoinType::Inner | JoinType::Left) {
            return Err(ExecutionError::NotImplemented(format!(
                "join type {join_type:?} is not supported by nested-loop join"
            )));
        }
        let mut schema = left.schema().clone();
        schema.extend(right.schema().clone());
        let right_width = right.schema().len();
        Ok(Self {
            left,
            right,
            predicate,
            join_type,
            schema,
            right_width,
            right_tuples: Vec::new(),
            left_batch: Vec::new(),
            left_cursor: 0,
            right_cursor: 0,
            left_matched: false,
        })
    }

    fn joined(&self, left: &Tuple, right: &Tuple) -> Tuple {
        let mut values = left.values.clone();
        values.extend(right.values.iter().cloned());
        Tuple::new(values)
    }

    fn left_padded(&self, left: &Tuple) -> Tuple {
        let mut values = left.values.clone();
        values.extend(std::iter::repeat(Value::Null).take(self.right_width));
        Tuple::new(values)
    }
}

impl Executor for NestedLoopJoinExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.left.init()?;
        self.right.init()?;

        self.right_tuples.clear();
        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        while self.right.next(&mut tuples, &mut rids, super::BATCH_SIZE)? {
            self.right_tuples.append(&mut tuples);
            rids.clear();
        }

        self.left_batch.clear();
        self.left_cursor = 0;
        self.right_cursor = 0;
        self.left_matched = false;
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

        let mut rids = Vec::new();
        while tuple_batch.len() < batch_size {
            if self.left_cursor >= self.left_batch.len() {
                if !self.left.next(&mut self.left_batch, &mut rids, batch_size)? {
                    break;
                }
                self.left_cursor = 0;
                self.right_cursor = 0;
                self.left_matched = false;
            }

            let left_tuple = &self.left_batch[self.left_cursor];
            let mut emitted_full = false;
            while self.right_cursor < self.right_tuples.len() {
                if tuple_batch.len() >= batch_size {
                    emitted_full = true;
                    break;
                }
                let right_tuple = &self.right_tuples[self.right_cursor];
                self.right_cursor += 1;
                if self
                    .predicate
                    .evaluate_join(left_tuple, right_tuple)?
                    .is_true()
                {
                    tuple_batch.push(self.joined(left_tuple, right_tuple));
                    rid_batch.push((INVALID_PAGE_ID, 0));
                    self.left_matched = true;
                }
            }
            if emitted_full {
                break;
            }

            if !self.left_matched && self.join_type == JoinType::Left {
                tuple_batch.push(self.left_padded(left_tuple));
                rid_batch.push((INVALID_PAGE_ID, 0));
            }
            self.left_cursor += 1;
            self.right_cursor = 0;
            self.left_matched = false;
        }

        Ok(!tuple_batch.is_empty())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::pipeline::ValuesExecutor;
    use crate::expr::BinaryOp;
    use crate::tuple::Column;
    use crate::value::DataType;

    fn side(rows: Vec<Vec<Value>>, names: &[&str]) -> Box<dyn Executor> {
        let schema = names
            .iter()
            .map(|n| Column::new(n, DataType::Int))
            .collect();
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Expr::literal).collect())
            .collect();
        Box::new(ValuesExecutor::new(rows, schema))
    }

    #[test]
    fn left_join_pads_unmatched_rows() {
        let left = side(
            vec![vec![Value::Int(1)], vec![Value::Int(2)]],
            &["l"],
        );
        let right = side(vec![vec![Value::Int(2)]], &["r"]);
        let predicate = Expr::binary(
            BinaryOp::Eq,
            Expr::join_column(0, 0),
            Expr::join_column(1, 0),
        );
        let mut join =
            NestedLoopJoinExecutor::new(left, right, predicate, JoinType::Left).unwrap();
        let rows = crate::executor::drain(&mut join).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values, vec![Value::Int(1), Value::Null]);
        assert_eq!(rows[1].values, vec![Value::Int(2), Value::Int(2)]);
    }

    #[test]
    fn unsupported_join_types_fail_at_construction() {
        let left = side(vec![], &["l"]);
        let right = side(vec![], &["r"]);
        let predicate = Expr::literal(Value::Bool(true));
        let result = NestedLoopJoinExecutor::new(left, right, predicate, JoinType::Full);
        assert!(matches!(result, Err(ExecutionError::NotImplemented(_))));
    }
}
