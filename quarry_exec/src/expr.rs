//! Expression trees over tuples. Column references name a tuple side (0 =
//! the only/left input, 1 = the right input of a join) and a column index,
//! which is what the join rewrite pattern-matches on.

use crate::errors::ExecutionError;
use crate::tuple::Tuple;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    And,
    Or,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column { side: usize, index: usize },
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    pub fn column(index: usize) -> Expr {
        Expr::Column { side: 0, index }
    }

    pub fn join_column(side: usize, index: usize) -> Expr {
        Expr::Column { side, index }
    }

    pub fn literal(value: Value) -> Expr {
        Expr::Literal(value)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn evaluate(&self, tuple: &Tuple) -> Result<Value, ExecutionError> {
        self.evaluate_pair(tuple, None)
    }

    pub fn evaluate_join(&self, left: &Tuple, right: &Tuple) -> Result<Value, ExecutionError> {
        self.evaluate_pair(left, Some(right))
    }

    fn evaluate_pair(&self, left: &Tuple, right: Option<&Tuple>) -> Result<Value, ExecutionError> {
        match self {
            Expr::Column { side: 0, index } => left
                .values
                .get(*index)
                .cloned()
                .ok_or_else(|| ExecutionError::ColumnNotFound(format!("#{index}"))),
            Expr::Column { side: 1, index } => right
                .ok_or_else(|| {
                    ExecutionError::Internal("right-side column without a join input".to_string())
                })?
                .values
                .get(*index)
                .cloned()
                .ok_or_else(|| ExecutionError::ColumnNotFound(format!("#{index}"))),
            Expr::Column { side, .. } => Err(ExecutionError::Internal(format!(
                "unknown tuple side {side}"
            ))),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Binary { op, left: l, right: r } => {
                let a = l.evaluate_pair(left, right)?;
                let b = r.evaluate_pair(left, right)?;
                Ok(evaluate_binary(*op, &a, &b))
            }
        }
    }
}

/// Three-valued logic for AND/OR, NULL-propagating comparisons, and integer
/// arithmetic.
fn evaluate_binary(op: BinaryOp, a: &Value, b: &Value) -> Value {
    use std::cmp::Ordering;

    match op {
        BinaryOp::And => match (a, b) {
            (Value::Bool(false), _) | (_, Value::Bool(false)) => Value::Bool(false),
            (Value::Bool(true), Value::Bool(true)) => Value::Bool(true),
            _ => Value::Null,
        },
        BinaryOp::Or => match (a, b) {
            (Value::Bool(true), _) | (_, Value::Bool(true)) => Value::Bool(true),
            (Value::Bool(false), Value::Bool(false)) => Value::Bool(false),
            _ => Value::Null,
        },
        BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt
        | BinaryOp::GtEq => {
            let Some(ordering) = a.compare(b) else {
                return Value::Null;
            };
            let result = match op {
                BinaryOp::Eq => ordering == Ordering::Equal,
                BinaryOp::NotEq => ordering != Ordering::Equal,
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::LtEq => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                BinaryOp::GtEq => ordering != Ordering::Less,
                _ => unreachable!(),
            };
            Value::Bool(result)
        }
        BinaryOp::Plus | BinaryOp::Minus => match (a, b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(match op {
                BinaryOp::Plus => x.wrapping_add(*y),
                _ => x.wrapping_sub(*y),
            }),
            _ => Value::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<Value>) -> Tuple {
        Tuple::new(values)
    }

    #[test]
    fn comparisons_propagate_null() {
        let tuple = row(vec![Value::Int(3), Value::Null]);
        let eq = Expr::binary(BinaryOp::Eq, Expr::column(0), Expr::column(1));
        assert_eq!(eq.evaluate(&tuple).unwrap(), Value::Null);

        let lt = Expr::binary(BinaryOp::Lt, Expr::column(0), Expr::literal(Value::Int(5)));
        assert_eq!(lt.evaluate(&tuple).unwrap(), Value::Bool(true));
    }

    #[test]
    fn and_short_circuits_false_over_null() {
        let tuple = row(vec![Value::Null]);
        let expr = Expr::binary(
            BinaryOp::And,
            Expr::binary(BinaryOp::Eq, Expr::column(0), Expr::literal(Value::Int(1))),
            Expr::literal(Value::Bool(false)),
        );
        assert_eq!(expr.evaluate(&tuple).unwrap(), Value::Bool(false));
    }

    #[test]
    fn join_columns_read_from_both_sides() {
        let left = row(vec![Value::Int(1)]);
        let right = row(vec![Value::Int(1), Value::Text("x".into())]);
        let expr = Expr::binary(
            BinaryOp::Eq,
            Expr::join_column(0, 0),
            Expr::join_column(1, 0),
        );
        assert_eq!(expr.evaluate_join(&left, &right).unwrap(), Value::Bool(true));
    }
}
