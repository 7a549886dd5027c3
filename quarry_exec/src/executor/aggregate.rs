//! Hash aggregation over optional group-by keys.

use std::cmp::Ordering;
use std::collections::HashMap;

use flint::{Rid, INVALID_PAGE_ID};

use crate::errors::ExecutionError;
use crate::expr::Expr;
use crate::plan::AggregateType;
use crate::tuple::{Schema, Tuple};
use crate::value::Value;

use super::{Executor, BATCH_SIZE};

pub struct AggregateExecutor {
    child: Box<dyn Executor>,
    group_by: Vec<Expr>,
    aggregates: Vec<AggregateType>,
    schema: Schema,
    results: Vec<Tuple>,
    cursor: usize,
}

impl AggregateExecutor {
    pub fn new(
        child: Box<dyn Executor>,
        group_by: Vec<Expr>,
        aggregates: Vec<AggregateType>,
        schema: Schema,
    ) -> Self {
        Self {
            child,
            group_by,
            aggregates,
            schema,
            results: Vec::new(),
            cursor: 0,
        }
    }

    fn initial_accumulators(&self) -> Vec<Value> {
        self.aggregates
            .iter()
            .map(|aggregate| match aggregate {
                AggregateType::CountStar => Value::Int(0),
                _ => Value::Null,
            })
            .collect()
    }
}

fn accumulate(aggregate: &AggregateType, acc: &mut Value, row: &Tuple) -> Result<(), ExecutionError> {
    let input = match aggregate {
        AggregateType::CountStar => Value::Null,
        AggregateType::Count(expr)
        | AggregateType::Sum(expr)
        | AggregateType::Min(expr)
        | AggregateType::Max(expr) => expr.evaluate(row)?,
    };

    match aggregate {
        AggregateType::CountStar => {
            *acc = acc.add(&Value::Int(1)).unwrap_or(Value::Int(1));
        }
        AggregateType::Count(_) => {
            if !input.is_null() {
                *acc = match acc {
                    Value::Null => Value::Int(1),
                    ref other => other.add(&Value::Int(1)).unwrap_or(Value::Int(1)),
                };
            }
        }
        AggregateType::Sum(_) => {
            if !input.is_null() {
                *acc = match acc {
                    Value::Null => input,
                    ref other => other.add(&input).unwrap_or_else(|| (**other).clone()),
                };
            }
        }
        AggregateType::Min(_) => {
            if !input.is_null() && (acc.is_null() || input.compare(acc) == Some(Ordering::Less)) {
                *acc = input;
            }
        }
        AggregateType::Max(_) => {
            if !input.is_null() && (acc.is_null() || input.compare(acc) == Some(Ordering::Greater))
            {
                *acc = input;
            }
        }
    }
    Ok(())
}

fn finish(aggregate: &AggregateType, acc: Value) -> Value {
    match aggregate {
        AggregateType::CountStar | AggregateType::Count(_) if acc.is_null() => Value::Int(0),
        _ => acc,
    }
}

impl Executor for AggregateExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.results.clear();
        self.cursor = 0;

        // NULL group keys compare equal here, so NULLs share a group.
        let mut groups: HashMap<Vec<Value>, Vec<Value>> = HashMap::new();
        let initial = self.initial_accumulators();

        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        while self.child.next(&mut tuples, &mut rids, BATCH_SIZE)? {
            for tuple in tuples.drain(..) {
                let key = self
                    .group_by
                    .iter()
                    .map(|expr| expr.evaluate(&tuple))
                    .collect::<Result<Vec<_>, _>>()?;

                let accumulators = groups.entry(key).or_insert_with(|| initial.clone());
                for (aggregate, acc) in self.aggregates.iter().zip(accumulators.iter_mut()) {
                    accumulate(aggregate, acc, &tuple)?;
                }
            }
            rids.clear();
        }

        if groups.is_empty() && self.group_by.is_empty() {
            // A global aggregate over nothing still emits one row.
            groups.insert(Vec::new(), initial);
        }

        for (key, accumulators) in groups {
            let mut values = key;
            for (aggregate, acc) in self.aggregates.iter().zip(accumulators) {
                values.push(finish(aggregate, acc));
            }
            self.results.push(Tuple::new(values));
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

        while self.cursor < self.results.len() && tuple_batch.len() < batch_size {
            tuple_batch.push(self.results[self.cursor].clone());
            rid_batch.push((INVALID_PAGE_ID, 0));
            self.cursor += 1;
        }
        Ok(!tuple_batch.is_empty())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
