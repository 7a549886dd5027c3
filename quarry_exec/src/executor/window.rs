//! Window functions. The child is buffered fully; each window column is
//! computed independently over a sort permutation of the input, partition
//! by partition, with standard RANGE framing when ORDER BY is present.

use std::cmp::Ordering;
use std::collections::HashMap;

use flint::{Rid, INVALID_PAGE_ID};

use crate::errors::ExecutionError;
use crate::plan::{WindowColumn, WindowFunctionType, WindowSpec};
use crate::tuple::{Schema, Tuple};
use crate::value::Value;

use super::sort::compare_order_values;
use super::{Executor, BATCH_SIZE};

pub struct WindowFunctionExecutor {
    child: Box<dyn Executor>,
    columns: Vec<WindowColumn>,
    schema: Schema,
    computed: Vec<Tuple>,
    cursor: usize,
}

impl WindowFunctionExecutor {
    pub fn new(child: Box<dyn Executor>, columns: Vec<WindowColumn>, schema: Schema) -> Self {
        Self {
            child,
            columns,
            schema,
            computed: Vec::new(),
            cursor: 0,
        }
    }

    fn materialize_child(&mut self) -> Result<Vec<Tuple>, ExecutionError> {
        let mut all = Vec::new();
        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        while self.child.next(&mut tuples, &mut rids, BATCH_SIZE)? {
            all.append(&mut tuples);
            rids.clear();
        }
        Ok(all)
    }

    /// Computes one window column over every input row, returned in input
    /// order. `indices` is the shared sort permutation; it is left in this
    /// function's sorted order, which also becomes the output order.
    fn compute_function(
        &self,
        func: &WindowFunctionType,
        spec: &WindowSpec,
        rows: &[Tuple],
        indices: &mut [usize],
    ) -> Result<Vec<Value>, ExecutionError> {
        let n = rows.len();

        let mut partition_keys = Vec::with_capacity(n);
        let mut order_keys = Vec::with_capacity(n);
        let mut args = Vec::with_capacity(n);
        for row in rows {
            partition_keys.push(
                spec.partition_by
                    .iter()
                    .map(|expr| expr.evaluate(row))
                    .collect::<Result<Vec<_>, _>>()?,
            );
            order_keys.push(
                spec.order_by
                    .iter()
                    .map(|order| order.expr.evaluate(row))
                    .collect::<Result<Vec<_>, _>>()?,
            );
            args.push(argument_value(func, row)?);
        }

        indices.sort_by(|&a, &b| {
            for (ka, kb) in partition_keys[a].iter().zip(&partition_keys[b]) {
                let ordering = ka.cmp_with_nulls(kb, true);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            for (order, (ka, kb)) in spec
                .order_by
                .iter()
                .zip(order_keys[a].iter().zip(&order_keys[b]))
            {
                let ordering = compare_order_values(ka, kb, order);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        // NULLs group together here: a partition key of NULL is one
        // partition, as are equal order keys one peer group.
        let same_partition = |a: usize, b: usize| partition_keys[a] == partition_keys[b];
        let same_peers = |a: usize, b: usize| order_keys[a] == order_keys[b];

        let mut results = vec![Value::Null; n];
        let mut start = 0;
        while start < n {
            let mut end = start + 1;
            while end < n && same_partition(indices[start], indices[end]) {
                end += 1;
            }

            if spec.order_by.is_empty() {
                // The whole-partition aggregate value goes to every row.
                let mut acc = initial_value(func);
                for &index in &indices[start..end] {
                    accumulate(func, &mut acc, &args[index]);
                }
                let value = finish_value(func, acc);
                for &index in &indices[start..end] {
                    results[index] = value.clone();
                }
            } else {
                // RANGE framing: each row sees the aggregate up to and
                // including its peer group. RANK numbers peer groups.
                let mut acc = initial_value(func);
                let mut position = start;
                while position < end {
                    let mut peers_end = position + 1;
                    while peers_end < end && same_peers(indices[position], indices[peers_end]) {
                        peers_end += 1;
                    }

                    if matches!(func, WindowFunctionType::Rank) {
                        let rank = Value::Int((position - start) as i64 + 1);
                        for &index in &indices[position..peers_end] {
                            results[index] = rank.clone();
                        }
                    } else {
                        for &index in &indices[position..peers_end] {
                            accumulate(func, &mut acc, &args[index]);
                        }
                        let value = finish_value(func, acc.clone());
                        for &index in &indices[position..peers_end] {
                            results[index] = value.clone();
                        }
                    }
                    position = peers_end;
                }
            }
            start = end;
        }
        Ok(results)
    }
}

fn argument_value(func: &WindowFunctionType, row: &Tuple) -> Result<Value, ExecutionError> {
    match func {
        WindowFunctionType::Count(expr)
        | WindowFunctionType::Sum(expr)
        | WindowFunctionType::Min(expr)
        | WindowFunctionType::Max(expr) => expr.evaluate(row),
        WindowFunctionType::CountStar | WindowFunctionType::Rank => Ok(Value::Null),
    }
}

fn initial_value(func: &WindowFunctionType) -> Value {
    match func {
        WindowFunctionType::CountStar => Value::Int(0),
        _ => Value::Null,
    }
}

/// One accumulation step. NULL inputs are skipped by everything except
/// `COUNT(*)`; the accumulator stays NULL until the first non-null input.
fn accumulate(func: &WindowFunctionType, acc: &mut Value, input: &Value) {
    match func {
        WindowFunctionType::CountStar => {
            *acc = acc.add(&Value::Int(1)).unwrap_or(Value::Int(1));
        }
        WindowFunctionType::Count(_) => {
            if !input.is_null() {
                *acc = match acc {
                    Value::Null => Value::Int(1),
                    ref other => other.add(&Value::Int(1)).unwrap_or(Value::Int(1)),
                };
            }
        }
        WindowFunctionType::Sum(_) => {
            if !input.is_null() {
                *acc = match acc {
                    Value::Null => input.clone(),
                    ref other => other.add(input).unwrap_or_else(|| (**other).clone()),
                };
            }
        }
        WindowFunctionType::Min(_) => {
            if !input.is_null()
                && (acc.is_null() || input.compare(acc) == Some(Ordering::Less))
            {
                *acc = input.clone();
            }
        }
        WindowFunctionType::Max(_) => {
            if !input.is_null()
                && (acc.is_null() || input.compare(acc) == Some(Ordering::Greater))
            {
                *acc = input.clone();
            }
        }
        WindowFunctionType::Rank => {}
    }
}

/// An all-null COUNT yields 0, not NULL.
fn finish_value(func: &WindowFunctionType, acc: Value) -> Value {
    match func {
        WindowFunctionType::CountStar | WindowFunctionType::Count(_) if acc.is_null() => {
            Value::Int(0)
        }
        _ => acc,
    }
}

impl Executor for WindowFunctionExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.computed.clear();
        self.cursor = 0;

        let rows = self.materialize_child()?;
        if rows.is_empty() {
            return Ok(());
        }
        let n = rows.len();
        let mut indices: Vec<usize> = (0..n).collect();

        let mut window_results: HashMap<usize, Vec<Value>> = HashMap::new();
        for (col_idx, column) in self.columns.iter().enumerate() {
            if let WindowColumn::Function { func, spec } = column {
                let results = self.compute_function(func, spec, &rows, &mut indices)?;
                window_results.insert(col_idx, results);
            }
        }

        // Rows are emitted in the permutation's final order.
        self.computed.reserve(n);
        for position in 0..n {
            let index = indices[position];
            let mut values = Vec::with_capacity(self.columns.len());
            for (col_idx, column) in self.columns.iter().enumerate() {
                match column {
                    WindowColumn::Function { .. } => {
                        values.push(window_results[&col_idx][index].clone());
                    }
                    WindowColumn::Expr(expr) => {
                        values.push(expr.evaluate(&rows[index])?);
                    }
                }
            }
            self.computed.push(Tuple::new(values));
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

        while self.cursor < self.computed.len() && tuple_batch.len() < batch_size {
            tuple_batch.push(self.computed[self.cursor].clone());
            rid_batch.push((INVALID_PAGE_ID, 0));
            self.cursor += 1;
        }
        Ok(!tuple_batch.is_empty())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
