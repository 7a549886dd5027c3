//! Top-N: a bounded heap of the N best tuples under the order-by
//! comparator. The heap keeps its worst entry on top; once it exceeds N the
//! worst is popped, and the survivors are drained and reversed so the best
//! comes out first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use flint::{Rid, INVALID_PAGE_ID};

use crate::errors::ExecutionError;
use crate::plan::OrderBy;
use crate::tuple::{Schema, Tuple};

use super::sort::{SortEntry, TupleComparator};
use super::{Executor, BATCH_SIZE};

struct HeapEntry {
    comparator: Arc<TupleComparator>,
    entry: SortEntry,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.comparator.compare(&self.entry, &other.entry) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator.compare(&self.entry, &other.entry)
    }
}

pub struct TopNExecutor {
    child: Box<dyn Executor>,
    comparator: Arc<TupleComparator>,
    n: usize,
    schema: Schema,
    top_entries: Vec<Tuple>,
    cursor: usize,
}

impl TopNExecutor {
    pub fn new(child: Box<dyn Executor>, order_by: Vec<OrderBy>, n: usize) -> Self {
        let schema = child.schema().clone();
        Self {
            child,
            comparator: Arc::new(TupleComparator::new(order_by)),
            n,
            schema,
            top_entries: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for TopNExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.top_entries.clear();
        self.cursor = 0;

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        while self.child.next(&mut tuples, &mut rids, BATCH_SIZE)? {
            for tuple in tuples.drain(..) {
                let entry = self.comparator.entry(tuple)?;
                heap.push(HeapEntry {
                    comparator: Arc::clone(&self.comparator),
                    entry,
                });
                if heap.len() > self.n {
                    heap.pop();
                }
            }
            rids.clear();
        }

        while let Some(top) = heap.pop() {
            self.top_entries.push(top.entry.tuple);
        }
        self.top_entries.reverse();
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

        while self.cursor < self.top_entries.len() && tuple_batch.len() < batch_size {
            tuple_batch.push(self.top_entries[self.cursor].clone());
            rid_batch.push((INVALID_PAGE_ID, 0));
            self.cursor += 1;
        }
        Ok(!tuple_batch.is_empty())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}
