//! External merge sort.
//!
//! Phase 1 packs the input into one-page sorted runs, accounting for the
//! packed size of each tuple. Phase 2 repeatedly merges pairs of runs into
//! longer multi-page runs, deleting the inputs' pages as they are consumed,
//! until one run remains; `next` streams it out in batches.

use std::cmp::Ordering;
use std::sync::Arc;

use flint::buffer_pool::{BufferPoolManager, ReadPageGuard};
use flint::intermediate_page::{stored_size, IntermediateResultPage, USABLE_SIZE};
use flint::{PageId, Rid, INVALID_PAGE_ID};

use crate::errors::ExecutionError;
use crate::plan::{OrderBy, OrderDirection};
use crate::tuple::{Schema, Tuple};
use crate::value::Value;

use super::{Executor, BATCH_SIZE};

/// A sort entry: the evaluated order-by key, the tuple, and its serialized
/// form (the page payload and the final tie-break).
pub struct SortEntry {
    pub key: Vec<Value>,
    pub tuple: Tuple,
    pub blob: Vec<u8>,
}

/// Compares entries by the order-by list, then by serialized tuple bytes so
/// the order is total even between equal keys.
pub struct TupleComparator {
    order_by: Vec<OrderBy>,
}

impl TupleComparator {
    pub fn new(order_by: Vec<OrderBy>) -> Self {
        Self { order_by }
    }

    pub fn entry(&self, tuple: Tuple) -> Result<SortEntry, ExecutionError> {
        let key = self
            .order_by
            .iter()
            .map(|order| order.expr.evaluate(&tuple))
            .collect::<Result<Vec<_>, _>>()?;
        let blob = tuple.serialize();
        Ok(SortEntry { key, tuple, blob })
    }

    pub fn compare(&self, a: &SortEntry, b: &SortEntry) -> Ordering {
        for (order, (ka, kb)) in self.order_by.iter().zip(a.key.iter().zip(&b.key)) {
            let ordering = compare_order_values(ka, kb, order);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.blob.cmp(&b.blob)
    }
}

/// One order-by key comparison in final-order terms: null placement is not
/// affected by the direction, only value comparisons are reversed for DESC.
pub(crate) fn compare_order_values(a: &Value, b: &Value, order: &OrderBy) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            if order.nulls_first() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, true) => {
            if order.nulls_first() {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, false) => {
            let ordering = a.compare(b).unwrap_or(Ordering::Equal);
            if order.direction == OrderDirection::Desc {
                ordering.reverse()
            } else {
                ordering
            }
        }
    }
}

/// A sorted run: tuples ordered within and across its pages. The run's
/// owner deletes the pages once the run is merged away or dropped.
pub struct MergeSortRun {
    pages: Vec<PageId>,
    bpm: Arc<BufferPoolManager>,
}

impl MergeSortRun {
    fn new(pages: Vec<PageId>, bpm: Arc<BufferPoolManager>) -> Self {
        Self { pages, bpm }
    }

    fn iter(&self) -> Result<RunIterator, ExecutionError> {
        RunIterator::new(Arc::clone(&self.bpm), self.pages.clone())
    }

    fn delete_pages(&mut self) -> Result<(), ExecutionError> {
        for page_id in self.pages.drain(..) {
            self.bpm.delete_page(page_id)?;
        }
        Ok(())
    }
}

/// Streams tuples out of one run, holding a read guard on the current page.
struct RunIterator {
    bpm: Arc<BufferPoolManager>,
    pages: Vec<PageId>,
    page_cursor: usize,
    tuple_cursor: u32,
    tuples_in_page: u32,
    guard: Option<ReadPageGuard>,
}

impl RunIterator {
    fn new(bpm: Arc<BufferPoolManager>, pages: Vec<PageId>) -> Result<Self, ExecutionError> {
        let mut iterator = Self {
            bpm,
            pages,
            page_cursor: 0,
            tuple_cursor: 0,
            tuples_in_page: 0,
            guard: None,
        };
        iterator.open_current_page()?;
        Ok(iterator)
    }

    fn open_current_page(&mut self) -> Result<(), ExecutionError> {
        self.guard = None;
        if self.page_cursor < self.pages.len() {
            let guard = self.bpm.read_page(self.pages[self.page_cursor])?;
            self.tuples_in_page = IntermediateResultPage::new(&*guard).num_tuples();
            self.guard = Some(guard);
        } else {
            self.tuples_in_page = 0;
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>, ExecutionError> {
        while self.guard.is_some() {
            if self.tuple_cursor < self.tuples_in_page {
                let guard = self.guard.as_ref().unwrap();
                let page = IntermediateResultPage::new(&**guard);
                let tuple = Tuple::deserialize(page.tuple(self.tuple_cursor));
                self.tuple_cursor += 1;
                return Ok(Some(tuple));
            }
            self.page_cursor += 1;
            self.tuple_cursor = 0;
            self.open_current_page()?;
        }
        Ok(None)
    }
}

pub struct ExternalMergeSortExecutor {
    bpm: Arc<BufferPoolManager>,
    child: Box<dyn Executor>,
    comparator: TupleComparator,
    schema: Schema,
    final_run: Option<MergeSortRun>,
    final_iter: Option<RunIterator>,
}

impl ExternalMergeSortExecutor {
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        child: Box<dyn Executor>,
        order_by: Vec<OrderBy>,
    ) -> Self {
        let schema = child.schema().clone();
        Self {
            bpm,
            child,
            comparator: TupleComparator::new(order_by),
            schema,
            final_run: None,
            final_iter: None,
        }
    }

    /// Sorts the pending entries and writes them as a one-page run.
    fn create_run(
        &self,
        entries: &mut Vec<SortEntry>,
        runs: &mut Vec<MergeSortRun>,
    ) -> Result<(), ExecutionError> {
        if entries.is_empty() {
            return Ok(());
        }
        entries.sort_by(|a, b| self.comparator.compare(a, b));

        let page_id = self.bpm.new_page()?;
        let mut guard = self.bpm.write_page(page_id)?;
        let mut page = IntermediateResultPage::new(&mut *guard);
        page.init();
        for entry in entries.drain(..) {
            if !page.insert_tuple(&entry.blob) {
                return Err(ExecutionError::Internal(
                    "sized run does not fit its page".to_string(),
                ));
            }
        }
        runs.push(MergeSortRun::new(vec![page_id], Arc::clone(&self.bpm)));
        Ok(())
    }

    /// Merges two runs into one, page by page, deleting the inputs after.
    fn merge_pair(
        &self,
        mut left: MergeSortRun,
        mut right: MergeSortRun,
    ) -> Result<MergeSortRun, ExecutionError> {
        let mut left_iter = left.iter()?;
        let mut right_iter = right.iter()?;
        let mut left_head = match left_iter.next()? {
            Some(tuple) => Some(self.comparator.entry(tuple)?),
            None => None,
        };
        let mut right_head = match right_iter.next()? {
            Some(tuple) => Some(self.comparator.entry(tuple)?),
            None => None,
        };

        let mut pages = Vec::new();
        let mut current_page_id = self.bpm.new_page()?;
        {
            let mut guard = self.bpm.write_page(current_page_id)?;
            IntermediateResultPage::new(&mut *guard).init();
        }
        pages.push(current_page_id);

        while left_head.is_some() || right_head.is_some() {
            let take_left = match (&left_head, &right_head) {
                (Some(l), Some(r)) => self.comparator.compare(l, r) != Ordering::Greater,
                (Some(_), None) => true,
                (None, _) => false,
            };
            let entry = if take_left {
                let entry = left_head.take().unwrap();
                left_head = match left_iter.next()? {
                    Some(tuple) => Some(self.comparator.entry(tuple)?),
                    None => None,
                };
                entry
            } else {
                let entry = right_head.take().unwrap();
                right_head = match right_iter.next()? {
                    Some(tuple) => Some(self.comparator.entry(tuple)?),
                    None => None,
                };
                entry
            };

            let mut guard = self.bpm.write_page(current_page_id)?;
            if !IntermediateResultPage::new(&mut *guard).insert_tuple(&entry.blob) {
                drop(guard);
                current_page_id = self.bpm.new_page()?;
                let mut guard = self.bpm.write_page(current_page_id)?;
                let mut page = IntermediateResultPage::new(&mut *guard);
                page.init();
                if !page.insert_tuple(&entry.blob) {
                    return Err(ExecutionError::Internal(
                        "merged tuple does not fit in an empty page".to_string(),
                    ));
                }
                pages.push(current_page_id);
            }
        }

        drop(left_iter);
        drop(right_iter);
        left.delete_pages()?;
        right.delete_pages()?;
        Ok(MergeSortRun::new(pages, Arc::clone(&self.bpm)))
    }
}

impl Executor for ExternalMergeSortExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.final_iter = None;
        if let Some(mut run) = self.final_run.take() {
            run.delete_pages()?;
        }

        // Phase 1: consume the child into one-page sorted runs. A run is
        // flushed once the next tuple's packed form would no longer fit.
        let mut runs: Vec<MergeSortRun> = Vec::new();
        let mut pending: Vec<SortEntry> = Vec::new();
        let mut pending_bytes = 0usize;

        let mut tuples = Vec::new();
        let mut rids = Vec::new();
        while self.child.next(&mut tuples, &mut rids, BATCH_SIZE)? {
            for tuple in tuples.drain(..) {
                let entry = self.comparator.entry(tuple)?;
                let entry_bytes = stored_size(entry.blob.len());
                if pending_bytes + entry_bytes > USABLE_SIZE {
                    self.create_run(&mut pending, &mut runs)?;
                    pending_bytes = 0;
                }
                pending_bytes += entry_bytes;
                pending.push(entry);
            }
            rids.clear();
        }
        self.create_run(&mut pending, &mut runs)?;

        // Phase 2: 2-way merge adjacent runs until one remains.
        while runs.len() > 1 {
            let mut next_runs = Vec::with_capacity((runs.len() + 1) / 2);
            let mut iter = runs.into_iter();
            while let Some(left) = iter.next() {
                match iter.next() {
                    Some(right) => next_runs.push(self.merge_pair(left, right)?),
                    None => next_runs.push(left),
                }
            }
            runs = next_runs;
        }

        if let Some(run) = runs.pop() {
            self.final_iter = Some(run.iter()?);
            self.final_run = Some(run);
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

        let Some(iter) = self.final_iter.as_mut() else {
            return Ok(false);
        };
        while tuple_batch.len() < batch_size {
            let Some(tuple) = iter.next()? else {
                break;
            };
            tuple_batch.push(tuple);
            rid_batch.push((INVALID_PAGE_ID, 0));
        }
        Ok(!tuple_batch.is_empty())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }
}

impl Drop for ExternalMergeSortExecutor {
    fn drop(&mut self) {
        self.final_iter = None;
        if let Some(mut run) = self.final_run.take() {
            let _ = run.delete_pages();
        }
    }
}
