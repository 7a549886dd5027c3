//! Table heap: a chain of slotted heap pages linked by `next_page_id`.
//! Inserts always append at the tail of the chain.

use std::sync::Arc;
use std::sync::Mutex;

use flint::buffer_pool::BufferPoolManager;
use flint::page::{HeapPage, TupleMeta};
use flint::{PageId, Rid, INVALID_PAGE_ID};

use crate::errors::ExecutionError;
use crate::tuple::Tuple;

pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
    /// Page the previous insert landed on; inserts walk forward from here
    /// to the tail.
    last_page_hint: Mutex<PageId>,
}

impl TableHeap {
    pub fn create(bpm: Arc<BufferPoolManager>) -> Result<Self, ExecutionError> {
        let first_page_id = bpm.new_page()?;
        {
            let mut guard = bpm.write_page(first_page_id)?;
            HeapPage::new(&mut *guard).init();
        }
        Ok(Self {
            bpm,
            first_page_id,
            last_page_hint: Mutex::new(first_page_id),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Appends a tuple at the tail, extending the chain when the tail page
    /// is full.
    pub fn insert_tuple(&self, meta: TupleMeta, tuple: &Tuple) -> Result<Rid, ExecutionError> {
        let payload = tuple.serialize();
        let mut current = *self.last_page_hint.lock().unwrap();

        loop {
            let mut guard = self.bpm.write_page(current)?;
            let mut page = HeapPage::new(&mut *guard);

            let next = page.next_page_id();
            if next != INVALID_PAGE_ID {
                current = next;
                continue;
            }

            if let Some(slot) = page.insert_tuple(&payload, meta) {
                *self.last_page_hint.lock().unwrap() = current;
                return Ok((current, slot));
            }

            // Tail page is full; extend the chain while still holding its
            // latch so only one inserter appends.
            let new_page_id = self.bpm.new_page()?;
            {
                let mut new_guard = self.bpm.write_page(new_page_id)?;
                let mut new_page = HeapPage::new(&mut *new_guard);
                new_page.init();
                if new_page.insert_tuple(&payload, meta).is_none() {
                    return Err(ExecutionError::Internal(format!(
                        "tuple of {} bytes does not fit in an empty page",
                        payload.len()
                    )));
                }
            }
            page.set_next_page_id(new_page_id);
            *self.last_page_hint.lock().unwrap() = new_page_id;
            return Ok((new_page_id, 0));
        }
    }

    pub fn tuple(&self, rid: Rid) -> Result<Option<(TupleMeta, Tuple)>, ExecutionError> {
        let (page_id, slot) = rid;
        let guard = self.bpm.read_page(page_id)?;
        let page = HeapPage::new(&*guard);
        let Some(meta) = page.tuple_meta(slot) else {
            return Ok(None);
        };
        let Some(payload) = page.tuple(slot) else {
            return Ok(None);
        };
        Ok(Some((meta, Tuple::deserialize(payload))))
    }

    pub fn update_tuple_meta(&self, rid: Rid, meta: TupleMeta) -> Result<bool, ExecutionError> {
        let (page_id, slot) = rid;
        let mut guard = self.bpm.write_page(page_id)?;
        Ok(HeapPage::new(&mut *guard).set_tuple_meta(slot, meta))
    }

    /// The position one past the current last tuple. Iterators stop here so
    /// rows appended mid-scan (an update re-inserting the rows it reads, for
    /// one) are not visited.
    pub fn end_position(&self) -> Result<(PageId, u16), ExecutionError> {
        let mut current = *self.last_page_hint.lock().unwrap();
        loop {
            let guard = self.bpm.read_page(current)?;
            let page = HeapPage::new(&*guard);
            let next = page.next_page_id();
            if next == INVALID_PAGE_ID {
                return Ok((current, page.tuple_count()));
            }
            current = next;
        }
    }

    /// Iterator over the tuples present right now.
    pub fn iter(&self) -> Result<TableIter<'_>, ExecutionError> {
        let stop = self.end_position()?;
        Ok(self.resume((self.first_page_id, 0), stop))
    }

    /// Resumes iteration at a saved position with a previously captured
    /// stop boundary.
    pub fn resume(&self, position: (PageId, u16), stop: (PageId, u16)) -> TableIter<'_> {
        TableIter {
            heap: self,
            page_id: position.0,
            slot: position.1,
            stop_page: stop.0,
            stop_slot: stop.1,
        }
    }
}

/// Streaming position over the page chain. Each step acquires the current
/// page briefly and copies the tuple out. The stop boundary freezes the
/// scan's extent at creation time.
pub struct TableIter<'a> {
    heap: &'a TableHeap,
    page_id: PageId,
    slot: u16,
    stop_page: PageId,
    stop_slot: u16,
}

impl TableIter<'_> {
    /// Next physical tuple (deleted ones included; callers filter on meta).
    pub fn next(&mut self) -> Result<Option<(Rid, TupleMeta, Tuple)>, ExecutionError> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let guard = self.heap.bpm.read_page(self.page_id)?;
            let page = HeapPage::new(&*guard);

            let at_stop_page = self.page_id == self.stop_page;
            let limit = if at_stop_page {
                self.stop_slot.min(page.tuple_count())
            } else {
                page.tuple_count()
            };

            if self.slot >= limit {
                if at_stop_page {
                    self.page_id = INVALID_PAGE_ID;
                    self.slot = 0;
                    return Ok(None);
                }
                self.page_id = page.next_page_id();
                self.slot = 0;
                continue;
            }

            let slot = self.slot;
            self.slot += 1;
            let Some(meta) = page.tuple_meta(slot) else {
                continue;
            };
            let Some(payload) = page.tuple(slot) else {
                continue;
            };
            return Ok(Some(((guard.page_id(), slot), meta, Tuple::deserialize(payload))));
        }
    }

    /// Position for resuming later with `TableHeap::resume`.
    pub fn position(&self) -> (PageId, u16) {
        (self.page_id, self.slot)
    }

    pub fn stop(&self) -> (PageId, u16) {
        (self.stop_page, self.stop_slot)
    }
}
