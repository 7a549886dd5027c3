//! Range scan over the leaf chain. At most one leaf is read-latched at a
//! time; the current latch is released before the next leaf is acquired.

use std::sync::Arc;

use crate::buffer_pool::{BufferPoolManager, ReadPageGuard};
use crate::error::Result;
use crate::{PageId, Rid, INVALID_PAGE_ID};

use super::node::{Key, LeafNode};

pub struct TreeIterator {
    bpm: Arc<BufferPoolManager>,
    guard: Option<ReadPageGuard>,
    page_id: PageId,
    index: usize,
}

impl TreeIterator {
    /// Positions on the first live entry at or after (`page_id`, `index`),
    /// hopping pages and skipping tombstones as needed.
    pub(super) fn new(
        bpm: Arc<BufferPoolManager>,
        guard: Option<ReadPageGuard>,
        page_id: PageId,
        index: usize,
    ) -> Result<Self> {
        let mut iterator = Self {
            bpm,
            guard,
            page_id,
            index,
        };
        iterator.settle()?;
        Ok(iterator)
    }

    pub(super) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            guard: None,
            page_id: INVALID_PAGE_ID,
            index: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }

    /// The entry under the cursor; `None` at end.
    pub fn current(&self) -> Option<(Key, Rid)> {
        let guard = self.guard.as_ref()?;
        let leaf = LeafNode::new(&**guard);
        Some((leaf.key_at(self.index), leaf.value_at(self.index)))
    }

    /// Steps to the next live entry.
    pub fn advance(&mut self) -> Result<()> {
        if self.is_end() {
            return Ok(());
        }
        self.index += 1;
        self.settle()
    }

    /// Moves the cursor forward over tombstones and exhausted pages until it
    /// rests on a live entry or falls off the chain.
    fn settle(&mut self) -> Result<()> {
        while self.page_id != INVALID_PAGE_ID {
            let Some(guard) = self.guard.as_ref() else {
                self.page_id = INVALID_PAGE_ID;
                self.index = 0;
                break;
            };
            let (size, next_page_id, tombstoned) = {
                let leaf = LeafNode::new(&**guard);
                (
                    leaf.size(),
                    leaf.next_page_id(),
                    self.index < leaf.size() && leaf.is_tombstone(self.index),
                )
            };

            if self.index >= size {
                // Release before chasing the link; holding both would court
                // deadlock with a writer merging right-to-left.
                self.guard = None;
                if next_page_id != INVALID_PAGE_ID {
                    self.guard = Some(self.bpm.read_page(next_page_id)?);
                    self.page_id = next_page_id;
                    self.index = 0;
                    continue;
                }
                self.page_id = INVALID_PAGE_ID;
                self.index = 0;
                break;
            }

            if tombstoned {
                self.index += 1;
            } else {
                break;
            }
        }
        Ok(())
    }
}

impl Iterator for TreeIterator {
    type Item = Result<(Key, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.current()?;
        match self.advance() {
            Ok(()) => Some(Ok(entry)),
            Err(err) => Some(Err(err)),
        }
    }
}
