//! Slotted page for spilled executor state (sort runs, join partitions).
//!
//! Header `{ num_tuples, free_space_offset }`, then a slot directory of u32
//! offsets growing down from the header; tuples are length-prefixed blobs
//! packed from the page tail toward the head. Append-only: there is no
//! in-place delete and writers never compact.

use std::borrow::{Borrow, BorrowMut};

use crate::PAGE_SIZE;

pub type PageBuf = [u8; PAGE_SIZE];

const HEADER_SIZE: usize = 8;
const SLOT_SIZE: usize = 4;
const LEN_PREFIX_SIZE: usize = 4;

pub struct IntermediateResultPage<B> {
    buf: B,
}

impl<B: Borrow<PageBuf>> IntermediateResultPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.buf.borrow()[offset..offset + 4].try_into().unwrap())
    }

    pub fn num_tuples(&self) -> u32 {
        self.read_u32(0)
    }

    fn free_space_offset(&self) -> u32 {
        self.read_u32(4)
    }

    /// The tuple blob at `index`.
    pub fn tuple(&self, index: u32) -> &[u8] {
        let slot_offset = HEADER_SIZE + index as usize * SLOT_SIZE;
        let tuple_offset = self.read_u32(slot_offset) as usize;
        let length = self.read_u32(tuple_offset) as usize;
        &self.buf.borrow()[tuple_offset + LEN_PREFIX_SIZE..tuple_offset + LEN_PREFIX_SIZE + length]
    }
}

impl<B: Borrow<PageBuf> + BorrowMut<PageBuf>> IntermediateResultPage<B> {
    fn write_u32(&mut self, offset: usize, value: u32) {
        self.buf.borrow_mut()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn init(&mut self) {
        self.write_u32(0, 0);
        self.write_u32(4, PAGE_SIZE as u32);
    }

    /// Appends a tuple blob. Returns false when the next slot entry plus the
    /// tuple would overlap free space.
    pub fn insert_tuple(&mut self, tuple: &[u8]) -> bool {
        let total_tuple_size = LEN_PREFIX_SIZE + tuple.len();
        let num_tuples = self.num_tuples() as usize;
        let free_space_offset = self.free_space_offset() as usize;

        if free_space_offset < HEADER_SIZE + (num_tuples + 1) * SLOT_SIZE + total_tuple_size {
            return false;
        }

        let tuple_offset = free_space_offset - total_tuple_size;
        self.write_u32(tuple_offset, tuple.len() as u32);
        self.buf.borrow_mut()[tuple_offset + LEN_PREFIX_SIZE..tuple_offset + total_tuple_size]
            .copy_from_slice(tuple);

        self.write_u32(HEADER_SIZE + num_tuples * SLOT_SIZE, tuple_offset as u32);
        self.write_u32(0, num_tuples as u32 + 1);
        self.write_u32(4, tuple_offset as u32);
        true
    }
}

/// Bytes a tuple blob occupies in a page, slot entry included.
pub fn stored_size(tuple_len: usize) -> usize {
    SLOT_SIZE + LEN_PREFIX_SIZE + tuple_len
}

/// Bytes available for tuples and slots in an empty page.
pub const USABLE_SIZE: usize = PAGE_SIZE - HEADER_SIZE;
