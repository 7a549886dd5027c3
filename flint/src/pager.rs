use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// File-backed disk provider. One file holds all pages, addressed by offset.
///
/// Deallocated pages go on a free list and are handed out again by
/// `allocate_page` before the file is extended.
pub struct Pager {
    file: File,
    pub num_pages: u32,
    free_pages: Vec<PageId>,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path_ref = path.as_ref();
        crate::flint_debug_log!("[Pager::open] Opening database file at: {path_ref:?}");
        if let Some(parent) = path_ref.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file,
            num_pages,
            free_pages: Vec::new(),
        })
    }

    /// Reads a page into `buf`. Pages past the end of the file read as zeroes.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> io::Result<()> {
        crate::flint_debug_log!("[Pager::read_page] Reading page_id: {page_id}");
        if page_id >= self.num_pages {
            buf.fill(0);
            return Ok(());
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < PAGE_SIZE {
            let n = self.file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        if total < PAGE_SIZE {
            buf[total..].fill(0);
        }
        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> io::Result<()> {
        crate::flint_debug_log!("[Pager::write_page] Writing page_id: {page_id}");
        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        self.file.sync_all()?;
        if page_id >= self.num_pages {
            self.num_pages = page_id + 1;
        }
        Ok(())
    }

    pub fn allocate_page(&mut self) -> io::Result<PageId> {
        if let Some(page_id) = self.free_pages.pop() {
            crate::flint_debug_log!("[Pager::allocate_page] Reusing freed page_id: {page_id}");
            return Ok(page_id);
        }
        if self.num_pages == INVALID_PAGE_ID {
            return Err(io::Error::other("page id space exhausted"));
        }
        let page_id = self.num_pages;
        self.num_pages += 1;
        crate::flint_debug_log!("[Pager::allocate_page] Allocating new page_id: {page_id}");
        Ok(page_id)
    }

    pub fn deallocate_page(&mut self, page_id: PageId) {
        if page_id < self.num_pages && !self.free_pages.contains(&page_id) {
            self.free_pages.push(page_id);
        }
    }
}
