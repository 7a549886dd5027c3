//! Manages the buffer pool: a fixed set of in-memory frames caching disk
//! pages, with guarded access and ARC-driven eviction.

use std::collections::HashMap;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, MutexGuard, RawRwLock, RwLock};

use crate::disk_scheduler::{DiskRequest, DiskScheduler, PageBuf};
use crate::error::{FlintError, Result};
use crate::pager::Pager;
use crate::replacer::{AccessType, ArcReplacer};
use crate::{FrameId, PageId, PAGE_SIZE};

type FrameLatchRead = ArcRwLockReadGuard<RawRwLock, Box<PageBuf>>;
type FrameLatchWrite = ArcRwLockWriteGuard<RawRwLock, Box<PageBuf>>;

struct Frame {
    data: Arc<RwLock<Box<PageBuf>>>,
    is_dirty: AtomicBool,
}

struct FrameMeta {
    page_id: Option<PageId>,
    pin_count: u32,
}

/// Page table, frame metadata, free list and replacer share one mutex. The
/// mutex is never held across disk I/O; the frame latch is what keeps a
/// loading frame private until its read lands.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    meta: Vec<FrameMeta>,
    free_list: Vec<FrameId>,
    replacer: ArcReplacer,
}

/// The buffer pool manager.
///
/// Lock order is pool state -> frame latch; guards release the latch before
/// unpinning. Do not flush a page while holding your own write guard on it.
pub struct BufferPoolManager {
    pub pager: Arc<Mutex<Pager>>,
    frames: Vec<Frame>,
    state: Mutex<PoolState>,
    scheduler: DiskScheduler,
}

impl BufferPoolManager {
    pub fn new(pager: Pager, pool_size: usize) -> Self {
        let pager = Arc::new(Mutex::new(pager));
        let scheduler = DiskScheduler::new(Arc::clone(&pager));

        let mut frames = Vec::with_capacity(pool_size);
        let mut meta = Vec::with_capacity(pool_size);
        let mut free_list = Vec::with_capacity(pool_size);
        for frame_id in (0..pool_size).rev() {
            free_list.push(frame_id);
        }
        for _ in 0..pool_size {
            frames.push(Frame {
                data: Arc::new(RwLock::new(Box::new([0u8; PAGE_SIZE]))),
                is_dirty: AtomicBool::new(false),
            });
            meta.push(FrameMeta {
                page_id: None,
                pin_count: 0,
            });
        }

        Self {
            pager,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                meta,
                free_list,
                replacer: ArcReplacer::new(pool_size),
            }),
            scheduler,
        }
    }

    /// Allocates a fresh page on disk and materializes a zeroed, dirty frame
    /// for it. The page is returned unpinned; acquire a guard to use it.
    pub fn new_page(self: &Arc<Self>) -> Result<PageId> {
        let page_id = self
            .pager
            .lock()
            .allocate_page()
            .map_err(|_| FlintError::OutOfStorage)?;
        let state = self.state.lock();
        let (frame_id, latch) = self.load_page(state, page_id, AccessType::Unknown, false)?;
        drop(latch);
        self.unpin(frame_id);
        Ok(page_id)
    }

    pub fn read_page(self: &Arc<Self>, page_id: PageId) -> Result<ReadPageGuard> {
        self.read_page_with(page_id, AccessType::Unknown)
    }

    /// Locates or loads the page, pins it, and takes the frame latch in
    /// shared mode. Blocks until the latch is available.
    pub fn read_page_with(
        self: &Arc<Self>,
        page_id: PageId,
        access: AccessType,
    ) -> Result<ReadPageGuard> {
        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            pin_resident(&mut state, frame_id, page_id, access);
            drop(state);
            let data = self.frames[frame_id].data.read_arc();
            return Ok(ReadPageGuard {
                bpm: Arc::clone(self),
                page_id,
                frame_id,
                data: Some(data),
            });
        }

        let (frame_id, latch) = self.load_page(state, page_id, access, true)?;
        let data = FrameLatchWrite::downgrade(latch);
        Ok(ReadPageGuard {
            bpm: Arc::clone(self),
            page_id,
            frame_id,
            data: Some(data),
        })
    }

    pub fn write_page(self: &Arc<Self>, page_id: PageId) -> Result<WritePageGuard> {
        self.write_page_with(page_id, AccessType::Unknown)
    }

    /// Like `read_page`, but exclusive. The frame is marked dirty on
    /// acquisition.
    pub fn write_page_with(
        self: &Arc<Self>,
        page_id: PageId,
        access: AccessType,
    ) -> Result<WritePageGuard> {
        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            pin_resident(&mut state, frame_id, page_id, access);
            drop(state);
            let data = self.frames[frame_id].data.write_arc();
            self.frames[frame_id].is_dirty.store(true, Ordering::Relaxed);
            return Ok(WritePageGuard {
                bpm: Arc::clone(self),
                page_id,
                frame_id,
                data: Some(data),
            });
        }

        let (frame_id, data) = self.load_page(state, page_id, access, true)?;
        self.frames[frame_id].is_dirty.store(true, Ordering::Relaxed);
        Ok(WritePageGuard {
            bpm: Arc::clone(self),
            page_id,
            frame_id,
            data: Some(data),
        })
    }

    /// Deallocates a page. Refuses if the page is currently pinned: callers
    /// must drop their guards first. A non-resident page is deallocated
    /// directly on disk.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            if state.meta[frame_id].pin_count > 0 {
                return Err(FlintError::PagePinned(page_id));
            }
            state.page_table.remove(&page_id);
            state.replacer.remove(frame_id);
            state.meta[frame_id] = FrameMeta {
                page_id: None,
                pin_count: 0,
            };
            self.frames[frame_id].is_dirty.store(false, Ordering::Relaxed);
            state.free_list.push(frame_id);
        }
        drop(state);
        self.pager.lock().deallocate_page(page_id);
        Ok(())
    }

    /// Writes the page back if dirty and clears the dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(());
        };
        // Pin without recording an access: flushing is not a reference.
        state.meta[frame_id].pin_count += 1;
        state.replacer.set_evictable(frame_id, false);
        drop(state);

        let result = self.flush_frame(frame_id, page_id);
        self.unpin(frame_id);
        result
    }

    pub fn flush_all(&self) -> Result<()> {
        let resident: Vec<PageId> = {
            let state = self.state.lock();
            state.page_table.keys().copied().collect()
        };
        for page_id in resident {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Current pin count of a resident page; `None` if not resident.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(&page_id)
            .map(|&frame_id| state.meta[frame_id].pin_count)
    }

    /// Number of evictable frames.
    pub fn replacer_size(&self) -> usize {
        self.state.lock().replacer.size()
    }

    pub fn pool_size(&self) -> usize {
        self.frames.len()
    }

    /// Claims a frame for `page_id` and returns it with the write latch
    /// held. The caller inherits a pin. The page-table entry is published
    /// while the latch is already held, so concurrent requests for the same
    /// page block on the latch until the load completes: one miss, one read.
    fn load_page(
        &self,
        mut state: MutexGuard<'_, PoolState>,
        page_id: PageId,
        access: AccessType,
        read_from_disk: bool,
    ) -> Result<(FrameId, FrameLatchWrite)> {
        let frame_id = match state.free_list.pop() {
            Some(frame_id) => frame_id,
            None => state.replacer.evict().ok_or(FlintError::NoFreeFrame)?,
        };

        let old = std::mem::replace(
            &mut state.meta[frame_id],
            FrameMeta {
                page_id: Some(page_id),
                pin_count: 1,
            },
        );
        if let Some(old_page_id) = old.page_id {
            state.page_table.remove(&old_page_id);
        }
        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id, page_id, access);
        state.replacer.set_evictable(frame_id, false);

        // Uncontended: an unpinned frame has no latch holders.
        let mut latch = self.frames[frame_id].data.write_arc();
        drop(state);

        let io_result = (|| -> Result<()> {
            let was_dirty = self.frames[frame_id].is_dirty.swap(false, Ordering::Relaxed);
            if let Some(old_page_id) = old.page_id {
                if was_dirty {
                    crate::flint_debug_log!(
                        "[BufferPool::load_page] Writing back dirty victim page {old_page_id}"
                    );
                    self.schedule_io(true, old_page_id, Box::new(**latch))?;
                }
            }
            if read_from_disk {
                let buf = self.schedule_io(false, page_id, Box::new([0u8; PAGE_SIZE]))?;
                *latch = buf;
            } else {
                latch.fill(0);
                self.frames[frame_id].is_dirty.store(true, Ordering::Relaxed);
            }
            Ok(())
        })();

        if let Err(err) = io_result {
            drop(latch);
            self.abort_load(frame_id, page_id);
            return Err(err);
        }

        Ok((frame_id, latch))
    }

    /// Undoes a failed load: drops our pin and, if nobody else pinned the
    /// frame meanwhile, unmaps it and returns it to the free list.
    fn abort_load(&self, frame_id: FrameId, page_id: PageId) {
        let mut state = self.state.lock();
        if state.meta[frame_id].pin_count > 0 {
            state.meta[frame_id].pin_count -= 1;
        }
        if state.meta[frame_id].pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
            if state.meta[frame_id].page_id == Some(page_id) {
                state.page_table.remove(&page_id);
                state.replacer.remove(frame_id);
                state.meta[frame_id] = FrameMeta {
                    page_id: None,
                    pin_count: 0,
                };
                state.free_list.push(frame_id);
            }
        }
    }

    fn flush_frame(&self, frame_id: FrameId, page_id: PageId) -> Result<()> {
        if !self.frames[frame_id].is_dirty.swap(false, Ordering::Relaxed) {
            return Ok(());
        }
        let data = {
            let latch = self.frames[frame_id].data.read();
            Box::new(**latch)
        };
        if let Err(err) = self.schedule_io(true, page_id, data) {
            self.frames[frame_id].is_dirty.store(true, Ordering::Relaxed);
            return Err(err);
        }
        Ok(())
    }

    /// Submits one request to the disk scheduler and awaits its completion.
    fn schedule_io(&self, is_write: bool, page_id: PageId, data: Box<PageBuf>) -> Result<Box<PageBuf>> {
        let (callback, completion) = mpsc::channel();
        self.scheduler.schedule(vec![DiskRequest {
            is_write,
            page_id,
            data,
            callback,
        }]);
        let buf = completion
            .recv()
            .map_err(|_| io::Error::other("disk scheduler worker disconnected"))
            .map_err(FlintError::Io)??;
        Ok(buf)
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if state.meta[frame_id].pin_count > 0 {
            state.meta[frame_id].pin_count -= 1;
            if state.meta[frame_id].pin_count == 0 {
                state.replacer.set_evictable(frame_id, true);
            }
        }
    }
}

fn pin_resident(state: &mut PoolState, frame_id: FrameId, page_id: PageId, access: AccessType) {
    state.meta[frame_id].pin_count += 1;
    state.replacer.record_access(frame_id, page_id, access);
    state.replacer.set_evictable(frame_id, false);
}

/// Shared access to one page. Dropping releases the latch, then the pin.
pub struct ReadPageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    frame_id: FrameId,
    data: Option<FrameLatchRead>,
}

impl ReadPageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &PageBuf {
        self.data.as_ref().expect("guard is live until dropped")
    }
}

impl Deref for ReadPageGuard {
    type Target = PageBuf;

    fn deref(&self) -> &PageBuf {
        self.data()
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        self.data.take();
        self.bpm.unpin(self.frame_id);
    }
}

/// Exclusive access to one page. The frame is dirty from acquisition on.
pub struct WritePageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    frame_id: FrameId,
    data: Option<FrameLatchWrite>,
}

impl WritePageGuard {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &PageBuf {
        self.data.as_ref().expect("guard is live until dropped")
    }

    pub fn data_mut(&mut self) -> &mut PageBuf {
        self.data.as_mut().expect("guard is live until dropped")
    }
}

impl Deref for WritePageGuard {
    type Target = PageBuf;

    fn deref(&self) -> &PageBuf {
        self.data()
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut PageBuf {
        self.data_mut()
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.data.take();
        self.bpm.unpin(self.frame_id);
    }
}
