//! A single-worker queue that serializes disk I/O behind the pager.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::pager::Pager;
use crate::{PageId, PAGE_SIZE};

pub type PageBuf = [u8; PAGE_SIZE];

/// A single disk I/O request. The request owns its page buffer for the
/// duration; the worker hands the buffer back through `callback` together
/// with the outcome, so a read's result lands in the returned buffer.
pub struct DiskRequest {
    pub is_write: bool,
    pub page_id: PageId,
    pub data: Box<PageBuf>,
    pub callback: Sender<io::Result<Box<PageBuf>>>,
}

/// Schedules requests onto a background worker that drives the pager
/// serially. Requests from one submitter complete in submission order.
///
/// Dropping the scheduler enqueues a terminator sentinel; the worker drains
/// everything ahead of it, then exits and is joined.
pub struct DiskScheduler {
    request_tx: Sender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(pager: Arc<Mutex<Pager>>) -> Self {
        let (request_tx, request_rx) = mpsc::channel();
        let worker = thread::spawn(move || worker_loop(request_rx, pager));
        Self {
            request_tx,
            worker: Some(worker),
        }
    }

    /// Enqueues the requests in order. Completion is signalled per request
    /// through its callback channel.
    pub fn schedule(&self, requests: Vec<DiskRequest>) {
        for request in requests {
            self.request_tx
                .send(Some(request))
                .expect("disk scheduler worker exited early");
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.request_tx.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(request_rx: Receiver<Option<DiskRequest>>, pager: Arc<Mutex<Pager>>) {
    while let Ok(Some(mut request)) = request_rx.recv() {
        let result = {
            let mut pager = pager.lock();
            if request.is_write {
                pager.write_page(request.page_id, &request.data)
            } else {
                pager.read_page(request.page_id, &mut request.data)
            }
        };
        // The submitter may have gone away; a dead callback is not our problem.
        let _ = request.callback.send(result.map(|()| request.data));
    }
}
