use std::{
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread::JoinHandle,
};

use parking_lot::Mutex;
use tracing::warn;

use crate::common::{PageId, Result, StorageError};
use crate::storage::disk::manager::SharedDiskManager;

/// Payload of a disk request: an owned buffer to write out, or a shared
/// buffer the worker fills in on a read.
pub enum DiskData {
    Read(Arc<Mutex<Box<[u8]>>>),
    Write(Box<[u8]>),
}

/// A request to perform page I/O. Completion (and any disk error) is
/// reported back through `done`.
pub struct DiskRequest {
    pub page_id: PageId,
    pub data: DiskData,
    pub done: Sender<Result<()>>,
}

/// Serializes page I/O onto a background worker thread that owns access to
/// the shared disk manager. Requests are queued over a channel; issuers block
/// on their per-request completion channel when they need the result.
pub struct DiskScheduler {
    queue: Option<Sender<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(manager: SharedDiskManager) -> Self {
        let (tx, rx) = mpsc::channel::<DiskRequest>();
        let worker = std::thread::spawn(move || Self::run_worker(manager, rx));

        Self {
            queue: Some(tx),
            worker: Some(worker),
        }
    }

    /// Queue a request. A request against a scheduler whose worker has shut
    /// down completes immediately with an error instead of hanging.
    pub fn schedule(&self, request: DiskRequest) {
        let queue = self.queue.as_ref().expect("scheduler queue closed");
        if let Err(mpsc::SendError(request)) = queue.send(request) {
            let page_id = request.page_id;
            let _ = request.done.send(Err(StorageError::DiskRequestDropped(page_id)));
        }
    }

    /// Completion channel for a single request.
    pub fn create_channel() -> (Sender<Result<()>>, Receiver<Result<()>>) {
        mpsc::channel()
    }

    fn run_worker(manager: SharedDiskManager, rx: Receiver<DiskRequest>) {
        // An I/O failure is reported to the issuer; it never takes the
        // worker down with it.
        while let Ok(request) = rx.recv() {
            let result = {
                let mut manager = manager.lock();
                match &request.data {
                    DiskData::Write(data) => manager.write_page(request.page_id, data),
                    DiskData::Read(buffer) => {
                        let mut buffer = buffer.lock();
                        manager.read_page(request.page_id, &mut buffer)
                    }
                }
            };

            if let Err(err) = &result {
                warn!(page_id = request.page_id, %err, "disk request failed");
            }

            // The issuer may have given up waiting; that is not the
            // worker's problem.
            let _ = request.done.send(result);
        }
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain outstanding requests and
        // exit its receive loop.
        drop(self.queue.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
