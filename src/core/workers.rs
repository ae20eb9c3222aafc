//! Thread pool for background image decoding.
//!
//! Uses a crossbeam MPMC channel with closure-based jobs.
//! Epoch mechanism lets the loading host drop queued decodes in bulk
//! (`FileImageHost::abort_pending`) without tracking individual jobs.

use crossbeam::channel::{Sender, unbounded};
use log::{error, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool executing closures on named threads.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4, Arc::new(AtomicU64::new(0)));
/// let epoch = workers.current_epoch();
/// workers.execute_with_epoch(epoch, move || decode(path));
/// ```
pub struct Workers {
    sender: Option<Sender<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>,
}

impl Workers {
    /// Create pool with `num_threads` threads (at least one) and a shared epoch counter.
    pub fn new(num_threads: usize, epoch: Arc<AtomicU64>) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let mut handles = Vec::new();

        for worker_id in 0..num_threads.max(1) {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("media-tracker-worker-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    // Runs until every sender is gone
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                    trace!("Worker {} stopped", worker_id);
                })?;
            handles.push(handle);
        }

        trace!("Workers initialized: {} threads", handles.len());

        Ok(Self {
            sender: Some(tx),
            handles,
            current_epoch: epoch,
        })
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Execute closure on a worker thread
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.send(Box::new(f)) {
            error!("Failed to enqueue job: {}", e);
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Invalidate every job queued with an older epoch. Returns the new epoch.
    pub fn bump_epoch(&self) -> u64 {
        self.current_epoch.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Execute closure only if `epoch` is still current when a worker picks it up.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let current_epoch = Arc::clone(&self.current_epoch);
        self.execute(move || {
            let current = current_epoch.load(Ordering::Relaxed);
            if current == epoch {
                f();
            } else {
                trace!("Skipping stale job: epoch {} != current {}", epoch, current);
            }
        });
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        trace!("Workers shutting down ({} threads)...", self.handles.len());
        // Closing the channel ends every recv loop once the queue drains
        self.sender.take();
        let current = thread::current().id();
        for handle in self.handles.drain(..) {
            // The last host reference can be released by one of our own jobs
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker panicked during shutdown");
            }
        }
    }
}
