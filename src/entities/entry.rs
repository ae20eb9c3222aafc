//! Entry bookkeeping shared by every media kind.
//!
//! # Locking
//!
//! `status` lives behind the entry's own mutex. The tracker is woken only
//! after that mutex is released: lock entry, write, unlock, then signal.
//! Holding the entry lock while signalling would invert the order used by
//! waiters and can deadlock.
//!
//! # Cancellation
//!
//! `cancelled` is a relaxed atomic read by the notification path without
//! taking the entry lock. A notification racing with `cancel()` may see the
//! stale `false` once and deliver one stray update to an entry that is no
//! longer listed. That is never a correctness hazard: the next notification
//! sees the flag and tells the host to stop.

use log::trace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

use super::status::LoadStatus;
use super::traits::DoneSignal;

/// Group, status and cancellation state of one tracked registration
#[derive(Debug)]
pub struct EntryBase {
    group_id: i32,
    status: Mutex<LoadStatus>,
    cancelled: AtomicBool,
    signal: Weak<dyn DoneSignal>,
}

impl EntryBase {
    /// Create an unstarted entry reporting changes to `signal`
    pub fn new(group_id: i32, signal: Weak<dyn DoneSignal>) -> Self {
        Self {
            group_id,
            status: Mutex::new(LoadStatus::empty()),
            cancelled: AtomicBool::new(false),
            signal,
        }
    }

    pub fn group_id(&self) -> i32 {
        self.group_id
    }

    /// Last recorded status
    pub fn current(&self) -> LoadStatus {
        *self.lock()
    }

    /// Overwrite status and wake waiters
    pub fn set_status(&self, status: LoadStatus) {
        *self.lock() = status;
        trace!("entry group={} -> {}", self.group_id, status);
        self.wake();
    }

    /// Overwrite status only if it differs. Returns whether it changed.
    pub fn update(&self, status: LoadStatus) -> bool {
        let changed = {
            let mut current = self.lock();
            let changed = *current != status;
            if changed {
                *current = status;
            }
            changed
        };
        if changed {
            trace!("entry group={} -> {}", self.group_id, status);
            self.wake();
        }
        changed
    }

    /// Fold a freshly queried status into the recorded one.
    ///
    /// An empty fresh status after ERRORED or COMPLETE means the host forgot
    /// the image (e.g. flushed to save memory): the entry is demoted to ABORTED.
    /// Otherwise a differing fresh status replaces the recorded one.
    pub fn reconcile(&self, fresh: LoadStatus) {
        let changed = {
            let mut current = self.lock();
            let next = if fresh.is_empty() {
                current
                    .intersects(LoadStatus::ERRORED | LoadStatus::COMPLETE)
                    .then_some(LoadStatus::ABORTED)
            } else {
                (fresh != *current).then_some(fresh)
            };
            match next {
                Some(status) if status != *current => {
                    *current = status;
                    true
                }
                _ => false,
            }
        };
        if changed {
            trace!("entry group={} reverified -> {}", self.group_id, self.current());
            self.wake();
        }
    }

    /// Claim the entry for loading.
    ///
    /// Succeeds only if the entry never reached `LOAD_STARTED` (unstarted or
    /// aborted). On success the status becomes LOADING with ABORTED cleared
    /// and the caller must start the load.
    pub fn try_start(&self) -> bool {
        let mut current = self.lock();
        if current.intersects(LoadStatus::LOAD_STARTED) {
            return false;
        }
        *current = current.difference(LoadStatus::ABORTED) | LoadStatus::LOADING;
        true
    }

    /// Mark as removed. Status is left as-is.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Unsynchronized advisory read, see module docs
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, LoadStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Entry lock must already be released here
    fn wake(&self) {
        if let Some(signal) = self.signal.upgrade() {
            signal.set_done();
        }
    }
}
