//! Media tracker - group-wise load progress over asynchronously loading images.
//!
//! Callers register images under group ids, then poll (`check_*`,
//! `status_*`) or block (`wait_*`) on every entry or on one group.
//!
//! # Locking
//!
//! One mutex + condvar per tracker. The mutex guards the ordered entry list
//! and a change generation. Entries signal by bumping the generation and
//! broadcasting; waiters park only if the generation they saw before
//! scanning is still current, so a notification landing mid-scan is never lost.
//!
//! Entries are always queried from a snapshot taken under the lock and
//! released before the scan. The tracker lock is therefore never held while
//! an entry lock is taken or the host is called, and an entry never holds its
//! own lock while signalling.
//!
//! # Consistency
//!
//! Each entry is read independently. An aggregate may mix observations taken
//! at slightly different instants when notifications race with the scan.

use log::debug;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use crate::entities::{DoneSignal, ImageEntry, ImageHost, LoadStatus, TargetSize, TrackedMedia};
use crate::error::TrackerError;

type EntryRef<M> = Arc<dyn TrackedMedia<M>>;

/// Which entries an operation looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    All,
    Group(i32),
}

impl Scope {
    fn matches(self, group_id: i32) -> bool {
        match self {
            Scope::All => true,
            Scope::Group(id) => id == group_id,
        }
    }
}

struct TrackerState<M> {
    /// Ascending by group id, stable for equal ids
    entries: Vec<EntryRef<M>>,
    /// Bumped on every status change or removal
    generation: u64,
    /// Bumped by `interrupt()`
    interrupts: u64,
}

impl<M> TrackerState<M> {
    fn matching(&self, scope: Scope) -> Vec<EntryRef<M>> {
        self.entries
            .iter()
            .filter(|e| scope.matches(e.group_id()))
            .cloned()
            .collect()
    }
}

struct Shared<M> {
    state: Mutex<TrackerState<M>>,
    changed: Condvar,
}

impl<M> Shared<M> {
    fn lock(&self) -> MutexGuard<'_, TrackerState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M: Send + Sync + 'static> DoneSignal for Shared<M> {
    fn set_done(&self) {
        let mut state = self.lock();
        state.generation = state.generation.wrapping_add(1);
        self.changed.notify_all();
    }
}

/// Tracks load progress of images registered under caller-chosen group ids.
///
/// # Example
/// ```ignore
/// let tracker = MediaTracker::new(Arc::clone(&host));
/// tracker.add(host.open("hero.png"), 0);
/// tracker.add(host.open("background.png"), 1);
///
/// // Hero first, then the rest
/// tracker.wait_id(0)?;
/// if !tracker.wait_all_for(Duration::from_secs(5))? {
///     log::warn!("failed: {:?}", tracker.errors_any());
/// }
/// ```
pub struct MediaTracker<H: ImageHost> {
    host: Arc<H>,
    shared: Arc<Shared<H::Image>>,
}

impl<H: ImageHost> MediaTracker<H> {
    pub fn new(host: Arc<H>) -> Self {
        Self {
            host,
            shared: Arc::new(Shared {
                state: Mutex::new(TrackerState {
                    entries: Vec::new(),
                    generation: 0,
                    interrupts: 0,
                }),
                changed: Condvar::new(),
            }),
        }
    }

    /// Number of registered entries, resolution variants included
    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========== Registration ==========

    /// Track `image` at natural size under group `id`
    pub fn add(&self, image: H::Image, id: i32) {
        self.add_sized(image, id, TargetSize::NATURAL);
    }

    /// Track `image` at `size` under group `id`.
    ///
    /// A resolution variant reported by the host is tracked too, under the
    /// same group at doubled size.
    pub fn add_sized(&self, image: H::Image, id: i32, size: TargetSize) {
        let variant = self.host.resolution_variant(&image);
        self.add_entry(image, id, size);
        if let Some(variant) = variant {
            self.add_entry(variant, id, size.doubled());
        }
    }

    fn add_entry(&self, image: H::Image, id: i32, size: TargetSize) {
        let entry = ImageEntry::new(Arc::clone(&self.host), image, id, size, self.done_signal());
        self.track(entry);
    }

    /// Register an already built entry of any media kind.
    ///
    /// Entries built for this tracker should report to [`Self::done_signal`].
    pub fn track(&self, entry: EntryRef<H::Image>) {
        let id = entry.group_id();
        let mut state = self.shared.lock();
        let pos = state.entries.partition_point(|e| e.group_id() <= id);
        debug!("track {:?} group={} at {}", entry.media(), id, pos);
        state.entries.insert(pos, entry);
    }

    /// Wake-up hook for entries registered through [`Self::track`]
    pub fn done_signal(&self) -> Weak<dyn DoneSignal> {
        let weak: Weak<Shared<H::Image>> = Arc::downgrade(&self.shared);
        weak
    }

    /// Stop tracking `image` in every group and at every size
    pub fn remove(&self, image: &H::Image) {
        let variant = self.host.resolution_variant(image);
        self.remove_where(image, None, None);
        if let Some(variant) = variant {
            self.remove_where(&variant, None, None);
        }
    }

    /// Stop tracking `image` in group `id`, at every size
    pub fn remove_group(&self, image: &H::Image, id: i32) {
        let variant = self.host.resolution_variant(image);
        self.remove_where(image, Some(id), None);
        if let Some(variant) = variant {
            self.remove_where(&variant, Some(id), None);
        }
    }

    /// Stop tracking `image` in group `id` at exactly `size`.
    /// The resolution variant is matched at doubled size.
    pub fn remove_sized(&self, image: &H::Image, id: i32, size: TargetSize) {
        let variant = self.host.resolution_variant(image);
        self.remove_where(image, Some(id), Some(size));
        if let Some(variant) = variant {
            self.remove_where(&variant, Some(id), Some(size.doubled()));
        }
    }

    fn remove_where(&self, image: &H::Image, id: Option<i32>, size: Option<TargetSize>) {
        let mut state = self.shared.lock();
        let before = state.entries.len();
        state.entries.retain(|e| {
            let hit = e.media() == image
                && id.is_none_or(|id| e.group_id() == id)
                && size.is_none_or(|size| e.target_size() == size);
            if hit {
                e.cancel();
            }
            !hit
        });
        let removed = before - state.entries.len();
        if removed > 0 {
            debug!("removed {} entries for {:?}", removed, image);
            // Removal can complete a pending wait
            state.generation = state.generation.wrapping_add(1);
            self.shared.changed.notify_all();
        }
    }

    // ========== Polling ==========

    /// True if every entry is settled. Starts unstarted entries if `load`.
    pub fn check_all(&self, load: bool) -> bool {
        self.check(Scope::All, load)
    }

    /// True if every entry of group `id` is settled. Starts them if `load`.
    pub fn check_id(&self, id: i32, load: bool) -> bool {
        self.check(Scope::Group(id), load)
    }

    /// OR of every entry's reverified status
    pub fn status_all(&self, load: bool) -> LoadStatus {
        aggregate(&self.snapshot(Scope::All), load, true)
    }

    /// OR of the reverified status of group `id`; empty for an unknown group
    pub fn status_id(&self, id: i32, load: bool) -> LoadStatus {
        aggregate(&self.snapshot(Scope::Group(id)), load, true)
    }

    fn check(&self, scope: Scope, load: bool) -> bool {
        // No short-circuit: every entry gets its load request
        self.snapshot(scope)
            .iter()
            .fold(true, |done, e| e.status(load, true).is_settled() && done)
    }

    fn snapshot(&self, scope: Scope) -> Vec<EntryRef<H::Image>> {
        self.shared.lock().matching(scope)
    }

    // ========== Errors ==========

    pub fn is_error_any(&self) -> bool {
        self.is_error(Scope::All)
    }

    pub fn is_error_id(&self, id: i32) -> bool {
        self.is_error(Scope::Group(id))
    }

    /// Images whose reverified status includes ERRORED, `None` if there are none
    pub fn errors_any(&self) -> Option<Vec<H::Image>> {
        self.errors(Scope::All)
    }

    /// Failed images of group `id`, `None` if there are none
    pub fn errors_id(&self, id: i32) -> Option<Vec<H::Image>> {
        self.errors(Scope::Group(id))
    }

    fn is_error(&self, scope: Scope) -> bool {
        self.snapshot(scope)
            .iter()
            .any(|e| e.status(false, true).contains(LoadStatus::ERRORED))
    }

    fn errors(&self, scope: Scope) -> Option<Vec<H::Image>> {
        let failed: Vec<H::Image> = self
            .snapshot(scope)
            .iter()
            .filter(|e| e.status(false, true).contains(LoadStatus::ERRORED))
            .map(|e| e.media().clone())
            .collect();
        (!failed.is_empty()).then_some(failed)
    }

    // ========== Blocking ==========

    /// Start every entry and block until all are settled.
    ///
    /// `Ok(true)` only if every entry completed; any error or abort gives `Ok(false)`.
    pub fn wait_all(&self) -> Result<bool, TrackerError> {
        self.wait(Scope::All, Duration::ZERO)
    }

    /// Like [`Self::wait_all`], giving up with `Ok(false)` after `timeout`.
    /// A zero timeout waits forever.
    pub fn wait_all_for(&self, timeout: Duration) -> Result<bool, TrackerError> {
        self.wait(Scope::All, timeout)
    }

    /// Start the entries of group `id` and block until they are settled
    pub fn wait_id(&self, id: i32) -> Result<bool, TrackerError> {
        self.wait(Scope::Group(id), Duration::ZERO)
    }

    /// Like [`Self::wait_id`] with a timeout; zero waits forever
    pub fn wait_id_for(&self, id: i32, timeout: Duration) -> Result<bool, TrackerError> {
        self.wait(Scope::Group(id), timeout)
    }

    /// Wake every thread blocked in a `wait_*` call; each returns
    /// `Err(TrackerError::Interrupted)`. Later waits are unaffected.
    pub fn interrupt(&self) {
        let mut state = self.shared.lock();
        state.interrupts = state.interrupts.wrapping_add(1);
        self.shared.changed.notify_all();
    }

    fn wait(&self, scope: Scope, timeout: Duration) -> Result<bool, TrackerError> {
        // A deadline past the end of time is no deadline
        let deadline = (!timeout.is_zero())
            .then(|| Instant::now().checked_add(timeout))
            .flatten();
        let interrupts = self.shared.lock().interrupts;
        // First pass starts loads and reverifies; later passes trust notifications
        let mut first = true;

        loop {
            let (entries, generation) = {
                let state = self.shared.lock();
                if state.interrupts != interrupts {
                    return Err(TrackerError::Interrupted);
                }
                (state.matching(scope), state.generation)
            };

            // Nothing to wait for is success
            if entries.is_empty() {
                debug!("wait {:?}: no entries", scope);
                return Ok(true);
            }

            let status = aggregate(&entries, first, first);
            if !status.contains(LoadStatus::LOADING) {
                debug!("wait {:?}: settled {}", scope, status);
                return Ok(status == LoadStatus::COMPLETE);
            }
            first = false;

            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!("wait {:?}: timed out", scope);
                return Ok(false);
            }

            let mut state = self.shared.lock();
            while state.generation == generation {
                if state.interrupts != interrupts {
                    return Err(TrackerError::Interrupted);
                }
                state = match deadline {
                    None => self.shared.changed.wait(state).unwrap_or_else(PoisonError::into_inner),
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            debug!("wait {:?}: timed out", scope);
                            return Ok(false);
                        }
                        self.shared
                            .changed
                            .wait_timeout(state, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0
                    }
                };
            }
        }
    }
}

fn aggregate<M>(entries: &[EntryRef<M>], load: bool, verify: bool) -> LoadStatus {
    entries
        .iter()
        .fold(LoadStatus::empty(), |acc, e| acc | e.status(load, verify))
}

impl<H: ImageHost> std::fmt::Debug for MediaTracker<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTracker").field("entries", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_host::{MockHost, MockImage};
    use crate::entities::ImageFlags;
    use std::thread;

    const R1: MockImage = MockImage(1);
    const R2: MockImage = MockImage(2);
    const R1_2X: MockImage = MockImage(101);

    fn tracker() -> (MediaTracker<MockHost>, Arc<MockHost>) {
        let host = Arc::new(MockHost::new());
        (MediaTracker::new(Arc::clone(&host)), host)
    }

    /// Test: image already available when first polled
    #[test]
    fn test_immediately_available_image() {
        let (tracker, host) = tracker();
        host.set_ready(R1);
        tracker.add(R1, 0);

        assert!(tracker.check_id(0, true));
        assert_eq!(tracker.status_id(0, false), LoadStatus::COMPLETE);
    }

    /// Test: one failed image, one never started
    #[test]
    fn test_error_next_to_unstarted() {
        let (tracker, host) = tracker();
        tracker.add(R1, 0);
        tracker.add(R2, 1);

        tracker.status_id(0, true);
        host.deliver(R1, ImageFlags::ERROR);

        assert_eq!(tracker.status_all(false), LoadStatus::ERRORED);
        assert!(!tracker.check_all(false));
        assert!(tracker.is_error_any());
        assert!(tracker.is_error_id(0));
        assert!(!tracker.is_error_id(1));
        assert_eq!(tracker.errors_any(), Some(vec![R1]));
        assert_eq!(tracker.errors_id(1), None);
    }

    /// Test: exact-size removal takes the doubled variant along
    #[test]
    fn test_remove_sized_removes_variant() {
        let (tracker, host) = tracker();
        host.set_variant(R1, R1_2X);
        tracker.add_sized(R1, 0, TargetSize::new(10, 10));
        assert_eq!(tracker.len(), 2);

        // Wrong size or group leaves both alone
        tracker.remove_sized(&R1, 0, TargetSize::new(20, 20));
        tracker.remove_sized(&R1, 1, TargetSize::new(10, 10));
        assert_eq!(tracker.len(), 2);

        tracker.remove_sized(&R1, 0, TargetSize::new(10, 10));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_remove_variants_at_natural_size() {
        let (tracker, host) = tracker();
        host.set_variant(R1, R1_2X);
        tracker.add(R1, 0);
        tracker.add(R1, 4);
        tracker.add(R2, 4);
        assert_eq!(tracker.len(), 5);

        tracker.remove_group(&R1, 4);
        assert_eq!(tracker.len(), 3);

        tracker.remove(&R1);
        assert_eq!(tracker.len(), 1);
    }

    /// Test: waiting on a group with no entries succeeds at once
    #[test]
    fn test_wait_on_empty_group_succeeds() {
        let (tracker, _host) = tracker();
        assert_eq!(tracker.wait_id_for(5, Duration::ZERO), Ok(true));
        assert_eq!(tracker.wait_all(), Ok(true));
        assert!(tracker.check_all(false));
        assert!(tracker.status_all(false).is_empty());
        assert_eq!(tracker.errors_any(), None);
    }

    #[test]
    fn test_status_without_load_is_pure() {
        let (tracker, host) = tracker();
        tracker.add(R1, 0);

        assert!(tracker.status_all(false).is_empty());
        assert_eq!(host.begin_calls(R1), 0);

        assert_eq!(tracker.status_all(true), LoadStatus::LOADING);
        assert_eq!(tracker.status_all(true), LoadStatus::LOADING);
        assert_eq!(host.begin_calls(R1), 1);
    }

    #[test]
    fn test_check_all_starts_every_entry() {
        let (tracker, host) = tracker();
        tracker.add(R1, 0);
        tracker.add(R2, 1);

        assert!(!tracker.check_all(true));
        assert_eq!(host.begin_calls(R1), 1);
        assert_eq!(host.begin_calls(R2), 1);
    }

    /// Test: entries stay ordered by group id, equal ids in insertion order
    #[test]
    fn test_entries_sorted_by_group() {
        let (tracker, host) = tracker();
        let images = [(MockImage(10), 2), (MockImage(11), 0), (MockImage(12), 1), (MockImage(13), 0)];
        for (image, id) in images {
            tracker.add(image, id);
        }
        tracker.status_all(true);
        for (image, _) in images {
            host.deliver(image, ImageFlags::ERROR);
        }

        let failed = tracker.errors_any().unwrap();
        assert_eq!(failed, vec![MockImage(11), MockImage(13), MockImage(12), MockImage(10)]);
    }

    #[test]
    fn test_flushed_image_reported_aborted() {
        let (tracker, host) = tracker();
        tracker.add(R1, 0);
        tracker.status_all(true);
        host.deliver(R1, ImageFlags::ALLBITS);
        assert_eq!(tracker.status_all(false), LoadStatus::COMPLETE);

        host.forget(R1);
        assert_eq!(tracker.status_all(false), LoadStatus::ABORTED);
        assert!(tracker.check_all(false));

        // A load request retries the aborted entry
        assert_eq!(tracker.status_all(true), LoadStatus::LOADING);
        assert_eq!(host.begin_calls(R1), 2);
    }

    #[test]
    fn test_removed_entry_stops_notifications() {
        let (tracker, host) = tracker();
        tracker.add(R1, 0);
        tracker.status_all(true);
        assert_eq!(host.observer_count(R1), 1);

        tracker.remove(&R1);
        host.deliver(R1, ImageFlags::SOMEBITS);
        assert_eq!(host.observer_count(R1), 0);
    }

    #[test]
    fn test_wait_times_out() {
        let (tracker, _host) = tracker();
        tracker.add(R1, 0);

        let start = Instant::now();
        assert_eq!(tracker.wait_all_for(Duration::from_millis(50)), Ok(false));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_wait_with_unreachable_deadline() {
        let (tracker, host) = tracker();
        tracker.add(R1, 0);

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                host.deliver(R1, ImageFlags::ALLBITS);
            });
            assert_eq!(tracker.wait_all_for(Duration::MAX), Ok(true));
        });
    }

    /// Test: host notifying from inside begin_load during the first wait pass
    #[test]
    fn test_wait_with_synchronous_notification() {
        let (tracker, host) = tracker();
        host.notify_on_begin(R1, ImageFlags::WIDTH | ImageFlags::HEIGHT | ImageFlags::ALLBITS);
        host.notify_on_begin(R2, ImageFlags::ERROR);
        tracker.add(R1, 0);
        tracker.add(R2, 1);

        let start = Instant::now();
        assert_eq!(tracker.wait_id_for(0, Duration::from_secs(5)), Ok(true));
        assert_eq!(tracker.wait_id_for(1, Duration::from_secs(5)), Ok(false));
        assert_eq!(tracker.wait_all_for(Duration::from_secs(5)), Ok(false));
        assert!(start.elapsed() < Duration::from_secs(2));

        assert_eq!(host.begin_calls(R1), 1);
        assert_eq!(host.begin_calls(R2), 1);
        assert_eq!(tracker.status_all(false), LoadStatus::COMPLETE | LoadStatus::ERRORED);
        assert_eq!(tracker.errors_any(), Some(vec![R2]));
    }

    /// Test: notification from another thread releases the waiter
    #[test]
    fn test_wait_woken_by_notification() {
        let (tracker, host) = tracker();
        tracker.add(R1, 0);

        thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_millis(20));
                host.deliver(R1, ImageFlags::WIDTH | ImageFlags::HEIGHT);
                host.deliver(R1, ImageFlags::ALLBITS);
            });
            assert_eq!(tracker.wait_all_for(Duration::from_secs(5)), Ok(true));
        });
        assert_eq!(tracker.status_all(false), LoadStatus::COMPLETE);
    }

    #[test]
    fn test_wait_reports_partial_failure() {
        let (tracker, host) = tracker();
        tracker.add(R1, 0);
        tracker.add(R2, 0);

        thread::scope(|s| {
            s.spawn(|| {
                // Deliver only once both loads were requested
                while host.observer_count(R1) + host.observer_count(R2) < 2 {
                    thread::sleep(Duration::from_millis(1));
                }
                host.deliver(R1, ImageFlags::ALLBITS);
                host.deliver(R2, ImageFlags::ABORT);
            });
            assert_eq!(tracker.wait_id_for(0, Duration::from_secs(5)), Ok(false));
        });
        assert_eq!(tracker.status_id(0, false), LoadStatus::COMPLETE | LoadStatus::ABORTED);
        assert!(!tracker.is_error_any());
    }

    #[test]
    fn test_wait_id_ignores_other_groups() {
        let (tracker, host) = tracker();
        host.set_ready(R1);
        tracker.add(R1, 0);
        tracker.add(R2, 1);

        assert_eq!(tracker.wait_id_for(0, Duration::from_secs(5)), Ok(true));
        assert_eq!(tracker.status_id(1, false), LoadStatus::empty());
    }

    /// Test: removing the last entry of a group ends a blocked wait with success
    #[test]
    fn test_remove_releases_waiter() {
        let (tracker, _host) = tracker();
        tracker.add(R1, 3);

        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let start = Instant::now();
                (tracker.wait_id_for(3, Duration::from_secs(10)), start.elapsed())
            });
            thread::sleep(Duration::from_millis(30));
            tracker.remove(&R1);

            let (result, elapsed) = waiter.join().unwrap();
            assert_eq!(result, Ok(true));
            assert!(elapsed < Duration::from_secs(5));
        });
    }

    #[test]
    fn test_interrupt_wakes_waiter() {
        let (tracker, _host) = tracker();
        tracker.add(R1, 0);

        thread::scope(|s| {
            let waiter = s.spawn(|| tracker.wait_all());
            // Keep interrupting until the waiter has observed one
            while !waiter.is_finished() {
                tracker.interrupt();
                thread::sleep(Duration::from_millis(5));
            }
            assert_eq!(waiter.join().unwrap(), Err(TrackerError::Interrupted));
        });

        // Later waits are not affected
        assert_eq!(tracker.wait_all_for(Duration::from_millis(10)), Ok(false));
    }
}
