//! Abstract traits for dependency inversion.
//!
//! These traits define what the tracker needs from the outside world:
//! a loading host that decodes images and pushes progress, and an open
//! entry interface so new media kinds plug in without touching the tracker.
//!
//! Implementations live in `core/` (hosts) and `entities/` (entries).

use std::fmt::Debug;
use std::sync::Arc;

use super::entry::EntryBase;
use super::status::{ImageFlags, LoadStatus, TargetSize};

/// Receiver of asynchronous progress notifications.
///
/// Called by a loading host on any of its threads, possibly many times.
pub trait ImageObserver: Send + Sync {
    /// Deliver progress flags.
    ///
    /// Returns `true` while the observer still wants further notifications.
    /// Hosts must stop calling an observer once it returned `false`.
    fn image_update(&self, flags: ImageFlags) -> bool;
}

/// Loading subsystem the tracker asks to query or start image loads.
///
/// Both calls must return promptly; decoding continues in the background
/// and is reported through the observer.
pub trait ImageHost: Send + Sync + 'static {
    /// Handle identifying one image. Equality is identity for removal.
    type Image: Clone + PartialEq + Debug + Send + Sync + 'static;

    /// Current progress of `image` at `size`, without starting a load.
    /// Empty flags mean "nothing useful known".
    fn query_progress(&self, image: &Self::Image, size: TargetSize) -> ImageFlags;

    /// Request that loading begin.
    ///
    /// Returns `true` only if the image is already fully available and no
    /// further notifications will follow.
    fn begin_load(&self, image: &Self::Image, size: TargetSize, observer: Arc<dyn ImageObserver>) -> bool;

    /// Optional higher-resolution counterpart, tracked in lockstep.
    fn resolution_variant(&self, _image: &Self::Image) -> Option<Self::Image> {
        None
    }
}

/// One tracked registration, whatever its media kind.
///
/// `M` is the media handle callers use for removal and error queries.
pub trait TrackedMedia<M>: Send + Sync {
    /// Shared bookkeeping (group, status, cancellation)
    fn base(&self) -> &EntryBase;

    fn media(&self) -> &M;

    /// Requested size; media kinds without a size report natural size.
    fn target_size(&self) -> TargetSize {
        TargetSize::NATURAL
    }

    /// Current status, optionally reverified with the host and/or started.
    ///
    /// - `verify`: re-derive status from the host's current opinion first
    /// - `load`: start loading if the entry never reached `LOAD_STARTED`
    fn status(&self, load: bool, verify: bool) -> LoadStatus;

    fn group_id(&self) -> i32 {
        self.base().group_id()
    }

    /// Stop accepting notifications. Status is left untouched.
    fn cancel(&self) {
        self.base().cancel()
    }
}

/// Hook an entry uses to wake everybody blocked on its tracker.
pub trait DoneSignal: Send + Sync {
    fn set_done(&self);
}
