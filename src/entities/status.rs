//! Status bitmasks shared by the tracker, its entries and loading hosts.
//!
//! Two vocabularies meet here:
//! - [`ImageFlags`]: what a loading host reports about an image
//! - [`LoadStatus`]: what the tracker records per entry
//!
//! [`LoadStatus::from_image_flags`] is the only bridge between them.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Per-entry load state. Zero means "never requested".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LoadStatus: u32 {
        const LOADING = 1;
        const ABORTED = 2;
        const ERRORED = 4;
        const COMPLETE = 8;
    }
}

impl LoadStatus {
    /// Settled states: an entry carrying any of these is finished, for better or worse.
    pub const DONE: Self = Self::ABORTED.union(Self::ERRORED).union(Self::COMPLETE);

    /// An entry carrying any of these has been started at least once and is not retried.
    pub const LOAD_STARTED: Self = Self::LOADING.union(Self::ERRORED).union(Self::COMPLETE);

    /// Translate host progress flags into a terminal status.
    ///
    /// First match wins: error, abort, then any "usable" bit.
    /// Partial bits (size, properties, some scanlines) translate to empty,
    /// meaning "no transition".
    pub fn from_image_flags(flags: ImageFlags) -> Self {
        if flags.contains(ImageFlags::ERROR) {
            Self::ERRORED
        } else if flags.contains(ImageFlags::ABORT) {
            Self::ABORTED
        } else if flags.intersects(ImageFlags::ALLBITS | ImageFlags::FRAMEBITS) {
            Self::COMPLETE
        } else {
            Self::empty()
        }
    }

    /// True if any settled bit is present
    pub fn is_settled(self) -> bool {
        self.intersects(Self::DONE)
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "UNSTARTED");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        write!(f, "{}", names.join("|"))
    }
}

bitflags! {
    /// Progress bits delivered by a loading host, through
    /// `ImageHost::query_progress` or `ImageObserver::image_update`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageFlags: u32 {
        const WIDTH = 1;
        const HEIGHT = 2;
        const PROPERTIES = 4;
        const SOMEBITS = 8;
        const FRAMEBITS = 16;
        const ALLBITS = 32;
        const ERROR = 64;
        const ABORT = 128;
    }
}

/// Requested render size. A `None` dimension means "natural size".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TargetSize {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl TargetSize {
    pub const NATURAL: Self = Self { width: None, height: None };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width: Some(width), height: Some(height) }
    }

    /// Size used for the high-resolution variant of an image.
    /// Each given dimension doubles; the natural-size sentinel is kept as-is.
    pub fn doubled(self) -> Self {
        Self {
            width: self.width.map(|w| w.saturating_mul(2)),
            height: self.height.map(|h| h.saturating_mul(2)),
        }
    }
}

impl fmt::Display for TargetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dim = |d: Option<u32>| d.map_or_else(|| "natural".to_string(), |v| v.to_string());
        write!(f, "{}x{}", dim(self.width), dim(self.height))
    }
}
