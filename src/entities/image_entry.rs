//! Image entry: adapts host progress notifications to entry status.
//!
//! The entry is its own observer. The host receives an `Arc` of it on
//! `begin_load` and may keep calling it after the entry left the tracker;
//! the cancellation flag makes those late calls return `false`.

use log::trace;
use std::sync::{Arc, Weak};

use super::entry::EntryBase;
use super::status::{ImageFlags, LoadStatus, TargetSize};
use super::traits::{DoneSignal, ImageHost, ImageObserver, TrackedMedia};

/// Tracked image at a requested size
pub struct ImageEntry<H: ImageHost> {
    base: EntryBase,
    host: Arc<H>,
    image: H::Image,
    size: TargetSize,
    this: Weak<Self>,
}

impl<H: ImageHost> ImageEntry<H> {
    pub fn new(
        host: Arc<H>,
        image: H::Image,
        group_id: i32,
        size: TargetSize,
        signal: Weak<dyn DoneSignal>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            base: EntryBase::new(group_id, signal),
            host,
            image,
            size,
            this: this.clone(),
        })
    }

    fn start_load(&self) {
        let Some(observer) = self.this.upgrade() else {
            return;
        };
        trace!("begin load {:?} at {}", self.image, self.size);
        if self.host.begin_load(&self.image, self.size, observer) {
            self.base.set_status(LoadStatus::COMPLETE);
        }
    }
}

impl<H: ImageHost> TrackedMedia<H::Image> for ImageEntry<H> {
    fn base(&self) -> &EntryBase {
        &self.base
    }

    fn media(&self) -> &H::Image {
        &self.image
    }

    fn target_size(&self) -> TargetSize {
        self.size
    }

    fn status(&self, load: bool, verify: bool) -> LoadStatus {
        if verify {
            let flags = self.host.query_progress(&self.image, self.size);
            self.base.reconcile(LoadStatus::from_image_flags(flags));
        }
        // Host is called with no entry lock held: it may notify synchronously
        if load && self.base.try_start() {
            self.start_load();
        }
        self.base.current()
    }
}

impl<H: ImageHost> ImageObserver for ImageEntry<H> {
    fn image_update(&self, flags: ImageFlags) -> bool {
        if self.base.is_cancelled() {
            return false;
        }
        let status = LoadStatus::from_image_flags(flags);
        if !status.is_empty() {
            self.base.update(status);
        }
        self.base.current().contains(LoadStatus::LOADING)
    }
}

impl<H: ImageHost> std::fmt::Debug for ImageEntry<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageEntry")
            .field("image", &self.image)
            .field("group_id", &self.base.group_id())
            .field("size", &self.size)
            .field("status", &self.base.current())
            .finish()
    }
}
