//! Scriptable in-memory host for unit tests.
//!
//! Tests decide when and what each image reports via [`MockHost::deliver`];
//! nothing loads on its own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::entities::{DoneSignal, ImageFlags, ImageHost, ImageObserver, TargetSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MockImage(pub u32);

#[derive(Default)]
struct MockRecord {
    flags: ImageFlags,
    begin_calls: usize,
    /// Delivered synchronously from inside the next `begin_load`
    on_begin: Option<ImageFlags>,
    observers: Vec<Arc<dyn ImageObserver>>,
}

#[derive(Default)]
pub struct MockHost {
    records: Mutex<HashMap<MockImage, MockRecord>>,
    variants: Mutex<HashMap<MockImage, MockImage>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image is fully available before anybody asks
    pub fn set_ready(&self, image: MockImage) {
        self.records.lock().unwrap().entry(image).or_default().flags =
            ImageFlags::WIDTH | ImageFlags::HEIGHT | ImageFlags::ALLBITS;
    }

    /// Host drops what it knew about the image
    pub fn forget(&self, image: MockImage) {
        self.records.lock().unwrap().entry(image).or_default().flags = ImageFlags::empty();
    }

    /// Make the next `begin_load` of `image` notify its observer before returning
    pub fn notify_on_begin(&self, image: MockImage, flags: ImageFlags) {
        self.records.lock().unwrap().entry(image).or_default().on_begin = Some(flags);
    }

    pub fn set_variant(&self, image: MockImage, variant: MockImage) {
        self.variants.lock().unwrap().insert(image, variant);
    }

    pub fn begin_calls(&self, image: MockImage) -> usize {
        self.records.lock().unwrap().get(&image).map_or(0, |r| r.begin_calls)
    }

    pub fn observer_count(&self, image: MockImage) -> usize {
        self.records.lock().unwrap().get(&image).map_or(0, |r| r.observers.len())
    }

    /// Record `flags` as the image's current progress and push them to
    /// registered observers, keeping those that ask for more.
    /// Observers are called with no host lock held.
    pub fn deliver(&self, image: MockImage, flags: ImageFlags) {
        let observers = {
            let mut records = self.records.lock().unwrap();
            let record = records.entry(image).or_default();
            record.flags = flags;
            std::mem::take(&mut record.observers)
        };
        let keep: Vec<_> = observers.into_iter().filter(|o| o.image_update(flags)).collect();
        self.records.lock().unwrap().entry(image).or_default().observers.extend(keep);
    }
}

impl ImageHost for MockHost {
    type Image = MockImage;

    fn query_progress(&self, image: &MockImage, _size: TargetSize) -> ImageFlags {
        self.records.lock().unwrap().get(image).map_or(ImageFlags::empty(), |r| r.flags)
    }

    fn begin_load(&self, image: &MockImage, _size: TargetSize, observer: Arc<dyn ImageObserver>) -> bool {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(*image).or_default();
        record.begin_calls += 1;
        if record.flags.contains(ImageFlags::ALLBITS) {
            return true;
        }
        if let Some(flags) = record.on_begin.take() {
            record.flags = flags;
            drop(records);
            if observer.image_update(flags) {
                self.records.lock().unwrap().entry(*image).or_default().observers.push(observer);
            }
            return false;
        }
        record.observers.push(observer);
        false
    }

    fn resolution_variant(&self, image: &MockImage) -> Option<MockImage> {
        self.variants.lock().unwrap().get(image).copied()
    }
}

struct Detached;

impl DoneSignal for Detached {
    fn set_done(&self) {}
}

/// Signal for entries that belong to no tracker
pub fn detached() -> Weak<dyn DoneSignal> {
    Weak::<Detached>::new()
}
