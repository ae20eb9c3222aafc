//! File-backed loading host: decodes images from disk on a worker pool.
//!
//! **Why**: gives the tracker a real asynchronous loading subsystem.
//! Decodes run on [`Workers`], progress is pushed to registered observers
//! from those worker threads.
//!
//! # Decode lifecycle
//!
//! `Idle → Loading → Loaded | Failed`, plus:
//! - `flush()`: `Loaded → Idle` (pixels dropped, queries report nothing)
//! - `abort_pending()`: `Loading → Aborted` (queued decodes skipped by epoch)
//!
//! Idle and aborted images are decoded again on the next `begin_load`.
//!
//! # Locking
//!
//! Observers are always called with no host lock held: they may call back
//! into the tracker, which may query this host.

use image::RgbaImage;
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::config::HostConfig;
use crate::core::workers::Workers;
use crate::entities::{ImageFlags, ImageHost, ImageObserver, TargetSize};

/// Handle to an image file opened through [`FileImageHost::open`].
/// Cheap to clone; equality is identity.
#[derive(Clone)]
pub struct ImageHandle {
    inner: Arc<ImageSource>,
}

struct ImageSource {
    id: Uuid,
    path: PathBuf,
}

impl ImageHandle {
    fn new(path: PathBuf) -> Self {
        Self {
            inner: Arc::new(ImageSource { id: Uuid::new_v4(), path }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl PartialEq for ImageHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for ImageHandle {}

impl std::fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ImageHandle({})", self.inner.path.display())
    }
}

enum DecodeState {
    Idle,
    Loading,
    Loaded(Arc<RgbaImage>),
    Failed(String),
    Aborted,
}

struct ImageRecord {
    path: PathBuf,
    state: DecodeState,
    observers: Vec<Arc<dyn ImageObserver>>,
}

type Records = Mutex<HashMap<Uuid, ImageRecord>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Push each step to every observer, dropping those that lose interest
fn deliver(mut observers: Vec<Arc<dyn ImageObserver>>, steps: &[ImageFlags]) {
    for &flags in steps {
        observers.retain(|o| o.image_update(flags));
    }
}

/// Loading host reading image files with the `image` crate
pub struct FileImageHost {
    workers: Workers,
    records: Arc<Records>,
    handles: Mutex<HashMap<PathBuf, ImageHandle>>,
    variant_suffix: String,
}

impl FileImageHost {
    pub fn new(config: &HostConfig) -> std::io::Result<Self> {
        let workers = Workers::new(config.workers, Arc::new(AtomicU64::new(0)))?;
        debug!(
            "FileImageHost: {} decode threads, variant suffix {:?}",
            workers.threads(),
            config.variant_suffix
        );
        Ok(Self {
            workers,
            records: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(HashMap::new()),
            variant_suffix: config.variant_suffix.clone(),
        })
    }

    /// Handle for `path`. Opening the same path again returns the same handle.
    /// Nothing is read until a load is requested.
    pub fn open(&self, path: impl AsRef<Path>) -> ImageHandle {
        let path = path.as_ref().to_path_buf();
        let mut handles = lock(&self.handles);
        if let Some(handle) = handles.get(&path) {
            return handle.clone();
        }

        let handle = ImageHandle::new(path.clone());
        lock(&self.records).insert(
            handle.id(),
            ImageRecord {
                path: path.clone(),
                state: DecodeState::Idle,
                observers: Vec::new(),
            },
        );
        trace!("open {}", path.display());
        handles.insert(path, handle.clone());
        handle
    }

    /// Decoded RGBA pixels, if the image is currently loaded
    pub fn pixels(&self, image: &ImageHandle) -> Option<Arc<RgbaImage>> {
        match &lock(&self.records).get(&image.id())?.state {
            DecodeState::Loaded(pixels) => Some(Arc::clone(pixels)),
            _ => None,
        }
    }

    /// Decode failure message, if the last decode failed
    pub fn failure(&self, image: &ImageHandle) -> Option<String> {
        match &lock(&self.records).get(&image.id())?.state {
            DecodeState::Failed(msg) => Some(msg.clone()),
            _ => None,
        }
    }

    /// Drop decoded pixels to free memory. Returns whether anything was dropped.
    pub fn flush(&self, image: &ImageHandle) -> bool {
        let mut records = lock(&self.records);
        let Some(record) = records.get_mut(&image.id()) else {
            return false;
        };
        if matches!(record.state, DecodeState::Loaded(_)) {
            debug!("flush {}", record.path.display());
            record.state = DecodeState::Idle;
            true
        } else {
            false
        }
    }

    /// Abort every decode in flight: queued jobs are skipped and observers
    /// receive ABORT. Returns the number of aborted images.
    pub fn abort_pending(&self) -> usize {
        let epoch = self.workers.bump_epoch();
        let aborted: Vec<Vec<Arc<dyn ImageObserver>>> = {
            let mut records = lock(&self.records);
            records
                .values_mut()
                .filter(|r| matches!(r.state, DecodeState::Loading))
                .map(|r| {
                    r.state = DecodeState::Aborted;
                    std::mem::take(&mut r.observers)
                })
                .collect()
        };

        debug!("abort_pending: {} loads aborted (epoch {})", aborted.len(), epoch);
        let count = aborted.len();
        for observers in aborted {
            deliver(observers, &[ImageFlags::ABORT]);
        }
        count
    }

    fn variant_path(&self, path: &Path) -> Option<PathBuf> {
        if self.variant_suffix.is_empty() {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        // A variant has no variant of its own
        if stem.ends_with(self.variant_suffix.as_str()) {
            return None;
        }
        let mut name = OsString::from(format!("{}{}", stem, self.variant_suffix));
        if let Some(ext) = path.extension() {
            name.push(".");
            name.push(ext);
        }
        let candidate = path.with_file_name(name);
        candidate.is_file().then_some(candidate)
    }

    fn spawn_decode(&self, handle: &ImageHandle) {
        let records = Arc::clone(&self.records);
        let id = handle.id();
        let path = handle.path().to_path_buf();
        let epoch = self.workers.current_epoch();

        self.workers.execute_with_epoch(epoch, move || {
            let result = image::open(&path).map(|img| Arc::new(img.to_rgba8()));

            let (observers, steps) = {
                let mut records = lock(&records);
                let Some(record) = records.get_mut(&id) else {
                    return;
                };
                if !matches!(record.state, DecodeState::Loading) {
                    trace!("discarding decode of {}", path.display());
                    return;
                }
                let observers = std::mem::take(&mut record.observers);
                match result {
                    Ok(pixels) => {
                        debug!("decoded {}: {}x{}", path.display(), pixels.width(), pixels.height());
                        record.state = DecodeState::Loaded(pixels);
                        let size = ImageFlags::WIDTH | ImageFlags::HEIGHT;
                        (observers, vec![size | ImageFlags::SOMEBITS, size | ImageFlags::ALLBITS])
                    }
                    Err(e) => {
                        warn!("failed to decode {}: {}", path.display(), e);
                        record.state = DecodeState::Failed(e.to_string());
                        (observers, vec![ImageFlags::ERROR | ImageFlags::ABORT])
                    }
                }
            };

            deliver(observers, &steps);
        });
    }
}

impl ImageHost for FileImageHost {
    type Image = ImageHandle;

    fn query_progress(&self, image: &ImageHandle, _size: TargetSize) -> ImageFlags {
        let records = lock(&self.records);
        let Some(record) = records.get(&image.id()) else {
            return ImageFlags::ERROR;
        };
        match record.state {
            DecodeState::Idle | DecodeState::Loading => ImageFlags::empty(),
            DecodeState::Loaded(_) => ImageFlags::WIDTH | ImageFlags::HEIGHT | ImageFlags::ALLBITS,
            DecodeState::Failed(_) => ImageFlags::ERROR | ImageFlags::ABORT,
            DecodeState::Aborted => ImageFlags::ABORT,
        }
    }

    fn begin_load(&self, image: &ImageHandle, size: TargetSize, observer: Arc<dyn ImageObserver>) -> bool {
        let mut records = lock(&self.records);
        let Some(record) = records.get_mut(&image.id()) else {
            drop(records);
            warn!("begin_load: {:?} was not opened by this host", image);
            observer.image_update(ImageFlags::ERROR);
            return false;
        };

        match record.state {
            DecodeState::Loaded(_) => true,
            DecodeState::Failed(_) => {
                drop(records);
                observer.image_update(ImageFlags::ERROR | ImageFlags::ABORT);
                false
            }
            DecodeState::Loading => {
                record.observers.push(observer);
                false
            }
            DecodeState::Idle | DecodeState::Aborted => {
                trace!("queue decode {} at {}", record.path.display(), size);
                record.state = DecodeState::Loading;
                record.observers.push(observer);
                drop(records);
                self.spawn_decode(image);
                false
            }
        }
    }

    fn resolution_variant(&self, image: &ImageHandle) -> Option<ImageHandle> {
        self.variant_path(image.path()).map(|path| self.open(path))
    }
}

impl std::fmt::Debug for FileImageHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileImageHost")
            .field("workers", &self.workers.threads())
            .field("images", &lock(&self.records).len())
            .field("variant_suffix", &self.variant_suffix)
            .finish()
    }
}
