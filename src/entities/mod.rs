//! Domain types: status bitmasks, collaborator traits and tracked entries.

pub mod entry;
pub mod image_entry;
pub mod status;
pub mod traits;

pub use entry::EntryBase;
pub use image_entry::ImageEntry;
pub use status::{ImageFlags, LoadStatus, TargetSize};
pub use traits::{DoneSignal, ImageHost, ImageObserver, TrackedMedia};
