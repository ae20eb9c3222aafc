//! Core engine modules - tracker, decode workers, file-backed loading host

pub mod file_host;
pub mod tracker;
pub mod workers;

#[cfg(test)]
pub(crate) mod test_host;

// Re-exports for convenience
pub use file_host::{FileImageHost, ImageHandle};
pub use tracker::MediaTracker;
pub use workers::Workers;
