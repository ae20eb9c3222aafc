//! Media tracker - load progress for groups of asynchronously loading images
//!
//! Register images under group ids on a [`MediaTracker`], then poll or block
//! until a group (or everything) has loaded. Loading itself is delegated to
//! an [`ImageHost`]; [`FileImageHost`] decodes files on a worker pool.

// Core engine (tracker, workers, file host)
pub mod core;

pub mod cli;
pub mod config;
pub mod entities;
pub mod error;

// Re-export commonly used types
pub use config::HostConfig;
pub use core::{FileImageHost, ImageHandle, MediaTracker};
pub use entities::{ImageFlags, ImageHost, ImageObserver, LoadStatus, TargetSize, TrackedMedia};
pub use error::{ConfigError, TrackerError};
