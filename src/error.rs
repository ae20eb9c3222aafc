//! Error types.
//!
//! A failed image is never an error here: it is an ERRORED status bit,
//! reported through `is_error_*` / `errors_*`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from blocking tracker calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// Another thread called `MediaTracker::interrupt` while this one waited
    #[error("wait interrupted")]
    Interrupted,
}

/// Errors loading `HostConfig` from disk
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {var}={value}: expected a thread count")]
    Env { var: &'static str, value: String },
}
