//! Loading host configuration.
//!
//! Priority: CLI flag → `MEDIA_TRACKER_WORKERS` env var → JSON file → defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Environment override for the decode thread count
pub const WORKERS_ENV: &str = "MEDIA_TRACKER_WORKERS";

/// Suffix marking the high-resolution sibling of an image file
pub const DEFAULT_VARIANT_SUFFIX: &str = "@2x";

/// Leave a quarter of the cores to the caller's own threads
pub fn default_workers() -> usize {
    (num_cpus::get() * 3 / 4).max(1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Decode threads
    pub workers: usize,
    /// `photo.png` has variant `photo<suffix>.png` when that file exists
    pub variant_suffix: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            variant_suffix: DEFAULT_VARIANT_SUFFIX.to_string(),
        }
    }
}

impl HostConfig {
    /// Read a JSON config; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build config from CLI arguments and the process environment
    pub fn from_env_and_cli(cli_workers: Option<usize>, file: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::resolve(cli_workers, std::env::var(WORKERS_ENV).ok(), file.as_deref())
    }

    fn resolve(
        cli_workers: Option<usize>,
        env_workers: Option<String>,
        file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(value) = env_workers {
            config.workers = match value.trim().parse::<usize>() {
                Ok(workers) => workers,
                Err(_) => return Err(ConfigError::Env { var: WORKERS_ENV, value }),
            };
        }
        if let Some(workers) = cli_workers {
            config.workers = workers;
        }

        config.workers = config.workers.max(1);
        Ok(config)
    }
}
