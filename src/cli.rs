use clap::Parser;
use std::path::PathBuf;

use crate::entities::TargetSize;

// Build version with target info
const VERSION_INFO: &str = const_format::concatcp!(
    env!("CARGO_PKG_VERSION"), "\n",
    "Target: ", std::env::consts::ARCH, "-", std::env::consts::OS
);

/// Load images in groups and report when they are done
#[derive(Parser, Debug)]
#[command(author, version = VERSION_INFO, about, long_about = None)]
pub struct Args {
    /// Images to track, optionally prefixed with a group id (default group 0)
    #[arg(value_name = "[GROUP=]FILE", required = true, value_parser = parse_tracked_file)]
    pub files: Vec<TrackedFile>,

    /// Wait only for this group instead of all of them
    #[arg(long = "id", value_name = "GROUP")]
    pub group: Option<i32>,

    /// Give up after this many milliseconds (0 = wait forever)
    #[arg(short = 't', long = "timeout", value_name = "MS", default_value_t = 0)]
    pub timeout_ms: u64,

    /// Requested size for every image (default: natural size)
    #[arg(short = 's', long = "size", value_name = "WxH", value_parser = parse_size)]
    pub size: Option<TargetSize>,

    /// Decode threads (overrides MEDIA_TRACKER_WORKERS and the config file)
    #[arg(short = 'w', long = "workers", value_name = "N")]
    pub workers: Option<usize>,

    /// JSON host configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the log to a file instead of stderr
    #[arg(short = 'l', long = "log", value_name = "LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Increase logging verbosity (default: warn, -v: info, -vv: debug, -vvv+: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

/// One image argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    pub group: i32,
    pub path: PathBuf,
}

/// `[GROUP=]FILE`; a non-numeric prefix is part of the file name
fn parse_tracked_file(s: &str) -> Result<TrackedFile, String> {
    if let Some((group, path)) = s.split_once('=') {
        if let Ok(group) = group.parse::<i32>() {
            if path.is_empty() {
                return Err(format!("missing file after group {}", group));
            }
            return Ok(TrackedFile { group, path: PathBuf::from(path) });
        }
    }
    Ok(TrackedFile { group: 0, path: PathBuf::from(s) })
}

/// `WxH`, e.g. `64x32`
fn parse_size(s: &str) -> Result<TargetSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {:?}", s))?;
    let w = w.trim().parse::<u32>().map_err(|e| format!("bad width {:?}: {}", w, e))?;
    let h = h.trim().parse::<u32>().map_err(|e| format!("bad height {:?}: {}", h, e))?;
    Ok(TargetSize::new(w, h))
}
