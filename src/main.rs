use media_tracker::cli::Args;
use media_tracker::config::HostConfig;
use media_tracker::core::{FileImageHost, MediaTracker};
use media_tracker::entities::TargetSize;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::collections::BTreeSet;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_logging(args: &Args) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path) = &args.log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("creating log file {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(&args)?;
    debug!("Command-line args: {:?}", args);

    let config = HostConfig::from_env_and_cli(args.workers, args.config.clone())
        .context("loading host configuration")?;
    let host = Arc::new(FileImageHost::new(&config).context("starting decode workers")?);
    let tracker = MediaTracker::new(Arc::clone(&host));

    let size = args.size.unwrap_or(TargetSize::NATURAL);
    for file in &args.files {
        tracker.add_sized(host.open(&file.path), file.group, size);
    }
    info!("Tracking {} files ({} entries with variants)", args.files.len(), tracker.len());

    let timeout = Duration::from_millis(args.timeout_ms);
    let start = Instant::now();
    let complete = match args.group {
        Some(id) => tracker.wait_id_for(id, timeout)?,
        None => tracker.wait_all_for(timeout)?,
    };
    info!("Wait finished in {} ms", start.elapsed().as_millis());

    let groups: BTreeSet<i32> = args.files.iter().map(|f| f.group).collect();
    for id in groups {
        println!("group {:>4}: {}", id, tracker.status_id(id, false));
    }
    if let Some(failed) = tracker.errors_any() {
        for image in failed {
            let reason = host.failure(&image).unwrap_or_default();
            println!("failed: {} {}", image.path().display(), reason);
        }
    }

    if complete {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
