//! artcache - background thumbnail cache
//!
//! A small pipeline that produces derived artifacts (thumbnails) of source
//! files on a background worker, stores them in a cache directory and tracks
//! them in a persistent index so later lookups are instant:
//!
//! - [`cache`]: keys, entries, the on-disk index and directory layout
//! - [`queue`]: the FIFO work queue with separators
//! - [`worker`]: the processing worker and artifact producers
//! - [`service`]: the facade callers use
//! - [`events`]: notifications emitted by the worker
//!
//! The `artcache` binary wraps the service in a CLI (see [`cli`]).

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod progress;
pub mod queue;
pub mod service;
pub mod signal;
pub mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use serde::Serialize;
use walkdir::WalkDir;

use crate::cache::{CacheIndex, CacheLayout, Variant};
use crate::cli::{Cli, Commands, LookupArgs, StatsArgs, WarmArgs};
use crate::config::Config;
use crate::error::ExitCode;
use crate::progress::WarmProgress;
use crate::queue::PushOutcome;
use crate::service::{CacheService, ServiceConfig, ServiceError};
use crate::signal::ShutdownHandler;
use crate::worker::ImageThumbnailer;

/// Run the CLI. Returns the exit code for a completed run.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = Some(dir);
    }
    log::debug!("Using cache directory {}", config.resolve_cache_dir().display());

    match cli.command {
        Commands::Warm(args) => run_warm(config, args, cli.quiet),
        Commands::Lookup(args) => run_lookup(&config, &args),
        Commands::Stats(args) => run_stats(&config, &args),
        Commands::Clear => run_clear(&config),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::Success)
        }
    }
}

fn run_warm(mut config: Config, args: WarmArgs, quiet: bool) -> Result<ExitCode> {
    if args.follow_symlinks {
        config.follow_symlinks = true;
    }
    if let Some(interval) = args.save_interval {
        config.save_interval = interval.max(1);
    }
    let scale = args.scale.unwrap_or(config.scale);
    let layout = config.layout();

    let shutdown = signal::install_handler()?;
    let progress = Arc::new(WarmProgress::new(quiet));
    let service = Arc::new(CacheService::new(
        ServiceConfig::from_layout(layout.clone())
            .with_save_interval(config.save_interval)
            .with_listener(Arc::clone(&progress) as Arc<dyn events::CacheListener>),
        config.thumbnailer(),
    ));
    let weak = Arc::downgrade(&service);
    shutdown.on_shutdown(move || {
        if let Some(service) = weak.upgrade() {
            service.signal_stop();
        }
    });
    service.start()?;

    progress.start_discovery();
    let (sources, walk_errors) =
        collect_sources(&args.paths, &layout, config.follow_symlinks, &shutdown, &progress);
    let mut queued = 0u64;
    for source in &sources {
        for variant in args.variant.variants() {
            if service.request(source, variant, scale) == PushOutcome::Queued {
                queued += 1;
            }
        }
    }
    log::info!("Queued {} thumbnails from {} sources", queued, sources.len());
    progress.start_rendering(queued);

    let flushed = service.flush();
    progress.finish();
    let stats = service.stop()?;

    if shutdown.is_shutdown_requested() {
        eprintln!(
            "Interrupted after {} of {} thumbnails",
            stats.produced + stats.reused + stats.failed,
            queued
        );
        return Ok(ExitCode::Interrupted);
    }
    match flushed {
        Ok(()) => {}
        Err(ServiceError::Stopped) => log::warn!("Cache worker stopped before the queue drained"),
        Err(e) => return Err(e.into()),
    }

    if !quiet {
        println!(
            "{} rendered, {} already cached, {} failed ({})",
            stats.produced,
            stats.reused,
            stats.failed,
            layout.root().display()
        );
    }
    if stats.failed > 0 || walk_errors > 0 {
        Ok(ExitCode::PartialSuccess)
    } else {
        Ok(ExitCode::Success)
    }
}

/// Expand `paths` into image files. Returns the files and the number of
/// paths that could not be read.
fn collect_sources(
    paths: &[PathBuf],
    layout: &CacheLayout,
    follow_symlinks: bool,
    shutdown: &ShutdownHandler,
    progress: &WarmProgress,
) -> (Vec<PathBuf>, usize) {
    let mut sources = Vec::new();
    let mut errors = 0;

    for root in paths {
        if root.is_file() {
            progress.discovered();
            sources.push(root.clone());
            continue;
        }
        let walker = WalkDir::new(root)
            .follow_links(follow_symlinks)
            .into_iter()
            .filter_entry(|entry| entry.path() != layout.root());
        for entry in walker {
            if shutdown.is_shutdown_requested() {
                return (sources, errors);
            }
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && ImageThumbnailer::supports(entry.path()) {
                        progress.discovered();
                        sources.push(entry.into_path());
                    }
                }
                Err(e) => {
                    log::warn!("Skipping unreadable path: {}", e);
                    errors += 1;
                }
            }
        }
    }
    (sources, errors)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum LookupStatus {
    Hit,
    Stale,
    Miss,
}

impl LookupStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Stale => "stale",
            Self::Miss => "miss",
        }
    }
}

#[derive(Debug, Serialize)]
struct LookupReport {
    source: PathBuf,
    variant: Variant,
    status: LookupStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    artifact: Option<PathBuf>,
}

fn run_lookup(config: &Config, args: &LookupArgs) -> Result<ExitCode> {
    let service = CacheService::new(
        ServiceConfig::from_layout(config.layout()),
        config.thumbnailer(),
    );
    // Starting loads the index; stopping persists any purged entries.
    service.start()?;

    let reports: Vec<LookupReport> = args
        .variant
        .variants()
        .into_iter()
        .map(|variant| {
            let cached = service.try_get_cached(&args.path, variant);
            let status = match &cached {
                None => LookupStatus::Miss,
                Some(hit) if hit.needs_update => LookupStatus::Stale,
                Some(_) => LookupStatus::Hit,
            };
            LookupReport {
                source: args.path.clone(),
                variant,
                status,
                artifact: cached.map(|c| c.path),
            }
        })
        .collect();
    service.stop()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            let artifact = report
                .artifact
                .as_ref()
                .map(|path| format!(" {}", path.display()))
                .unwrap_or_default();
            println!(
                "{} [{}]: {}{}",
                report.source.display(),
                report.variant,
                report.status.as_str(),
                artifact
            );
        }
    }
    Ok(ExitCode::Success)
}

#[derive(Debug, Serialize)]
struct StatsReport {
    cache_dir: PathBuf,
    index_path: PathBuf,
    entries: usize,
    artifact_files: usize,
    artifact_bytes: u64,
}

fn run_stats(config: &Config, args: &StatsArgs) -> Result<ExitCode> {
    let layout = config.layout();
    let index = CacheIndex::new(layout.index_store());
    let entries = index.load();
    let files = layout
        .artifact_files()
        .with_context(|| format!("Failed to list {}", layout.root().display()))?;
    let bytes = files.iter().map(|path| file_size(path)).sum();

    let report = StatsReport {
        cache_dir: layout.root().to_path_buf(),
        index_path: layout.index_path(),
        entries,
        artifact_files: files.len(),
        artifact_bytes: bytes,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Cache directory: {}", report.cache_dir.display());
        println!("Index:           {}", report.index_path.display());
        println!("Entries:         {}", report.entries);
        println!(
            "Artifacts:       {} files, {}",
            report.artifact_files,
            ByteSize::b(report.artifact_bytes)
        );
    }
    Ok(ExitCode::Success)
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn run_clear(config: &Config) -> Result<ExitCode> {
    let layout = config.layout();
    let removed = layout
        .purge()
        .with_context(|| format!("Failed to clear {}", layout.root().display()))?;
    println!("Removed {} files from {}", removed, layout.root().display());
    Ok(ExitCode::Success)
}
