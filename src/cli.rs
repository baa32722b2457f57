//! Command-line interface definitions for artcache.
//!
//! ```bash
//! # Render full thumbnails for everything under ~/Pictures
//! artcache warm ~/Pictures
//!
//! # Quick thumbnails at 2x for a HiDPI display
//! artcache warm ~/Pictures --quick --scale 2
//!
//! # Is this file cached?
//! artcache lookup ~/Pictures/cat.png --json
//!
//! # Cache statistics and cleanup
//! artcache stats
//! artcache clear
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::cache::Variant;

/// Background thumbnail cache.
///
/// artcache renders thumbnails of image files once, keeps them in a cache
/// directory and tracks them in an index so later lookups are instant.
#[derive(Debug, Parser)]
#[command(name = "artcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (default: platform config dir/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory, overriding the configuration
    #[arg(long, value_name = "DIR", global = true, env = "ARTCACHE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Render thumbnails for files and directories
    Warm(WarmArgs),
    /// Look up the cached thumbnail of one file
    Lookup(LookupArgs),
    /// Show cache statistics
    Stats(StatsArgs),
    /// Delete all cached thumbnails and the index
    Clear,
    /// Print the effective configuration as TOML
    Config,
}

/// Which renditions a command works on.
#[derive(Debug, Clone, Copy, Args)]
pub struct VariantArgs {
    /// Use the quick (low resolution) rendition
    #[arg(long, conflicts_with = "both")]
    pub quick: bool,

    /// Work on both the quick and the full rendition
    #[arg(long)]
    pub both: bool,
}

impl VariantArgs {
    /// Selected variants, quick first.
    #[must_use]
    pub fn variants(&self) -> Vec<Variant> {
        if self.both {
            vec![Variant::Quick, Variant::Full]
        } else {
            vec![Variant::from_quick(self.quick)]
        }
    }
}

/// Arguments for `warm`.
#[derive(Debug, Args)]
pub struct WarmArgs {
    /// Files or directories to render
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    #[command(flatten)]
    pub variant: VariantArgs,

    /// Display scale factor (e.g. 2 for HiDPI)
    #[arg(long, value_name = "FACTOR", value_parser = parse_scale)]
    pub scale: Option<f32>,

    /// Follow symbolic links while walking directories
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Save the index after this many changes
    #[arg(long, value_name = "N")]
    pub save_interval: Option<usize>,
}

/// Arguments for `lookup`.
#[derive(Debug, Args)]
pub struct LookupArgs {
    /// Source file
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    #[command(flatten)]
    pub variant: VariantArgs,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `stats`.
#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Parse a display scale factor.
///
/// Accepts positive finite numbers, optionally suffixed with `x` (`1.5x`).
pub fn parse_scale(s: &str) -> Result<f32, String> {
    let trimmed = s.trim();
    let number = trimmed
        .strip_suffix('x')
        .or_else(|| trimmed.strip_suffix('X'))
        .unwrap_or(trimmed);
    let value: f32 = number
        .parse()
        .map_err(|_| format!("Invalid scale factor: '{}'", s))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(format!("Scale factor must be positive: '{}'", s));
    }
    Ok(value)
}
