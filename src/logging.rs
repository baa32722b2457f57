//! Logging setup for the `artcache` binary.
//!
//! The library only talks to the `log` facade. The binary installs an
//! `env_logger` backend whose level comes from, in priority order:
//!
//! 1. `RUST_LOG` (if set)
//! 2. `--quiet` (errors only) or `-v` / `-vv` (debug / trace)
//! 3. Default: info for this crate, warnings for dependencies
//!
//! Debug builds prefix records with a timestamp (and the module path when
//! verbose); release builds print level and message only.
//!
//! ```rust,no_run
//! use artcache::logging::init_logging;
//!
//! init_logging(1, false);
//! log::debug!("visible with -v");
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Install the global logger. Returns `false` if one was already installed.
pub fn init_logging(verbose: u8, quiet: bool) -> bool {
    let from_env = env::var("RUST_LOG").is_ok();
    let level = determine_level(verbose, quiet);

    let mut builder = Builder::new();
    if from_env {
        builder.parse_default_env();
    } else {
        builder
            .filter_level(dependency_level(level))
            .filter_module(env!("CARGO_CRATE_NAME"), level);
    }
    configure_format(&mut builder, verbose);

    if builder.try_init().is_err() {
        return false;
    }
    if from_env {
        log::debug!("Logging configured from RUST_LOG");
    } else {
        log::debug!("Logging initialized at level: {:?}", level);
    }
    true
}

fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Dependencies stay at warnings unless we are tracing.
fn dependency_level(level: LevelFilter) -> LevelFilter {
    match level {
        LevelFilter::Trace => LevelFilter::Debug,
        other => other.min(LevelFilter::Warn),
    }
}

fn configure_format(builder: &mut Builder, verbose: u8) {
    #[cfg(debug_assertions)]
    {
        builder.format(move |buf, record| {
            let level = record.level();
            let style = buf.default_level_style(level);
            let timestamp = buf.timestamp_millis();
            if verbose > 0 {
                writeln!(
                    buf,
                    "{} {style}{:<5}{style:#} [{}] {}",
                    timestamp,
                    level,
                    record.module_path().unwrap_or("unknown"),
                    record.args()
                )
            } else {
                writeln!(buf, "{} {style}{:<5}{style:#} {}", timestamp, level, record.args())
            }
        });
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = verbose;
        builder.format(|buf, record| {
            let level = record.level();
            let style = buf.default_level_style(level);
            writeln!(buf, "{style}{:<5}{style:#} {}", level, record.args())
        });
    }
}
