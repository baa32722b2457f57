//! Application configuration management.
//!
//! Settings are layered with `figment`, later layers winning:
//!
//! 1. Built-in defaults
//! 2. TOML file (`--config <FILE>` or `<config dir>/config.toml`)
//! 3. `ARTCACHE_*` environment variables (e.g. `ARTCACHE_SAVE_INTERVAL=50`)
//! 4. Command-line flags, applied by the caller

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::{CacheLayout, DEFAULT_INDEX_FILE};
use crate::worker::{
    ImageThumbnailer, DEFAULT_QUICK_THUMBNAIL_SIZE, DEFAULT_SAVE_INTERVAL, DEFAULT_THUMBNAIL_SIZE,
};

/// Prefix of environment variables read into the configuration.
pub const ENV_PREFIX: &str = "ARTCACHE_";

/// Smallest accepted thumbnail edge.
pub const MIN_THUMBNAIL_SIZE: u32 = 16;
/// Largest accepted thumbnail edge.
pub const MAX_THUMBNAIL_SIZE: u32 = 4096;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache directory. Defaults to the platform cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// File name of the index inside the cache directory.
    pub index_file: String,
    /// Index changes between automatic saves.
    pub save_interval: usize,
    /// Edge length of full thumbnails at scale 1.0.
    pub thumbnail_size: u32,
    /// Edge length of quick thumbnails at scale 1.0.
    pub quick_thumbnail_size: u32,
    /// Default display scale factor.
    pub scale: f32,
    /// Follow symbolic links when walking directories.
    pub follow_symlinks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: None,
            index_file: DEFAULT_INDEX_FILE.to_string(),
            save_interval: DEFAULT_SAVE_INTERVAL,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            quick_thumbnail_size: DEFAULT_QUICK_THUMBNAIL_SIZE,
            scale: 1.0,
            follow_symlinks: false,
        }
    }
}

impl Config {
    /// Load the configuration.
    ///
    /// An explicit `path` must parse. Without one, the default config file is
    /// used if it exists; a broken default file is logged and skipped.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => match Self::load_from_path(&path) {
                Ok(config) => Ok(config),
                Err(e) => {
                    log::warn!("Ignoring config file {}: {:#}", path.display(), e);
                    Self::from_figment(Self::figment(None))
                }
            },
            _ => Self::from_figment(Self::figment(None)),
        }
    }

    /// Load defaults, `path` and the environment.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::from_figment(Self::figment(Some(path)))
            .with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// The layered configuration sources.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract()?;
        Ok(config.validated())
    }

    /// Default config file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "artcache", "artcache")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Clamp out-of-range values to something usable.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if self.save_interval == 0 {
            log::warn!("save_interval must be at least 1, using 1");
            self.save_interval = 1;
        }
        self.thumbnail_size = clamp_size("thumbnail_size", self.thumbnail_size);
        self.quick_thumbnail_size = clamp_size("quick_thumbnail_size", self.quick_thumbnail_size);
        if !(self.scale.is_finite() && self.scale > 0.0) {
            log::warn!("Invalid scale {}, using 1.0", self.scale);
            self.scale = 1.0;
        }
        if self.index_file.trim().is_empty() {
            self.index_file = DEFAULT_INDEX_FILE.to_string();
        }
        self
    }

    /// Cache directory after falling back to the platform default.
    #[must_use]
    pub fn resolve_cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(CacheLayout::default_root)
    }

    /// Cache layout for this configuration.
    #[must_use]
    pub fn layout(&self) -> CacheLayout {
        CacheLayout::new(self.resolve_cache_dir()).with_index_file(self.index_file.clone())
    }

    /// Thumbnail producer sized per this configuration.
    #[must_use]
    pub fn thumbnailer(&self) -> ImageThumbnailer {
        ImageThumbnailer::new(self.thumbnail_size, self.quick_thumbnail_size)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

fn clamp_size(field: &str, value: u32) -> u32 {
    let clamped = value.clamp(MIN_THUMBNAIL_SIZE, MAX_THUMBNAIL_SIZE);
    if clamped != value {
        log::warn!("{} {} out of range, using {}", field, value, clamped);
    }
    clamped
}
