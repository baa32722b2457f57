//! On-disk layout of the cache directory.
//!
//! ```text
//! <root>/
//!   index.db                  artifact index (SQLite)
//!   <stem>.<ext>              produced artifacts
//!   <stem>.<ext>.part         artifact being written by the worker
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use super::database::IndexStore;
use super::key::ArtifactKey;

/// Default index file name inside the cache root.
pub const DEFAULT_INDEX_FILE: &str = "index.db";

const STAGING_SUFFIX: &str = "part";

/// Paths of everything the worker writes.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
    index_file: String,
}

impl CacheLayout {
    /// Layout rooted at `root` with the default index file name.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_file: DEFAULT_INDEX_FILE.to_string(),
        }
    }

    /// Use a different index file name.
    #[must_use]
    pub fn with_index_file(mut self, name: impl Into<String>) -> Self {
        self.index_file = name.into();
        self
    }

    /// Platform cache directory, or a temp directory when none is available.
    #[must_use]
    pub fn default_root() -> PathBuf {
        match ProjectDirs::from("com", "artcache", "artcache") {
            Some(dirs) => dirs.cache_dir().join("thumbnails"),
            None => {
                log::debug!("No platform cache directory, falling back to temp dir");
                std::env::temp_dir().join("artcache")
            }
        }
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of the index file.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.root.join(&self.index_file)
    }

    /// Store for the index file.
    #[must_use]
    pub fn index_store(&self) -> IndexStore {
        IndexStore::new(self.index_path())
    }

    /// Final artifact location for `key`.
    #[must_use]
    pub fn artifact_path(&self, key: &ArtifactKey, extension: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", key.artifact_stem(), extension))
    }

    /// Location the producer writes to before the artifact is committed.
    #[must_use]
    pub fn staging_path(&self, key: &ArtifactKey, extension: &str) -> PathBuf {
        self.root.join(format!(
            "{}.{}.{}",
            key.artifact_stem(),
            extension,
            STAGING_SUFFIX
        ))
    }

    /// Create the root directory if needed.
    pub fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// Artifact files currently on disk (index and staging files excluded).
    pub fn artifact_files(&self) -> io::Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let index = self.index_path();
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() || self.is_bookkeeping(&path, &index) {
                continue;
            }
            files.push(path);
        }
        files.sort();
        Ok(files)
    }

    fn is_bookkeeping(&self, path: &Path, index: &Path) -> bool {
        if path == index {
            return true;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        name.starts_with(&self.index_file) || name.ends_with(&format!(".{STAGING_SUFFIX}"))
    }

    /// Delete every artifact, staging file and the index.
    ///
    /// Only regular files directly inside the root are removed. Returns the
    /// number of files deleted.
    pub fn purge(&self) -> io::Result<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        log::info!("Removed {} files from {}", removed, self.root.display());
        Ok(removed)
    }
}
