//! Cache entry definitions.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::key::ArtifactKey;

/// Modification time and size of a source file, used for staleness checks.
///
/// Content is never hashed: a file is considered unchanged as long as both
/// values match what was recorded when its artifact was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStamp {
    /// Last modification time of the source.
    pub modified: SystemTime,
    /// Source size in bytes.
    pub size: u64,
}

impl SourceStamp {
    /// Create a stamp from raw values.
    #[must_use]
    pub fn new(modified: SystemTime, size: u64) -> Self {
        Self { modified, size }
    }

    /// Read the stamp of a file from the filesystem.
    pub fn read(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            modified: metadata.modified()?,
            size: metadata.len(),
        })
    }
}

/// Outcome of validating an entry against the live source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// Source unchanged and artifact present.
    Valid,
    /// Source changed (or vanished) since the artifact was produced.
    Stale,
    /// The artifact file is gone from the cache directory.
    MissingArtifact,
}

/// A single artifact recorded in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Key this entry is stored under.
    pub key: ArtifactKey,
    /// Location of the produced artifact.
    pub artifact_path: PathBuf,
    /// Source modification time when the artifact was produced.
    pub source_modified: SystemTime,
    /// Source size when the artifact was produced.
    pub source_size: u64,
}

impl CacheEntry {
    /// Create an entry for an artifact produced from a source with `stamp`.
    #[must_use]
    pub fn new(key: ArtifactKey, artifact_path: PathBuf, stamp: SourceStamp) -> Self {
        Self {
            key,
            artifact_path,
            source_modified: stamp.modified,
            source_size: stamp.size,
        }
    }

    /// Stamp recorded at production time.
    #[must_use]
    pub fn stamp(&self) -> SourceStamp {
        SourceStamp::new(self.source_modified, self.source_size)
    }

    /// Check whether this entry still describes `current`.
    ///
    /// `current` is `None` when the source can no longer be stat'ed.
    #[must_use]
    pub fn validate(&self, current: Option<SourceStamp>) -> Validity {
        if !self.artifact_path.is_file() {
            return Validity::MissingArtifact;
        }
        match current {
            Some(stamp) if stamp == self.stamp() => Validity::Valid,
            _ => Validity::Stale,
        }
    }
}
