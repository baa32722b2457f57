//! SQLite-backed storage for the artifact index.
//!
//! The index is always written as a whole: [`IndexStore::save`] builds a fresh
//! database next to the real one and renames it into place, so a crash during
//! a save leaves the previous index intact.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OpenFlags};

use super::entry::CacheEntry;
use super::key::{ArtifactKey, Variant};

/// Current on-disk schema version (`PRAGMA user_version`).
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_TABLE: &str = "CREATE TABLE artifact_entries (
    source_path   TEXT    NOT NULL,
    variant       INTEGER NOT NULL,
    artifact_path TEXT    NOT NULL,
    mtime_secs    INTEGER NOT NULL,
    mtime_nanos   INTEGER NOT NULL,
    source_size   INTEGER NOT NULL,
    PRIMARY KEY (source_path, variant)
)";

/// Errors reading or writing the index file.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// The database layer rejected an operation.
    #[error("Index database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A filesystem operation on the index failed.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file was written by an incompatible version.
    #[error("Unsupported index schema version {found} (expected {expected})")]
    SchemaVersion {
        /// Version stored in the file
        found: i64,
        /// Version this build understands
        expected: i64,
    },
}

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Location of the durable index file.
#[derive(Debug, Clone)]
pub struct IndexStore {
    path: PathBuf,
}

impl IndexStore {
    /// Use `path` as the index file. Nothing is touched until load or save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the index file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Read every entry from disk.
    ///
    /// A missing file yields an empty map. Anything else that goes wrong is
    /// returned as an error; callers decide how tolerant to be.
    pub fn load(&self) -> StorageResult<HashMap<ArtifactKey, CacheEntry>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version != SCHEMA_VERSION {
            return Err(StorageError::SchemaVersion {
                found: version,
                expected: SCHEMA_VERSION,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT source_path, variant, artifact_path, mtime_secs, mtime_nanos, source_size
             FROM artifact_entries",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut entries = HashMap::new();
        for row in rows {
            let (source, variant, artifact, secs, nanos, size) = row?;
            let Some(variant) = Variant::from_code(variant) else {
                log::debug!("Skipping index row with unknown variant {variant}: {source}");
                continue;
            };
            let key = ArtifactKey::from_parts(source, variant);
            let entry = CacheEntry {
                key: key.clone(),
                artifact_path: PathBuf::from(artifact),
                source_modified: time_from_parts(secs, nanos),
                source_size: u64::try_from(size).unwrap_or(0),
            };
            entries.insert(key, entry);
        }
        Ok(entries)
    }

    /// Replace the file on disk with `entries`.
    pub fn save<'a, I>(&self, entries: I) -> StorageResult<usize>
    where
        I: IntoIterator<Item = &'a CacheEntry>,
    {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let staging = self.staging_path();
        remove_if_exists(&staging)?;

        let mut conn = Connection::open(&staging)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        conn.execute(CREATE_TABLE, [])?;

        let mut written = 0;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO artifact_entries
                 (source_path, variant, artifact_path, mtime_secs, mtime_nanos, source_size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for entry in entries {
                let (secs, nanos) = time_to_parts(entry.source_modified);
                stmt.execute(params![
                    entry.key.source(),
                    entry.key.variant().code(),
                    entry.artifact_path.to_string_lossy(),
                    secs,
                    nanos,
                    i64::try_from(entry.source_size).unwrap_or(i64::MAX),
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        conn.close().map_err(|(_, e)| e)?;

        fs::rename(&staging, &self.path).map_err(|source| StorageError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(written)
    }

    /// Delete the index file if present.
    pub fn delete(&self) -> StorageResult<()> {
        remove_if_exists(&self.staging_path())?;
        remove_if_exists(&self.path)
    }
}

fn remove_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Split a timestamp into whole seconds (possibly negative) and nanoseconds.
fn time_to_parts(time: SystemTime) -> (i64, i64) {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, i64::from(d.subsec_nanos())),
        Err(e) => {
            let d = e.duration();
            if d.subsec_nanos() == 0 {
                (-(d.as_secs() as i64), 0)
            } else {
                (
                    -(d.as_secs() as i64) - 1,
                    i64::from(1_000_000_000 - d.subsec_nanos()),
                )
            }
        }
    }
}

fn time_from_parts(secs: i64, nanos: i64) -> SystemTime {
    let nanos = Duration::from_nanos(nanos.clamp(0, 999_999_999) as u64);
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs()) + nanos
    }
}
