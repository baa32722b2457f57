//! Artifact caching module.
//!
//! This module holds the persistent side of the pipeline: keys, entries, the
//! in-memory index and its durable SQLite file, and the cache directory layout.
//!
//! # Architecture
//!
//! * [`key`]: Artifact identity (normalized source path + variant).
//! * [`entry`]: Cached artifact metadata and staleness validation.
//! * [`index`]: Thread-safe in-memory index with load/save.
//! * [`database`]: SQLite persistence, schema management, atomic saves.
//! * [`layout`]: Where artifacts, staging files and the index live on disk.
//!
//! # Cache Invalidation
//!
//! Entries are validated using a combination of:
//! * Source path and variant (primary key)
//! * Source size
//! * Source modification time (mtime)
//! * Presence of the artifact file
//!
//! If either source attribute changes, the entry is considered stale and the
//! artifact will be produced again on the next request.

pub mod database;
pub mod entry;
pub mod index;
pub mod key;
pub mod layout;

pub use database::{IndexStore, StorageError, StorageResult};
pub use entry::{CacheEntry, SourceStamp, Validity};
pub use index::CacheIndex;
pub use key::{ArtifactKey, Variant};
pub use layout::{CacheLayout, DEFAULT_INDEX_FILE};
