//! In-memory artifact index backed by an [`IndexStore`].
//!
//! Readers (service lookups) and the single writer (the worker thread) share
//! one `RwLock`; persistence always happens on a snapshot so a slow save never
//! blocks lookups for longer than the copy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::database::{IndexStore, StorageResult};
use super::entry::CacheEntry;
use super::key::ArtifactKey;

/// Key to entry mapping with durable load/save.
#[derive(Debug)]
pub struct CacheIndex {
    store: IndexStore,
    entries: RwLock<HashMap<ArtifactKey, CacheEntry>>,
    dirty: AtomicBool,
}

impl CacheIndex {
    /// Create an empty index persisted through `store`.
    ///
    /// Nothing is read until [`CacheIndex::load`] is called.
    #[must_use]
    pub fn new(store: IndexStore) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ArtifactKey, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ArtifactKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the in-memory contents with what is on disk.
    ///
    /// Never fails: an unreadable or corrupt index file is logged and the
    /// index starts empty, so a broken cache can never block startup. The
    /// index is then marked dirty so the next save replaces the broken file.
    /// Returns the number of entries loaded.
    pub fn load(&self) -> usize {
        let (loaded, dirty) = match self.store.load() {
            Ok(entries) => {
                log::debug!(
                    "Loaded {} index entries from {}",
                    entries.len(),
                    self.store.path().display()
                );
                (entries, false)
            }
            Err(e) => {
                log::warn!(
                    "Ignoring unreadable artifact index {}: {}",
                    self.store.path().display(),
                    e
                );
                (HashMap::new(), true)
            }
        };
        let count = loaded.len();
        *self.write() = loaded;
        self.dirty.store(dirty, Ordering::SeqCst);
        count
    }

    /// Persist a snapshot of the current contents.
    ///
    /// On success the dirty flag is cleared; on failure the in-memory state is
    /// kept and the error returned.
    pub fn save(&self) -> StorageResult<usize> {
        let mut snapshot: Vec<CacheEntry> = {
            // Cleared under the lock: a change landing after the snapshot
            // marks the index dirty again.
            let entries = self.read();
            self.dirty.store(false, Ordering::SeqCst);
            entries.values().cloned().collect()
        };
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        match self.store.save(&snapshot) {
            Ok(written) => Ok(written),
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Entry stored under `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: &ArtifactKey) -> Option<CacheEntry> {
        self.read().get(key).cloned()
    }

    /// Insert or replace the entry for `entry.key`.
    pub fn upsert(&self, entry: CacheEntry) {
        let mut entries = self.write();
        entries.insert(entry.key.clone(), entry);
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Remove the entry for `key`, returning it.
    pub fn remove(&self, key: &ArtifactKey) -> Option<CacheEntry> {
        let mut entries = self.write();
        let removed = entries.remove(key);
        if removed.is_some() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        removed
    }

    /// Remove the entry for `key` only if it still equals `expected`.
    ///
    /// Lets readers purge a stale entry without racing a fresh one the worker
    /// committed in the meantime.
    pub fn remove_if_unchanged(&self, expected: &CacheEntry) -> bool {
        let mut entries = self.write();
        if entries.get(&expected.key) == Some(expected) {
            entries.remove(&expected.key);
            self.dirty.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut entries = self.write();
        if !entries.is_empty() {
            entries.clear();
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Whether there are changes not yet saved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Snapshot of all entries, sorted by key.
    #[must_use]
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.read().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}
