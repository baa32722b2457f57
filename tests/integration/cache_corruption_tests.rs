use super::support::CopyProducer;
use artcache::cache::{CacheLayout, IndexStore, StorageError, Variant};
use artcache::service::{CacheService, ServiceConfig};
use rusqlite::Connection;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_garbage_index_starts_empty() {
    let dir = tempdir().unwrap();
    let layout = CacheLayout::new(dir.path().join("cache"));
    layout.ensure_root().unwrap();
    fs::write(layout.index_path(), b"definitely not sqlite ".repeat(200)).unwrap();

    let source = dir.path().join("a.jpg");
    fs::write(&source, b"pixels").unwrap();

    let service = CacheService::new(
        ServiceConfig::from_layout(layout.clone()),
        CopyProducer::new(),
    );
    service.start().unwrap();
    assert!(service.entries().is_empty());
    assert!(service.try_get_cached(&source, Variant::Full).is_none());

    service.request(&source, Variant::Full, 1.0);
    service.flush().unwrap();
    assert!(service.try_get_cached(&source, Variant::Full).is_some());
    service.stop().unwrap();

    // The broken file was replaced by a valid index.
    assert_eq!(layout.index_store().load().unwrap().len(), 1);
}

#[test]
fn test_garbage_index_is_rewritten_even_without_work() {
    let dir = tempdir().unwrap();
    let layout = CacheLayout::new(dir.path().join("cache"));
    layout.ensure_root().unwrap();
    fs::write(layout.index_path(), b"\x00\x01garbage".repeat(500)).unwrap();

    let service = CacheService::new(
        ServiceConfig::from_layout(layout.clone()),
        CopyProducer::new(),
    );
    service.start().unwrap();
    service.stop().unwrap();

    assert!(layout.index_store().load().unwrap().is_empty());
}

#[test]
fn test_unknown_schema_version_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.db");
    {
        let conn = Connection::open(&path).unwrap();
        conn.pragma_update(None, "user_version", 99).unwrap();
        conn.execute("CREATE TABLE unrelated (id INTEGER)", []).unwrap();
    }

    match IndexStore::new(&path).load() {
        Err(StorageError::SchemaVersion { found, expected }) => {
            assert_eq!(found, 99);
            assert_eq!(expected, 1);
        }
        other => panic!("expected schema error, got {:?}", other.map(|m| m.len())),
    }
}

#[test]
fn test_truncated_index_is_tolerated() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let source = dir.path().join("a.jpg");
    fs::write(&source, b"pixels").unwrap();
    {
        let service = CacheService::new(ServiceConfig::new(&cache_dir), CopyProducer::new());
        service.start().unwrap();
        service.request(&source, Variant::Full, 1.0);
        service.flush().unwrap();
    }

    let index_path = CacheLayout::new(&cache_dir).index_path();
    let bytes = fs::read(&index_path).unwrap();
    fs::write(&index_path, &bytes[..bytes.len() / 3]).unwrap();

    let service = CacheService::new(ServiceConfig::new(&cache_dir), CopyProducer::new());
    service.start().unwrap();
    // Whatever survived, lookups must not fail and work must continue.
    let _ = service.try_get_cached(&source, Variant::Full);
    service.request(&source, Variant::Full, 1.0);
    service.flush().unwrap();
    assert!(service.try_get_cached(&source, Variant::Full).is_some());
}

#[test]
fn test_entries_pointing_at_deleted_artifacts_are_dropped() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let source = dir.path().join("a.jpg");
    fs::write(&source, b"pixels").unwrap();
    {
        let service = CacheService::new(ServiceConfig::new(&cache_dir), CopyProducer::new());
        service.start().unwrap();
        service.request(&source, Variant::Quick, 1.0);
        service.flush().unwrap();
    }
    let layout = CacheLayout::new(&cache_dir);
    for file in layout.artifact_files().unwrap() {
        fs::remove_file(file).unwrap();
    }

    let producer = CopyProducer::new();
    let service = CacheService::new(
        ServiceConfig::new(&cache_dir),
        std::sync::Arc::clone(&producer),
    );
    service.start().unwrap();
    service.request(&source, Variant::Quick, 1.0);
    service.flush().unwrap();

    let cached = service.try_get_cached(&source, Variant::Quick).unwrap();
    assert!(cached.path.is_file());
    assert_eq!(producer.calls(), 1);
}

#[test]
fn test_leftover_staging_files_are_not_artifacts() {
    let dir = tempdir().unwrap();
    let layout = CacheLayout::new(dir.path().join("cache"));
    layout.ensure_root().unwrap();
    fs::write(layout.root().join("deadbeef.png.part"), b"half").unwrap();
    fs::write(layout.root().join("index.db.tmp"), b"half").unwrap();
    fs::write(layout.root().join("deadbeef.png"), b"whole").unwrap();

    let files = layout.artifact_files().unwrap();
    assert_eq!(files, vec![layout.root().join("deadbeef.png")]);
    assert_eq!(layout.purge().unwrap(), 3);
}
