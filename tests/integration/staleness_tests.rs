use super::support::CopyProducer;
use artcache::cache::{ArtifactKey, Variant};
use artcache::service::{CacheService, ServiceConfig};
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

// Field order matters: the service must stop before the directory goes away.
struct Setup {
    service: CacheService,
    producer: Arc<CopyProducer>,
    source: PathBuf,
    _dir: TempDir,
}

fn cached_source() -> Setup {
    let dir = tempdir().unwrap();
    let source = dir.path().join("photo.jpg");
    fs::write(&source, b"original").unwrap();
    set_file_mtime(&source, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

    let producer = CopyProducer::new();
    let service = CacheService::new(
        ServiceConfig::new(dir.path().join("cache")),
        Arc::clone(&producer),
    );
    service.start().unwrap();
    service.request(&source, Variant::Full, 1.0);
    service.flush().unwrap();
    assert!(service.try_get_cached(&source, Variant::Full).is_some());
    Setup {
        service,
        producer,
        source,
        _dir: dir,
    }
}

fn has_entry(service: &CacheService, source: &Path) -> bool {
    let key = ArtifactKey::new(source, Variant::Full);
    service.entries().iter().any(|entry| entry.key == key)
}

#[test]
fn test_touched_source_is_stale_then_refreshed() {
    let setup = cached_source();
    let old = setup
        .service
        .try_get_cached(&setup.source, Variant::Full)
        .unwrap();

    set_file_mtime(&setup.source, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

    let stale = setup
        .service
        .try_get_cached(&setup.source, Variant::Full)
        .unwrap();
    assert!(stale.needs_update);
    assert_eq!(stale.path, old.path);
    assert!(!has_entry(&setup.service, &setup.source));
    assert!(setup
        .service
        .try_get_cached(&setup.source, Variant::Full)
        .is_none());

    setup.service.request(&setup.source, Variant::Full, 1.0);
    setup.service.flush().unwrap();
    let fresh = setup
        .service
        .try_get_cached(&setup.source, Variant::Full)
        .unwrap();
    assert!(!fresh.needs_update);
    assert_eq!(setup.producer.calls(), 2);
}

#[test]
fn test_size_change_with_same_mtime_is_stale() {
    let setup = cached_source();
    fs::write(&setup.source, b"rewritten with more bytes").unwrap();
    set_file_mtime(&setup.source, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

    let cached = setup
        .service
        .try_get_cached(&setup.source, Variant::Full)
        .unwrap();
    assert!(cached.needs_update);
}

#[test]
fn test_same_stamp_is_not_stale() {
    let setup = cached_source();
    // Content changes are invisible when size and mtime are unchanged.
    fs::write(&setup.source, b"ORIGINAL").unwrap();
    set_file_mtime(&setup.source, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

    let cached = setup
        .service
        .try_get_cached(&setup.source, Variant::Full)
        .unwrap();
    assert!(!cached.needs_update);
}

#[test]
fn test_deleted_artifact_is_a_miss() {
    let setup = cached_source();
    let cached = setup
        .service
        .try_get_cached(&setup.source, Variant::Full)
        .unwrap();
    fs::remove_file(&cached.path).unwrap();

    assert!(setup
        .service
        .try_get_cached(&setup.source, Variant::Full)
        .is_none());
    assert!(!has_entry(&setup.service, &setup.source));
}

#[test]
fn test_deleted_source_is_stale() {
    let setup = cached_source();
    fs::remove_file(&setup.source).unwrap();

    let cached = setup
        .service
        .try_get_cached(&setup.source, Variant::Full)
        .unwrap();
    assert!(cached.needs_update);
    assert!(!has_entry(&setup.service, &setup.source));
}

#[test]
fn test_worker_reproduces_stale_entry() {
    let setup = cached_source();
    fs::write(&setup.source, b"second version").unwrap();

    // Ask the worker directly without looking first.
    setup.service.request(&setup.source, Variant::Full, 1.0);
    setup.service.flush().unwrap();

    let cached = setup
        .service
        .try_get_cached(&setup.source, Variant::Full)
        .unwrap();
    assert!(!cached.needs_update);
    assert_eq!(fs::read(&cached.path).unwrap(), b"second version");
    assert_eq!(setup.producer.calls(), 2);
}
