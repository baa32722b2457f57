use super::support::CopyProducer;
use artcache::cache::{CacheLayout, Variant};
use artcache::events::{CacheEvent, ChannelListener};
use artcache::queue::PushOutcome;
use artcache::service::{CacheService, ServiceConfig};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn sources(dir: &std::path::Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("src{}.jpg", i));
            fs::write(&path, format!("bytes {}", i)).unwrap();
            path
        })
        .collect()
}

#[test]
fn test_index_survives_restart() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let files = sources(dir.path(), 3);

    let first = CacheService::new(ServiceConfig::new(&cache_dir), CopyProducer::new());
    first.start().unwrap();
    for file in &files {
        first.request(file, Variant::Quick, 1.0);
    }
    first.flush().unwrap();
    let stats = first.stop().unwrap();
    assert_eq!(stats.produced, 3);
    drop(first);

    let producer = CopyProducer::new();
    let second = CacheService::new(ServiceConfig::new(&cache_dir), Arc::clone(&producer));
    second.start().unwrap();
    for file in &files {
        let cached = second.try_get_cached(file, Variant::Quick).unwrap();
        assert!(!cached.needs_update);
        assert!(cached.path.starts_with(&cache_dir));
    }

    // Re-requesting after a restart reuses the persisted artifacts.
    for file in &files {
        second.request(file, Variant::Quick, 1.0);
    }
    second.flush().unwrap();
    assert_eq!(producer.calls(), 0);
    assert_eq!(second.stop().unwrap().reused, 3);
}

#[test]
fn test_periodic_save_before_stop() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let files = sources(dir.path(), 4);
    let service = CacheService::new(
        ServiceConfig::new(&cache_dir).with_save_interval(2),
        CopyProducer::new(),
    );
    service.start().unwrap();
    for file in &files {
        service.request(file, Variant::Full, 1.0);
    }
    service.flush().unwrap();

    // Saved twice while running; nothing depends on stop() yet.
    let on_disk = CacheLayout::new(&cache_dir).index_store().load().unwrap();
    assert_eq!(on_disk.len(), 4);
    assert_eq!(service.stats().saves, 2);
}

#[test]
fn test_request_save() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let files = sources(dir.path(), 1);
    let (listener, events) = ChannelListener::new();
    let service = CacheService::new(
        ServiceConfig::new(&cache_dir)
            .with_save_interval(1_000)
            .with_listener(Arc::new(listener)),
        CopyProducer::new(),
    );
    service.start().unwrap();
    service.request(&files[0], Variant::Full, 1.0);
    assert_eq!(service.request_save(), PushOutcome::Queued);
    service.flush().unwrap();

    assert_eq!(
        CacheLayout::new(&cache_dir)
            .index_store()
            .load()
            .unwrap()
            .len(),
        1
    );
    assert!(events
        .try_iter()
        .any(|event| event == CacheEvent::IndexSaved { entries: 1 }));
}

#[test]
fn test_stop_writes_final_index() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let files = sources(dir.path(), 2);
    let service = CacheService::new(
        ServiceConfig::new(&cache_dir).with_save_interval(1_000),
        CopyProducer::new(),
    );
    service.start().unwrap();
    for file in &files {
        service.request(file, Variant::Full, 1.0);
    }
    service.flush_timeout(Duration::from_secs(30)).unwrap();
    assert!(!CacheLayout::new(&cache_dir).index_path().exists());

    service.stop().unwrap();
    let on_disk = CacheLayout::new(&cache_dir).index_store().load().unwrap();
    assert_eq!(on_disk.len(), 2);
}

#[test]
fn test_purged_entries_are_persisted() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let files = sources(dir.path(), 2);
    {
        let service = CacheService::new(ServiceConfig::new(&cache_dir), CopyProducer::new());
        service.start().unwrap();
        for file in &files {
            service.request(file, Variant::Full, 1.0);
        }
        service.flush().unwrap();
    }

    fs::write(&files[0], b"changed size").unwrap();
    {
        let service = CacheService::new(ServiceConfig::new(&cache_dir), CopyProducer::new());
        service.start().unwrap();
        assert!(service.try_get_cached(&files[0], Variant::Full).unwrap().needs_update);
        service.stop().unwrap();
    }

    let on_disk = CacheLayout::new(&cache_dir).index_store().load().unwrap();
    assert_eq!(on_disk.len(), 1);
}

#[test]
fn test_export_index() {
    let dir = tempdir().unwrap();
    let files = sources(dir.path(), 2);
    let service = CacheService::new(
        ServiceConfig::new(dir.path().join("cache")),
        CopyProducer::new(),
    );
    service.start().unwrap();
    for file in &files {
        service.request(file, Variant::Quick, 1.0);
    }
    let export = dir.path().join("snapshot.db");
    assert_eq!(service.export_index(&export).unwrap(), 2);

    let copy = artcache::cache::IndexStore::new(&export).load().unwrap();
    assert_eq!(copy.len(), 2);
}
