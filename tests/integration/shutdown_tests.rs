use super::support::{CopyProducer, GatedProducer};
use artcache::cache::{ArtifactKey, CacheLayout, Variant};
use artcache::events::{CacheEvent, ChannelListener};
use artcache::queue::PushOutcome;
use artcache::service::{CacheService, ServiceConfig, ServiceError};
use artcache::cache::SourceStamp;
use artcache::worker::{FsSourceInspector, SourceInspector, WorkerState};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn make_sources(dir: &std::path::Path, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("frame{}.jpg", i));
            fs::write(&path, format!("frame {}", i)).unwrap();
            path
        })
        .collect()
}

#[test]
fn test_stop_finishes_in_flight_item_and_discards_rest() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let sources = make_sources(dir.path(), 3);
    let (producer, entered) = GatedProducer::new();
    let (listener, events) = ChannelListener::new();
    let service = Arc::new(CacheService::new(
        ServiceConfig::new(&cache_dir)
            .with_save_interval(1_000)
            .with_listener(Arc::new(listener)),
        Arc::clone(&producer),
    ));
    service.start().unwrap();
    for source in &sources {
        service.request(source, Variant::Full, 1.0);
    }

    // Wait until the worker is inside the producer for the first source.
    let first = entered.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(first, sources[0]);

    service.signal_stop();
    assert_eq!(service.queue_len(), 0);
    assert_eq!(service.request(&sources[1], Variant::Full, 1.0), PushOutcome::Rejected);

    let stopper = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.stop())
    };
    producer.open();
    let stats = stopper.join().unwrap().unwrap();

    assert_eq!(stats.state, WorkerState::Stopped);
    assert_eq!(stats.produced, 1);
    assert_eq!(stats.processed, 1);
    assert!(entered.try_recv().is_err(), "no further production started");

    // The in-flight artifact was committed and the final save captured it.
    let on_disk = CacheLayout::new(&cache_dir).index_store().load().unwrap();
    assert_eq!(on_disk.len(), 1);
    assert!(on_disk.contains_key(&ArtifactKey::new(&sources[0], Variant::Full)));

    let received: Vec<CacheEvent> = events.try_iter().collect();
    assert_eq!(received.last(), Some(&CacheEvent::WorkerStopped));
    assert!(received.contains(&CacheEvent::IndexSaved { entries: 1 }));
}

#[test]
fn test_no_partial_files_after_stop() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let sources = make_sources(dir.path(), 2);
    let (producer, entered) = GatedProducer::new();
    let service = CacheService::new(ServiceConfig::new(&cache_dir), Arc::clone(&producer));
    service.start().unwrap();
    for source in &sources {
        service.request(source, Variant::Quick, 1.0);
    }
    entered.recv_timeout(Duration::from_secs(10)).unwrap();
    service.signal_stop();
    producer.open();
    service.stop().unwrap();

    for entry in fs::read_dir(&cache_dir).unwrap() {
        let name = entry.unwrap().file_name().to_string_lossy().into_owned();
        assert!(!name.ends_with(".part"), "leftover staging file {}", name);
        assert!(!name.ends_with(".tmp"), "leftover index staging file {}", name);
    }
}

#[test]
fn test_pending_flush_fails_when_stopped() {
    let dir = tempdir().unwrap();
    let sources = make_sources(dir.path(), 1);
    let (producer, entered) = GatedProducer::new();
    let service = Arc::new(CacheService::new(
        ServiceConfig::new(dir.path().join("cache")),
        Arc::clone(&producer),
    ));
    service.start().unwrap();
    service.request(&sources[0], Variant::Full, 1.0);
    entered.recv_timeout(Duration::from_secs(10)).unwrap();

    let flusher = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.flush())
    };
    // Give the flusher time to queue its separator behind the gated item.
    while service.queue_len() == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    service.signal_stop();
    producer.open();

    assert!(matches!(flusher.join().unwrap(), Err(ServiceError::Stopped)));
    service.stop().unwrap();
}

#[test]
fn test_flush_timeout_is_recoverable() {
    let dir = tempdir().unwrap();
    let sources = make_sources(dir.path(), 1);
    let (producer, entered) = GatedProducer::new();
    let service = CacheService::new(
        ServiceConfig::new(dir.path().join("cache")),
        Arc::clone(&producer),
    );
    service.start().unwrap();
    service.request(&sources[0], Variant::Full, 1.0);
    entered.recv_timeout(Duration::from_secs(10)).unwrap();

    assert!(matches!(
        service.flush_timeout(Duration::from_millis(50)),
        Err(ServiceError::FlushTimedOut(_))
    ));
    producer.open();
    service.flush_timeout(Duration::from_secs(10)).unwrap();
    assert!(service.try_get_cached(&sources[0], Variant::Full).is_some());
}

#[test]
fn test_stop_is_idempotent_and_final() {
    let dir = tempdir().unwrap();
    let service = CacheService::new(
        ServiceConfig::new(dir.path().join("cache")),
        CopyProducer::new(),
    );
    service.start().unwrap();
    let first = service.stop().unwrap();
    let second = service.stop().unwrap();
    assert_eq!(first, second);
    assert_eq!(service.state(), WorkerState::Stopped);

    assert!(matches!(service.start(), Err(ServiceError::Stopped)));
    assert_eq!(service.request_save(), PushOutcome::Rejected);
    assert!(matches!(service.flush(), Err(ServiceError::Stopped)));
}

#[test]
fn test_signal_stop_before_start() {
    let dir = tempdir().unwrap();
    let service = CacheService::new(
        ServiceConfig::new(dir.path().join("cache")),
        CopyProducer::new(),
    );
    service.signal_stop();
    assert!(matches!(service.start(), Err(ServiceError::Stopped)));
}

/// Panics when asked about a source whose name starts with `poison`.
struct PoisonInspector;

impl SourceInspector for PoisonInspector {
    fn stamp(&self, path: &Path) -> io::Result<SourceStamp> {
        let name = path.file_name().unwrap().to_string_lossy();
        if name.starts_with("poison") {
            panic!("inspector failure on {}", name);
        }
        FsSourceInspector.stamp(path)
    }
}

#[test]
fn test_panicking_listener_keeps_worker_alive() {
    let dir = tempdir().unwrap();
    let sources = make_sources(dir.path(), 2);
    let service = CacheService::new(
        ServiceConfig::new(dir.path().join("cache")).with_listener(Arc::new(
            |event: &CacheEvent| {
                if matches!(event, CacheEvent::ArtifactReady { .. }) {
                    panic!("listener failure");
                }
            },
        )),
        CopyProducer::new(),
    );
    service.start().unwrap();
    for source in &sources {
        service.request(source, Variant::Full, 1.0);
    }

    service.flush_timeout(Duration::from_secs(10)).unwrap();
    assert!(service.is_running());
    for source in &sources {
        assert!(service.try_get_cached(source, Variant::Full).is_some());
    }
    assert_eq!(service.stop().unwrap().produced, 2);
}

#[test]
fn test_worker_panic_stops_queue() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    let good = dir.path().join("good.jpg");
    let poison = dir.path().join("poison.jpg");
    let later = dir.path().join("later.jpg");
    for path in [&good, &poison, &later] {
        fs::write(path, "pixels").unwrap();
    }
    let service = CacheService::new(
        ServiceConfig::new(&cache_dir)
            .with_save_interval(1_000)
            .with_inspector(Arc::new(PoisonInspector)),
        CopyProducer::new(),
    );
    service.start().unwrap();
    service.request(&good, Variant::Full, 1.0);
    service.request(&poison, Variant::Full, 1.0);
    service.request(&later, Variant::Full, 1.0);

    // The worker dies on the second request; the flush must not hang.
    assert!(matches!(
        service.flush_timeout(Duration::from_secs(10)),
        Err(ServiceError::Stopped)
    ));
    assert!(matches!(service.flush(), Err(ServiceError::Stopped)));
    assert!(!service.is_running());
    assert_eq!(service.state(), WorkerState::Stopped);
    assert_eq!(service.request(&later, Variant::Full, 1.0), PushOutcome::Rejected);
    assert_eq!(service.queue_len(), 0);

    assert!(matches!(service.stop(), Err(ServiceError::WorkerPanicked)));
    // The entry committed before the panic is saved by the service.
    let on_disk = CacheLayout::new(&cache_dir).index_store().load().unwrap();
    assert_eq!(on_disk.len(), 1);
    assert!(on_disk.contains_key(&ArtifactKey::new(&good, Variant::Full)));
}
