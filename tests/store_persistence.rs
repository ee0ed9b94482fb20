//! On-disk `MemoryStore` snapshots and file-based configuration.

use std::sync::Arc;

use crossbeam_channel::unbounded;
use tempfile::TempDir;

use flightsync_core::{
    DocumentStore, DuplicatePolicy, EntityId, FeedSnapshot, FlightsyncError, MemoryStore,
    ScriptedFeed, SyncConfig, SyncEngine,
};

const POLL_1: &[u8] = include_bytes!("fixtures/states_poll_1.json");
const POLL_2: &[u8] = include_bytes!("fixtures/states_poll_2.json");

#[test]
fn restarted_producer_resumes_from_persisted_collection() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("aircraft.json");
    let config = SyncConfig::default();

    {
        let feed = ScriptedFeed::new().then_snapshot(FeedSnapshot::from_json_slice(POLL_1).unwrap());
        let store = MemoryStore::open(&path).unwrap();
        let mut engine = SyncEngine::new(feed, store, config.clone()).unwrap();
        let report = engine.run_cycle().unwrap();
        assert_eq!(report.to_add, 3);
    }

    let feed = ScriptedFeed::new().then_snapshot(FeedSnapshot::from_json_slice(POLL_2).unwrap());
    let store = Arc::new(MemoryStore::open(&path).unwrap());
    assert_eq!(store.len(), 3);
    let mut engine = SyncEngine::new(feed, Arc::clone(&store), config).unwrap();
    let report = engine.run_cycle().unwrap();

    // second process sees the first one's documents as known
    assert_eq!(report.known_ids, 3);
    assert_eq!(report.to_remove, 1);

    let reopened = MemoryStore::open(&path).unwrap();
    assert_eq!(reopened.list_ids().unwrap(), store.list_ids().unwrap());
    assert!(reopened
        .document(EntityId::from_hex("a1b2c3").unwrap())
        .is_none());
}

#[test]
fn corrupt_snapshot_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("aircraft.json");
    fs_err::write(&path, b"{ not json").unwrap();

    let err = MemoryStore::open(&path).unwrap_err();
    assert!(matches!(err, FlightsyncError::Json(_)));
}

#[test]
fn config_file_drives_engine_and_credentials() {
    let dir = TempDir::new().unwrap();
    let credentials = dir.path().join("service-account.json");
    let config_path = dir.path().join("flightsync.json");
    let raw = format!(
        r#"{{
            "collection": "aircraft",
            "credentials_path": {credentials:?},
            "poll_interval_ms": 5,
            "max_batch_size": 250,
            "duplicate_policy": "keep_first",
            "bounding_box": {{ "lamin": 45.0, "lamax": 60.0, "lomin": -130.0, "lomax": -90.0 }}
        }}"#,
        credentials = credentials.display().to_string()
    );
    fs_err::write(&config_path, raw).unwrap();

    let config = SyncConfig::load(&config_path).unwrap();
    assert_eq!(config.max_batch_size, 250);
    assert_eq!(config.duplicate_policy, DuplicatePolicy::KeepFirst);
    assert_eq!(config.bounding_box.lamin, 45.0);

    let store_for = |config: &SyncConfig| {
        let store = MemoryStore::new();
        match &config.credentials_path {
            Some(path) => store.with_credentials(path),
            None => store,
        }
    };

    // credentials not written yet: startup is refused
    let feed = ScriptedFeed::new().then_snapshot(FeedSnapshot::from_json_slice(POLL_1).unwrap());
    let mut engine = SyncEngine::new(feed, store_for(&config), config.clone()).unwrap();
    let (shutdown_tx, shutdown_rx) = unbounded();
    let err = engine.run(&shutdown_rx, |_| {}).unwrap_err();
    assert!(matches!(err, FlightsyncError::StoreAuth { .. }));

    fs_err::write(&credentials, br#"{"type": "service_account"}"#).unwrap();
    let feed = ScriptedFeed::new().then_snapshot(FeedSnapshot::from_json_slice(POLL_1).unwrap());
    let mut engine = SyncEngine::new(feed, store_for(&config), config).unwrap();
    let mut first_update = None;
    engine
        .run(&shutdown_rx, |report| {
            first_update = Some(report.to_add);
            shutdown_tx.send(()).unwrap();
        })
        .unwrap();
    assert_eq!(first_update, Some(3));

    // keep_first retained the earlier duplicate reading
    let kept = engine
        .store()
        .document(EntityId::from_hex("c07b1a").unwrap())
        .unwrap();
    assert_eq!(kept.last_updated, 1_699_999_995);
}

#[test]
fn invalid_config_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flightsync.json");
    fs_err::write(&path, br#"{ "max_batch_size": 501 }"#).unwrap();

    let err = SyncConfig::load(&path).unwrap_err();
    assert!(err.is_fatal());
}
