//! End-to-end producer/consumer runs over recorded feed polls.
//!
//! The producer commits into a shared `MemoryStore`; a consumer thread follows
//! the store's change stream into a `RecordingScene`. After each cycle the
//! rendered layer must equal the store projected through
//! `feature_from_document`.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use flightsync_core::{
    ChangeStreamConsumer, DocumentStore, EntityId, Feature, FeedSnapshot, LayerSynchronizer,
    MemoryStore, RecordingScene, RetryPolicy, ScriptedFeed, SyncConfig, SyncEngine,
    feature_from_document,
};

const POLL_1: &[u8] = include_bytes!("fixtures/states_poll_1.json");
const POLL_2: &[u8] = include_bytes!("fixtures/states_poll_2.json");

fn id(hex: &str) -> EntityId {
    EntityId::from_hex(hex).unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn projected(store: &MemoryStore) -> Vec<Feature> {
    store.documents().iter().map(feature_from_document).collect()
}

fn rendered(scene: &RecordingScene) -> Vec<Feature> {
    scene
        .attached_layers()
        .first()
        .map(|layer| scene.features(*layer))
        .unwrap_or_default()
}

fn config() -> SyncConfig {
    SyncConfig::builder()
        .poll_interval(Duration::from_millis(5))
        .retry(RetryPolicy::immediate(2))
        .build()
        .unwrap()
}

#[test]
fn producer_and_consumer_converge_over_two_polls() {
    let feed = ScriptedFeed::new()
        .then_snapshot(FeedSnapshot::from_json_slice(POLL_1).unwrap())
        .then_snapshot(FeedSnapshot::from_json_slice(POLL_2).unwrap());
    let store = Arc::new(MemoryStore::new());
    let mut engine = SyncEngine::new(feed, Arc::clone(&store), config()).unwrap();

    let scene = RecordingScene::new();
    let mut sync = LayerSynchronizer::new(scene.clone());
    let consumer = ChangeStreamConsumer::new(RetryPolicy::immediate(0));
    let (shutdown_tx, shutdown_rx) = unbounded();

    thread::scope(|scope| {
        let worker = scope.spawn(|| consumer.run(store.as_ref(), &mut sync, &shutdown_rx));
        wait_until(|| store.subscriber_count() == 1);

        let first = engine.run_cycle().unwrap();
        assert_eq!(first.fetched_records, 6);
        assert_eq!(first.malformed_records, 1);
        assert_eq!(first.duplicate_records, 1);
        assert_eq!((first.to_add, first.to_update, first.to_remove), (3, 0, 0));
        assert_eq!(first.suppressed_adds, 1);
        assert!(first.commit.is_success());

        // duplicate resolved to the later reading
        let wja = store.document(id("c07b1a")).unwrap();
        assert_eq!(wja.last_updated, 1_699_999_998);
        assert_eq!(wja.flight_number.as_deref(), Some("WJA451"));
        wait_until(|| rendered(&scene) == projected(&store));

        let second = engine.run_cycle().unwrap();
        assert_eq!((second.to_add, second.to_update, second.to_remove), (1, 2, 1));
        assert_eq!(second.known_ids, 3);

        let mut ids = store.list_ids().unwrap();
        ids.sort_unstable();
        let mut expected = vec![id("c07b1a"), id("c0ffee"), id("c05a11")];
        expected.sort_unstable();
        assert_eq!(ids, expected);

        // position survives an update that lacks coordinates
        let parked = store.document(id("c05a11")).unwrap();
        assert_eq!(parked.longitude, Some(-123.1819));
        assert_eq!(parked.last_updated, 1_700_000_007);
        wait_until(|| rendered(&scene) == projected(&store));

        shutdown_tx.send(()).unwrap();
        worker.join().unwrap().unwrap();
    });

    let layer_features = rendered(&scene);
    let wja = layer_features
        .iter()
        .find(|f| f.key() == id("c07b1a"))
        .unwrap();
    assert_eq!(wja.attributes.heading, Some(450.0));
    assert_eq!(wja.attributes.on_ground.as_deref(), Some("false"));
    assert_eq!(scene.attached_layers().len(), 1);
}

#[test]
fn steady_state_feed_only_updates() {
    let feed =
        ScriptedFeed::new().then_snapshot(FeedSnapshot::from_json_slice(POLL_2).unwrap());
    let store = Arc::new(MemoryStore::new());
    let mut engine = SyncEngine::new(feed, Arc::clone(&store), config()).unwrap();

    engine.run_cycle().unwrap();
    let before = store.list_ids().unwrap();
    for _ in 0..3 {
        let report = engine.run_cycle().unwrap();
        assert_eq!(report.to_add, 0);
        assert_eq!(report.to_remove, 0);
        assert_eq!(report.to_update, before.len());
    }
    assert_eq!(store.list_ids().unwrap(), before);
}

#[test]
fn late_consumer_starts_from_full_collection() {
    let feed =
        ScriptedFeed::new().then_snapshot(FeedSnapshot::from_json_slice(POLL_1).unwrap());
    let store = Arc::new(MemoryStore::new());
    SyncEngine::new(feed, Arc::clone(&store), config())
        .unwrap()
        .run_cycle()
        .unwrap();

    let scene = RecordingScene::new();
    let mut sync = LayerSynchronizer::new(scene.clone());
    let (shutdown_tx, shutdown_rx) = unbounded();

    thread::scope(|scope| {
        let worker = scope.spawn(|| {
            ChangeStreamConsumer::default().run(store.as_ref(), &mut sync, &shutdown_rx)
        });
        wait_until(|| !rendered(&scene).is_empty());
        shutdown_tx.send(()).unwrap();
        worker.join().unwrap().unwrap();
    });

    assert_eq!(rendered(&scene), projected(&store));
}
