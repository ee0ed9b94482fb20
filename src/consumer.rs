//! Change-stream consumer: turns notification bursts into feature edits and
//! drives a `LayerSynchronizer` from a live subscription.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crossbeam_channel::{Receiver, RecvTimeoutError, select};

use crate::constants::HEADING_ROTATION_OFFSET_DEG;
use crate::layer::{LayerSynchronizer, SceneBackend};
use crate::store::{ChangeSource, Subscription};
use crate::types::{
    ChangeKind, ChangeNotification, EntityDocument, EntityId, Feature, FeatureAttributes,
    FeatureEdits, PointGeometry, RetryPolicy, StreamEvent,
};
use crate::Result;

/// Project a stored document onto the layer's feature schema.
///
/// The heading gains the model's rotation offset here and nowhere else.
#[must_use]
pub fn feature_from_document(document: &EntityDocument) -> Feature {
    Feature {
        geometry: PointGeometry {
            x: document.longitude,
            y: document.latitude,
            z: document.altitude,
            has_z: true,
        },
        attributes: FeatureAttributes {
            object_id: document.id,
            flight_number: document.flight_number.clone(),
            origin_country: document.origin_country.clone(),
            last_updated: document.last_updated,
            altitude: document.altitude,
            on_ground: document.on_ground.map(|flag| flag.to_string()),
            velocity: document.velocity,
            heading: document
                .heading
                .map(|heading| heading + HEADING_ROTATION_OFFSET_DEG),
            vertical_rate: document.vertical_rate,
        },
    }
}

/// Route each notification by its tag. Order within each set follows the burst.
///
/// A key that appears more than once keeps only its last notification, in the
/// slot of its first one.
#[must_use]
pub fn classify_burst(burst: &[ChangeNotification]) -> FeatureEdits {
    let mut latest: Vec<&ChangeNotification> = Vec::with_capacity(burst.len());
    let mut slots: HashMap<EntityId, usize> = HashMap::with_capacity(burst.len());
    for notification in burst {
        match slots.entry(notification.document.id) {
            Entry::Occupied(slot) => latest[*slot.get()] = notification,
            Entry::Vacant(slot) => {
                slot.insert(latest.len());
                latest.push(notification);
            }
        }
    }

    let mut edits = FeatureEdits::default();
    for notification in latest {
        let feature = feature_from_document(&notification.document);
        match notification.kind {
            ChangeKind::Added => edits.adds.push(feature),
            ChangeKind::Modified => edits.updates.push(feature),
            ChangeKind::Removed => edits.deletes.push(feature),
        }
    }
    edits
}

/// Counters for one `ChangeStreamConsumer::run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub bursts: u64,
    pub notifications: u64,
    /// Bursts the layer backend refused. The stream keeps going.
    pub failed_bursts: u64,
    pub resubscriptions: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeStreamConsumer {
    retry: RetryPolicy,
}

enum StreamExit {
    Shutdown,
    Broken,
}

impl ChangeStreamConsumer {
    /// `retry` paces resubscription attempts; its retry count is ignored and
    /// the consumer keeps trying until shutdown.
    #[must_use]
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Consume `source` until `shutdown` yields or its sender is dropped.
    ///
    /// Bursts are applied one at a time, each to completion. A broken stream
    /// is resubscribed with backoff, and the first burst of every subscription
    /// is applied as a full resync.
    pub fn run<C, B>(
        &self,
        source: &C,
        sync: &mut LayerSynchronizer<B>,
        shutdown: &Receiver<()>,
    ) -> Result<ConsumerStats>
    where
        C: ChangeSource + ?Sized,
        B: SceneBackend,
    {
        let mut stats = ConsumerStats::default();
        let mut failures = 0u32;

        loop {
            let subscription = match source.subscribe() {
                Ok(subscription) => subscription,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    failures += 1;
                    tracing::warn!(
                        target: "flightsync::consumer",
                        attempt = failures,
                        error = %err,
                        "subscribe failed"
                    );
                    if self.wait_backoff(failures, shutdown) {
                        return Ok(stats);
                    }
                    continue;
                }
            };
            tracing::debug!(
                target: "flightsync::consumer",
                subscription = %subscription.id(),
                "change stream subscribed"
            );

            match self.drain(&subscription, sync, shutdown, &mut stats, &mut failures) {
                StreamExit::Shutdown => {
                    subscription.unsubscribe();
                    tracing::info!(
                        target: "flightsync::consumer",
                        bursts = stats.bursts,
                        resubscriptions = stats.resubscriptions,
                        "change stream consumer stopped"
                    );
                    return Ok(stats);
                }
                StreamExit::Broken => {
                    subscription.unsubscribe();
                    failures += 1;
                    stats.resubscriptions += 1;
                    if self.wait_backoff(failures, shutdown) {
                        return Ok(stats);
                    }
                }
            }
        }
    }

    fn drain<B: SceneBackend>(
        &self,
        subscription: &Subscription,
        sync: &mut LayerSynchronizer<B>,
        shutdown: &Receiver<()>,
        stats: &mut ConsumerStats,
        failures: &mut u32,
    ) -> StreamExit {
        let mut resync = true;
        loop {
            select! {
                recv(shutdown) -> _ => return StreamExit::Shutdown,
                recv(subscription.events()) -> event => match event {
                    Ok(StreamEvent::Burst(burst)) => {
                        *failures = 0;
                        stats.bursts += 1;
                        stats.notifications += burst.len() as u64;
                        let edits = classify_burst(&burst);
                        let applied = if resync {
                            sync.resync(edits)
                        } else {
                            sync.apply(edits)
                        };
                        resync = false;
                        if let Err(err) = applied {
                            stats.failed_bursts += 1;
                            tracing::error!(
                                target: "flightsync::consumer",
                                notifications = burst.len(),
                                error = %err,
                                "burst could not be applied to layer"
                            );
                        }
                    }
                    Ok(StreamEvent::Error(reason)) => {
                        tracing::warn!(
                            target: "flightsync::consumer",
                            subscription = %subscription.id(),
                            reason = %reason,
                            "change stream broke, resubscribing"
                        );
                        return StreamExit::Broken;
                    }
                    Err(_) => {
                        tracing::warn!(
                            target: "flightsync::consumer",
                            subscription = %subscription.id(),
                            "change stream closed by source, resubscribing"
                        );
                        return StreamExit::Broken;
                    }
                },
            }
        }
    }

    /// Sleep before the next subscribe attempt. True when shutdown arrived.
    fn wait_backoff(&self, attempt: u32, shutdown: &Receiver<()>) -> bool {
        let delay = self.retry.delay_for(attempt);
        match shutdown.recv_timeout(delay) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{RecordingScene, SceneCall};
    use crate::store::{DocumentStore, MemoryStore, WriteBatch, WriteOp};
    use crate::types::{BackoffKind, Entity};
    use crate::FlightsyncError;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn document(id: u32) -> EntityDocument {
        let mut entity = Entity::new(EntityId::new(id), 1_700_000_000).with_position(-97.1, 49.9);
        entity.heading = Some(90.0);
        entity.on_ground = Some(true);
        entity.altitude = Some(1500.0);
        entity.to_document()
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn feature_mapping_offsets_heading_and_renders_on_ground() {
        let feature = feature_from_document(&document(7));
        assert_eq!(feature.key(), EntityId::new(7));
        assert_eq!(feature.geometry.x, Some(-97.1));
        assert_eq!(feature.geometry.z, Some(1500.0));
        assert!(feature.geometry.has_z);
        assert_eq!(feature.attributes.heading, Some(270.0));
        assert_eq!(feature.attributes.on_ground.as_deref(), Some("true"));

        let mut bare = document(8);
        bare.heading = None;
        bare.on_ground = None;
        let feature = feature_from_document(&bare);
        assert_eq!(feature.attributes.heading, None);
        assert_eq!(feature.attributes.on_ground, None);
    }

    #[test]
    fn bursts_are_routed_by_tag() {
        let burst = vec![
            ChangeNotification::new(ChangeKind::Added, document(1)),
            ChangeNotification::new(ChangeKind::Removed, document(2)),
            ChangeNotification::new(ChangeKind::Modified, document(3)),
            ChangeNotification::new(ChangeKind::Added, document(4)),
        ];
        let edits = classify_burst(&burst);
        let keys = |list: &[Feature]| list.iter().map(|f| f.key().get()).collect::<Vec<_>>();

        assert_eq!(keys(&edits.adds), vec![1, 4]);
        assert_eq!(keys(&edits.updates), vec![3]);
        assert_eq!(keys(&edits.deletes), vec![2]);
        assert!(classify_burst(&[]).is_empty());
    }

    #[test]
    fn repeated_key_in_burst_keeps_last_notification() {
        let burst = vec![
            ChangeNotification::new(ChangeKind::Removed, document(1)),
            ChangeNotification::new(ChangeKind::Modified, document(2)),
            ChangeNotification::new(ChangeKind::Added, document(1)),
            ChangeNotification::new(ChangeKind::Removed, document(2)),
        ];
        let edits = classify_burst(&burst);
        let keys = |list: &[Feature]| list.iter().map(|f| f.key().get()).collect::<Vec<_>>();
        assert_eq!(keys(&edits.adds), vec![1]);
        assert!(edits.updates.is_empty());
        assert_eq!(keys(&edits.deletes), vec![2]);

        // removed then re-added within one burst stays rendered
        let scene = RecordingScene::new();
        let mut sync = LayerSynchronizer::new(scene.clone());
        sync.apply(classify_burst(&[ChangeNotification::new(
            ChangeKind::Added,
            document(1),
        )]))
        .unwrap();
        sync.apply(classify_burst(&burst[..3])).unwrap();
        assert_eq!(sync.tracked_ids(), vec![EntityId::new(1), EntityId::new(2)]);
    }

    fn commit(store: &MemoryStore, ops: Vec<WriteOp>) {
        let mut batch = WriteBatch::new();
        for op in ops {
            batch.push(op);
        }
        store.commit_batch(&batch).unwrap();
    }

    #[test]
    fn consumer_mirrors_store_and_resyncs_after_disconnect() {
        let store = MemoryStore::new();
        commit(
            &store,
            vec![
                WriteOp::Create { document: document(1) },
                WriteOp::Create { document: document(2) },
            ],
        );
        let scene = RecordingScene::new();
        let mut sync = LayerSynchronizer::new(scene.clone());
        let consumer = ChangeStreamConsumer::new(RetryPolicy::immediate(0));
        let (shutdown_tx, shutdown_rx) = unbounded();

        let stats = thread::scope(|scope| {
            let worker = scope.spawn(|| consumer.run(&store, &mut sync, &shutdown_rx));

            wait_until(|| store.subscriber_count() == 1);
            commit(&store, vec![WriteOp::Create { document: document(3) }]);
            wait_until(|| {
                scene
                    .calls()
                    .iter()
                    .any(|call| matches!(call, SceneCall::ApplyEdits { .. }))
            });

            store.disconnect_subscribers("connection reset");
            commit(&store, vec![WriteOp::Delete { id: EntityId::new(2) }]);
            let layer = scene.attached_layers()[0];
            wait_until(|| {
                let keys: Vec<u32> = scene.features(layer).iter().map(|f| f.key().get()).collect();
                keys == vec![1, 3]
            });

            shutdown_tx.send(()).unwrap();
            worker.join().unwrap()
        })
        .unwrap();

        assert!(stats.bursts >= 3);
        assert_eq!(stats.resubscriptions, 1);
        assert_eq!(stats.failed_bursts, 0);
        assert_eq!(sync.tracked_ids(), vec![EntityId::new(1), EntityId::new(3)]);
        assert_eq!(scene.attached_layers().len(), 1);
    }

    #[test]
    fn resubscribing_to_emptied_collection_clears_the_layer() {
        let store = MemoryStore::new();
        commit(
            &store,
            vec![
                WriteOp::Create { document: document(1) },
                WriteOp::Create { document: document(2) },
            ],
        );
        let scene = RecordingScene::new();
        let mut sync = LayerSynchronizer::new(scene.clone());
        // long enough for the deletes below to land while nobody is subscribed
        let consumer = ChangeStreamConsumer::new(RetryPolicy {
            max_retries: 0,
            backoff: BackoffKind::Fixed,
            base_delay_ms: 200,
            max_delay_ms: 200,
        });
        let (shutdown_tx, shutdown_rx) = unbounded();

        let stats = thread::scope(|scope| {
            let worker = scope.spawn(|| consumer.run(&store, &mut sync, &shutdown_rx));

            wait_until(|| scene.attached_layers().len() == 1);
            let layer = scene.attached_layers()[0];
            assert_eq!(scene.features(layer).len(), 2);

            store.disconnect_subscribers("connection reset");
            commit(
                &store,
                vec![
                    WriteOp::Delete { id: EntityId::new(1) },
                    WriteOp::Delete { id: EntityId::new(2) },
                ],
            );
            assert!(store.is_empty());
            wait_until(|| store.subscriber_count() == 1);
            wait_until(|| scene.features(layer).is_empty());

            shutdown_tx.send(()).unwrap();
            worker.join().unwrap()
        })
        .unwrap();

        assert_eq!(stats.resubscriptions, 1);
        assert!(sync.tracked_ids().is_empty());
        assert_eq!(scene.attached_layers().len(), 1);
    }

    struct FlakySource {
        failures_left: AtomicU32,
        inner: MemoryStore,
    }

    impl ChangeSource for FlakySource {
        fn subscribe(&self) -> crate::Result<Subscription> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(FlightsyncError::Subscription {
                    reason: "unavailable".into(),
                });
            }
            self.inner.subscribe()
        }
    }

    #[test]
    fn subscribe_failures_are_retried_until_shutdown() {
        let source = FlakySource {
            failures_left: AtomicU32::new(2),
            inner: MemoryStore::new(),
        };
        commit(&source.inner, vec![WriteOp::Create { document: document(5) }]);
        let scene = RecordingScene::new();
        let mut sync = LayerSynchronizer::new(scene.clone());
        let (shutdown_tx, shutdown_rx) = unbounded();

        thread::scope(|scope| {
            let worker = scope.spawn(|| {
                ChangeStreamConsumer::default().run(&source, &mut sync, &shutdown_rx)
            });
            wait_until(|| !scene.attached_layers().is_empty());
            shutdown_tx.send(()).unwrap();
            worker.join().unwrap().unwrap();
        });

        assert_eq!(source.failures_left.load(Ordering::SeqCst), 0);
        assert_eq!(sync.tracked_ids(), vec![EntityId::new(5)]);
    }

    #[test]
    fn dropped_shutdown_sender_stops_consumer() {
        let store = MemoryStore::new();
        let mut sync = LayerSynchronizer::new(RecordingScene::new());
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();
        drop(shutdown_tx);

        let stats = ChangeStreamConsumer::default()
            .run(&store, &mut sync, &shutdown_rx)
            .unwrap();
        assert_eq!(stats.resubscriptions, 0);
        assert_eq!(stats.notifications, 0);
        assert!(!sync.state().is_active());
    }
}
