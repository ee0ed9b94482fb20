//! Layer synchronizer: keeps one rendered feature layer consistent with the
//! change stream.
//!
//! The layer goes `Uninitialized → Created → Active` on the first burst that
//! carries adds. A layer that was created but failed to attach stays
//! `Created`, and the next burst attaches it instead of building another one.
//! While active, every burst becomes exactly one `apply_edits` call, and edits
//! are normalized against the tracked keys so replays and resyncs stay
//! idempotent.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::types::{EntityId, Feature, FeatureEdits, LayerDefinition, SceneDefinition};
use crate::{FlightsyncError, Result};

/// Backend-assigned layer handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer-{}", self.0)
    }
}

/// The 3D scene a layer is rendered into.
pub trait SceneBackend {
    /// Build a feature layer seeded with `features`. Not yet visible.
    fn create_layer(&mut self, definition: &LayerDefinition, features: Vec<Feature>)
    -> Result<LayerId>;

    /// Add a created layer to the scene.
    fn attach_layer(&mut self, layer: LayerId) -> Result<()>;

    /// Apply adds, updates, and deletes to a live layer in one call.
    fn apply_edits(&mut self, layer: LayerId, edits: &FeatureEdits) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum LayerState {
    #[default]
    Uninitialized,
    /// Built by the backend but not yet attached to the scene.
    Created {
        layer: LayerId,
        features: HashMap<EntityId, Feature>,
    },
    Active {
        layer: LayerId,
        /// Last feature applied per key; the rendered layer mirrors this.
        features: HashMap<EntityId, Feature>,
    },
}

impl LayerState {
    #[must_use]
    pub fn layer(&self) -> Option<LayerId> {
        match self {
            Self::Uninitialized => None,
            Self::Created { layer, .. } | Self::Active { layer, .. } => Some(*layer),
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

#[derive(Debug)]
pub struct LayerSynchronizer<B> {
    backend: B,
    definition: LayerDefinition,
    state: LayerState,
}

impl<B: SceneBackend> LayerSynchronizer<B> {
    /// Synchronizer for the aircraft layer.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::with_definition(backend, LayerDefinition::aircraft())
    }

    #[must_use]
    pub fn with_definition(backend: B, definition: LayerDefinition) -> Self {
        Self {
            backend,
            definition,
            state: LayerState::Uninitialized,
        }
    }

    #[must_use]
    pub fn state(&self) -> &LayerState {
        &self.state
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Keys held by the layer, sorted.
    #[must_use]
    pub fn tracked_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = match &self.state {
            LayerState::Uninitialized => Vec::new(),
            LayerState::Created { features, .. } | LayerState::Active { features, .. } => {
                features.keys().copied().collect()
            }
        };
        ids.sort_unstable();
        ids
    }

    /// Apply one incremental burst.
    pub fn apply(&mut self, edits: FeatureEdits) -> Result<()> {
        match &self.state {
            LayerState::Uninitialized => self.initialize(edits),
            LayerState::Created { .. } => {
                self.attach_created()?;
                self.apply(edits)
            }
            LayerState::Active { layer, features } => {
                let layer = *layer;
                let mut tracked = features.clone();
                let mut normalized = FeatureEdits::default();

                for feature in edits.adds.into_iter().chain(edits.updates) {
                    let key = feature.key();
                    if tracked.insert(key, feature.clone()).is_some() {
                        normalized.updates.push(feature);
                    } else {
                        normalized.adds.push(feature);
                    }
                }
                for feature in edits.deletes {
                    if tracked.remove(&feature.key()).is_some() {
                        normalized.deletes.push(feature);
                    } else {
                        tracing::debug!(
                            target: "flightsync::layer",
                            feature = %feature.key(),
                            "delete for untracked feature dropped"
                        );
                    }
                }
                self.submit(layer, normalized, tracked)
            }
        }
    }

    /// Apply a burst that describes the whole collection. Tracked features
    /// absent from it are deleted.
    pub fn resync(&mut self, edits: FeatureEdits) -> Result<()> {
        let LayerState::Active { layer, features } = &self.state else {
            if self.state.layer().is_some() {
                self.attach_created()?;
                return self.resync(edits);
            }
            return self.initialize(edits);
        };
        let layer = *layer;
        let mut tracked = HashMap::with_capacity(features.len());
        let mut normalized = FeatureEdits::default();
        let explicit_deletes: HashSet<EntityId> = edits.deletes.iter().map(Feature::key).collect();

        for feature in edits.adds.into_iter().chain(edits.updates) {
            let key = feature.key();
            if explicit_deletes.contains(&key) {
                continue;
            }
            if features.contains_key(&key) {
                normalized.updates.push(feature.clone());
            } else {
                normalized.adds.push(feature.clone());
            }
            tracked.insert(key, feature);
        }
        // Deletes carry the last applied feature, in key order.
        let stale: BTreeMap<EntityId, &Feature> = features
            .iter()
            .filter(|(key, _)| !tracked.contains_key(key))
            .map(|(key, feature)| (*key, feature))
            .collect();
        normalized.deletes = stale.into_values().cloned().collect();

        tracing::info!(
            target: "flightsync::layer",
            %layer,
            resync.kept = normalized.updates.len(),
            resync.added = normalized.adds.len(),
            resync.removed = normalized.deletes.len(),
            "layer resynchronized"
        );
        self.submit(layer, normalized, tracked)
    }

    fn initialize(&mut self, edits: FeatureEdits) -> Result<()> {
        if edits.adds.is_empty() {
            if !edits.is_empty() {
                tracing::debug!(
                    target: "flightsync::layer",
                    updates = edits.updates.len(),
                    deletes = edits.deletes.len(),
                    "layer not created yet, edits dropped"
                );
            }
            return Ok(());
        }

        let mut order: Vec<EntityId> = Vec::with_capacity(edits.adds.len());
        let mut seed: HashMap<EntityId, Feature> = HashMap::with_capacity(edits.adds.len());
        for feature in edits.adds {
            let key = feature.key();
            if seed.insert(key, feature).is_none() {
                order.push(key);
            }
        }
        for feature in edits.updates {
            if let Some(slot) = seed.get_mut(&feature.key()) {
                *slot = feature;
            }
        }
        for feature in &edits.deletes {
            seed.remove(&feature.key());
        }
        let initial: Vec<Feature> = order
            .iter()
            .filter_map(|key| seed.get(key).cloned())
            .collect();

        let layer = self.backend.create_layer(&self.definition, initial)?;
        tracing::info!(
            target: "flightsync::layer",
            %layer,
            layer.title = %self.definition.title,
            layer.features = seed.len(),
            "feature layer created"
        );
        self.state = LayerState::Created {
            layer,
            features: seed,
        };
        self.attach_created()
    }

    /// Attach a `Created` layer and make it `Active`. No-op in other states.
    fn attach_created(&mut self) -> Result<()> {
        let LayerState::Created { layer, .. } = &self.state else {
            return Ok(());
        };
        let layer = *layer;
        if let Err(err) = self.backend.attach_layer(layer) {
            tracing::warn!(
                target: "flightsync::layer",
                %layer,
                error = %err,
                "layer attach failed, will retry on next burst"
            );
            return Err(err);
        }
        self.state = match std::mem::take(&mut self.state) {
            LayerState::Created { layer, features } => LayerState::Active { layer, features },
            other => other,
        };
        Ok(())
    }

    fn submit(
        &mut self,
        layer: LayerId,
        edits: FeatureEdits,
        tracked: HashMap<EntityId, Feature>,
    ) -> Result<()> {
        if edits.is_empty() {
            return Ok(());
        }
        self.backend.apply_edits(layer, &edits)?;
        tracing::debug!(
            target: "flightsync::layer",
            %layer,
            edits.adds = edits.adds.len(),
            edits.updates = edits.updates.len(),
            edits.deletes = edits.deletes.len(),
            "edits applied"
        );
        self.state = LayerState::Active {
            layer,
            features: tracked,
        };
        Ok(())
    }
}

/// One call observed by `RecordingScene`.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneCall {
    CreateLayer { layer: LayerId, features: usize },
    AttachLayer { layer: LayerId },
    ApplyEdits { layer: LayerId, edits: FeatureEdits },
}

#[derive(Debug, Default)]
struct SceneLog {
    next_layer: u64,
    calls: Vec<SceneCall>,
    attached: Vec<LayerId>,
    layers: HashMap<LayerId, BTreeMap<EntityId, Feature>>,
    fail_next_apply: Option<String>,
    fail_next_attach: Option<String>,
}

/// In-process scene that records every call and keeps the resulting feature
/// set per layer. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingScene {
    scene: SceneDefinition,
    log: Arc<Mutex<SceneLog>>,
}

impl RecordingScene {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_scene(scene: SceneDefinition) -> Self {
        Self {
            scene,
            log: Arc::default(),
        }
    }

    fn log(&self) -> Result<MutexGuard<'_, SceneLog>> {
        self.log.lock().map_err(|_| FlightsyncError::Scene {
            reason: "scene log lock poisoned".into(),
        })
    }

    #[must_use]
    pub fn calls(&self) -> Vec<SceneCall> {
        self.log().map(|log| log.calls.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn attached_layers(&self) -> Vec<LayerId> {
        self.log().map(|log| log.attached.clone()).unwrap_or_default()
    }

    /// Rendered features of `layer`, ordered by key.
    #[must_use]
    pub fn features(&self, layer: LayerId) -> Vec<Feature> {
        self.log()
            .ok()
            .and_then(|log| log.layers.get(&layer).map(|f| f.values().cloned().collect()))
            .unwrap_or_default()
    }

    /// Make the next `attach_layer` fail with `reason`.
    pub fn fail_next_attach(&self, reason: &str) {
        if let Ok(mut log) = self.log() {
            log.fail_next_attach = Some(reason.to_string());
        }
    }

    /// Make the next `apply_edits` fail with `reason`.
    pub fn fail_next_apply(&self, reason: &str) {
        if let Ok(mut log) = self.log() {
            log.fail_next_apply = Some(reason.to_string());
        }
    }
}

impl SceneBackend for RecordingScene {
    fn create_layer(
        &mut self,
        definition: &LayerDefinition,
        features: Vec<Feature>,
    ) -> Result<LayerId> {
        let mut log = self.log()?;
        log.next_layer += 1;
        let layer = LayerId(log.next_layer);
        tracing::debug!(
            target: "flightsync::layer",
            %layer,
            layer.title = %definition.title,
            scene.basemap = %self.scene.basemap,
            "recording layer creation"
        );
        log.calls.push(SceneCall::CreateLayer {
            layer,
            features: features.len(),
        });
        let rendered = features.into_iter().map(|f| (f.key(), f)).collect();
        log.layers.insert(layer, rendered);
        Ok(layer)
    }

    fn attach_layer(&mut self, layer: LayerId) -> Result<()> {
        let mut log = self.log()?;
        if let Some(reason) = log.fail_next_attach.take() {
            return Err(FlightsyncError::Scene { reason });
        }
        if !log.layers.contains_key(&layer) {
            return Err(FlightsyncError::Scene {
                reason: format!("{layer} was never created"),
            });
        }
        log.calls.push(SceneCall::AttachLayer { layer });
        log.attached.push(layer);
        Ok(())
    }

    fn apply_edits(&mut self, layer: LayerId, edits: &FeatureEdits) -> Result<()> {
        let mut log = self.log()?;
        if let Some(reason) = log.fail_next_apply.take() {
            return Err(FlightsyncError::Scene { reason });
        }
        let Some(rendered) = log.layers.get_mut(&layer) else {
            return Err(FlightsyncError::Scene {
                reason: format!("{layer} was never created"),
            });
        };
        for feature in edits.adds.iter().chain(&edits.updates) {
            rendered.insert(feature.key(), feature.clone());
        }
        for feature in &edits.deletes {
            rendered.remove(&feature.key());
        }
        log.calls.push(SceneCall::ApplyEdits {
            layer,
            edits: edits.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeatureAttributes, PointGeometry};

    fn feature(id: u32, velocity: f32) -> Feature {
        Feature {
            geometry: PointGeometry {
                x: Some(-100.0),
                y: Some(50.0),
                z: Some(1000.0),
                has_z: true,
            },
            attributes: FeatureAttributes {
                object_id: EntityId::new(id),
                flight_number: Some(format!("TST{id}")),
                origin_country: None,
                last_updated: 1,
                altitude: Some(1000.0),
                on_ground: Some("false".into()),
                velocity: Some(velocity),
                heading: Some(180.0),
                vertical_rate: None,
            },
        }
    }

    fn adds(ids: &[u32]) -> FeatureEdits {
        FeatureEdits {
            adds: ids.iter().map(|&id| feature(id, 1.0)).collect(),
            ..FeatureEdits::default()
        }
    }

    fn active(ids: &[u32]) -> (LayerSynchronizer<RecordingScene>, RecordingScene, LayerId) {
        let scene = RecordingScene::new();
        let mut sync = LayerSynchronizer::new(scene.clone());
        sync.apply(adds(ids)).unwrap();
        let layer = sync.state().layer().unwrap();
        (sync, scene, layer)
    }

    fn apply_calls(scene: &RecordingScene) -> Vec<FeatureEdits> {
        scene
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                SceneCall::ApplyEdits { edits, .. } => Some(edits),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_adds_create_and_attach_the_layer() {
        let (sync, scene, layer) = active(&[1, 2]);
        assert_eq!(
            scene.calls(),
            vec![
                SceneCall::CreateLayer { layer, features: 2 },
                SceneCall::AttachLayer { layer },
            ]
        );
        assert_eq!(scene.attached_layers(), vec![layer]);
        assert_eq!(sync.tracked_ids(), vec![EntityId::new(1), EntityId::new(2)]);
    }

    #[test]
    fn uninitialized_layer_ignores_updates_and_deletes() {
        let scene = RecordingScene::new();
        let mut sync = LayerSynchronizer::new(scene.clone());
        sync.apply(FeatureEdits {
            updates: vec![feature(1, 2.0)],
            deletes: vec![feature(2, 2.0)],
            ..FeatureEdits::default()
        })
        .unwrap();
        sync.apply(FeatureEdits::default()).unwrap();

        assert!(scene.calls().is_empty());
        assert!(!sync.state().is_active());
    }

    #[test]
    fn modified_feature_yields_one_update_call() {
        let (mut sync, scene, layer) = active(&[7]);
        sync.apply(FeatureEdits {
            updates: vec![feature(7, 250.0)],
            ..FeatureEdits::default()
        })
        .unwrap();

        let calls = apply_calls(&scene);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].updates.len(), 1);
        assert!(calls[0].adds.is_empty() && calls[0].deletes.is_empty());
        assert_eq!(scene.features(layer)[0].attributes.velocity, Some(250.0));
    }

    #[test]
    fn edits_are_normalized_by_key() {
        let (mut sync, scene, _) = active(&[1, 2]);
        sync.apply(FeatureEdits {
            adds: vec![feature(1, 5.0)],
            updates: vec![feature(3, 5.0)],
            deletes: vec![feature(9, 5.0), feature(2, 5.0)],
        })
        .unwrap();

        let calls = apply_calls(&scene);
        assert_eq!(calls.len(), 1);
        let keys = |list: &[Feature]| list.iter().map(Feature::key).collect::<Vec<_>>();
        assert_eq!(keys(&calls[0].updates), vec![EntityId::new(1)]);
        assert_eq!(keys(&calls[0].adds), vec![EntityId::new(3)]);
        assert_eq!(keys(&calls[0].deletes), vec![EntityId::new(2)]);
        assert_eq!(sync.tracked_ids(), vec![EntityId::new(1), EntityId::new(3)]);
    }

    #[test]
    fn empty_burst_issues_no_call() {
        let (mut sync, scene, _) = active(&[1]);
        sync.apply(FeatureEdits::default()).unwrap();
        sync.apply(FeatureEdits {
            deletes: vec![feature(42, 0.0)],
            ..FeatureEdits::default()
        })
        .unwrap();
        assert!(apply_calls(&scene).is_empty());
    }

    #[test]
    fn resync_drops_features_missing_from_collection() {
        let (mut sync, scene, layer) = active(&[1, 2, 3]);
        sync.resync(adds(&[1, 3, 4])).unwrap();

        let calls = apply_calls(&scene);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].updates.len(), 2);
        assert_eq!(calls[0].adds.len(), 1);
        assert_eq!(calls[0].deletes[0].key(), EntityId::new(2));
        let rendered: Vec<EntityId> = scene.features(layer).iter().map(Feature::key).collect();
        assert_eq!(rendered, sync.tracked_ids());
    }

    #[test]
    fn failed_attach_keeps_the_created_layer() {
        let scene = RecordingScene::new();
        let mut sync = LayerSynchronizer::new(scene.clone());
        scene.fail_next_attach("scene not ready");

        let err = sync.apply(adds(&[1, 2])).unwrap_err();
        assert!(matches!(err, FlightsyncError::Scene { .. }));
        assert!(!sync.state().is_active());
        let layer = sync.state().layer().unwrap();
        assert!(scene.attached_layers().is_empty());

        sync.apply(adds(&[3])).unwrap();
        assert_eq!(sync.state().layer(), Some(layer));
        assert!(sync.state().is_active());
        let created = scene
            .calls()
            .iter()
            .filter(|call| matches!(call, SceneCall::CreateLayer { .. }))
            .count();
        assert_eq!(created, 1);
        assert_eq!(scene.attached_layers(), vec![layer]);
        let rendered: Vec<EntityId> = scene.features(layer).iter().map(Feature::key).collect();
        assert_eq!(
            rendered,
            vec![EntityId::new(1), EntityId::new(2), EntityId::new(3)]
        );
    }

    #[test]
    fn resync_attaches_a_pending_layer() {
        let scene = RecordingScene::new();
        let mut sync = LayerSynchronizer::new(scene.clone());
        scene.fail_next_attach("scene not ready");
        assert!(sync.apply(adds(&[1, 2])).is_err());

        sync.resync(adds(&[2])).unwrap();
        let layer = sync.state().layer().unwrap();
        assert_eq!(scene.attached_layers(), vec![layer]);
        assert_eq!(sync.tracked_ids(), vec![EntityId::new(2)]);
        assert_eq!(scene.features(layer).len(), 1);
    }

    #[test]
    fn failed_apply_keeps_previous_state() {
        let (mut sync, scene, _) = active(&[1]);
        scene.fail_next_apply("scene unavailable");
        let err = sync.apply(adds(&[2])).unwrap_err();
        assert!(matches!(err, FlightsyncError::Scene { .. }));
        assert_eq!(sync.tracked_ids(), vec![EntityId::new(1)]);

        sync.apply(adds(&[2])).unwrap();
        assert_eq!(sync.tracked_ids(), vec![EntityId::new(1), EntityId::new(2)]);
    }
}
