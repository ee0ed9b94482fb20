//! Public types exposed by the `flightsync-core` crate.

pub mod change;
pub mod entity;
pub mod feature;
pub mod layer;
pub mod options;
pub mod partition;
pub mod report;

pub use change::{Burst, ChangeKind, ChangeNotification, StreamEvent};
pub use entity::{Entity, EntityDocument, EntityId, EntitySnapshot, FieldMap, field};
pub use feature::{Feature, FeatureAttributes, FeatureEdits, PointGeometry};
pub use layer::{
    FieldDefinition, FieldType, LayerDefinition, PointSymbol, PopupField, PopupTemplate,
    Renderer, RotationType, SceneDefinition, VisualVariable,
};
pub use options::{
    BackoffKind, BoundingBox, DuplicatePolicy, RetryPolicy, SyncConfig, SyncConfigBuilder,
};
pub use partition::Partition;
pub use report::{BatchKind, ChunkOutcome, ChunkStatus, CommitReport, CycleReport};
