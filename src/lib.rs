#![deny(clippy::all, clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![cfg_attr(
    test,
    allow(
        clippy::useless_vec,
        clippy::uninlined_format_args,
        clippy::cast_possible_truncation,
        clippy::float_cmp,
        clippy::cast_precision_loss
    )
)]
#![allow(clippy::module_name_repetitions)]
//
// Documentation lints: public entry points carry docs, internal helpers often don't.
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
//
// Cast safety: counters and feed values are bounded by real-world sizes
// (records per poll, chunk counts, degrees).
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::cast_possible_truncation)]
//
// Style/complexity
#![allow(clippy::too_many_lines)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::similar_names)]
// e.g., to_add, to_update, layer, layers
//
// Pattern matching
#![allow(clippy::manual_let_else)]
#![allow(clippy::match_same_arms)]
//
// Ergonomics
#![allow(clippy::needless_pass_by_value)] // Edit sets are handed over by value
#![allow(clippy::return_self_not_must_use)] // Builder patterns don't need must_use on every method
#![allow(clippy::implicit_hasher)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::unused_self)]
#![allow(clippy::duplicated_attributes)]

/// The flightsync-core crate version (matches `Cargo.toml`).
pub const FLIGHTSYNC_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod commit;
pub mod constants;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod feed;
pub mod layer;
pub mod normalize;
pub mod reconcile;
pub mod store;
pub mod types;

pub use commit::BatchCommitter;
pub use constants::*;
pub use consumer::{ChangeStreamConsumer, ConsumerStats, classify_burst, feature_from_document};
pub use engine::SyncEngine;
pub use error::{FlightsyncError, Result};
#[cfg(feature = "http_feed")]
pub use feed::OpenSkyFeed;
pub use feed::{FeedField, FeedSnapshot, FeedSource, RawRecord, ScriptedFeed};
pub use layer::{LayerId, LayerState, LayerSynchronizer, RecordingScene, SceneBackend, SceneCall};
pub use normalize::{NormalizedSnapshot, RejectedRecord, normalize_record, normalize_snapshot};
pub use reconcile::{create_payload, reconcile, update_payload};
pub use store::{
    ChangeSource, DocumentStore, MemoryStore, Subscription, WriteBatch, WriteOp,
};
pub use types::{
    BackoffKind, BatchKind, BoundingBox, Burst, ChangeKind, ChangeNotification, ChunkOutcome,
    ChunkStatus, CommitReport, CycleReport, DuplicatePolicy, Entity, EntityDocument, EntityId,
    EntitySnapshot, Feature, FeatureAttributes, FeatureEdits, FieldDefinition, FieldMap,
    FieldType, LayerDefinition, Partition, PointGeometry, PointSymbol, PopupField, PopupTemplate,
    Renderer, RetryPolicy, RotationType, SceneDefinition, StreamEvent, SyncConfig,
    SyncConfigBuilder, VisualVariable,
};
