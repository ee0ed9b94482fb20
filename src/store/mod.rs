//! Document store boundary.
//!
//! The producer sees a `DocumentStore` (snapshot id read + atomic batches);
//! the consumer sees a `ChangeSource` (live subscription of ordered bursts).
//! `MemoryStore` implements both.

mod memory;

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use uuid::Uuid;

pub use memory::MemoryStore;

use crate::{FlightsyncError, Result};
use crate::types::{BatchKind, EntityDocument, EntityId, FieldMap, StreamEvent};

/// One document write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Fails the batch if the document already exists.
    Create { document: EntityDocument },
    /// Merges `fields` into an existing document; fails the batch if missing.
    Update { id: EntityId, fields: FieldMap },
    /// No-op when the document is already gone.
    Delete { id: EntityId },
}

impl WriteOp {
    #[must_use]
    pub fn id(&self) -> EntityId {
        match self {
            Self::Create { document } => document.id,
            Self::Update { id, .. } | Self::Delete { id } => *id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> BatchKind {
        match self {
            Self::Create { .. } => BatchKind::Create,
            Self::Update { .. } => BatchKind::Update,
            Self::Delete { .. } => BatchKind::Delete,
        }
    }
}

/// Operations applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Producer-side store boundary.
pub trait DocumentStore: Send + Sync {
    /// Verify credentials. Called once before the producer loop starts.
    fn authenticate(&self) -> Result<()>;

    /// Point-in-time read of every persisted id.
    fn list_ids(&self) -> Result<Vec<EntityId>>;

    /// Apply `batch` atomically.
    fn commit_batch(&self, batch: &WriteBatch) -> Result<()>;
}

/// Consumer-side store boundary.
pub trait ChangeSource: Send + Sync {
    /// Open a live subscription. The first burst describes the current
    /// collection as `added` notifications.
    fn subscribe(&self) -> Result<Subscription>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn authenticate(&self) -> Result<()> {
        (**self).authenticate()
    }

    fn list_ids(&self) -> Result<Vec<EntityId>> {
        (**self).list_ids()
    }

    fn commit_batch(&self, batch: &WriteBatch) -> Result<()> {
        (**self).commit_batch(batch)
    }
}

impl<T: ChangeSource + ?Sized> ChangeSource for Arc<T> {
    fn subscribe(&self) -> Result<Subscription> {
        (**self).subscribe()
    }
}

/// Receiving end of a live change stream.
///
/// Dropping the subscription (or calling `unsubscribe`) closes the channel;
/// the source prunes it on its next delivery.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    events: Receiver<StreamEvent>,
}

impl Subscription {
    #[must_use]
    pub fn new(id: Uuid, events: Receiver<StreamEvent>) -> Self {
        Self { id, events }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Channel for `crossbeam_channel::select!`.
    #[must_use]
    pub fn events(&self) -> &Receiver<StreamEvent> {
        &self.events
    }

    /// Next event, `Ok(None)` on timeout, `Subscription` error once the
    /// source closed the stream.
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<StreamEvent>> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(FlightsyncError::Subscription {
                reason: "change stream closed by source".into(),
            }),
        }
    }

    pub fn unsubscribe(self) {
        tracing::debug!(target: "flightsync::store", subscription = %self.id, "unsubscribed");
    }
}
