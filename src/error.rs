//! Error taxonomy shared by the producer and consumer paths.

use thiserror::Error;

use crate::types::EntityId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FlightsyncError>;

/// Every failure the sync pipeline can surface.
///
/// The variants map onto recovery scopes: `Fetch`/`Decode` end one cycle,
/// `MalformedRecord` drops one record, `BatchCommit` fails one chunk,
/// `Subscription` triggers a resubscribe. `StoreAuth` and `InvalidConfig` are
/// the only conditions that stop the process.
#[derive(Debug, Error)]
pub enum FlightsyncError {
    #[error("feed fetch failed: {reason}")]
    Fetch { reason: String },

    #[error("feed payload could not be decoded: {reason}")]
    Decode { reason: String },

    #[error("malformed feed record at index {index}: {reason}")]
    MalformedRecord { index: usize, reason: String },

    #[error("batch commit failed: {reason}")]
    BatchCommit { reason: String },

    #[error("document {id} rejected by store: {reason}")]
    DocumentRejected { id: EntityId, reason: String },

    #[error("change subscription failed: {reason}")]
    Subscription { reason: String },

    #[error("store authentication failed: {reason}")]
    StoreAuth { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("scene backend error: {reason}")]
    Scene { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FlightsyncError {
    /// True when the error ends the process rather than one unit of work.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreAuth { .. } | Self::InvalidConfig { .. })
    }
}
