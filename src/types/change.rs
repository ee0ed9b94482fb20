//! Change-stream notifications delivered by a live store subscription.

use serde::{Deserialize, Serialize};

use super::entity::EntityDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One per-document change. `document` is the full current payload (for
/// `Removed`, the last payload before deletion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    pub document: EntityDocument,
}

impl ChangeNotification {
    #[must_use]
    pub fn new(kind: ChangeKind, document: EntityDocument) -> Self {
        Self { kind, document }
    }
}

/// Ordered notifications delivered together.
pub type Burst = Vec<ChangeNotification>;

/// What a subscription yields.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Burst(Burst),
    /// The stream broke (e.g. store connection dropped). No further bursts
    /// arrive on this subscription.
    Error(String),
}
