use serde::{Deserialize, Serialize};

use super::entity::EntityId;

/// Key-based difference between the current feed snapshot and the known set.
///
/// The four lists are pairwise disjoint. Every current id lands in exactly one
/// of `to_add`, `to_update`, `suppressed_adds`; every known id in exactly one
/// of `to_update`, `to_remove`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub to_add: Vec<EntityId>,
    pub to_update: Vec<EntityId>,
    pub to_remove: Vec<EntityId>,
    /// New ids left out of `to_add` because the reading carries no position.
    #[serde(default)]
    pub suppressed_adds: Vec<EntityId>,
}
