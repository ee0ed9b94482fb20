//! Key-based diff between the live snapshot and the persisted id set, plus
//! the write payload policy that goes with it.
//!
//! Position policy: a freshly created document must carry a position, so a
//! new id without coordinates is suppressed rather than added. An update never
//! clears a stored position; when the reading lacks coordinates the update
//! payload omits `longitude`/`latitude` and the store keeps the last fix.

use std::collections::HashSet;

use crate::types::{Entity, EntityDocument, EntityId, EntitySnapshot, FieldMap, Partition, field};

/// Partition `current` against `known`.
///
/// Runs in O(n + m) with one hash set per side. `to_add`, `to_update`, and
/// `suppressed_adds` follow snapshot order; `to_remove` follows `known`
/// order. Repeated ids in `known` are collapsed.
#[must_use]
pub fn reconcile(current: &EntitySnapshot, known: &[EntityId]) -> Partition {
    let known_set: HashSet<EntityId> = known.iter().copied().collect();
    let mut partition = Partition::default();

    for entity in current.iter() {
        if known_set.contains(&entity.id) {
            partition.to_update.push(entity.id);
        } else if entity.has_position() {
            partition.to_add.push(entity.id);
        } else {
            partition.suppressed_adds.push(entity.id);
        }
    }

    let mut seen: HashSet<EntityId> = HashSet::with_capacity(known.len());
    for &id in known {
        if !current.contains(id) && seen.insert(id) {
            partition.to_remove.push(id);
        }
    }

    tracing::debug!(
        target: "flightsync::reconcile",
        current = current.len(),
        reconcile.known = known_set.len(),
        reconcile.to_add = partition.to_add.len(),
        reconcile.to_update = partition.to_update.len(),
        reconcile.to_remove = partition.to_remove.len(),
        reconcile.suppressed = partition.suppressed_adds.len(),
        "reconciled snapshot"
    );
    partition
}

/// Full document for a create, or `None` when the reading has no position.
#[must_use]
pub fn create_payload(entity: &Entity) -> Option<EntityDocument> {
    entity.has_position().then(|| entity.to_document())
}

/// Partial field map for an update. Position keys are present only when both
/// coordinates are.
#[must_use]
pub fn update_payload(entity: &Entity) -> FieldMap {
    let mut fields = entity.to_document().to_fields();
    if !entity.has_position() {
        fields.remove(field::LONGITUDE);
        fields.remove(field::LATITUDE);
    }
    fields
}
