//! Visualization-side projection of persisted entities.

use serde::{Deserialize, Serialize};

use super::entity::EntityId;

/// 3D point; `x`/`y` are longitude/latitude, `z` the altitude in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointGeometry {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f32>,
    pub has_z: bool,
}

/// Flattened attribute bag. Field names match the layer's field schema and
/// popup bindings (see `LayerDefinition::aircraft`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeatureAttributes {
    #[serde(rename = "ObjectID")]
    pub object_id: EntityId,
    pub flight_number: Option<String>,
    pub origin_country: Option<String>,
    pub last_updated: i64,
    pub altitude: Option<f32>,
    /// Text form (`"true"`/`"false"`); the layer field is string-typed.
    pub on_ground: Option<String>,
    pub velocity: Option<f32>,
    /// Renderer rotation in degrees, already offset from the feed heading.
    pub heading: Option<f32>,
    pub vertical_rate: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: PointGeometry,
    pub attributes: FeatureAttributes,
}

impl Feature {
    #[must_use]
    pub fn key(&self) -> EntityId {
        self.attributes.object_id
    }
}

/// Feature-level edit set for one burst.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureEdits {
    pub adds: Vec<Feature>,
    pub updates: Vec<Feature>,
    pub deletes: Vec<Feature>,
}

impl FeatureEdits {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.adds.len() + self.updates.len() + self.deletes.len()
    }
}
