//! Typed layer and scene definitions handed opaquely to the scene backend.

use serde::{Deserialize, Serialize};

use crate::constants::OBJECT_ID_FIELD;

const PLANE_MODEL_HREF: &str = "./assets/plane.glb";
const PLANE_MODEL_HEIGHT_M: f64 = 10_000.0;
const NUMERIC_PLACES: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Date,
    Single,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
}

impl FieldDefinition {
    fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
        }
    }
}

/// 3D symbol drawn at every feature position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointSymbol {
    /// Mesh resource scaled to a fixed height in metres.
    Object { href: String, height: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationType {
    /// Degrees clockwise from north.
    Geographic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VisualVariable {
    Rotation {
        field: String,
        rotation_type: RotationType,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Renderer {
    pub label: String,
    pub symbol: PointSymbol,
    pub visual_variables: Vec<VisualVariable>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupField {
    pub field_name: String,
    pub label: String,
    /// Decimal places for numeric display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub places: Option<u8>,
}

impl PopupField {
    fn text(field_name: &str, label: &str) -> Self {
        Self {
            field_name: field_name.to_string(),
            label: label.to_string(),
            places: None,
        }
    }

    fn numeric(field_name: &str, label: &str) -> Self {
        Self {
            places: Some(NUMERIC_PLACES),
            ..Self::text(field_name, label)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupTemplate {
    pub title: String,
    pub fields: Vec<PopupField>,
}

/// Everything needed to construct the feature layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDefinition {
    pub title: String,
    pub object_id_field: String,
    pub fields: Vec<FieldDefinition>,
    pub renderer: Renderer,
    pub popup: PopupTemplate,
}

impl LayerDefinition {
    /// Aircraft layer: plane model rotated by `Heading`, popup over the
    /// persisted telemetry fields.
    #[must_use]
    pub fn aircraft() -> Self {
        Self {
            title: "Aircraft".to_string(),
            object_id_field: OBJECT_ID_FIELD.to_string(),
            fields: vec![
                FieldDefinition::new("FlightNumber", FieldType::String),
                FieldDefinition::new("OriginCountry", FieldType::String),
                FieldDefinition::new("LastUpdated", FieldType::Date),
                FieldDefinition::new("Altitude", FieldType::Single),
                FieldDefinition::new("OnGround", FieldType::String),
                FieldDefinition::new("Velocity", FieldType::Single),
                FieldDefinition::new("Heading", FieldType::Single),
                FieldDefinition::new("VerticalRate", FieldType::Single),
            ],
            renderer: Renderer {
                label: "Aircraft".to_string(),
                symbol: PointSymbol::Object {
                    href: PLANE_MODEL_HREF.to_string(),
                    height: PLANE_MODEL_HEIGHT_M,
                },
                visual_variables: vec![VisualVariable::Rotation {
                    field: "Heading".to_string(),
                    rotation_type: RotationType::Geographic,
                }],
            },
            popup: PopupTemplate {
                title: "{FlightNumber}".to_string(),
                fields: vec![
                    PopupField::text("FlightNumber", "Flight Number"),
                    PopupField::text("OriginCountry", "Origin Country"),
                    PopupField::numeric("Altitude", "Altitude (m)"),
                    PopupField::numeric("Velocity", "Velocity (m/s)"),
                    PopupField::numeric("Heading", "Heading (°)"),
                    PopupField::numeric("VerticalRate", "Vertical Rate (m/s)"),
                    PopupField::text("OnGround", "On Ground"),
                    PopupField::text("LastUpdated", "Last Updated"),
                ],
            },
        }
    }

    /// Field names a feature attribute bag must provide.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.object_id_field.as_str())
            .chain(self.fields.iter().map(|field| field.name.as_str()))
    }
}

/// Initial view of the 3D scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDefinition {
    pub basemap: String,
    pub ground: String,
    /// `[longitude, latitude]`.
    pub center: [f64; 2],
    pub zoom: u8,
}

impl Default for SceneDefinition {
    fn default() -> Self {
        Self {
            basemap: "hybrid".to_string(),
            ground: "world-elevation".to_string(),
            center: [-100.382, 40.3],
            zoom: 2,
        }
    }
}
