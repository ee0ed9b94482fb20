//! Canonical entity record, its persisted document form, and per-cycle snapshots.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Partial or full document body keyed by stored field name.
pub type FieldMap = Map<String, Value>;

/// Stored field names. Producer and consumer must agree on these.
pub mod field {
    pub const ID: &str = "id";
    pub const LONGITUDE: &str = "longitude";
    pub const LATITUDE: &str = "latitude";
    pub const ALTITUDE: &str = "altitude";
    pub const FLIGHT_NUMBER: &str = "flightNumber";
    pub const ORIGIN_COUNTRY: &str = "originCountry";
    pub const LAST_UPDATED: &str = "lastUpdated";
    pub const ON_GROUND: &str = "onGround";
    pub const VELOCITY: &str = "velocity";
    pub const HEADING: &str = "heading";
    pub const VERTICAL_RATE: &str = "verticalRate";
}

/// Stable key of a tracked aircraft (the 24-bit ICAO transponder address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u32);

impl EntityId {
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Parse the feed's hexadecimal key (`"a1b2c3"`), tolerating surrounding
    /// whitespace and either case.
    #[must_use]
    pub fn from_hex(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        u32::from_str_radix(trimmed, 16).ok().map(Self)
    }

    /// Document key used by the store (decimal string).
    #[must_use]
    pub fn document_key(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>().map(Self)
    }
}

impl From<u32> for EntityId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// One aircraft as seen in a single feed poll. Rebuilt every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub altitude: Option<f32>,
    pub flight_number: Option<String>,
    pub origin_country: Option<String>,
    pub last_updated: i64,
    pub on_ground: Option<bool>,
    pub velocity: Option<f32>,
    pub heading: Option<f32>,
    pub vertical_rate: Option<f32>,
}

impl Entity {
    /// Entity with only the mandatory fields set.
    #[must_use]
    pub fn new(id: EntityId, last_updated: i64) -> Self {
        Self {
            id,
            longitude: None,
            latitude: None,
            altitude: None,
            flight_number: None,
            origin_country: None,
            last_updated,
            on_ground: None,
            velocity: None,
            heading: None,
            vertical_rate: None,
        }
    }

    #[must_use]
    pub fn with_position(mut self, longitude: f64, latitude: f64) -> Self {
        self.longitude = Some(longitude);
        self.latitude = Some(latitude);
        self
    }

    /// Both coordinates present.
    #[must_use]
    pub fn has_position(&self) -> bool {
        self.longitude.is_some() && self.latitude.is_some()
    }

    #[must_use]
    pub fn to_document(&self) -> EntityDocument {
        EntityDocument::from(self)
    }
}

/// Persisted form of an entity, as written by creates and read back by the
/// change stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDocument {
    pub id: EntityId,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f32>,
    #[serde(default)]
    pub flight_number: Option<String>,
    #[serde(default)]
    pub origin_country: Option<String>,
    pub last_updated: i64,
    #[serde(default)]
    pub on_ground: Option<bool>,
    #[serde(default)]
    pub velocity: Option<f32>,
    #[serde(default)]
    pub heading: Option<f32>,
    #[serde(default)]
    pub vertical_rate: Option<f32>,
}

impl EntityDocument {
    /// Full field set, absent values written as `null`.
    #[must_use]
    pub fn to_fields(&self) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(field::ID.into(), Value::from(self.id.get()));
        fields.insert(field::LONGITUDE.into(), Value::from(self.longitude));
        fields.insert(field::LATITUDE.into(), Value::from(self.latitude));
        fields.insert(field::ALTITUDE.into(), Value::from(self.altitude));
        fields.insert(
            field::FLIGHT_NUMBER.into(),
            Value::from(self.flight_number.clone()),
        );
        fields.insert(
            field::ORIGIN_COUNTRY.into(),
            Value::from(self.origin_country.clone()),
        );
        fields.insert(field::LAST_UPDATED.into(), Value::from(self.last_updated));
        fields.insert(field::ON_GROUND.into(), Value::from(self.on_ground));
        fields.insert(field::VELOCITY.into(), Value::from(self.velocity));
        fields.insert(field::HEADING.into(), Value::from(self.heading));
        fields.insert(
            field::VERTICAL_RATE.into(),
            Value::from(self.vertical_rate),
        );
        fields
    }

    /// Overwrite the keys present in `fields`; keys not mentioned keep their value.
    pub fn merge_fields(&mut self, fields: &FieldMap) -> crate::Result<()> {
        let mut merged = self.to_fields();
        for (key, value) in fields {
            merged.insert(key.clone(), value.clone());
        }
        *self = serde_json::from_value(Value::Object(merged))?;
        Ok(())
    }
}

impl From<&Entity> for EntityDocument {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            longitude: entity.longitude,
            latitude: entity.latitude,
            altitude: entity.altitude,
            flight_number: entity.flight_number.clone(),
            origin_country: entity.origin_country.clone(),
            last_updated: entity.last_updated,
            on_ground: entity.on_ground,
            velocity: entity.velocity,
            heading: entity.heading,
            vertical_rate: entity.vertical_rate,
        }
    }
}

/// Current feed entities keyed by id, in first-seen order.
///
/// Serves as the read-only `id -> Entity` lookup shared by commit workers.
#[derive(Debug, Clone, Default)]
pub struct EntitySnapshot {
    entities: Vec<Entity>,
    index: HashMap<EntityId, usize>,
}

impl EntitySnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity. An existing entry with the same id is replaced in
    /// place and returned.
    pub fn insert(&mut self, entity: Entity) -> Option<Entity> {
        if let Some(&slot) = self.index.get(&entity.id) {
            return Some(std::mem::replace(&mut self.entities[slot], entity));
        }
        self.index.insert(entity.id, self.entities.len());
        self.entities.push(entity);
        None
    }

    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.index.get(&id).map(|&slot| &self.entities[slot])
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.index.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().map(|entity| entity.id)
    }
}

impl FromIterator<Entity> for EntitySnapshot {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for entity in iter {
            snapshot.insert(entity);
        }
        snapshot
    }
}
