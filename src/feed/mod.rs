//! Telemetry feed boundary: snapshot types, the positional field table, and
//! the `FeedSource` seam.
//!
//! A snapshot is `{ time, states }` where each state is a fixed-width array of
//! nullable scalars. Decoding renders every scalar to text so the normalizer
//! works over one uniform `RawRecord` shape regardless of how the upstream
//! JSON typed each column.

#[cfg(feature = "http_feed")]
mod opensky;

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::Value;

#[cfg(feature = "http_feed")]
pub use opensky::OpenSkyFeed;

use crate::constants::FEED_RECORD_WIDTH;
use crate::{FlightsyncError, Result};

/// Semantic meaning of each state-vector column, by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedField {
    Id,
    FlightNumber,
    OriginCountry,
    TimePosition,
    LastContact,
    Longitude,
    Latitude,
    BarometricAltitude,
    OnGround,
    Velocity,
    Heading,
    VerticalRate,
    Sensors,
    GeometricAltitude,
    Squawk,
    Spi,
    PositionSource,
}

/// Column table in positional order; `FEED_FIELDS[i].index() == i`.
pub const FEED_FIELDS: [FeedField; FEED_RECORD_WIDTH] = [
    FeedField::Id,
    FeedField::FlightNumber,
    FeedField::OriginCountry,
    FeedField::TimePosition,
    FeedField::LastContact,
    FeedField::Longitude,
    FeedField::Latitude,
    FeedField::BarometricAltitude,
    FeedField::OnGround,
    FeedField::Velocity,
    FeedField::Heading,
    FeedField::VerticalRate,
    FeedField::Sensors,
    FeedField::GeometricAltitude,
    FeedField::Squawk,
    FeedField::Spi,
    FeedField::PositionSource,
];

impl FeedField {
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Id => 0,
            Self::FlightNumber => 1,
            Self::OriginCountry => 2,
            Self::TimePosition => 3,
            Self::LastContact => 4,
            Self::Longitude => 5,
            Self::Latitude => 6,
            Self::BarometricAltitude => 7,
            Self::OnGround => 8,
            Self::Velocity => 9,
            Self::Heading => 10,
            Self::VerticalRate => 11,
            Self::Sensors => 12,
            Self::GeometricAltitude => 13,
            Self::Squawk => 14,
            Self::Spi => 15,
            Self::PositionSource => 16,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Id => "icao24",
            Self::FlightNumber => "callsign",
            Self::OriginCountry => "origin_country",
            Self::TimePosition => "time_position",
            Self::LastContact => "last_contact",
            Self::Longitude => "longitude",
            Self::Latitude => "latitude",
            Self::BarometricAltitude => "baro_altitude",
            Self::OnGround => "on_ground",
            Self::Velocity => "velocity",
            Self::Heading => "true_track",
            Self::VerticalRate => "vertical_rate",
            Self::Sensors => "sensors",
            Self::GeometricAltitude => "geo_altitude",
            Self::Squawk => "squawk",
            Self::Spi => "spi",
            Self::PositionSource => "position_source",
        }
    }
}

/// One state vector as positional nullable text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord(Vec<Option<String>>);

impl RawRecord {
    #[must_use]
    pub fn new(columns: Vec<Option<String>>) -> Self {
        Self(columns)
    }

    /// Convenience for fixtures: `None` and `""` are both absent.
    #[must_use]
    pub fn from_columns(columns: &[Option<&str>]) -> Self {
        Self(
            columns
                .iter()
                .map(|column| column.map(str::to_string))
                .collect(),
        )
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.0.len()
    }

    /// Column text, `None` when null, empty, or beyond the record width.
    #[must_use]
    pub fn field(&self, field: FeedField) -> Option<&str> {
        self.0
            .get(field.index())
            .and_then(Option::as_deref)
            .filter(|text| !text.is_empty())
    }
}

/// Decoded response of one feed poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedSnapshot {
    /// Feed-side timestamp (epoch seconds).
    pub time: i64,
    pub states: Vec<RawRecord>,
}

#[derive(Deserialize)]
struct WireSnapshot {
    time: i64,
    #[serde(default)]
    states: Option<Vec<Vec<Value>>>,
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        other => Some(other.to_string()),
    }
}

impl FeedSnapshot {
    /// Decode a `{ time, states }` payload. `states: null` is an empty snapshot.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let wire: WireSnapshot =
            serde_json::from_slice(bytes).map_err(|err| FlightsyncError::Decode {
                reason: err.to_string(),
            })?;
        let states = wire
            .states
            .unwrap_or_default()
            .into_iter()
            .map(|columns| RawRecord(columns.into_iter().map(scalar_text).collect()))
            .collect();
        Ok(Self {
            time: wire.time,
            states,
        })
    }
}

/// Source of telemetry snapshots. One call is one poll.
pub trait FeedSource: Send + Sync {
    fn fetch(&self) -> Result<FeedSnapshot>;
}

/// Replays a fixed sequence of poll results, then keeps returning the last
/// snapshot. Used for offline runs and tests.
#[derive(Debug, Default)]
pub struct ScriptedFeed {
    script: Mutex<VecDeque<std::result::Result<FeedSnapshot, String>>>,
    last: Mutex<FeedSnapshot>,
}

impl ScriptedFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn then_snapshot(self, snapshot: FeedSnapshot) -> Self {
        self.push(Ok(snapshot));
        self
    }

    /// Queue a poll that fails with `FlightsyncError::Fetch`.
    pub fn then_failure<S: Into<String>>(self, reason: S) -> Self {
        self.push(Err(reason.into()));
        self
    }

    fn push(&self, step: std::result::Result<FeedSnapshot, String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
    }
}

impl FeedSource for ScriptedFeed {
    fn fetch(&self) -> Result<FeedSnapshot> {
        let next = self
            .script
            .lock()
            .map_err(|_| FlightsyncError::Fetch {
                reason: "scripted feed lock poisoned".into(),
            })?
            .pop_front();
        let mut last = self.last.lock().map_err(|_| FlightsyncError::Fetch {
            reason: "scripted feed lock poisoned".into(),
        })?;
        match next {
            Some(Ok(snapshot)) => {
                *last = snapshot.clone();
                Ok(snapshot)
            }
            Some(Err(reason)) => Err(FlightsyncError::Fetch { reason }),
            None => Ok(last.clone()),
        }
    }
}
