//! Raw feed record → canonical `Entity`.
//!
//! `id` and `lastUpdated` are mandatory; any other column that is null or
//! fails to parse becomes absent on its own without rejecting the record.
//! Heading stays in the feed convention (degrees clockwise from north); the
//! renderer offset is applied on the consumer side.

use std::collections::HashMap;

use crate::constants::FEED_RECORD_WIDTH;
use crate::feed::{FeedField, FeedSnapshot, RawRecord};
use crate::types::{DuplicatePolicy, Entity, EntityId, EntitySnapshot};
use crate::{FlightsyncError, Result};

/// A record dropped during normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    /// Position in the feed's `states` array.
    pub index: usize,
    pub reason: String,
}

/// Normalized view of one feed poll.
#[derive(Debug, Clone, Default)]
pub struct NormalizedSnapshot {
    pub entities: EntitySnapshot,
    pub rejected: Vec<RejectedRecord>,
    /// Records that shared an id with another record in the same poll.
    pub duplicates: usize,
}

fn parse_f64(record: &RawRecord, field: FeedField) -> Option<f64> {
    record
        .field(field)
        .and_then(|text| text.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

fn parse_f32(record: &RawRecord, field: FeedField) -> Option<f32> {
    record
        .field(field)
        .and_then(|text| text.trim().parse::<f32>().ok())
        .filter(|value| value.is_finite())
}

fn parse_bool(record: &RawRecord, field: FeedField) -> Option<bool> {
    let text = record.field(field)?.trim();
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_text(record: &RawRecord, field: FeedField) -> Option<String> {
    record
        .field(field)
        .map(str::trim_end)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn parse_timestamp(text: &str) -> Option<i64> {
    let trimmed = text.trim();
    trimmed.parse::<i64>().ok().or_else(|| {
        // Some encoders emit integral timestamps as floats ("1700000000.0").
        trimmed
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite() && value.fract() == 0.0)
            .map(|value| value as i64)
    })
}

/// Normalize one state vector. `index` only labels the error.
pub fn normalize_record(index: usize, record: &RawRecord) -> Result<Entity> {
    if record.width() < FEED_RECORD_WIDTH {
        return Err(FlightsyncError::MalformedRecord {
            index,
            reason: format!(
                "expected {FEED_RECORD_WIDTH} columns, found {}",
                record.width()
            ),
        });
    }

    let id = match record.field(FeedField::Id) {
        Some(raw) => EntityId::from_hex(raw).ok_or_else(|| FlightsyncError::MalformedRecord {
            index,
            reason: format!("id {raw:?} is not a hexadecimal address"),
        })?,
        None => {
            return Err(FlightsyncError::MalformedRecord {
                index,
                reason: "missing id".into(),
            });
        }
    };

    let last_updated = record
        .field(FeedField::LastContact)
        .and_then(parse_timestamp)
        .ok_or_else(|| FlightsyncError::MalformedRecord {
            index,
            reason: format!("aircraft {id}: missing or unparseable last contact time"),
        })?;

    Ok(Entity {
        id,
        longitude: parse_f64(record, FeedField::Longitude),
        latitude: parse_f64(record, FeedField::Latitude),
        altitude: parse_f32(record, FeedField::GeometricAltitude),
        flight_number: parse_text(record, FeedField::FlightNumber),
        origin_country: parse_text(record, FeedField::OriginCountry),
        last_updated,
        on_ground: parse_bool(record, FeedField::OnGround),
        velocity: parse_f32(record, FeedField::Velocity),
        heading: parse_f32(record, FeedField::Heading),
        vertical_rate: parse_f32(record, FeedField::VerticalRate),
    })
}

/// Normalize every record of a poll, drop malformed ones, and resolve
/// duplicate ids per `policy`.
pub fn normalize_snapshot(snapshot: &FeedSnapshot, policy: DuplicatePolicy) -> NormalizedSnapshot {
    let mut rejected = Vec::new();
    let mut parsed: Vec<(usize, Entity)> = Vec::with_capacity(snapshot.states.len());

    for (index, record) in snapshot.states.iter().enumerate() {
        match normalize_record(index, record) {
            Ok(entity) => parsed.push((index, entity)),
            Err(FlightsyncError::MalformedRecord { index, reason }) => {
                tracing::debug!(
                    target: "flightsync::normalize",
                    record = index,
                    reason = %reason,
                    "dropping malformed record"
                );
                rejected.push(RejectedRecord { index, reason });
            }
            Err(other) => rejected.push(RejectedRecord {
                index,
                reason: other.to_string(),
            }),
        }
    }

    let mut occurrences: HashMap<EntityId, usize> = HashMap::with_capacity(parsed.len());
    for (_, entity) in &parsed {
        *occurrences.entry(entity.id).or_default() += 1;
    }
    let duplicates: usize = occurrences
        .values()
        .filter(|&&count| count > 1)
        .map(|&count| count - 1)
        .sum();

    let mut entities = EntitySnapshot::new();
    for (index, entity) in parsed {
        let shared = occurrences.get(&entity.id).copied().unwrap_or(0) > 1;
        match policy {
            DuplicatePolicy::KeepFirst => {
                if !entities.contains(entity.id) {
                    entities.insert(entity);
                }
            }
            DuplicatePolicy::KeepLast => {
                entities.insert(entity);
            }
            DuplicatePolicy::Reject if shared => {
                rejected.push(RejectedRecord {
                    index,
                    reason: format!("duplicate id {}", entity.id),
                });
            }
            DuplicatePolicy::Reject => {
                entities.insert(entity);
            }
        }
    }

    if !rejected.is_empty() || duplicates > 0 {
        tracing::info!(
            target: "flightsync::normalize",
            records = snapshot.states.len(),
            normalize.entities = entities.len(),
            normalize.rejected = rejected.len(),
            normalize.duplicates = duplicates,
            "normalized feed snapshot with drops"
        );
    }

    NormalizedSnapshot {
        entities,
        rejected,
        duplicates,
    }
}
