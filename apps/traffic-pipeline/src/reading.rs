use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

pub const SENSOR_ID_RANGE: std::ops::RangeInclusive<i32> = 1..=100;
pub const VEHICLE_COUNT_RANGE: std::ops::RangeInclusive<i32> = 0..=50;
pub const AVERAGE_SPEED_MAX: f64 = 120.0;

const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// One simulated traffic-sensor sample, as carried on the queue and stored in `SensorData`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    #[serde(serialize_with = "serialize_wire_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub sensor_id: i32,
    pub vehicle_count: i32,
    pub average_speed: f64,
}

#[derive(Debug, Error)]
pub enum ReadingError {
    #[error("malformed reading payload: {0}")]
    Payload(#[from] simd_json::Error),
    #[error("invalid reading timestamp {raw:?}: {source}")]
    Timestamp {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },
}

#[derive(Debug, Deserialize)]
struct BorrowedReading<'a> {
    #[serde(borrow)]
    timestamp: std::borrow::Cow<'a, str>,
    sensor_id: i32,
    vehicle_count: i32,
    average_speed: f64,
}

fn serialize_wire_timestamp<S: Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&timestamp.format(WIRE_TIMESTAMP_FORMAT))
}

/// Synthesizes a reading stamped with the current instant, truncated to milliseconds so it
/// survives the wire format unchanged.
pub fn generate() -> Reading {
    generate_with(&mut rand::thread_rng(), Utc::now())
}

pub fn generate_with<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> Reading {
    let speed: f64 = rng.gen_range(0.0..=AVERAGE_SPEED_MAX);
    Reading {
        timestamp: now.trunc_subsecs(3),
        sensor_id: rng.gen_range(SENSOR_ID_RANGE),
        vehicle_count: rng.gen_range(VEHICLE_COUNT_RANGE),
        average_speed: round_one_decimal(speed),
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

impl Reading {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn wire_timestamp(&self) -> String {
        self.timestamp.format(WIRE_TIMESTAMP_FORMAT).to_string()
    }

    /// Parses a queue payload. The payload is copied because the JSON parser works in place.
    pub fn from_json(payload: &str) -> Result<Self, ReadingError> {
        let mut bytes = payload.as_bytes().to_vec();
        let wire: BorrowedReading = simd_json::serde::from_slice(&mut bytes)?;
        let timestamp = parse_timestamp(&wire.timestamp)?;
        Ok(Self {
            timestamp,
            sensor_id: wire.sensor_id,
            vehicle_count: wire.vehicle_count,
            average_speed: wire.average_speed,
        })
    }
}

/// A `Z` designator and a `+00:00` offset are equivalent; any other offset is converted to UTC.
/// Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ReadingError> {
    let trimmed = raw.trim();
    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| ReadingError::Timestamp {
                raw: raw.to_string(),
                source: rfc_err,
            }),
    }
}
