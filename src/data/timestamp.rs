//! Parsing of API timestamps
//!
//! The backend serializes datetimes either with an offset (`2024-01-01T10:00:00Z`)
//! or as naive ISO-8601 values (`2024-01-01T10:00:00.123456`). Naive values are
//! stored as UTC by the backend and are read back as UTC here.
//!
//! Used as a serde `with` module on the wire models.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};
use thiserror::Error;

/// Naive layouts accepted after RFC 3339 fails
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

/// Error for timestamps in none of the accepted layouts
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid timestamp: {0}")]
pub struct TimestampError(pub String);

/// Parses an API timestamp into UTC
pub fn parse_api_timestamp(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let value = value.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| TimestampError(value.to_string()))
}

pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_rfc3339())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_api_timestamp(&raw).map_err(serde::de::Error::custom)
}
