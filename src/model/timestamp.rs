//! Minute-resolution timestamp text used by every persisted document.
//!
//! Usable as `#[serde(with = "crate::model::timestamp")]`.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// Seconds are always written as `00`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:00Z";

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_timestamp(timestamp))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_timestamp(&text).map_err(|e| {
        serde::de::Error::custom(format!("invalid timestamp '{}': {}", text, e))
    })
}
