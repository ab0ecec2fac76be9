//! Serde helpers for durations written as humantime strings (`"30s"`, `"1m 30s"`)
//! or as a bare integer number of seconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Upper bound for every configured duration (ten years).
pub const MAX: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// `at + by`, clamped to the latest instant chrono can represent.
pub fn deadline(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|by| at.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

fn parse(raw: RawDuration) -> Result<Duration, String> {
    match raw {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => humantime::parse_duration(text.trim())
            .map_err(|e| format!("invalid duration '{}': {}", text, e)),
    }
}

pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    parse(RawDuration::deserialize(deserializer)?).map_err(serde::de::Error::custom)
}

pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => super::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<RawDuration>::deserialize(deserializer)? {
            Some(raw) => parse(raw).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
