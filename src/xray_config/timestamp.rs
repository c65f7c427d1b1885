//! Timestamps stored in the proxy configuration document.
//!
//! The dashboard and older tooling have written several shapes over time, so
//! reading is lenient: RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`,
//! `YYYY-MM-DD` (all naive forms in local time), or epoch milliseconds.
//! Writing always produces RFC 3339 UTC with millisecond precision.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ConfigTime(pub DateTime<Utc>);

impl ConfigTime {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(Self(parsed.with_timezone(&Utc)));
        }

        let naive = NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .or_else(|| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| Self(local.with_timezone(&Utc)))
    }

    pub fn from_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }
}

impl From<DateTime<Utc>> for ConfigTime {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl Display for ConfigTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

impl Serialize for ConfigTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTime {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

impl RawTime {
    fn into_time(self) -> Result<Option<ConfigTime>, String> {
        match self {
            RawTime::Text(text) if text.trim().is_empty() => Ok(None),
            RawTime::Text(text) => ConfigTime::parse(&text)
                .map(Some)
                .ok_or_else(|| format!("unrecognized timestamp: {:?}", text)),
            RawTime::Millis(millis) => ConfigTime::from_millis(millis)
                .map(Some)
                .ok_or_else(|| format!("timestamp out of range: {}", millis)),
            RawTime::Fractional(millis) => ConfigTime::from_millis(millis as i64)
                .map(Some)
                .ok_or_else(|| format!("timestamp out of range: {}", millis)),
        }
    }
}

impl<'de> Deserialize<'de> for ConfigTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawTime::deserialize(deserializer)?
            .into_time()
            .map_err(D::Error::custom)?
            .ok_or_else(|| D::Error::custom("empty timestamp"))
    }
}

/// `deserialize_with` helper for optional fields: `null`, a missing key and
/// an empty string all read as `None`.
pub fn optional<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<ConfigTime>, D::Error> {
    match Option::<RawTime>::deserialize(deserializer)? {
        Some(raw) => raw.into_time().map_err(D::Error::custom),
        None => Ok(None),
    }
}

#[cfg(test)]
#[path = "tests/timestamp_tests.rs"]
mod tests;
