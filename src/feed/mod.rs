//! Upstream feed clients and the typed sighting boundary.
//!
//! The aircraft feed reports numeric fields as strings (and sometimes as
//! numbers), with `""` standing in for "unknown". Everything is converted to
//! typed values here so the rest of the crate never compares sentinel
//! strings.

mod adsb;
mod daylight;

pub use adsb::*;
pub use daylight::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

/// Feed error types.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("malformed response: {0}")]
    Decode(String),
}

/// One observed data point for one aircraft in one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub reg: Option<String>,
    pub hex: Option<String>,
    pub type_code: Option<String>,
    pub callsign: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub speed: Option<f64>,
    pub altitude: Option<f64>,
    pub track: Option<f64>,
    /// Distance from the reference point in miles.
    pub distance: Option<f64>,
    pub on_ground: bool,
    pub posted: Option<DateTime<Utc>>,
}

impl Sighting {
    /// Persistence identity: registration number, falling back to the hex
    /// code when the registration is unknown.
    pub fn identity(&self) -> Option<&str> {
        self.reg.as_deref().or(self.hex.as_deref())
    }
}

/// One fetch worth of sightings plus the quota signal from the response.
#[derive(Debug, Default)]
pub struct FeedBatch {
    pub sightings: Vec<Sighting>,
    /// Remaining request allowance, when the upstream reported one.
    pub quota_remaining: Option<i64>,
}

/// Sunrise/sunset timestamps for one calendar day.
#[derive(Debug, Clone, Copy)]
pub struct SunTimes {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

/// Client for the aircraft-position feed.
#[async_trait]
pub trait AircraftFeed: Send + Sync {
    async fn fetch(&self, lat: f64, lon: f64, radius_nm: u32) -> Result<FeedBatch, FeedError>;
}

/// Client for the sunrise/sunset lookup.
#[async_trait]
pub trait DaylightFeed: Send + Sync {
    async fn lookup(&self, lat: f64, lon: f64) -> Result<SunTimes, FeedError>;
}

/// Wire form of one aircraft record as the feed reports it.
#[derive(Debug, Default, Deserialize)]
pub struct RawAircraft {
    #[serde(default, deserialize_with = "de_stringly")]
    pub reg: Option<String>,
    #[serde(default, deserialize_with = "de_stringly")]
    pub icao: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "de_stringly")]
    pub type_code: Option<String>,
    #[serde(rename = "call", default, deserialize_with = "de_stringly")]
    pub callsign: Option<String>,
    #[serde(default, deserialize_with = "de_stringly")]
    pub lat: Option<String>,
    #[serde(default, deserialize_with = "de_stringly")]
    pub lon: Option<String>,
    #[serde(rename = "spd", default, deserialize_with = "de_stringly")]
    pub speed: Option<String>,
    #[serde(rename = "alt", default, deserialize_with = "de_stringly")]
    pub altitude: Option<String>,
    #[serde(rename = "trak", default, deserialize_with = "de_stringly")]
    pub track: Option<String>,
    #[serde(rename = "dst", default, deserialize_with = "de_stringly")]
    pub distance: Option<String>,
    #[serde(rename = "gnd", default, deserialize_with = "de_stringly")]
    pub ground: Option<String>,
    #[serde(rename = "posttime", default, deserialize_with = "de_stringly")]
    pub post_time: Option<String>,
}

impl RawAircraft {
    /// Convert to a typed sighting.
    ///
    /// Returns `None` when the record has neither a registration nor a hex
    /// code; such records cannot be keyed and are unusable downstream.
    pub fn into_sighting(self) -> Option<Sighting> {
        if self.reg.is_none() && self.icao.is_none() {
            return None;
        }

        let posted = self
            .post_time
            .as_deref()
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);

        Some(Sighting {
            reg: self.reg,
            hex: self.icao,
            type_code: self.type_code,
            callsign: self.callsign,
            lat: parse_f64(self.lat.as_deref()),
            lon: parse_f64(self.lon.as_deref()),
            speed: parse_f64(self.speed.as_deref()),
            altitude: parse_f64(self.altitude.as_deref()),
            track: parse_f64(self.track.as_deref()),
            distance: parse_f64(self.distance.as_deref()),
            on_ground: matches!(self.ground.as_deref(), Some("1") | Some("true")),
            posted,
        })
    }
}

fn parse_f64(s: Option<&str>) -> Option<f64> {
    s.and_then(|v| v.parse().ok())
}

/// Accept a string, number, or bool and normalize to `Option<String>`,
/// mapping `null` and `""` to `None`.
fn de_stringly<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(de)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(if b { "1" } else { "0" }.to_string()),
        Some(_) => None,
    })
}
