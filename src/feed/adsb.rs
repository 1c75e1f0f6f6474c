//! HTTP client for the ADS-B exchange traffic feed.

use super::{AircraftFeed, FeedBatch, FeedError, RawAircraft};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;

const FEED_HOST: &str = "adsbx-flight-sim-traffic.p.rapidapi.com";
const QUOTA_HEADER: &str = "x-ratelimit-requests-remaining";

/// Cooldown assumed when a rate-limit response carries no usable header.
const DEFAULT_COOLDOWN_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct AdsbResponse {
    #[serde(default)]
    ac: Option<Vec<RawAircraft>>,
}

/// Aircraft feed backed by the RapidAPI ADS-B exchange endpoint.
pub struct AdsbxFeed {
    client: reqwest::Client,
    api_key: String,
}

impl AdsbxFeed {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl AircraftFeed for AdsbxFeed {
    async fn fetch(&self, lat: f64, lon: f64, radius_nm: u32) -> Result<FeedBatch, FeedError> {
        let url = format!(
            "https://{}/api/aircraft/json/lat/{}/lon/{}/dist/{}/",
            FEED_HOST, lat, lon, radius_nm
        );

        let response = self
            .client
            .get(&url)
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", FEED_HOST)
            .send()
            .await
            .map_err(|e| FeedError::Upstream(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(FeedError::RateLimited {
                retry_after_secs: retry_after_secs(response.headers()),
            });
        }
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let quota_remaining = header_i64(response.headers(), QUOTA_HEADER);

        let body: AdsbResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;

        let sightings = body
            .ac
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawAircraft::into_sighting)
            .collect();

        Ok(FeedBatch {
            sightings,
            quota_remaining,
        })
    }
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn retry_after_secs(headers: &HeaderMap) -> u64 {
    header_i64(headers, "retry-after")
        .or_else(|| header_i64(headers, "x-rate-limit-retry-after-seconds"))
        .filter(|&v| v > 0)
        .map(|v| v as u64)
        .unwrap_or(DEFAULT_COOLDOWN_SECS)
}
