//! HTTP client for the sunrise-sunset lookup service.

use super::{DaylightFeed, FeedError, SunTimes};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct SunApiResponse {
    results: SunApiResults,
    status: String,
}

#[derive(Debug, Deserialize)]
struct SunApiResults {
    sunrise: String,
    sunset: String,
}

/// Daylight feed backed by api.sunrise-sunset.org.
pub struct SunriseSunsetApi {
    client: reqwest::Client,
}

impl SunriseSunsetApi {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for SunriseSunsetApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DaylightFeed for SunriseSunsetApi {
    async fn lookup(&self, lat: f64, lon: f64) -> Result<SunTimes, FeedError> {
        let url = format!(
            "https://api.sunrise-sunset.org/json?lat={}&lng={}&date=today&formatted=0",
            lat, lon
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FeedError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status.as_u16()));
        }

        let body: SunApiResponse = response
            .json()
            .await
            .map_err(|e| FeedError::Decode(e.to_string()))?;

        if body.status != "OK" {
            return Err(FeedError::Decode(format!(
                "lookup returned status {}",
                body.status
            )));
        }

        Ok(SunTimes {
            sunrise: parse_time(&body.results.sunrise)?,
            sunset: parse_time(&body.results.sunset)?,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, FeedError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FeedError::Decode(format!("bad timestamp {:?}: {}", s, e)))
}
