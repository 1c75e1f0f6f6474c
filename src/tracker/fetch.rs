//! Bounded retry wrapper around the traffic fetch.

use std::time::Duration;

use crate::db::{LogLevel, Store};
use crate::feed::{AircraftFeed, FeedError, Sighting};

use super::TrackerError;

/// Fetch attempts before giving up on the cycle.
pub const MAX_ATTEMPTS: u32 = 10;

/// Fixed delay between attempts. The upstream is a rate-limited third-party
/// API; a slow constant backoff beats hammering it exponentially.
pub const RETRY_DELAY: Duration = Duration::from_secs(2 * 60);

/// Result of one fetch-with-retry call.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Airborne sightings with a usable identity.
    pub sightings: Vec<Sighting>,
    /// Quota signal from the response, if the upstream sent one.
    pub quota_remaining: Option<i64>,
    /// Server-dictated cooldown in seconds when the feed rate-limited us.
    pub rate_limited: Option<u64>,
}

/// Fetch current traffic, retrying transient upstream failures.
///
/// Retries up to [`MAX_ATTEMPTS`] times with [`RETRY_DELAY`] between
/// attempts, logging each retry with its attempt number. A rate-limit
/// response is not an error: it returns an empty outcome carrying the
/// server cooldown. Exhausting the retry budget is fatal for the cycle and
/// propagates as [`TrackerError::RetryExhausted`].
pub async fn fetch_with_retry<F>(
    feed: &F,
    store: &Store,
    lat: f64,
    lon: f64,
    radius_nm: u32,
) -> Result<FetchOutcome, TrackerError>
where
    F: AircraftFeed + ?Sized,
{
    for attempt in 1..=MAX_ATTEMPTS {
        match feed.fetch(lat, lon, radius_nm).await {
            Ok(batch) => {
                let sightings: Vec<Sighting> = batch
                    .sightings
                    .into_iter()
                    .filter(|s| s.identity().is_some() && !s.on_ground)
                    .collect();

                if let Some(remaining) = batch.quota_remaining {
                    if let Err(e) = store.set_request_count(remaining) {
                        tracing::warn!("Failed to persist request count: {}", e);
                    }
                }

                db_log(
                    store,
                    LogLevel::Info,
                    "fetch",
                    &format!("Success. Retrieved {} records.", sightings.len()),
                );

                return Ok(FetchOutcome {
                    sightings,
                    quota_remaining: batch.quota_remaining,
                    rate_limited: None,
                });
            }
            Err(FeedError::RateLimited { retry_after_secs }) => {
                return Ok(FetchOutcome {
                    rate_limited: Some(retry_after_secs),
                    ..FetchOutcome::default()
                });
            }
            Err(e) => {
                tracing::warn!("Traffic fetch attempt {} failed: {}", attempt, e);
                db_log(store, LogLevel::Error, "fetch", &e.to_string());

                if attempt < MAX_ATTEMPTS {
                    db_log(
                        store,
                        LogLevel::Warn,
                        "fetch",
                        &format!("Retrying. Attempt {}.", attempt),
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    db_log(
        store,
        LogLevel::Error,
        "fetch",
        &format!("Fetch failed after {} attempts.", MAX_ATTEMPTS),
    );
    Err(TrackerError::RetryExhausted {
        attempts: MAX_ATTEMPTS,
    })
}

/// A failed audit-log write never takes down the fetch path.
fn db_log(store: &Store, level: LogLevel, category: &str, message: &str) {
    if let Err(e) = store.add_log(level, category, message) {
        tracing::warn!("Failed to write log entry: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedBatch;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    struct ScriptedFeed {
        responses: Mutex<VecDeque<Result<FeedBatch, FeedError>>>,
        calls: AtomicU32,
    }

    impl ScriptedFeed {
        fn new(responses: Vec<Result<FeedBatch, FeedError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AircraftFeed for ScriptedFeed {
        async fn fetch(&self, _: f64, _: f64, _: u32) -> Result<FeedBatch, FeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(FeedBatch::default()))
        }
    }

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn airborne(reg: &str) -> Sighting {
        Sighting {
            reg: Some(reg.to_string()),
            hex: None,
            type_code: None,
            callsign: None,
            lat: None,
            lon: None,
            speed: None,
            altitude: None,
            track: None,
            distance: None,
            on_ground: false,
            posted: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let (_tmp, store) = test_store();
        let feed = ScriptedFeed::new(vec![
            Err(FeedError::Status(502)),
            Err(FeedError::Upstream("connection reset".into())),
            Ok(FeedBatch {
                sightings: vec![airborne("N1AB")],
                quota_remaining: Some(190),
            }),
        ]);

        let outcome = fetch_with_retry(&feed, &store, 44.9, -93.2, 25)
            .await
            .unwrap();

        assert_eq!(feed.calls(), 3);
        assert_eq!(outcome.sightings.len(), 1);
        assert_eq!(outcome.quota_remaining, Some(190));
        // Quota signal is persisted for the next startup.
        assert_eq!(store.get_request_count().unwrap(), 190);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_after_ten_attempts() {
        let (_tmp, store) = test_store();
        let feed = ScriptedFeed::new(
            (0..20)
                .map(|_| Err(FeedError::Status(500)))
                .collect::<Vec<_>>(),
        );

        let result = fetch_with_retry(&feed, &store, 44.9, -93.2, 25).await;

        assert_eq!(feed.calls(), MAX_ATTEMPTS);
        assert!(matches!(
            result,
            Err(TrackerError::RetryExhausted { attempts: 10 })
        ));
    }

    #[tokio::test]
    async fn test_ground_and_no_identity_records_filtered() {
        let (_tmp, store) = test_store();
        let mut grounded = airborne("N2CD");
        grounded.on_ground = true;
        let mut anonymous = airborne("ignored");
        anonymous.reg = None;

        let feed = ScriptedFeed::new(vec![Ok(FeedBatch {
            sightings: vec![airborne("N1AB"), grounded, anonymous],
            quota_remaining: None,
        })]);

        let outcome = fetch_with_retry(&feed, &store, 44.9, -93.2, 25)
            .await
            .unwrap();

        assert_eq!(outcome.sightings.len(), 1);
        assert_eq!(outcome.sightings[0].reg.as_deref(), Some("N1AB"));
        // Missing quota header leaves the persisted count untouched.
        assert_eq!(store.get_request_count().unwrap(), 250);
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_an_error() {
        let (_tmp, store) = test_store();
        let feed = ScriptedFeed::new(vec![Err(FeedError::RateLimited {
            retry_after_secs: 120,
        })]);

        let outcome = fetch_with_retry(&feed, &store, 44.9, -93.2, 25)
            .await
            .unwrap();

        assert_eq!(feed.calls(), 1);
        assert!(outcome.sightings.is_empty());
        assert_eq!(outcome.rate_limited, Some(120));
    }
}
