//! The tracking engine: daylight gating, quota-adaptive scheduling,
//! watch-list matching, and the supervised poll loop.

mod daylight;
mod fetch;
mod scheduler;
mod watchlist;

pub use daylight::*;
pub use fetch::*;
pub use scheduler::*;
pub use watchlist::*;

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, Utc};
use thiserror::Error;

use crate::config::TrackerConfig;
use crate::db::{DbError, LogLevel, Store};
use crate::feed::{AircraftFeed, DaylightFeed};
use crate::notify::Notifier;

/// Pipeline restarts tolerated before the supervisor reports permanent
/// failure and stops scheduling cycles.
pub const MAX_RESTARTS: u32 = 5;

/// Tracker error types.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("traffic fetch failed after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("tracker gave up after {0} pipeline restarts")]
    RestartsExhausted(u32),
}

/// Summary of one completed poll cycle.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub flagged: usize,
    pub notified: bool,
}

/// The long-running tracker.
///
/// Owns all mutable state (watch-list, daylight window, scheduler); cycles
/// run strictly one after another, so nothing here needs synchronization.
pub struct Tracker<F, D, N> {
    cfg: TrackerConfig,
    store: Store,
    feed: F,
    daylight_feed: D,
    notifier: N,
    watchlist: WatchList,
    daylight: DaylightTracker,
    scheduler: PollScheduler,
}

impl<F, D, N> Tracker<F, D, N>
where
    F: AircraftFeed,
    D: DaylightFeed,
    N: Notifier,
{
    pub fn new(cfg: TrackerConfig, store: Store, feed: F, daylight_feed: D, notifier: N) -> Self {
        let now = Utc::now();
        Self {
            cfg,
            store,
            feed,
            daylight_feed,
            notifier,
            watchlist: WatchList::default(),
            daylight: DaylightTracker::new(now),
            scheduler: PollScheduler::new(QUOTA_RESET, local_day(now)),
        }
    }

    /// Drive the poll loop until permanent failure.
    ///
    /// A `RetryExhausted` cycle triggers a full re-initialization (setup is
    /// re-run) up to [`MAX_RESTARTS`] consecutive times. Storage write
    /// failures are unrecoverable: logged, emailed, and returned.
    pub async fn run(mut self) -> Result<(), TrackerError> {
        let mut restarts = 0u32;
        self.setup(Utc::now()).await;

        loop {
            match self.run_cycle(Utc::now()).await {
                Ok(report) => {
                    restarts = 0;
                    tracing::debug!(
                        fetched = report.fetched,
                        flagged = report.flagged,
                        "Cycle complete"
                    );
                }
                Err(TrackerError::RetryExhausted { attempts }) => {
                    restarts += 1;
                    if restarts >= MAX_RESTARTS {
                        let msg = format!("Giving up after {} pipeline restarts.", restarts);
                        self.log(LogLevel::Error, "supervisor", &msg);
                        let _ = self.notifier.send("Plane Tracker stopped", &msg).await;
                        return Err(TrackerError::RestartsExhausted(restarts));
                    }
                    self.log(
                        LogLevel::Warn,
                        "supervisor",
                        &format!(
                            "Fetch failed after {} attempts; restarting pipeline ({}/{})",
                            attempts, restarts, MAX_RESTARTS
                        ),
                    );
                    self.setup(Utc::now()).await;
                }
                Err(e) => {
                    let msg = format!("Unrecoverable error: {}", e);
                    self.log(LogLevel::Error, "supervisor", &msg);
                    let _ = self.notifier.send("Plane Tracker stopped", &msg).await;
                    return Err(e);
                }
            }

            tokio::time::sleep(self.scheduler.next_delay()).await;

            let now = Utc::now();
            if self.daylight.day_rolled(now) {
                if self.scheduler.on_day_rollover(local_day(now)) {
                    if let Err(e) = self.store.set_request_count(self.scheduler.remaining()) {
                        tracing::warn!("Failed to persist quota reset: {}", e);
                    }
                    self.log(
                        LogLevel::Info,
                        "frequency",
                        "New quota month; resetting polling interval",
                    );
                }
                self.health_check(now).await;
                self.daylight
                    .refresh(&self.daylight_feed, self.cfg.lat, self.cfg.lon, now)
                    .await;
                self.log_window();
            }
        }
    }

    /// (Re-)establish all external state: watch-list, daylight window, and
    /// the persisted quota. Sends the startup notification.
    async fn setup(&mut self, now: DateTime<Utc>) {
        match self.store.get_watch_list() {
            Ok(entries) => {
                let count = entries.len();
                if self.watchlist.refresh(WatchList::from_entries(entries)) {
                    self.log(
                        LogLevel::Info,
                        "watchlist",
                        &format!("Loaded {} notable types or identities", count),
                    );
                }
            }
            Err(e) => {
                tracing::warn!("Watch-list load failed, starting with empty list: {}", e);
                self.watchlist = WatchList::default();
            }
        }
        if self.watchlist.is_empty() {
            self.log(
                LogLevel::Warn,
                "watchlist",
                "Watch-list is empty; nothing will be flagged",
            );
        }

        self.daylight
            .refresh(&self.daylight_feed, self.cfg.lat, self.cfg.lon, now)
            .await;
        self.log_window();

        let remaining = match self.store.get_request_count() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Request count load failed, assuming fresh quota: {}", e);
                QUOTA_RESET
            }
        };
        self.scheduler = PollScheduler::new(remaining, local_day(now));

        let body = format!(
            "{}\n\nPlane Tracker is running. {} requests remaining.",
            now, remaining
        );
        let _ = self
            .notifier
            .send("Plane Tracker is running", &body)
            .await;
        self.log(LogLevel::Info, "startup", "Tracker pipeline initialized");
    }

    /// One poll cycle.
    ///
    /// Record upserts are cycle-fatal on storage failure; audit-log writes
    /// and history pruning are not.
    async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport, TrackerError> {
        let mut report = CycleReport::default();

        // Pick up watch-list edits without restarting.
        match self.store.get_watch_list() {
            Ok(entries) => {
                let count = entries.len();
                if self.watchlist.refresh(WatchList::from_entries(entries)) {
                    self.log(
                        LogLevel::Info,
                        "watchlist",
                        &format!("Loaded {} notable types or identities", count),
                    );
                }
            }
            Err(e) => {
                tracing::warn!("Watch-list reload failed, keeping previous list: {}", e);
            }
        }

        let (is_day, transition) = self.daylight.is_daylight(now);
        match transition {
            Some(DaylightTransition::Dusk) => {
                // Clear stale "current" flags so they don't linger overnight.
                self.store.mark_not_current(&[])?;
                self.log(
                    LogLevel::Info,
                    "daylight",
                    "Daylight status changed. Shutting down for the night.",
                );
            }
            Some(DaylightTransition::Dawn) => {
                self.log(
                    LogLevel::Info,
                    "daylight",
                    "Daylight status changed. Now checking traffic.",
                );
            }
            None => {}
        }

        if is_day && self.scheduler.can_fetch() {
            let outcome = fetch_with_retry(
                &self.feed,
                &self.store,
                self.cfg.lat,
                self.cfg.lon,
                self.cfg.radius_nm,
            )
            .await?;

            if let Some(secs) = outcome.rate_limited {
                // Adopt the server cooldown for the next cycle; leave all
                // record state untouched.
                self.scheduler.handle_rate_limited(secs);
                self.log(
                    LogLevel::Warn,
                    "fetch",
                    &format!("Rate limited; next check in {}s", secs),
                );
            } else {
                if let Some(remaining) = outcome.quota_remaining {
                    if let Some(interval) = self.scheduler.observe_quota(remaining) {
                        self.log(
                            LogLevel::Info,
                            "frequency",
                            &format!("Changing frequency to {} minutes", interval.as_secs() / 60),
                        );
                    }
                }

                report.fetched = outcome.sightings.len();
                let mut digest = String::new();
                let mut seen: HashSet<String> = HashSet::new();
                let mut current_regs: Vec<String> = Vec::new();

                for sighting in &outcome.sightings {
                    let Some(identity) = sighting.identity() else {
                        continue;
                    };
                    let identity = identity.to_string();

                    let notable = self.watchlist.classify(sighting);
                    // Duplicate upstream rows for one registration all land
                    // in history, but only the first decides new-appearance.
                    let is_new = self.store.upsert_aircraft(sighting, notable, now)?;

                    if seen.insert(identity.clone()) {
                        current_regs.push(identity.clone());
                        if notable && is_new {
                            report.flagged += 1;
                            digest.push_str(&format!(
                                "{} {} spotted {} miles away\n",
                                sighting.type_code.as_deref().unwrap_or("Unknown"),
                                identity,
                                sighting.distance.unwrap_or(0.0)
                            ));
                        }
                    }
                }

                // Sweep after all upserts: anything absent from this cycle's
                // result set is no longer current.
                self.store.mark_not_current(&current_regs)?;

                if !digest.is_empty() {
                    self.log(
                        LogLevel::Info,
                        "traffic",
                        &format!("Flagged {} new aircraft", report.flagged),
                    );
                    let _ = self.notifier.send("New planes spotted", &digest).await;
                    report.notified = true;
                }
            }
        }

        if let Err(e) = self.store.prune_history(now - ChronoDuration::hours(24)) {
            tracing::warn!("History prune failed: {}", e);
        }

        Ok(report)
    }

    /// Warn the operator when nothing has been recorded for a day.
    async fn health_check(&self, now: DateTime<Utc>) {
        match self.store.last_modified() {
            Ok(Some(modified)) if now - modified > ChronoDuration::hours(24) => {
                self.log(LogLevel::Warn, "health_check", "No updates in 24 hours");
                let _ = self
                    .notifier
                    .send(
                        "Plane Tracker is not responding",
                        "No new updates in 24 hours.",
                    )
                    .await;
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Health check read failed: {}", e),
        }
    }

    fn log_window(&self) {
        if let Ok(json) = serde_json::to_string(self.daylight.window()) {
            self.log(LogLevel::Info, "day", &json);
        }
    }

    /// Emit to tracing and the persisted audit log; a failed DB write only
    /// degrades to a tracing warning.
    fn log(&self, level: LogLevel, category: &str, message: &str) {
        match level {
            LogLevel::Info => tracing::info!("{}: {}", category, message),
            LogLevel::Warn => tracing::warn!("{}: {}", category, message),
            LogLevel::Error => tracing::error!("{}: {}", category, message),
        }
        if let Err(e) = self.store.add_log(level, category, message) {
            tracing::warn!("Failed to write log entry: {}", e);
        }
    }
}

fn local_day(now: DateTime<Utc>) -> u32 {
    now.with_timezone(&Local).day()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FeedBatch, FeedError, Sighting, SunTimes};
    use crate::notify::{Notifier, NotifyError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tempfile::NamedTempFile;

    struct ScriptedFeed {
        responses: Mutex<VecDeque<Result<FeedBatch, FeedError>>>,
    }

    impl ScriptedFeed {
        fn new(responses: Vec<Result<FeedBatch, FeedError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl AircraftFeed for ScriptedFeed {
        async fn fetch(&self, _: f64, _: f64, _: u32) -> Result<FeedBatch, FeedError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(FeedBatch::default()))
        }
    }

    /// Daylight feed pinned to a fixed window around now.
    struct FixedDaylight(SunTimes);

    #[async_trait]
    impl DaylightFeed for FixedDaylight {
        async fn lookup(&self, _: f64, _: f64) -> Result<SunTimes, FeedError> {
            Ok(self.0)
        }
    }

    /// Shared so a test can keep a handle after handing the notifier to a
    /// tracker that consumes itself in `run`.
    #[derive(Default, Clone)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn sighting(reg: &str, type_code: &str, distance: f64) -> Sighting {
        Sighting {
            reg: Some(reg.to_string()),
            hex: None,
            type_code: Some(type_code.to_string()),
            callsign: None,
            lat: Some(44.9),
            lon: Some(-93.2),
            speed: Some(90.0),
            altitude: Some(1200.0),
            track: None,
            distance: Some(distance),
            on_ground: false,
            posted: None,
        }
    }

    fn batch(sightings: Vec<Sighting>) -> Result<FeedBatch, FeedError> {
        Ok(FeedBatch {
            sightings,
            quota_remaining: Some(240),
        })
    }

    fn daytime() -> FixedDaylight {
        let now = Utc::now();
        FixedDaylight(SunTimes {
            sunrise: now - ChronoDuration::hours(6),
            sunset: now + ChronoDuration::hours(6),
        })
    }

    fn nighttime() -> FixedDaylight {
        let now = Utc::now();
        FixedDaylight(SunTimes {
            sunrise: now - ChronoDuration::hours(12),
            sunset: now - ChronoDuration::hours(6),
        })
    }

    async fn tracker_with(
        feed: ScriptedFeed,
        daylight_feed: FixedDaylight,
    ) -> (
        NamedTempFile,
        Tracker<ScriptedFeed, FixedDaylight, RecordingNotifier>,
    ) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let mut tracker = Tracker::new(
            TrackerConfig::default(),
            store,
            feed,
            daylight_feed,
            RecordingNotifier::default(),
        );
        tracker.setup(Utc::now()).await;
        (tmp, tracker)
    }

    #[tokio::test]
    async fn test_notable_sighting_notifies_once() {
        // Seeded watch-list already contains the SHIP type code.
        let feed = ScriptedFeed::new(vec![
            batch(vec![sighting("N1AB", "SHIP", 12.3)]),
            batch(vec![sighting("N1AB", "SHIP", 10.1)]),
        ]);
        let (_tmp, mut tracker) = tracker_with(feed, daytime()).await;

        let report = tracker.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.flagged, 1);
        assert!(report.notified);

        let record = tracker.store.get_aircraft("N1AB").unwrap();
        assert_eq!(record.count, 1);
        assert!(record.flagged);
        assert!(record.current);

        let (subject, body) = tracker.notifier.messages().last().unwrap().clone();
        assert_eq!(subject, "New planes spotted");
        assert_eq!(body, "SHIP N1AB spotted 12.3 miles away\n");

        // Still present next cycle: no count bump, no second notification.
        let sent_before = tracker.notifier.messages().len();
        let report = tracker.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.flagged, 0);
        assert!(!report.notified);
        assert_eq!(tracker.store.get_aircraft("N1AB").unwrap().count, 1);
        assert_eq!(tracker.notifier.messages().len(), sent_before);
    }

    #[tokio::test]
    async fn test_absence_then_comeback_increments_count() {
        let feed = ScriptedFeed::new(vec![
            batch(vec![sighting("N1AB", "SHIP", 12.3)]),
            batch(vec![]),
            batch(vec![sighting("N1AB", "SHIP", 8.0)]),
        ]);
        let (_tmp, mut tracker) = tracker_with(feed, daytime()).await;

        tracker.run_cycle(Utc::now()).await.unwrap();
        assert!(tracker.store.get_aircraft("N1AB").unwrap().current);

        // Absent: swept to not-current by the empty result set.
        tracker.run_cycle(Utc::now()).await.unwrap();
        let record = tracker.store.get_aircraft("N1AB").unwrap();
        assert!(!record.current);
        assert_eq!(record.count, 1);

        // Comeback: count increments and a fresh digest goes out.
        let report = tracker.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.flagged, 1);
        assert!(report.notified);
        assert_eq!(tracker.store.get_aircraft("N1AB").unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_duplicate_rows_do_not_double_count() {
        let feed = ScriptedFeed::new(vec![batch(vec![
            sighting("N1AB", "SHIP", 12.3),
            sighting("N1AB", "SHIP", 12.4),
        ])]);
        let (_tmp, mut tracker) = tracker_with(feed, daytime()).await;

        let report = tracker.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.flagged, 1);

        let record = tracker.store.get_aircraft("N1AB").unwrap();
        assert_eq!(record.count, 1);
        // Both rows still land in history.
        assert_eq!(tracker.store.history_count(record.id).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_non_notable_records_but_never_notifies() {
        let feed = ScriptedFeed::new(vec![batch(vec![sighting("N9ZZ", "C172", 5.0)])]);
        let (_tmp, mut tracker) = tracker_with(feed, daytime()).await;

        let sent_before = tracker.notifier.messages().len();
        let report = tracker.run_cycle(Utc::now()).await.unwrap();

        assert_eq!(report.fetched, 1);
        assert_eq!(report.flagged, 0);
        assert!(!report.notified);
        assert_eq!(tracker.notifier.messages().len(), sent_before);

        // Still persisted for history, just not flagged.
        let record = tracker.store.get_aircraft("N9ZZ").unwrap();
        assert!(!record.flagged);
        assert_eq!(record.count, 1);
    }

    #[tokio::test]
    async fn test_dusk_transition_clears_current_flags() {
        let feed = ScriptedFeed::new(vec![]);
        let (_tmp, mut tracker) = tracker_with(feed, nighttime()).await;

        // Plant a record that still claims to be current.
        tracker
            .store
            .upsert_aircraft(&sighting("N1AB", "SHIP", 3.0), true, Utc::now())
            .unwrap();

        let report = tracker.run_cycle(Utc::now()).await.unwrap();

        // No fetch happened, but the dusk sweep ran.
        assert_eq!(report.fetched, 0);
        assert!(!tracker.store.get_aircraft("N1AB").unwrap().current);

        // The transition only fires once.
        tracker
            .store
            .upsert_aircraft(&sighting("N1AB", "SHIP", 3.0), true, Utc::now())
            .unwrap();
        tracker.run_cycle(Utc::now()).await.unwrap();
        assert!(tracker.store.get_aircraft("N1AB").unwrap().current);
    }

    #[tokio::test]
    async fn test_rate_limited_cycle_leaves_state_alone() {
        let feed = ScriptedFeed::new(vec![
            batch(vec![sighting("N1AB", "SHIP", 12.3)]),
            Err(FeedError::RateLimited {
                retry_after_secs: 120,
            }),
        ]);
        let (_tmp, mut tracker) = tracker_with(feed, daytime()).await;

        tracker.run_cycle(Utc::now()).await.unwrap();
        tracker.run_cycle(Utc::now()).await.unwrap();

        // Cooldown overrides exactly one delay, then tiers resume.
        assert_eq!(
            tracker.scheduler.next_delay(),
            std::time::Duration::from_secs(120)
        );
        assert_eq!(tracker.scheduler.next_delay(), tracker.scheduler.interval());

        // The rate-limited cycle is not an empty result set: the record
        // stays current.
        assert!(tracker.store.get_aircraft("N1AB").unwrap().current);
    }

    #[tokio::test]
    async fn test_quota_floor_stops_fetching() {
        let feed = ScriptedFeed::new(vec![Ok(FeedBatch {
            sightings: vec![sighting("N1AB", "SHIP", 12.3)],
            quota_remaining: Some(4),
        })]);
        let (_tmp, mut tracker) = tracker_with(feed, daytime()).await;

        // First cycle consumes the batch and learns quota is nearly gone.
        tracker.run_cycle(Utc::now()).await.unwrap();
        assert!(!tracker.scheduler.can_fetch());

        // Next cycle skips the fetch entirely.
        let report = tracker.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.fetched, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_reaches_supervisor() {
        let responses = (0..MAX_ATTEMPTS)
            .map(|_| Err(FeedError::Status(500)))
            .collect::<Vec<_>>();
        let (_tmp, mut tracker) = tracker_with(ScriptedFeed::new(responses), daytime()).await;

        let result = tracker.run_cycle(Utc::now()).await;
        assert!(matches!(
            result,
            Err(TrackerError::RetryExhausted { attempts: 10 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_restarts_then_gives_up() {
        // Enough failures for every attempt of every pipeline.
        let responses = (0..MAX_RESTARTS * MAX_ATTEMPTS)
            .map(|_| Err(FeedError::Status(500)))
            .collect::<Vec<_>>();
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        let notifier = RecordingNotifier::default();
        let tracker = Tracker::new(
            TrackerConfig::default(),
            store,
            ScriptedFeed::new(responses),
            daytime(),
            notifier.clone(),
        );

        let result = tracker.run().await;
        assert!(matches!(result, Err(TrackerError::RestartsExhausted(5))));

        // Setup runs once at start and again before each retried pipeline,
        // announcing itself every time.
        let messages = notifier.messages();
        let startups = messages
            .iter()
            .filter(|(subject, _)| subject == "Plane Tracker is running")
            .count();
        assert_eq!(startups, MAX_RESTARTS as usize);

        // Hitting the bound produces exactly one permanent-failure email.
        let (subject, body) = messages.last().unwrap().clone();
        assert_eq!(subject, "Plane Tracker stopped");
        assert!(body.contains("5 pipeline restarts"));
    }

    #[tokio::test]
    async fn test_setup_sends_startup_notification() {
        let (_tmp, tracker) = tracker_with(ScriptedFeed::new(vec![]), daytime()).await;

        let messages = tracker.notifier.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "Plane Tracker is running");
        assert!(messages[0].1.contains("250 requests remaining"));
    }

    #[tokio::test]
    async fn test_health_check_emails_when_stale() {
        let (_tmp, tracker) = tracker_with(ScriptedFeed::new(vec![]), daytime()).await;

        let stale = Utc::now() - ChronoDuration::hours(30);
        tracker
            .store
            .upsert_aircraft(&sighting("N1AB", "SHIP", 3.0), false, stale)
            .unwrap();

        tracker.health_check(Utc::now()).await;
        let (subject, _) = tracker.notifier.messages().last().unwrap().clone();
        assert_eq!(subject, "Plane Tracker is not responding");

        // A recent update keeps the health check quiet.
        tracker
            .store
            .upsert_aircraft(&sighting("N2CD", "SHIP", 3.0), false, Utc::now())
            .unwrap();
        let sent_before = tracker.notifier.messages().len();
        tracker.health_check(Utc::now()).await;
        assert_eq!(tracker.notifier.messages().len(), sent_before);
    }
}
