//! Daylight window tracking.
//!
//! The tracker only polls for traffic during daylight. The authoritative
//! sunrise/sunset comes from an external lookup; when that fails the fixed
//! 09:00-20:00 local window stands in, and the fallback flag forces a retry
//! of the lookup on the next day-boundary check.

use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use serde::Serialize;

use crate::feed::DaylightFeed;

const FALLBACK_SUNRISE_HOUR: u32 = 9;
const FALLBACK_SUNSET_HOUR: u32 = 20;

/// Sunrise/sunset bounds for one calendar day.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DaylightWindow {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
    /// Local day-of-month the window was computed for.
    pub day_of_month: u32,
    /// True when the fixed default window is in effect.
    pub fallback: bool,
}

impl DaylightWindow {
    /// The fixed 09:00-20:00 local default window for the current day.
    pub fn fallback_for(now: DateTime<Utc>) -> Self {
        Self {
            sunrise: local_hour_today(now, FALLBACK_SUNRISE_HOUR),
            sunset: local_hour_today(now, FALLBACK_SUNSET_HOUR),
            day_of_month: local_day(now),
            fallback: true,
        }
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        now > self.sunrise && now < self.sunset
    }
}

/// Emitted when the daylight boolean flips between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaylightTransition {
    Dawn,
    Dusk,
}

/// Tracks the current daylight window and day-boundary crossings.
#[derive(Debug)]
pub struct DaylightTracker {
    window: DaylightWindow,
    was_daylight: bool,
}

impl DaylightTracker {
    /// Start on the fallback window; the fallback flag makes the first
    /// `day_rolled` check request an authoritative refresh.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            window: DaylightWindow::fallback_for(now),
            was_daylight: true,
        }
    }

    /// Fetch today's sunrise/sunset from the authoritative source.
    ///
    /// Never propagates a lookup failure: any error installs the fallback
    /// window with the fallback flag set. An inverted window (sunset at or
    /// before sunrise) is treated the same way.
    pub async fn refresh<F>(&mut self, feed: &F, lat: f64, lon: f64, now: DateTime<Utc>)
    where
        F: DaylightFeed + ?Sized,
    {
        match feed.lookup(lat, lon).await {
            Ok(times) if times.sunrise < times.sunset => {
                self.window = DaylightWindow {
                    sunrise: times.sunrise,
                    sunset: times.sunset,
                    day_of_month: local_day(now),
                    fallback: false,
                };
            }
            Ok(times) => {
                tracing::warn!(
                    "Ignoring inverted daylight window ({} >= {}), using fallback",
                    times.sunrise,
                    times.sunset
                );
                self.window = DaylightWindow::fallback_for(now);
            }
            Err(e) => {
                tracing::warn!("Sunrise/sunset lookup failed, using fallback window: {}", e);
                self.window = DaylightWindow::fallback_for(now);
            }
        }
    }

    /// Whether `now` is inside the daylight window, plus a one-time
    /// transition signal when the answer flipped since the previous call.
    pub fn is_daylight(&mut self, now: DateTime<Utc>) -> (bool, Option<DaylightTransition>) {
        let is_day = self.window.contains(now);
        let transition = if is_day != self.was_daylight {
            self.was_daylight = is_day;
            Some(if is_day {
                DaylightTransition::Dawn
            } else {
                DaylightTransition::Dusk
            })
        } else {
            None
        };
        (is_day, transition)
    }

    /// True when the calendar day moved past the stored marker, or when the
    /// current window came from the fallback (forcing a lookup retry). This
    /// is the only trigger for calling `refresh` again, so the authoritative
    /// source is hit at most once per day under normal operation.
    pub fn day_rolled(&self, now: DateTime<Utc>) -> bool {
        local_day(now) != self.window.day_of_month || self.window.fallback
    }

    pub fn window(&self) -> &DaylightWindow {
        &self.window
    }
}

fn local_day(now: DateTime<Utc>) -> u32 {
    now.with_timezone(&Local).day()
}

fn local_hour_today(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let local = now.with_timezone(&Local);
    Local
        .with_ymd_and_hms(local.year(), local.month(), local.day(), hour, 0, 0)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now)
}
