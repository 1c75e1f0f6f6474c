//! Quota-adaptive poll scheduler.
//!
//! The poll interval is picked from a small ordered set of tiers keyed by
//! the remaining-request allowance the upstream feed reports. Intervals are
//! never interpolated between tiers.

use std::time::Duration;

/// Quota floor below which the tracker stops fetching entirely, keeping a
/// few requests in reserve for the next quota period.
pub const QUOTA_FLOOR: i64 = 5;

/// Remaining quota assumed at the start of a new quota month.
pub const QUOTA_RESET: i64 = 250;

/// Polling-interval band selected by remaining request allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaTier {
    /// Plenty of quota: poll every 5 minutes.
    Short,
    /// Running low (<= 200 remaining): poll every 30 minutes.
    Medium,
    /// Nearly exhausted (<= 25 remaining): poll every 4 hours.
    Long,
}

impl QuotaTier {
    pub fn for_remaining(remaining: i64) -> Self {
        if remaining <= 25 {
            QuotaTier::Long
        } else if remaining <= 200 {
            QuotaTier::Medium
        } else {
            QuotaTier::Short
        }
    }

    pub fn interval(self) -> Duration {
        match self {
            QuotaTier::Short => Duration::from_secs(5 * 60),
            QuotaTier::Medium => Duration::from_secs(30 * 60),
            QuotaTier::Long => Duration::from_secs(4 * 60 * 60),
        }
    }
}

/// Owns the poll interval and the remaining-quota bookkeeping.
#[derive(Debug)]
pub struct PollScheduler {
    tier: QuotaTier,
    remaining: i64,
    day_of_month: u32,
    cooldown: Option<Duration>,
}

impl PollScheduler {
    pub fn new(remaining: i64, day_of_month: u32) -> Self {
        Self {
            tier: QuotaTier::for_remaining(remaining),
            remaining,
            day_of_month,
            cooldown: None,
        }
    }

    /// Record a quota observation from the feed.
    ///
    /// Idempotent per tier: re-observing the same tier changes nothing.
    /// Returns the new interval when the tier changed, so the caller can log
    /// it exactly once.
    pub fn observe_quota(&mut self, remaining: i64) -> Option<Duration> {
        self.remaining = remaining;

        let tier = QuotaTier::for_remaining(remaining);
        if tier == self.tier {
            return None;
        }
        self.tier = tier;
        Some(tier.interval())
    }

    /// Adopt a server-dictated cooldown for the next cycle only.
    pub fn handle_rate_limited(&mut self, retry_after_secs: u64) {
        self.cooldown = Some(Duration::from_secs(retry_after_secs));
    }

    /// Day-boundary bookkeeping.
    ///
    /// A new day-of-month smaller than the stored one means the calendar
    /// month advanced, which is when the upstream quota resets; drop back to
    /// the shortest tier and restore the assumed allowance. Returns whether
    /// a month rollover happened.
    pub fn on_day_rollover(&mut self, day_of_month: u32) -> bool {
        let month_rolled = day_of_month < self.day_of_month;
        self.day_of_month = day_of_month;

        if month_rolled {
            self.tier = QuotaTier::Short;
            self.remaining = QUOTA_RESET;
        }
        month_rolled
    }

    /// Delay before the next cycle, consuming any pending rate-limit
    /// cooldown.
    pub fn next_delay(&mut self) -> Duration {
        match self.cooldown.take() {
            Some(cooldown) => cooldown,
            None => self.tier.interval(),
        }
    }

    /// Whether enough quota remains to spend a request on a fetch.
    pub fn can_fetch(&self) -> bool {
        self.remaining > QUOTA_FLOOR
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn interval(&self) -> Duration {
        self.tier.interval()
    }
}
