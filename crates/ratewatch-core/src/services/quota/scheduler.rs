//! Adaptive poll scheduling
//!
//! Decides the earliest time the next unforced poll may run. Successful polls
//! space out when usage is low; failures back off exponentially up to a fixed
//! ceiling. Forced polls always pass the gate.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Usage at or above this polls at the base interval
pub const HIGH_USAGE_PERCENT: f64 = 70.0;

/// Usage below this polls at [`LOW_USAGE_INTERVAL`]
pub const LOW_USAGE_PERCENT: f64 = 40.0;

/// Floor for moderate or unknown usage
pub const MODERATE_USAGE_INTERVAL: Duration = Duration::from_secs(120);

/// Floor for low usage
pub const LOW_USAGE_INTERVAL: Duration = Duration::from_secs(300);

/// Longest failure backoff
pub const MAX_BACKOFF: Duration = Duration::from_secs(900);

/// Failure counter cap
pub const MAX_CONSECUTIVE_FAILURES: u32 = 4;

/// Gate state for unforced polls
#[derive(Debug, Clone)]
pub struct AdaptiveScheduler {
    base_interval: Duration,
    next_allowed_poll_at: DateTime<Utc>,
    consecutive_failures: u32,
}

impl AdaptiveScheduler {
    /// Scheduler that allows the first poll immediately
    pub fn new(base_interval: Duration) -> Self {
        Self {
            base_interval,
            next_allowed_poll_at: DateTime::<Utc>::MIN_UTC,
            consecutive_failures: 0,
        }
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    pub fn next_allowed_poll_at(&self) -> DateTime<Utc> {
        self.next_allowed_poll_at
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether a poll may run now
    pub fn should_poll(&self, now: DateTime<Utc>, forced: bool) -> bool {
        forced || now >= self.next_allowed_poll_at
    }

    /// Interval to wait after a successful poll at the given usage level
    pub fn interval_for_usage(&self, percent: Option<f64>) -> Duration {
        match percent {
            Some(p) if p >= HIGH_USAGE_PERCENT => self.base_interval,
            Some(p) if p < LOW_USAGE_PERCENT => self.base_interval.max(LOW_USAGE_INTERVAL),
            _ => self.base_interval.max(MODERATE_USAGE_INTERVAL),
        }
    }

    /// Record a successful poll
    pub fn on_success(&mut self, percent: Option<f64>, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        let interval = self.interval_for_usage(percent);
        self.next_allowed_poll_at = add_duration(now, interval);
        log::debug!(
            "[quota:timer] Usage {:?}%, next poll in {}s",
            percent,
            interval.as_secs()
        );
    }

    /// Record a failed poll
    pub fn on_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = (self.consecutive_failures + 1).min(MAX_CONSECUTIVE_FAILURES);
        let backoff = self
            .base_interval
            .saturating_mul(1 << self.consecutive_failures)
            .min(MAX_BACKOFF);
        self.next_allowed_poll_at = add_duration(now, backoff);
        log::debug!(
            "[quota:timer] Failure {} of a row, backing off {}s",
            self.consecutive_failures,
            backoff.as_secs()
        );
    }

    /// Change the base interval; the next poll is allowed right away
    pub fn set_base_interval(&mut self, base_interval: Duration, now: DateTime<Utc>) {
        self.base_interval = base_interval;
        self.reset(now);
    }

    /// Clear backoff and allow the next poll right away
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.next_allowed_poll_at = now;
        self.consecutive_failures = 0;
    }
}

fn add_duration(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    fn secs_after(scheduler: &AdaptiveScheduler, start: DateTime<Utc>) -> i64 {
        (scheduler.next_allowed_poll_at() - start).num_seconds()
    }

    #[test]
    fn test_fresh_scheduler_allows_poll() {
        let scheduler = AdaptiveScheduler::new(Duration::from_secs(60));
        assert!(scheduler.should_poll(t0(), false));
        assert_eq!(scheduler.consecutive_failures(), 0);
    }

    #[test]
    fn test_success_intervals_follow_usage() {
        let mut scheduler = AdaptiveScheduler::new(Duration::from_secs(60));

        scheduler.on_success(Some(85.0), t0());
        assert_eq!(secs_after(&scheduler, t0()), 60);

        scheduler.on_success(Some(50.0), t0());
        assert_eq!(secs_after(&scheduler, t0()), 120);

        scheduler.on_success(Some(10.0), t0());
        assert_eq!(secs_after(&scheduler, t0()), 300);

        scheduler.on_success(None, t0());
        assert_eq!(secs_after(&scheduler, t0()), 120);
    }

    #[test]
    fn test_success_boundaries() {
        let scheduler = AdaptiveScheduler::new(Duration::from_secs(60));
        assert_eq!(scheduler.interval_for_usage(Some(70.0)), Duration::from_secs(60));
        assert_eq!(scheduler.interval_for_usage(Some(40.0)), Duration::from_secs(120));
        assert_eq!(scheduler.interval_for_usage(Some(39.9)), Duration::from_secs(300));
    }

    #[test]
    fn test_large_base_interval_is_never_shortened() {
        let scheduler = AdaptiveScheduler::new(Duration::from_secs(300));
        assert_eq!(scheduler.interval_for_usage(Some(95.0)), Duration::from_secs(300));
        assert_eq!(scheduler.interval_for_usage(Some(50.0)), Duration::from_secs(300));
        assert_eq!(scheduler.interval_for_usage(Some(5.0)), Duration::from_secs(300));
    }

    #[test]
    fn test_failure_backoff_sequence() {
        let mut scheduler = AdaptiveScheduler::new(Duration::from_secs(60));
        let mut observed = Vec::new();
        for _ in 0..5 {
            scheduler.on_failure(t0());
            observed.push(secs_after(&scheduler, t0()));
        }
        assert_eq!(observed, vec![120, 240, 480, 900, 900]);
        assert_eq!(scheduler.consecutive_failures(), MAX_CONSECUTIVE_FAILURES);
    }

    #[test]
    fn test_success_clears_failures() {
        let mut scheduler = AdaptiveScheduler::new(Duration::from_secs(60));
        scheduler.on_failure(t0());
        scheduler.on_failure(t0());
        scheduler.on_success(Some(90.0), t0());
        assert_eq!(scheduler.consecutive_failures(), 0);

        scheduler.on_failure(t0());
        assert_eq!(secs_after(&scheduler, t0()), 120);
    }

    #[test]
    fn test_gate_blocks_until_next_allowed() {
        let mut scheduler = AdaptiveScheduler::new(Duration::from_secs(60));
        scheduler.on_success(Some(10.0), t0());

        let early = t0() + chrono::Duration::seconds(299);
        let due = t0() + chrono::Duration::seconds(300);
        assert!(!scheduler.should_poll(early, false));
        assert!(scheduler.should_poll(early, true));
        assert!(scheduler.should_poll(due, false));
    }

    #[test]
    fn test_reset_and_set_base_interval() {
        let mut scheduler = AdaptiveScheduler::new(Duration::from_secs(60));
        scheduler.on_failure(t0());
        scheduler.on_failure(t0());

        let later = t0() + chrono::Duration::seconds(10);
        scheduler.reset(later);
        assert_eq!(scheduler.consecutive_failures(), 0);
        assert!(scheduler.should_poll(later, false));

        scheduler.on_failure(later);
        scheduler.set_base_interval(Duration::from_secs(120), later);
        assert_eq!(scheduler.base_interval(), Duration::from_secs(120));
        assert_eq!(scheduler.next_allowed_poll_at(), later);
        assert_eq!(scheduler.consecutive_failures(), 0);

        scheduler.on_failure(later);
        assert_eq!(secs_after(&scheduler, later), 240);
    }
}
