//! Token burn estimate
//!
//! Extrapolates the probe's own token cost to an hourly share of the token
//! quota and classifies it against the previous estimate.

use std::time::Duration;

use super::types::{BurnTrend, PollMode, UsageSnapshot};

/// Changes smaller than this (in percentage points) count as steady
pub const TREND_EPSILON: f64 = 0.05;

/// Previous burn estimate and the latest classification
#[derive(Debug, Clone, Default)]
pub struct TrendTracker {
    previous_burn_percent: Option<f64>,
    trend: BurnTrend,
}

impl TrendTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trend(&self) -> BurnTrend {
        self.trend
    }

    /// Most recent burn estimate, in percent of the token limit per hour
    pub fn hourly_burn_percent(&self) -> Option<f64> {
        self.previous_burn_percent
    }

    /// Fold in a new snapshot polled every `base_interval`
    ///
    /// Snapshots without usable token data reset the tracker.
    pub fn update(&mut self, snapshot: &UsageSnapshot, base_interval: Duration) -> BurnTrend {
        let Some(current) = hourly_burn_percent(snapshot, base_interval) else {
            self.reset();
            return self.trend;
        };

        self.trend = match self.previous_burn_percent {
            Some(previous) if current - previous > TREND_EPSILON => BurnTrend::Rising,
            Some(previous) if previous - current > TREND_EPSILON => BurnTrend::Falling,
            _ => BurnTrend::Steady,
        };
        self.previous_burn_percent = Some(current);
        self.trend
    }

    pub fn reset(&mut self) {
        self.previous_burn_percent = None;
        self.trend = BurnTrend::Steady;
    }
}

/// Hourly burn estimate for a remote snapshot
///
/// `cost * (3600 / base_secs) / tokens_limit * 100`, defined only when the
/// cost and limit are both known and positive.
pub fn hourly_burn_percent(snapshot: &UsageSnapshot, base_interval: Duration) -> Option<f64> {
    if snapshot.origin != PollMode::RemoteApi {
        return None;
    }
    let cost = snapshot.request_tokens_cost.filter(|c| *c > 0)?;
    let limit = snapshot.tokens_limit.filter(|l| *l > 0)?;
    let base_secs = base_interval.as_secs_f64();
    if base_secs <= 0.0 {
        return None;
    }

    let polls_per_hour = 3600.0 / base_secs;
    Some(cost as f64 * polls_per_hour / limit as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(60);

    fn remote(cost: Option<u64>, limit: Option<u64>) -> UsageSnapshot {
        UsageSnapshot {
            request_tokens_cost: cost,
            tokens_limit: limit,
            ..UsageSnapshot::remote()
        }
    }

    #[test]
    fn test_hourly_burn_formula() {
        // 20 tokens per minute is 1200 per hour, 1.2% of 100k
        let burn = hourly_burn_percent(&remote(Some(20), Some(100_000)), BASE).unwrap();
        assert!((burn - 1.2).abs() < 1e-9);

        let slower = hourly_burn_percent(&remote(Some(20), Some(100_000)), Duration::from_secs(300))
            .unwrap();
        assert!((slower - 0.24).abs() < 1e-9);
    }

    #[test]
    fn test_hourly_burn_requires_remote_cost_and_limit() {
        assert!(hourly_burn_percent(&remote(None, Some(1000)), BASE).is_none());
        assert!(hourly_burn_percent(&remote(Some(10), None), BASE).is_none());
        assert!(hourly_burn_percent(&remote(Some(10), Some(0)), BASE).is_none());
        assert!(hourly_burn_percent(&remote(Some(0), Some(1000)), BASE).is_none());
        assert!(hourly_burn_percent(&UsageSnapshot::local(None, None), BASE).is_none());
    }

    #[test]
    fn test_first_value_is_steady() {
        let mut tracker = TrendTracker::new();
        assert_eq!(tracker.update(&remote(Some(20), Some(100_000)), BASE), BurnTrend::Steady);
        assert!(tracker.hourly_burn_percent().is_some());
    }

    #[test]
    fn test_rising_falling_and_steady() {
        let mut tracker = TrendTracker::new();
        tracker.update(&remote(Some(20), Some(100_000)), BASE); // 1.2

        assert_eq!(tracker.update(&remote(Some(30), Some(100_000)), BASE), BurnTrend::Rising); // 1.8
        assert_eq!(tracker.update(&remote(Some(10), Some(100_000)), BASE), BurnTrend::Falling); // 0.6
        // 0.64 is within the dead band
        assert_eq!(
            tracker.update(&remote(Some(32), Some(300_000)), BASE),
            BurnTrend::Steady
        );
    }

    #[test]
    fn test_missing_token_data_resets() {
        let mut tracker = TrendTracker::new();
        tracker.update(&remote(Some(20), Some(100_000)), BASE);
        tracker.update(&remote(Some(40), Some(100_000)), BASE);
        assert_eq!(tracker.trend(), BurnTrend::Rising);

        assert_eq!(tracker.update(&remote(None, Some(100_000)), BASE), BurnTrend::Steady);
        assert!(tracker.hourly_burn_percent().is_none());

        // No previous value, so the next one is steady again
        assert_eq!(tracker.update(&remote(Some(80), Some(100_000)), BASE), BurnTrend::Steady);
    }

    #[test]
    fn test_reset_clears_previous() {
        let mut tracker = TrendTracker::new();
        tracker.update(&remote(Some(20), Some(100_000)), BASE);
        tracker.reset();
        assert!(tracker.hourly_burn_percent().is_none());
        assert_eq!(tracker.trend(), BurnTrend::Steady);
    }
}
