//! When the coordinator refreshes.

use std::time::Duration;

use crate::config::{CadenceKind, Settings};

/// Scheduling of full refreshes beyond the on-demand triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshCadence {
    /// Explicit requests, expiry and name misses only.
    OnDemand,
    /// Additionally every interval.
    Interval(Duration),
}

/// Refresh triggers and limits.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshPolicy {
    /// Age after which the snapshot counts as expired.
    pub ttl: Duration,
    /// Load column detail for every object during a full refresh.
    pub eager_details: bool,
    /// Concurrent detail loads during a full refresh.
    pub detail_concurrency: usize,
    /// Run a full refresh when a name matches nothing.
    pub refresh_on_miss: bool,
    /// Minimum spacing of miss-triggered refreshes.
    pub miss_cooldown: Duration,
    pub cadence: RefreshCadence,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for RefreshPolicy {
    fn from(settings: &Settings) -> Self {
        let refresh = &settings.refresh;
        Self {
            ttl: Duration::from_secs(settings.cache.ttl_secs),
            eager_details: refresh.eager_details,
            detail_concurrency: refresh.detail_concurrency.max(1),
            refresh_on_miss: refresh.refresh_on_miss,
            miss_cooldown: Duration::from_secs(refresh.miss_cooldown_secs),
            cadence: match refresh.cadence {
                CadenceKind::OnDemand => RefreshCadence::OnDemand,
                CadenceKind::Interval => {
                    RefreshCadence::Interval(Duration::from_secs(refresh.interval_secs))
                }
            },
        }
    }
}

impl RefreshPolicy {
    pub fn ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(36_500))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_settings() {
        let mut settings = Settings::default();
        settings.refresh.cadence = CadenceKind::Interval;
        settings.refresh.interval_secs = 60;
        settings.refresh.detail_concurrency = 0;
        let policy = RefreshPolicy::from(&settings);
        assert_eq!(policy.cadence, RefreshCadence::Interval(Duration::from_secs(60)));
        assert_eq!(policy.detail_concurrency, 1);
        assert_eq!(policy.ttl, Duration::from_secs(3600));

        assert_eq!(RefreshPolicy::default().cadence, RefreshCadence::OnDemand);
    }
}
