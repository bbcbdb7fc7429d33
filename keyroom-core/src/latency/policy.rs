//! Delay policy
//!
//! Pure functions turning measured latencies into playback delays. Kept free
//! of timers and transport so the cutoff rules can be tested on their own.

use crate::config::SyncConfig;

/// Playback delay in ms for a note from a user.
///
/// The local user always waits the full baseline. A remote peer waits the
/// difference between the baseline and its own latency, unless that
/// difference is below `min_cutoff_ms`, in which case it is not worth
/// compensating and the delay is 0.
pub fn compute_delay(is_self: bool, peer_avg_ms: f64, baseline_ms: f64, min_cutoff_ms: f64) -> f64 {
    if is_self {
        return baseline_ms;
    }

    let raw = baseline_ms - peer_avg_ms;
    if raw < min_cutoff_ms {
        0.0
    } else {
        raw.max(0.0)
    }
}

/// Shared baseline: the largest average that does not exceed `max_cutoff_ms`.
///
/// Peers above the cutoff are skipped, they do not reset the result. Returns 0
/// when nobody qualifies.
pub fn shared_baseline<I>(averages: I, max_cutoff_ms: f64) -> f64
where
    I: IntoIterator<Item = f64>,
{
    averages
        .into_iter()
        .filter(|avg| avg.is_finite() && *avg <= max_cutoff_ms)
        .fold(0.0, f64::max)
}

/// Cutoffs bundled from a [`SyncConfig`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayPolicy {
    pub min_cutoff_ms: f64,
    pub max_cutoff_ms: f64,
}

impl DelayPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            min_cutoff_ms: config.min_latency_cutoff_ms,
            max_cutoff_ms: config.max_latency_cutoff_ms,
        }
    }

    pub fn delay(&self, is_self: bool, peer_avg_ms: f64, baseline_ms: f64) -> f64 {
        compute_delay(is_self, peer_avg_ms, baseline_ms, self.min_cutoff_ms)
    }

    pub fn baseline<I>(&self, averages: I) -> f64
    where
        I: IntoIterator<Item = f64>,
    {
        shared_baseline(averages, self.max_cutoff_ms)
    }

    /// Whether a peer is too slow to be waited for
    pub fn is_outlier(&self, average_ms: f64) -> bool {
        average_ms > self.max_cutoff_ms
    }
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_gets_baseline() {
        assert_eq!(compute_delay(true, 0.0, 73.5, 10.0), 73.5);
        assert_eq!(compute_delay(true, 500.0, 0.0, 10.0), 0.0);
    }

    #[test]
    fn test_below_cutoff_collapses() {
        // raw = 5 < 10
        assert_eq!(compute_delay(false, 95.0, 100.0, 10.0), 0.0);
    }

    #[test]
    fn test_cutoff_boundary_kept() {
        assert_eq!(compute_delay(false, 90.0, 100.0, 10.0), 10.0);
    }

    #[test]
    fn test_peer_slower_than_baseline() {
        // Outlier peer: raw delay is negative
        assert_eq!(compute_delay(false, 500.0, 50.0, 0.0), 0.0);
    }

    #[test]
    fn test_unknown_peer_behaves_as_zero_latency() {
        assert_eq!(compute_delay(false, 0.0, 60.0, 15.0), 60.0);
        assert_eq!(compute_delay(false, 0.0, 12.0, 15.0), 0.0);
    }

    #[test]
    fn test_baseline_skips_outliers() {
        assert_eq!(shared_baseline([50.0, 30.0, 500.0], 100.0), 50.0);
        // Order must not matter, the outlier never zeroes the result
        assert_eq!(shared_baseline([500.0, 50.0, 30.0], 100.0), 50.0);
        assert_eq!(shared_baseline([50.0, 500.0, 30.0], 100.0), 50.0);
    }

    #[test]
    fn test_baseline_cutoff_inclusive() {
        assert_eq!(shared_baseline([100.0, 40.0], 100.0), 100.0);
        assert_eq!(shared_baseline([100.5, 40.0], 100.0), 40.0);
    }

    #[test]
    fn test_baseline_empty_or_all_outliers() {
        assert_eq!(shared_baseline(std::iter::empty(), 100.0), 0.0);
        assert_eq!(shared_baseline([250.0, 400.0], 100.0), 0.0);
        assert_eq!(shared_baseline([f64::NAN, 20.0], 100.0), 20.0);
    }

    #[test]
    fn test_policy_from_config() {
        let policy = DelayPolicy::default();
        assert_eq!(policy.min_cutoff_ms, 15.0);
        assert!(policy.is_outlier(100.1));
        assert!(!policy.is_outlier(100.0));
        assert_eq!(policy.delay(false, 40.0, 80.0), 40.0);
        assert_eq!(policy.baseline([80.0, 120.0]), 80.0);
    }
}
