//! Retry backoff calculation.

use crate::config::duration_ms;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default delay before the first retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(2_000);

/// Default ceiling on any single retry delay.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(30_000);

/// Exponential backoff delay in milliseconds for the given attempt.
///
/// Attempt 1 waits `base_ms`, and each further attempt doubles the delay,
/// never exceeding `cap_ms`. Attempt 0 is treated as attempt 1. The
/// arithmetic saturates instead of overflowing.
///
/// ```
/// use offload_queue::compute_backoff;
///
/// assert_eq!(compute_backoff(1, 1000, 30_000), 1000);
/// assert_eq!(compute_backoff(4, 1000, 30_000), 8000);
/// assert_eq!(compute_backoff(10, 1000, 30_000), 30_000);
/// ```
pub fn compute_backoff(attempt: u32, base_ms: u64, cap_ms: u64) -> u64 {
    let exponent = attempt.saturating_sub(1);
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(cap_ms)
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Backoff settings applied by the worker between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt
    #[serde(with = "duration_ms", rename = "base_ms")]
    pub base: Duration,

    /// Upper bound on any delay
    #[serde(with = "duration_ms", rename = "cap_ms")]
    pub cap: Duration,

    /// Random spread as a fraction of the delay, in `[0, 1)`.
    /// Zero keeps delays deterministic.
    #[serde(default)]
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP)
    }
}

impl BackoffPolicy {
    /// Deterministic policy with the given base and cap.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter: 0.0,
        }
    }

    /// Spread delays by up to `jitter` (e.g. `0.3` for ±30%), so many
    /// workers failing together do not retry in lockstep.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after the given failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap_ms = as_millis(self.cap);
        let delay_ms = compute_backoff(attempt, as_millis(self.base), cap_ms);

        if self.jitter <= 0.0 || delay_ms == 0 {
            return Duration::from_millis(delay_ms);
        }

        let factor = rand::rng().random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        let jittered = (delay_ms as f64 * factor).round() as u64;
        Duration::from_millis(jittered.min(cap_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_is_base() {
        for (base, cap) in [(1, 1), (1000, 30_000), (5000, 2000), (7, 1_000_000)] {
            assert_eq!(compute_backoff(1, base, cap), base.min(cap));
        }
    }

    #[test]
    fn test_doubling_formula() {
        let (base, cap) = (250u64, 1_000_000u64);
        for attempt in 1..=12u32 {
            let expected = (base * 2u64.pow(attempt - 1)).min(cap);
            assert_eq!(compute_backoff(attempt, base, cap), expected);
        }
    }

    #[test]
    fn test_reference_values() {
        assert_eq!(compute_backoff(1, 1000, 30_000), 1000);
        assert_eq!(compute_backoff(2, 1000, 30_000), 2000);
        assert_eq!(compute_backoff(4, 1000, 30_000), 8000);
        assert_eq!(compute_backoff(10, 1000, 30_000), 30_000);
    }

    #[test]
    fn test_saturates_instead_of_overflowing() {
        assert_eq!(compute_backoff(64, 1000, 30_000), 30_000);
        assert_eq!(compute_backoff(200, 1000, 30_000), 30_000);
        assert_eq!(compute_backoff(u32::MAX, u64::MAX, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_attempt_zero_behaves_like_first() {
        assert_eq!(compute_backoff(0, 1000, 30_000), 1000);
    }

    #[test]
    fn test_zero_base_means_no_wait() {
        assert_eq!(compute_backoff(5, 0, 30_000), 0);
    }

    #[test]
    fn test_exponential_growth_until_cap() {
        let delays: Vec<u64> = (1..=6).map(|a| compute_backoff(a, 2000, 30_000)).collect();
        assert_eq!(delays, vec![2000, 4000, 8000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_policy_defaults() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base, Duration::from_millis(2000));
        assert_eq!(policy.cap, Duration::from_millis(30_000));
        assert_eq!(policy.jitter, 0.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy =
            BackoffPolicy::new(Duration::from_millis(1000), Duration::from_secs(60)).with_jitter(0.3);

        for _ in 0..200 {
            let delay = policy.delay_for(2).as_millis();
            assert!((1400..=2600).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let policy =
            BackoffPolicy::new(Duration::from_millis(1000), Duration::from_millis(4000))
                .with_jitter(0.5);

        for _ in 0..200 {
            assert!(policy.delay_for(10) <= Duration::from_millis(4000));
        }
    }

    #[test]
    fn test_policy_serde_uses_millis() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(5));
        let value = serde_json::to_value(policy).unwrap();
        assert_eq!(value["base_ms"], 500);
        assert_eq!(value["cap_ms"], 5000);

        let parsed: BackoffPolicy =
            serde_json::from_value(serde_json::json!({"base_ms": 10, "cap_ms": 20})).unwrap();
        assert_eq!(parsed, BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(20)));
    }
}
