//! Exponential backoff policy.

use std::time::Duration;

use crate::config::LimiterConfig;

/// Backoff growth parameters.
///
/// The delay grows with the number of attempts past the threshold, not with
/// elapsed time, so an identity retrying immediately escalates as fast as
/// one retrying slowly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay for the attempt that reaches the threshold
    pub base_ms: u64,
    /// Growth factor per further attempt
    pub multiplier: f64,
    /// Upper bound on any delay
    pub cap_ms: u64,
}

impl BackoffPolicy {
    /// Create a new backoff policy.
    pub fn new(base_ms: u64, multiplier: f64, cap_ms: u64) -> Self {
        Self {
            base_ms,
            multiplier,
            cap_ms,
        }
    }

    /// Backoff in milliseconds for the `over`-th attempt past the threshold.
    ///
    /// `over` starts at 1 for the attempt that reaches the threshold. Returns
    /// `min(base * multiplier^(over - 1), cap)`, floored to whole milliseconds.
    /// `over == 0` means the threshold has not been reached and yields 0.
    pub fn backoff_ms(&self, over: u64) -> u64 {
        if over == 0 {
            return 0;
        }

        let cap = self.cap_ms as f64;
        let mut backoff = self.base_ms as f64;
        for _ in 1..over {
            if backoff >= cap || self.multiplier <= 1.0 {
                break;
            }
            backoff *= self.multiplier;
        }

        backoff.min(cap).floor() as u64
    }

    /// Backoff as a `Duration`.
    pub fn backoff(&self, over: u64) -> Duration {
        Duration::from_millis(self.backoff_ms(over))
    }

    /// Absolute deadline for the `over`-th attempt past the threshold.
    pub fn blocked_until(&self, now_ms: u64, over: u64) -> u64 {
        now_ms.saturating_add(self.backoff_ms(over))
    }
}

impl From<&LimiterConfig> for BackoffPolicy {
    fn from(config: &LimiterConfig) -> Self {
        Self::new(
            config.backoff_base_ms,
            config.backoff_multiplier,
            config.backoff_cap_ms,
        )
    }
}
