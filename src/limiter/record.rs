//! The persisted rate record and its wire format.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Attempt state for one identity.
///
/// Stored as `"{count}:{blocked_until}"`. An identity with no stored record
/// is `RateRecord::default()`: zero attempts, not blocked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRecord {
    /// Attempts recorded in the current window
    pub count: u64,
    /// Epoch milliseconds until which the identity is blocked; 0 if not blocked
    pub blocked_until: u64,
}

impl RateRecord {
    /// Create a new record.
    pub fn new(count: u64, blocked_until: u64) -> Self {
        Self {
            count,
            blocked_until,
        }
    }

    /// Decode a stored value.
    ///
    /// Anything other than two unsigned decimal integers separated by `:`
    /// yields `None`; callers treat that the same as a missing record.
    pub fn decode(raw: &str) -> Option<Self> {
        let (count, blocked_until) = raw.split_once(':')?;
        Some(Self {
            count: parse_digits(count)?,
            blocked_until: parse_digits(blocked_until)?,
        })
    }

    /// Encode for storage.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Whether a backoff deadline is set and still ahead of `now_ms`.
    pub fn is_backing_off(&self, now_ms: u64) -> bool {
        self.blocked_until != 0 && now_ms < self.blocked_until
    }

    /// Time left on the backoff, if any.
    pub fn remaining_backoff(&self, now_ms: u64) -> Option<Duration> {
        self.is_backing_off(now_ms)
            .then(|| Duration::from_millis(self.blocked_until - now_ms))
    }
}

impl fmt::Display for RateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.count, self.blocked_until)
    }
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        assert_eq!(RateRecord::decode("3:0"), Some(RateRecord::new(3, 0)));
        assert_eq!(
            RateRecord::decode("5:1704067201000"),
            Some(RateRecord::new(5, 1_704_067_201_000))
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        for raw in ["", "3", "3:", ":0", "a:b", "-1:0", "+1:0", "1:2:3", "1.5:0", " 1:0"] {
            assert_eq!(RateRecord::decode(raw), None, "{:?} should not decode", raw);
        }
    }

    #[test]
    fn test_encode() {
        assert_eq!(RateRecord::new(2, 0).encode(), "2:0");
        assert_eq!(RateRecord::new(4, 9_000).encode(), "4:9000");
    }

    #[test]
    fn test_is_backing_off() {
        let record = RateRecord::new(5, 10_000);
        assert!(record.is_backing_off(9_999));
        assert!(!record.is_backing_off(10_000));
        assert!(!RateRecord::new(5, 0).is_backing_off(0));
    }

    #[test]
    fn test_remaining_backoff() {
        let record = RateRecord::new(5, 10_000);
        assert_eq!(record.remaining_backoff(9_000), Some(Duration::from_millis(1_000)));
        assert_eq!(record.remaining_backoff(10_500), None);
    }
}
