//! Admission policy for a login endpoint.
//!
//! Wraps a limiter with the caller-side rules: check before verifying
//! credentials, turn an active backoff into a retry-after hint, record
//! failures, and pick what to do when the store is down.

use std::fmt;

use tracing::{error, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::limiter::{LimiterBackend, RateRecord};

/// What to do when the store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Let the attempt through and log the degradation.
    #[default]
    Open,
    /// Refuse the attempt.
    Closed,
}

/// Decision for an incoming login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Proceed with credential verification.
    Allowed,
    /// Reject with a rate-limit response carrying `Retry-After`.
    Limited {
        /// Seconds the client should wait
        retry_after_secs: u64,
    },
    /// The store is down and the policy is fail-closed.
    Unavailable,
}

/// Why a login attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The identity token did not verify.
    InvalidToken,
    /// The token verified but the principal lacks the admin role.
    NotAdmin,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InvalidToken => write!(f, "invalid_token"),
            FailureReason::NotAdmin => write!(f, "not_admin"),
        }
    }
}

/// Seconds until `blocked_until`, rounded up; at least 1.
pub fn retry_after_secs(blocked_until: u64, now_ms: u64) -> u64 {
    if blocked_until > now_ms {
        (blocked_until - now_ms).div_ceil(1000)
    } else {
        1
    }
}

/// Login admission guard.
pub struct LoginGuard<L: LimiterBackend, C: Clock = SystemClock> {
    limiter: L,
    clock: C,
    policy: FailurePolicy,
}

impl<L: LimiterBackend> LoginGuard<L, SystemClock> {
    /// Create a fail-open guard on the system clock.
    pub fn new(limiter: L) -> Self {
        Self::with_clock(limiter, SystemClock)
    }
}

impl<L: LimiterBackend, C: Clock> LoginGuard<L, C> {
    /// Create a fail-open guard with an explicit clock.
    pub fn with_clock(limiter: L, clock: C) -> Self {
        Self {
            limiter,
            clock,
            policy: FailurePolicy::default(),
        }
    }

    /// Set the store outage policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The wrapped limiter.
    pub fn limiter(&self) -> &L {
        &self.limiter
    }

    /// Decide whether an attempt from `identity` may proceed.
    ///
    /// `None` means the caller could not determine a client address; such
    /// requests are not tracked.
    pub async fn admit(&self, identity: Option<&str>) -> Admission {
        let Some(identity) = identity else {
            return Admission::Allowed;
        };

        match self.check(identity).await {
            Ok(admission) => admission,
            Err(e) => match self.policy {
                FailurePolicy::Open => {
                    warn!(identity = %identity, error = %e, "Rate limiter unavailable, allowing attempt");
                    Admission::Allowed
                }
                FailurePolicy::Closed => {
                    warn!(identity = %identity, error = %e, "Rate limiter unavailable, refusing attempt");
                    Admission::Unavailable
                }
            },
        }
    }

    /// Record a failed login. Store errors are logged and swallowed.
    pub async fn record_failure(
        &self,
        identity: Option<&str>,
        reason: FailureReason,
    ) -> Option<RateRecord> {
        let identity = identity?;
        match self.limiter.record_attempt(identity).await {
            Ok(record) => Some(record),
            Err(e) => {
                error!(identity = %identity, reason = %reason, error = %e, "Failed to record login attempt");
                None
            }
        }
    }

    async fn check(&self, identity: &str) -> Result<Admission> {
        if !self.limiter.is_blocked(identity).await? {
            return Ok(Admission::Allowed);
        }
        // The check is advisory; the script decides the deadline.
        let record = self.limiter.record_attempt(identity).await?;
        Ok(Admission::Limited {
            retry_after_secs: retry_after_secs(record.blocked_until, self.clock.now_ms()),
        })
    }
}
