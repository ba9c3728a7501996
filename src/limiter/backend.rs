//! Limiter trait for abstracting over engine implementations.

use async_trait::async_trait;

use super::record::RateRecord;
use crate::error::Result;

/// Trait for attempt limiter implementations.
///
/// Callers such as `LoginGuard` depend on this trait rather than on a
/// concrete engine, so they work with any store and clock combination.
#[async_trait]
pub trait LimiterBackend: Send + Sync {
    /// Advisory check whether `identity` is currently blocked.
    async fn is_blocked(&self, identity: &str) -> Result<bool>;

    /// Atomically record one attempt for `identity`.
    async fn record_attempt(&self, identity: &str) -> Result<RateRecord>;
}
