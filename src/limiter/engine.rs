//! Attempt limiter backed by a shared store.
//!
//! The engine holds no mutable state of its own. Counting and the backoff
//! decision happen inside the store's atomic script, so two concurrent
//! attempts for one identity can never both be admitted past the threshold.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::backend::LimiterBackend;
use super::policy::BackoffPolicy;
use super::record::RateRecord;
use super::script::{decode_reply, AttemptArgs, RECORD_ATTEMPT};
use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::error::Result;
use crate::metrics::{LimiterEvent, Metrics};
use crate::store::{RateStore, StoreError};

/// Login-attempt limiter with exponential backoff.
pub struct AttemptLimiter<S: RateStore, C: Clock = SystemClock> {
    /// Shared store holding every rate record.
    store: Arc<S>,
    /// Source of "now" for backoff deadlines.
    clock: C,
    /// Validated configuration.
    config: LimiterConfig,
    /// Backoff growth derived from `config`.
    policy: BackoffPolicy,
    /// Observability sink.
    metrics: Metrics,
}

impl<S: RateStore> AttemptLimiter<S, SystemClock> {
    /// Create a limiter using the system clock.
    ///
    /// Fails with `InvalidConfiguration` if `config` does not validate.
    pub fn new(store: Arc<S>, config: LimiterConfig) -> Result<Self> {
        Self::with_clock(store, config, SystemClock)
    }
}

impl<S: RateStore, C: Clock> AttemptLimiter<S, C> {
    /// Create a limiter with an explicit clock.
    pub fn with_clock(store: Arc<S>, config: LimiterConfig, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clock,
            policy: BackoffPolicy::from(&config),
            config,
            metrics: Metrics::disabled(),
        })
    }

    /// Attach an observability handle.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// The backoff policy in effect.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Store key for an identity.
    pub fn storage_key(&self, identity: &str) -> String {
        format!("{}:{}", self.config.key_prefix, identity)
    }

    /// Read the stored record for `identity` without changing it.
    ///
    /// Unparseable stored values read as an empty record.
    pub async fn inspect(&self, identity: &str) -> Result<RateRecord> {
        let key = self.storage_key(identity);
        let raw = self.store.get(&key).await?;

        let record = match raw.as_deref() {
            None => RateRecord::default(),
            Some(raw) => RateRecord::decode(raw).unwrap_or_else(|| {
                debug!(key = %key, raw = %raw, "Ignoring unparseable rate record");
                RateRecord::default()
            }),
        };
        Ok(record)
    }

    /// Whether `identity` is currently blocked.
    ///
    /// This is a single read and may race with concurrent attempts. It is a
    /// fast path only; `record_attempt` makes the authoritative decision.
    pub async fn is_blocked(&self, identity: &str) -> Result<bool> {
        let record = self.inspect(identity).await?;
        let now = self.clock.now_ms();

        // The count check covers a threshold reached without a live deadline.
        let is_limited =
            record.is_backing_off(now) || record.count >= self.config.max_attempts;

        self.metrics.emit(&LimiterEvent::Check {
            identity,
            count: record.count,
            blocked_until: record.blocked_until,
            now,
            is_limited,
        });

        trace!(
            identity = %identity,
            count = record.count,
            blocked_until = record.blocked_until,
            is_limited = is_limited,
            "Checked attempt limit"
        );

        Ok(is_limited)
    }

    /// Atomically record one attempt for `identity`.
    ///
    /// An identity already backing off is returned unchanged. Otherwise the
    /// count advances and, from `max_attempts` on, a new deadline is set.
    pub async fn record_attempt(&self, identity: &str) -> Result<RateRecord> {
        let key = self.storage_key(identity);
        let args = AttemptArgs {
            window_ms: self.config.window_ms,
            max_attempts: self.config.max_attempts,
            now_ms: self.clock.now_ms(),
            policy: self.policy,
        };

        let reply = self
            .store
            .run_atomic(&RECORD_ATTEMPT, &key, &args.to_args())
            .await?;
        let record = decode_reply(&reply).ok_or_else(|| StoreError::Script {
            script: RECORD_ATTEMPT.name,
            reason: format!("unexpected reply {:?}", reply),
        })?;

        self.metrics.emit(&LimiterEvent::Attempt {
            identity,
            count: record.count,
            blocked_until: record.blocked_until,
            window_ms: self.config.window_ms,
        });

        if record.is_backing_off(args.now_ms) {
            debug!(
                identity = %identity,
                count = record.count,
                blocked_until = record.blocked_until,
                "Identity backing off"
            );
        } else {
            trace!(identity = %identity, count = record.count, "Recorded attempt");
        }

        Ok(record)
    }
}

#[async_trait]
impl<S: RateStore, C: Clock> LimiterBackend for AttemptLimiter<S, C> {
    async fn is_blocked(&self, identity: &str) -> Result<bool> {
        AttemptLimiter::is_blocked(self, identity).await
    }

    async fn record_attempt(&self, identity: &str) -> Result<RateRecord> {
        AttemptLimiter::record_attempt(self, identity).await
    }
}
