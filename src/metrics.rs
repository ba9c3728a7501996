//! Observability events emitted by the limiter.
//!
//! Emission is fire-and-forget: a failing or panicking reporter is logged and
//! otherwise ignored, so it can never change a rate limiting decision.
//!
//! The `Metrics` handle is built once at process start and cloned into every
//! limiter. There is no teardown beyond dropping the last clone.

use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{MetricsConfig, ReporterKind};

/// Event emitted on every check or recorded attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "name")]
pub enum LimiterEvent<'a> {
    /// Result of an advisory `is_blocked` check
    #[serde(rename = "admin.rate_limiter.check", rename_all = "camelCase")]
    Check {
        /// Identity checked
        identity: &'a str,
        /// Stored attempt count
        count: u64,
        /// Stored backoff deadline
        blocked_until: u64,
        /// Time of the check
        now: u64,
        /// Decision returned to the caller
        is_limited: bool,
    },

    /// Result of an atomic `record_attempt`
    #[serde(rename = "admin.rate_limiter.attempt", rename_all = "camelCase")]
    Attempt {
        /// Identity recorded
        identity: &'a str,
        /// Attempt count after recording
        count: u64,
        /// Backoff deadline after recording
        blocked_until: u64,
        /// Configured window
        window_ms: u64,
    },
}

impl LimiterEvent<'_> {
    /// Metric name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            LimiterEvent::Check { .. } => "admin.rate_limiter.check",
            LimiterEvent::Attempt { .. } => "admin.rate_limiter.attempt",
        }
    }
}

/// Errors raised by reporters. Never propagated past `Metrics::emit`.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write event: {0}")]
    Io(#[from] std::io::Error),
}

/// Sink for limiter events.
pub trait MetricsReporter: Send + Sync {
    /// Deliver one event.
    fn report(&self, event: &LimiterEvent<'_>) -> Result<(), MetricsError>;
}

#[derive(Serialize)]
struct Stamped<'e, 'a> {
    ts: i64,
    #[serde(flatten)]
    event: &'e LimiterEvent<'a>,
}

fn stamped_json(event: &LimiterEvent<'_>) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Stamped {
        ts: chrono::Utc::now().timestamp_millis(),
        event,
    })
}

/// Writes each event as a single prefixed JSON line.
pub struct JsonLineReporter<W: Write + Send> {
    prefix: String,
    sink: Mutex<W>,
}

impl JsonLineReporter<std::io::Stdout> {
    /// Reporter writing to stdout.
    pub fn stdout(prefix: impl Into<String>) -> Self {
        Self::new(prefix, std::io::stdout())
    }
}

impl<W: Write + Send> JsonLineReporter<W> {
    /// Reporter writing to an arbitrary sink.
    pub fn new(prefix: impl Into<String>, sink: W) -> Self {
        Self {
            prefix: prefix.into(),
            sink: Mutex::new(sink),
        }
    }

    /// Recover the sink.
    pub fn into_inner(self) -> W {
        self.sink.into_inner()
    }
}

impl<W: Write + Send> MetricsReporter for JsonLineReporter<W> {
    fn report(&self, event: &LimiterEvent<'_>) -> Result<(), MetricsError> {
        let line = stamped_json(event)?;
        let mut sink = self.sink.lock();
        writeln!(sink, "{}{}", self.prefix, line)?;
        sink.flush()?;
        Ok(())
    }
}

/// Forwards events to `tracing` under the `limiter_metrics` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl MetricsReporter for TracingReporter {
    fn report(&self, event: &LimiterEvent<'_>) -> Result<(), MetricsError> {
        let payload = serde_json::to_string(event)?;
        info!(target: "limiter_metrics", metric = event.name(), event = %payload);
        Ok(())
    }
}

/// Cloneable handle to the process-wide reporter.
#[derive(Clone, Default)]
pub struct Metrics {
    reporter: Option<Arc<dyn MetricsReporter>>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("enabled", &self.reporter.is_some())
            .finish()
    }
}

impl Metrics {
    /// Handle that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Handle delivering to `reporter`.
    pub fn new(reporter: Arc<dyn MetricsReporter>) -> Self {
        Self {
            reporter: Some(reporter),
        }
    }

    /// Build the handle described by configuration. JSON lines go to stdout.
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::from_config_with_sink(config, std::io::stdout())
    }

    /// Like `from_config`, but JSON lines are written to `sink`.
    pub fn from_config_with_sink<W>(config: &MetricsConfig, sink: W) -> Self
    where
        W: Write + Send + 'static,
    {
        match config.reporter {
            ReporterKind::Off => Self::disabled(),
            ReporterKind::Json => Self::new(Arc::new(JsonLineReporter::new(config.prefix.clone(), sink))),
            ReporterKind::Tracing => Self::new(Arc::new(TracingReporter)),
        }
    }

    /// Whether a reporter is attached.
    pub fn is_enabled(&self) -> bool {
        self.reporter.is_some()
    }

    /// Deliver an event, swallowing reporter errors and panics.
    pub fn emit(&self, event: &LimiterEvent<'_>) {
        let Some(reporter) = &self.reporter else {
            return;
        };

        match catch_unwind(AssertUnwindSafe(|| reporter.report(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(metric = event.name(), error = %e, "Metrics reporter failed"),
            Err(_) => warn!(metric = event.name(), "Metrics reporter panicked"),
        }
    }
}
