use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use backoff_limiter::clock::{Clock, SystemClock};
use backoff_limiter::config::{AppConfig, ReporterKind};
use backoff_limiter::guard::retry_after_secs;
use backoff_limiter::limiter::AttemptLimiter;
use backoff_limiter::metrics::Metrics;
use backoff_limiter::store::RedisStore;

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Parser)]
#[command(name = "backoff-limiter", version, about = "Inspect and drive the login-attempt limiter")]
struct Cli {
    /// YAML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Override the configured metrics reporter
    #[arg(long, value_enum)]
    metrics: Option<MetricsArg>,

    /// Log output format (logs go to stderr)
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report whether an identity is currently blocked
    Check { identity: String },
    /// Record one failed attempt for an identity
    Record { identity: String },
    /// Print the stored record for an identity
    Inspect { identity: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MetricsArg {
    Off,
    Json,
    Tracing,
}

impl From<MetricsArg> for ReporterKind {
    fn from(arg: MetricsArg) -> Self {
        match arg {
            MetricsArg::Off => ReporterKind::Off,
            MetricsArg::Json => ReporterKind::Json,
            MetricsArg::Tracing => ReporterKind::Tracing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(metrics) = cli.metrics {
        config.metrics.reporter = metrics.into();
    }
    debug!(limiter = ?config.limiter, "Configuration loaded");

    let url = config.store.url.as_deref().unwrap_or(DEFAULT_REDIS_URL);
    let store = RedisStore::connect(url)
        .await
        .with_context(|| format!("Failed to connect to store at {}", url))?;
    info!(url = %url, "Connected to store");

    // stdout carries only the command result.
    let limiter = AttemptLimiter::new(Arc::new(store), config.limiter.clone())?
        .with_metrics(Metrics::from_config_with_sink(&config.metrics, std::io::stderr()));

    let output = match cli.command {
        Command::Check { identity } => {
            let blocked = limiter.is_blocked(&identity).await?;
            if blocked {
                let record = limiter.inspect(&identity).await?;
                let now = SystemClock.now_ms();
                json!({
                    "identity": identity,
                    "blocked": true,
                    "retry_after_secs": retry_after_secs(record.blocked_until, now),
                })
            } else {
                json!({ "identity": identity, "blocked": false })
            }
        }
        Command::Record { identity } => {
            let record = limiter.record_attempt(&identity).await?;
            json!({
                "identity": identity,
                "count": record.count,
                "blocked_until": record.blocked_until,
            })
        }
        Command::Inspect { identity } => {
            let record = limiter.inspect(&identity).await?;
            json!({
                "identity": identity,
                "key": limiter.storage_key(&identity),
                "count": record.count,
                "blocked_until": record.blocked_until,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
