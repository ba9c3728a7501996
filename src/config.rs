//! Configuration management for the limiter.
//!
//! Settings come from an optional YAML file, then environment variables
//! prefixed with `ADMIN_RATE_LIMIT_` override the limiter section. Values are
//! validated once, when the configuration is loaded or the limiter is built.

use serde::{Deserialize, Serialize};

use crate::error::{LimiterError, Result};

/// Prefix for limiter environment variables, e.g. `ADMIN_RATE_LIMIT_WINDOW_MS`.
pub const ENV_PREFIX: &str = "ADMIN_RATE_LIMIT";

/// Top-level configuration for the binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Backing store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Limiter thresholds and backoff
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Observability event reporting
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Backing store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL; `REDIS_URL` or `REDIS_URI` take precedence.
    pub url: Option<String>,
}

/// Limiter thresholds and backoff parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Attempts allowed within a window before backoff starts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u64,

    /// Lifetime of a rate record after its last write, in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Backoff applied on the attempt that reaches the threshold
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Growth factor per attempt past the threshold
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound on any single backoff
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Namespace prepended to identities to form store keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            window_ms: default_window_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_cap_ms: default_backoff_cap_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_max_attempts() -> u64 {
    5
}

fn default_window_ms() -> u64 {
    60 * 1000
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_cap_ms() -> u64 {
    60 * 60 * 1000
}

fn default_key_prefix() -> String {
    "admin:rl".to_string()
}

impl LimiterConfig {
    /// Build from defaults overridden by `ADMIN_RATE_LIMIT_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply `ADMIN_RATE_LIMIT_*` process environment variables on top of `self`.
    pub fn with_env_overrides(&self) -> Result<Self> {
        self.overlay(config::Environment::with_prefix(ENV_PREFIX))
    }

    /// Apply overrides from an explicit variable map, keyed like the process
    /// environment (`ADMIN_RATE_LIMIT_MAX_ATTEMPTS`, ...).
    pub fn with_overrides<I, K, V>(&self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let source: config::Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.overlay(config::Environment::with_prefix(ENV_PREFIX).source(Some(source)))
    }

    fn overlay(&self, env: config::Environment) -> Result<Self> {
        let env = env
            .prefix_separator("_")
            .try_parsing(true)
            .ignore_empty(true);
        let mut merged: LimiterConfig = config::Config::builder()
            .add_source(config::Config::try_from(self)?)
            .add_source(env.clone())
            .build()?
            .try_deserialize()?;

        // `ADMIN_RATE_LIMIT_MAX` is the short spelling; `_MAX_ATTEMPTS` wins.
        let explicit = config::Config::builder().add_source(env).build()?;
        if explicit.get::<config::Value>("max_attempts").is_err() {
            match explicit.get::<u64>("max") {
                Ok(max) => merged.max_attempts = max,
                Err(config::ConfigError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        merged.validate()?;
        Ok(merged)
    }

    /// Reject non-positive parameters and a shrinking multiplier.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_attempts", self.max_attempts),
            ("window_ms", self.window_ms),
            ("backoff_base_ms", self.backoff_base_ms),
            ("backoff_cap_ms", self.backoff_cap_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(LimiterError::InvalidConfiguration(format!(
                    "{} must be positive",
                    name
                )));
            }
        }

        // Below 1.0 the backoff would shrink as attempts continue.
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(LimiterError::InvalidConfiguration(format!(
                "backoff_multiplier must be a finite number >= 1, got {}",
                self.backoff_multiplier
            )));
        }

        if self.key_prefix.is_empty() {
            return Err(LimiterError::InvalidConfiguration(
                "key_prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Which reporter receives observability events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    /// Events are dropped
    #[default]
    Off,
    /// One JSON object per line on stdout
    Json,
    /// Events are emitted through `tracing`
    Tracing,
}

/// Observability event configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Reporter to attach at startup
    #[serde(default)]
    pub reporter: ReporterKind,

    /// Prefix written before each JSON line
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            reporter: ReporterKind::default(),
            prefix: default_metrics_prefix(),
        }
    }
}

fn default_metrics_prefix() -> String {
    "METRIC: ".to_string()
}

impl AppConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LimiterError::InvalidConfiguration(e.to_string()))?;
        config.limiter.validate()?;
        Ok(config)
    }

    /// Load the file (if any), then apply environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.limiter = config.limiter.with_env_overrides()?;

        if let Ok(url) = std::env::var("REDIS_URL").or_else(|_| std::env::var("REDIS_URI")) {
            config.store.url = Some(url);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LimiterConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.window_ms, 60_000);
        assert_eq!(config.backoff_base_ms, 1_000);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.backoff_cap_ms, 3_600_000);
        assert_eq!(config.key_prefix, "admin:rl");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = LimiterConfig::default()
            .with_overrides([
                ("ADMIN_RATE_LIMIT_MAX_ATTEMPTS", "3"),
                ("ADMIN_RATE_LIMIT_WINDOW_MS", "200"),
                ("ADMIN_RATE_LIMIT_BACKOFF_MULTIPLIER", "1.5"),
            ])
            .unwrap();

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.window_ms, 200);
        assert_eq!(config.backoff_multiplier, 1.5);
        // Untouched values keep their defaults
        assert_eq!(config.backoff_base_ms, 1_000);
        assert_eq!(config.backoff_cap_ms, 3_600_000);
    }

    #[test]
    fn test_short_max_alias() {
        let config = LimiterConfig::default()
            .with_overrides([("ADMIN_RATE_LIMIT_MAX", "7")])
            .unwrap();
        assert_eq!(config.max_attempts, 7);
    }

    #[test]
    fn test_long_spelling_wins_over_short() {
        let config = LimiterConfig::default()
            .with_overrides([
                ("ADMIN_RATE_LIMIT_MAX", "7"),
                ("ADMIN_RATE_LIMIT_MAX_ATTEMPTS", "4"),
            ])
            .unwrap();
        assert_eq!(config.max_attempts, 4);
    }

    #[test]
    fn test_unrelated_env_ignored() {
        let config = LimiterConfig::default()
            .with_overrides([("OTHER_WINDOW_MS", "1")])
            .unwrap();
        assert_eq!(config, LimiterConfig::default());
    }

    #[test]
    fn test_empty_values_fall_back() {
        let config = LimiterConfig::default()
            .with_overrides([
                ("ADMIN_RATE_LIMIT_WINDOW_MS", ""),
                ("ADMIN_RATE_LIMIT_MAX", ""),
                ("ADMIN_RATE_LIMIT_BACKOFF_MULTIPLIER", ""),
            ])
            .unwrap();
        assert_eq!(config, LimiterConfig::default());
    }

    #[test]
    fn test_non_numeric_rejected() {
        let err = LimiterConfig::default()
            .with_overrides([("ADMIN_RATE_LIMIT_WINDOW_MS", "soon")])
            .unwrap_err();
        assert!(matches!(err, LimiterError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_non_positive_rejected() {
        let err = LimiterConfig::default()
            .with_overrides([("ADMIN_RATE_LIMIT_MAX_ATTEMPTS", "0")])
            .unwrap_err();
        assert!(matches!(err, LimiterError::InvalidConfiguration(_)));

        let err = LimiterConfig::default()
            .with_overrides([("ADMIN_RATE_LIMIT_BACKOFF_CAP_MS", "-5")])
            .unwrap_err();
        assert!(matches!(err, LimiterError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_shrinking_multiplier_rejected() {
        let config = LimiterConfig {
            backoff_multiplier: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = LimiterConfig {
            backoff_multiplier: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
store:
  url: redis://127.0.0.1:6379
limiter:
  max_attempts: 3
  backoff_cap_ms: 60000
metrics:
  reporter: json
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.store.url.as_deref(), Some("redis://127.0.0.1:6379"));
        assert_eq!(config.limiter.max_attempts, 3);
        assert_eq!(config.limiter.backoff_cap_ms, 60_000);
        assert_eq!(config.limiter.window_ms, 60_000);
        assert_eq!(config.metrics.reporter, ReporterKind::Json);
        assert_eq!(config.metrics.prefix, "METRIC: ");
    }

    #[test]
    fn test_yaml_with_invalid_limiter_rejected() {
        let yaml = r#"
limiter:
  window_ms: 0
"#;
        assert!(AppConfig::from_yaml(yaml).is_err());
    }
}
