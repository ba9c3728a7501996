//! Error types for the limiter.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for limiter operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// The backing store could not be reached or the atomic script failed.
    ///
    /// Callers decide whether to fail open or closed on this variant.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// A configured parameter was rejected at construction time.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// Whether this error came from the backing store.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, LimiterError::StoreUnavailable(_))
    }
}

impl From<config::ConfigError> for LimiterError {
    fn from(err: config::ConfigError) -> Self {
        LimiterError::InvalidConfiguration(err.to_string())
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;
