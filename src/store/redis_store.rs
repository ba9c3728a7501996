//! Redis-backed store.
//!
//! Opens one `ConnectionManager` per process. The manager reconnects on its
//! own after transport errors, so callers only ever see `StoreError`.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::{AtomicScript, RateStore, StoreError};

/// Whether `err` came from the connection rather than from the server.
fn is_transport_error(err: &redis::RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if is_transport_error(&err) {
            StoreError::Unreachable(err.to_string())
        } else {
            StoreError::Rejected(err.to_string())
        }
    }
}

/// Store adapter over a Redis (or protocol-compatible) server.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    /// Prepared scripts by name; `redis::Script` hashes its source once.
    scripts: std::sync::Arc<DashMap<&'static str, redis::Script>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("cached_scripts", &self.scripts.len())
            .finish()
    }
}

impl RedisStore {
    /// Connect to the server at `url` and verify it answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| {
            warn!(error = %e, "Failed to create Redis client");
            StoreError::Unreachable(format!("invalid Redis URL: {}", e))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            warn!(error = %e, "Failed to create Redis connection manager");
            StoreError::from(e)
        })?;

        let store = Self {
            connection,
            scripts: Default::default(),
        };
        store.ping().await?;

        debug!("Connected to Redis rate store");
        Ok(store)
    }

    /// Round-trip a `PING` to the server.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn prepared(&self, script: &AtomicScript) -> redis::Script {
        self.scripts
            .entry(script.name)
            .or_insert_with(|| redis::Script::new(script.source))
            .clone()
    }
}

#[async_trait]
impl RateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn run_atomic(
        &self,
        script: &AtomicScript,
        key: &str,
        args: &[String],
    ) -> Result<Vec<i64>, StoreError> {
        let mut conn = self.connection.clone();
        let prepared = self.prepared(script);

        let mut invocation = prepared.key(key);
        for arg in args {
            invocation.arg(arg);
        }

        invocation.invoke_async(&mut conn).await.map_err(|e| {
            if is_transport_error(&e) {
                StoreError::Unreachable(e.to_string())
            } else {
                StoreError::Script {
                    script: script.name,
                    reason: e.to_string(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::{ErrorKind, RedisError};

    #[test]
    fn test_transport_errors_are_unreachable() {
        let refused = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(matches!(StoreError::from(refused), StoreError::Unreachable(_)));

        let timed_out = RedisError::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out",
        ));
        assert!(matches!(StoreError::from(timed_out), StoreError::Unreachable(_)));
    }

    #[test]
    fn test_server_errors_are_rejected() {
        let wrong_type = RedisError::from((
            ErrorKind::ResponseError,
            "WRONGTYPE Operation against a key holding the wrong kind of value",
        ));
        let err = StoreError::from(wrong_type);
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(err.to_string().contains("WRONGTYPE"));
    }
}
