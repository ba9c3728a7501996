//! Adapters over the shared key-value store that holds rate state.
//!
//! The limiter needs three primitives from a store: a plain read, a write
//! with expiry, and server-side execution of an atomic script. Any store that
//! can run a read-decide-write sequence without interleaving per key
//! satisfies the contract.

mod memory;
mod redis_store;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Errors raised by store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// The store answered but refused the command.
    #[error("store rejected command: {0}")]
    Rejected(String),

    /// The atomic script failed or returned an unexpected reply.
    #[error("atomic script `{script}` failed: {reason}")]
    Script {
        /// Name of the script that failed
        script: &'static str,
        /// Failure detail
        reason: String,
    },
}

/// A write requested by a script: the new value and its time-to-live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptWrite {
    /// Value to store under the script's key
    pub value: String,
    /// Time-to-live in milliseconds
    pub ttl_ms: u64,
}

/// The effect of running a script against the current value of its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutcome {
    /// Write to apply, if any
    pub write: Option<ScriptWrite>,
    /// Integer reply returned to the caller
    pub reply: Vec<i64>,
}

/// Rust emulation of a script's behavior for stores that cannot run Lua.
///
/// Receives the current, unexpired value of the key and the script arguments.
pub type ScriptReference = fn(Option<&str>, &[String]) -> std::result::Result<ScriptOutcome, String>;

/// A server-side script executed atomically against a single key.
///
/// `source` is the Lua text sent to stores with native scripting; `reference`
/// is the equivalent read-decide-write that in-process stores run while
/// holding the key.
#[derive(Debug, Clone, Copy)]
pub struct AtomicScript {
    /// Stable script name, used for caching and error reporting
    pub name: &'static str,
    /// Version of the script's contract (arguments and reply shape)
    pub version: u32,
    /// Lua source
    pub source: &'static str,
    /// In-process emulation of `source`
    pub reference: ScriptReference,
}

/// Storage backend for rate records.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Read the value stored under `key`. Expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl_ms`.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), StoreError>;

    /// Run `script` against `key` without interleaving from other callers on
    /// the same key, returning its integer reply.
    async fn run_atomic(
        &self,
        script: &AtomicScript,
        key: &str,
        args: &[String],
    ) -> Result<Vec<i64>, StoreError>;
}
