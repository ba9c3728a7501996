//! In-process store honoring the same contract as the Redis adapter.
//!
//! Used by tests and single-instance deployments. Atomic scripts run through
//! their Rust reference while the key's map entry is held, which serializes
//! concurrent callers on the same key.
//!
//! Expired entries are dropped when read. Keys that are never read again are
//! reclaimed by `purge_expired`, which long-running processes should schedule
//! with `spawn_purge_task`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, trace};

use super::{AtomicScript, RateStore, ScriptWrite, StoreError};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: u64,
}

impl MemoryEntry {
    fn new(write: ScriptWrite, now: u64) -> Self {
        Self {
            value: write.value,
            expires_at: now.saturating_add(write.ttl_ms),
        }
    }

    fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

/// In-memory key-value store with per-key TTLs.
pub struct MemoryStore<C: Clock = SystemClock> {
    entries: DashMap<String, MemoryEntry>,
    clock: C,
}

impl MemoryStore<SystemClock> {
    /// Create an empty store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    /// Create an empty store that judges expiry against `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    ///
    /// Expired entries already read as absent; this only reclaims memory.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before - self.entries.len()
    }

    /// Purge expired entries every `every` until the handle is aborted.
    pub fn spawn_purge_task(self: Arc<Self>, every: Duration) -> JoinHandle<()>
    where
        C: 'static,
    {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                debug!(purged, remaining = self.len(), "Memory store purge completed");
            }
        })
    }

    /// Number of entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<C: Clock> RateStore for MemoryStore<C> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        if self
            .entries
            .remove_if(key, |_, entry| !entry.is_live(now))
            .is_some()
        {
            trace!(key = %key, "Evicted expired entry on read");
            return Ok(None);
        }

        Ok(self
            .entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl_ms: u64) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let write = ScriptWrite {
            value: value.to_string(),
            ttl_ms,
        };
        self.entries
            .insert(key.to_string(), MemoryEntry::new(write, now));
        Ok(())
    }

    async fn run_atomic(
        &self,
        script: &AtomicScript,
        key: &str,
        args: &[String],
    ) -> Result<Vec<i64>, StoreError> {
        let to_error = |reason: String| StoreError::Script {
            script: script.name,
            reason,
        };
        let now = self.clock.now_ms();

        // The entry guard holds the shard lock until the end of the match.
        let outcome = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = occupied.get().is_live(now);
                let current = live.then(|| occupied.get().value.as_str());
                let outcome = (script.reference)(current, args).map_err(to_error)?;

                match outcome.write.clone() {
                    Some(write) => {
                        occupied.insert(MemoryEntry::new(write, now));
                    }
                    None if !live => {
                        occupied.remove();
                    }
                    None => {}
                }
                outcome
            }
            Entry::Vacant(vacant) => {
                let outcome = (script.reference)(None, args).map_err(to_error)?;
                if let Some(write) = outcome.write.clone() {
                    vacant.insert(MemoryEntry::new(write, now));
                }
                outcome
            }
        };

        trace!(
            script = script.name,
            key = %key,
            reply = ?outcome.reply,
            "Ran atomic script in memory"
        );

        Ok(outcome.reply)
    }
}
