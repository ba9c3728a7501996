//! Backoff Limiter - Distributed Login-Attempt Rate Limiting
//!
//! This crate throttles repeated login attempts per client identity. Attempt
//! counts live in a shared key-value store so every process in a deployment
//! sees the same state, and all read-decide-write steps run as one atomic
//! script inside the store. Once an identity passes its threshold it must wait
//! out an exponentially growing backoff before its attempts count again.

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod limiter;
pub mod metrics;
pub mod store;
