//! Attempt counting and backoff logic.

mod backend;
mod engine;
mod policy;
mod record;
pub mod script;

pub use backend::LimiterBackend;
pub use engine::AttemptLimiter;
pub use policy::BackoffPolicy;
pub use record::RateRecord;
pub use script::RECORD_ATTEMPT;
