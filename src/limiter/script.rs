//! The atomic attempt-recording script.
//!
//! `record_attempt.lua` runs inside the store; `apply_attempt` is the same
//! decision in Rust, used by in-process stores and as the tested definition
//! of what the Lua must do. Bump the version header in the Lua file and
//! `RECORD_ATTEMPT.version` together whenever arguments or reply change.

use super::policy::BackoffPolicy;
use super::record::RateRecord;
use crate::store::{AtomicScript, ScriptOutcome, ScriptWrite};

/// Script that counts one attempt and applies backoff past the threshold.
pub const RECORD_ATTEMPT: AtomicScript = AtomicScript {
    name: "record_attempt",
    version: 1,
    source: include_str!("record_attempt.lua"),
    reference: record_attempt_reference,
};

/// Order of `ARGV` entries expected by the script.
pub const ARG_ORDER: [&str; 6] = [
    "window_ms",
    "max_attempts",
    "now_ms",
    "backoff_base_ms",
    "backoff_multiplier",
    "backoff_cap_ms",
];

/// Typed arguments for `RECORD_ATTEMPT`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttemptArgs {
    /// TTL applied on every write
    pub window_ms: u64,
    /// Threshold at which backoff starts
    pub max_attempts: u64,
    /// Time of the attempt, epoch milliseconds
    pub now_ms: u64,
    /// Backoff growth
    pub policy: BackoffPolicy,
}

impl AttemptArgs {
    /// Render as script arguments in `ARG_ORDER`.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.window_ms.to_string(),
            self.max_attempts.to_string(),
            self.now_ms.to_string(),
            self.policy.base_ms.to_string(),
            self.policy.multiplier.to_string(),
            self.policy.cap_ms.to_string(),
        ]
    }

    /// Parse script arguments produced by `to_args`.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        if args.len() != ARG_ORDER.len() {
            return Err(format!(
                "expected {} arguments, got {}",
                ARG_ORDER.len(),
                args.len()
            ));
        }

        let int = |i: usize| {
            args[i]
                .parse::<u64>()
                .map_err(|e| format!("{}: {}", ARG_ORDER[i], e))
        };
        let multiplier = args[4]
            .parse::<f64>()
            .map_err(|e| format!("{}: {}", ARG_ORDER[4], e))?;

        Ok(Self {
            window_ms: int(0)?,
            max_attempts: int(1)?,
            now_ms: int(2)?,
            policy: BackoffPolicy::new(int(3)?, multiplier, int(5)?),
        })
    }
}

/// Decide the next record for one attempt.
///
/// Returns the record to report and whether it must be written back.
pub fn apply_attempt(current: RateRecord, args: &AttemptArgs) -> (RateRecord, bool) {
    if current.is_backing_off(args.now_ms) {
        return (current, false);
    }

    let count = current.count.saturating_add(1);
    let blocked_until = if count >= args.max_attempts {
        let over = count - args.max_attempts + 1;
        args.policy.blocked_until(args.now_ms, over)
    } else {
        0
    };

    (RateRecord::new(count, blocked_until), true)
}

/// Convert a script reply into a record.
pub fn decode_reply(reply: &[i64]) -> Option<RateRecord> {
    match reply {
        [count, blocked_until] => Some(RateRecord::new(
            u64::try_from(*count).ok()?,
            u64::try_from(*blocked_until).ok()?,
        )),
        _ => None,
    }
}

fn encode_reply(record: &RateRecord) -> Vec<i64> {
    vec![
        i64::try_from(record.count).unwrap_or(i64::MAX),
        i64::try_from(record.blocked_until).unwrap_or(i64::MAX),
    ]
}

fn record_attempt_reference(current: Option<&str>, args: &[String]) -> Result<ScriptOutcome, String> {
    let args = AttemptArgs::parse(args)?;
    let current = current.and_then(RateRecord::decode).unwrap_or_default();

    let (next, write) = apply_attempt(current, &args);
    Ok(ScriptOutcome {
        write: write.then(|| ScriptWrite {
            value: next.encode(),
            ttl_ms: args.window_ms,
        }),
        reply: encode_reply(&next),
    })
}
