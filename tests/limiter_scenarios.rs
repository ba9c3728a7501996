use std::sync::Arc;
use std::time::Duration;

use backoff_limiter::clock::ManualClock;
use backoff_limiter::config::LimiterConfig;
use backoff_limiter::guard::{Admission, FailureReason, LoginGuard};
use backoff_limiter::limiter::{AttemptLimiter, RateRecord};
use backoff_limiter::store::MemoryStore;
use futures::future::join_all;

const START: u64 = 1_704_067_200_000;

type TestLimiter = AttemptLimiter<MemoryStore<ManualClock>, ManualClock>;

fn limiter(config: LimiterConfig) -> (TestLimiter, ManualClock) {
    let clock = ManualClock::new(START);
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let limiter = AttemptLimiter::with_clock(store, config, clock.clone()).unwrap();
    (limiter, clock)
}

fn login_config() -> LimiterConfig {
    LimiterConfig {
        max_attempts: 3,
        window_ms: 60_000,
        backoff_base_ms: 1_000,
        backoff_multiplier: 2.0,
        backoff_cap_ms: 60_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_brute_force_sequence() {
    let (limiter, clock) = limiter(login_config());
    let ip = "203.0.113.7";

    assert_eq!(limiter.record_attempt(ip).await.unwrap(), RateRecord::new(1, 0));
    assert_eq!(limiter.record_attempt(ip).await.unwrap(), RateRecord::new(2, 0));
    assert!(!limiter.is_blocked(ip).await.unwrap());

    let third = limiter.record_attempt(ip).await.unwrap();
    assert_eq!(third, RateRecord::new(3, START + 1_000));
    assert!(limiter.is_blocked(ip).await.unwrap());

    clock.advance(Duration::from_millis(400));
    let fourth = limiter.record_attempt(ip).await.unwrap();
    assert_eq!(fourth, third);

    // Past both the backoff and the window the record has expired.
    clock.advance(Duration::from_millis(60_000));
    assert_eq!(limiter.record_attempt(ip).await.unwrap(), RateRecord::new(1, 0));
    assert!(!limiter.is_blocked(ip).await.unwrap());
}

#[tokio::test]
async fn test_login_flow_through_guard() {
    let (limiter, clock) = limiter(login_config());
    let guard = LoginGuard::with_clock(limiter, clock.clone());
    let ip = Some("198.51.100.23");

    for _ in 0..3 {
        assert_eq!(guard.admit(ip).await, Admission::Allowed);
        guard.record_failure(ip, FailureReason::InvalidToken).await;
    }

    assert_eq!(
        guard.admit(ip).await,
        Admission::Limited {
            retry_after_secs: 1
        }
    );

    // Backoff has passed but the count still sits at the threshold.
    clock.advance(Duration::from_millis(1_000));
    assert_eq!(
        guard.admit(ip).await,
        Admission::Limited {
            retry_after_secs: 2
        }
    );
    let record = guard.limiter().inspect("198.51.100.23").await.unwrap();
    assert_eq!(record, RateRecord::new(4, START + 3_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attempts_are_not_lost() {
    let (limiter, _) = limiter(LimiterConfig {
        max_attempts: 1_000,
        ..login_config()
    });
    let limiter = Arc::new(limiter);

    let handles = (0..64).map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.record_attempt("10.0.0.1").await })
    });
    let results = join_all(handles).await;

    let mut counts: Vec<u64> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap().count)
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, (1..=64).collect::<Vec<_>>());

    assert_eq!(limiter.inspect("10.0.0.1").await.unwrap().count, 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attempts_stop_at_threshold() {
    let (limiter, _) = limiter(login_config());
    let limiter = Arc::new(limiter);

    let handles = (0..32).map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.record_attempt("10.0.0.2").await })
    });
    let records: Vec<RateRecord> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    assert_eq!(records.iter().filter(|r| r.count == 1).count(), 1);
    assert_eq!(records.iter().filter(|r| r.count == 2).count(), 1);
    assert!(records
        .iter()
        .filter(|r| r.count == 3)
        .all(|r| r.blocked_until == START + 1_000));

    let stored = limiter.inspect("10.0.0.2").await.unwrap();
    assert_eq!(stored, RateRecord::new(3, START + 1_000));
}

#[tokio::test]
async fn test_identities_share_a_store_but_not_state() {
    let clock = ManualClock::new(START);
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let admin = AttemptLimiter::with_clock(store.clone(), login_config(), clock.clone()).unwrap();
    let api = AttemptLimiter::with_clock(
        store.clone(),
        LimiterConfig {
            key_prefix: "api:rl".to_string(),
            ..login_config()
        },
        clock.clone(),
    )
    .unwrap();

    for _ in 0..3 {
        admin.record_attempt("1.1.1.1").await.unwrap();
    }

    assert!(admin.is_blocked("1.1.1.1").await.unwrap());
    assert!(!api.is_blocked("1.1.1.1").await.unwrap());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_expired_identities_are_reclaimed_on_check() {
    let clock = ManualClock::new(START);
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let limiter = AttemptLimiter::with_clock(store.clone(), login_config(), clock.clone()).unwrap();

    for i in 0..1_000 {
        limiter.record_attempt(&format!("10.1.{}.{}", i / 256, i % 256)).await.unwrap();
    }
    assert_eq!(store.len(), 1_000);

    clock.advance(Duration::from_secs(3_600));
    for i in 0..1_000 {
        let ip = format!("10.1.{}.{}", i / 256, i % 256);
        assert!(!limiter.is_blocked(&ip).await.unwrap());
    }

    assert!(store.is_empty());
}
