//! Integration tests for provider health tracking and staged recovery

use lobbyroute::clock::ManualClock;
use lobbyroute::envelope::Priority;
use lobbyroute::health::{
    BreakerSettings, HealthBucket, HealthCause, HealthTracker, MemoryHealthStore, ProviderKey,
    Resource, ResourceCounters, ResourceWindow, parse_rate_limit_headers,
};
use proptest::prelude::*;
use std::sync::Arc;

fn tracker(start: i64) -> (HealthTracker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start));
    let tracker = HealthTracker::new(
        Arc::new(MemoryHealthStore::new()),
        clock.clone(),
        BreakerSettings::new(3, 30, 60),
    );
    (tracker, clock)
}

fn groq() -> ProviderKey {
    ProviderKey::new("groq", "llama-3.1-8b-instant")
}

#[test]
fn test_low_request_headroom_is_yellow() {
    let (tracker, _) = tracker(1_000);
    let headers = [
        ("x-ratelimit-remaining-requests", "15"),
        ("x-ratelimit-limit-requests", "100"),
        ("x-ratelimit-remaining-tokens", "9000"),
        ("x-ratelimit-limit-tokens", "10000"),
        ("x-ratelimit-reset-requests", "2m30s"),
    ];
    let counters = parse_rate_limit_headers(headers, 1_000, 60);
    assert_eq!(counters.bottleneck(), Some(Resource::Requests));

    assert_eq!(tracker.observe(&groq(), &counters), HealthBucket::Yellow);
    assert!(tracker.should_divert(&groq(), Priority::Normal));
    assert!(!tracker.should_divert(&groq(), Priority::High));

    let snapshot = tracker.snapshot_of(&[groq()]);
    assert_eq!(snapshot[0].bottleneck, Some(Resource::Requests));
    assert_eq!(snapshot[0].reset_at, Some(1_150));
}

#[test]
fn test_rejection_recovers_through_yellow() {
    let (tracker, clock) = tracker(0);
    assert_eq!(tracker.observe_rejection(&groq(), Some(30)), HealthBucket::Red);
    assert_eq!(tracker.seconds_until_available(&groq()), 30);
    assert!(tracker.should_divert(&groq(), Priority::Critical));

    clock.advance(29);
    assert_eq!(tracker.health(&groq()), HealthBucket::Red);

    clock.advance(2);
    assert_eq!(tracker.health(&groq()), HealthBucket::Yellow);
    assert_eq!(tracker.seconds_until_available(&groq()), 0);
    assert!(!tracker.should_divert(&groq(), Priority::High));

    let healthy = ResourceCounters::new()
        .with_requests(95, 100)
        .with_tokens(9_500, 10_000);
    assert_eq!(tracker.observe(&groq(), &healthy), HealthBucket::Green);
}

#[test]
fn test_response_without_metadata_keeps_bucket() {
    let (tracker, _) = tracker(0);
    tracker.observe(&groq(), &ResourceCounters::new().with_requests(10, 100));
    assert_eq!(tracker.health(&groq()), HealthBucket::Yellow);

    tracker.observe(&groq(), &ResourceCounters::new());
    assert_eq!(tracker.health(&groq()), HealthBucket::Yellow);
}

#[test]
fn test_unobserved_provider_is_green() {
    let (tracker, _) = tracker(0);
    let key = ProviderKey::new("moonshot", "kimi");
    assert_eq!(tracker.health(&key), HealthBucket::Green);
    let snapshot = tracker.snapshot_of(&[key]);
    assert_eq!(snapshot[0].bucket, HealthBucket::Green);
    assert!(tracker.snapshot().is_empty());
}

#[test]
fn test_consecutive_failures_trip_breaker() {
    let (tracker, clock) = tracker(0);
    assert_eq!(tracker.observe_failure(&groq()), HealthBucket::Green);
    assert_eq!(tracker.observe_failure(&groq()), HealthBucket::Green);
    assert_eq!(tracker.observe_failure(&groq()), HealthBucket::Red);

    let snapshot = tracker.snapshot_of(&[groq()]);
    assert_eq!(snapshot[0].cause, HealthCause::Failures);
    assert_eq!(snapshot[0].consecutive_failures, 0);
    assert_eq!(snapshot[0].seconds_until_available, 30);

    clock.advance(30);
    assert_eq!(tracker.health(&groq()), HealthBucket::Yellow);
}

#[test]
fn test_breaker_needs_fresh_streak_after_cooldown() {
    let (tracker, clock) = tracker(0);
    for _ in 0..3 {
        tracker.observe_failure(&groq());
    }
    clock.advance(31);
    assert_eq!(tracker.health(&groq()), HealthBucket::Yellow);

    assert_eq!(tracker.observe_failure(&groq()), HealthBucket::Yellow);
    assert_eq!(tracker.observe_failure(&groq()), HealthBucket::Yellow);
    assert_eq!(tracker.observe_failure(&groq()), HealthBucket::Red);
    assert_eq!(tracker.seconds_until_available(&groq()), 30);
}

#[test]
fn test_success_resets_failure_count() {
    let (tracker, _) = tracker(0);
    tracker.observe_failure(&groq());
    tracker.observe_failure(&groq());
    tracker.observe(&groq(), &ResourceCounters::new());
    assert_eq!(tracker.observe_failure(&groq()), HealthBucket::Green);
}

#[test]
fn test_override_pins_bucket() {
    let (tracker, _) = tracker(0);
    tracker.set_override(&groq(), Some(HealthBucket::Red));
    let healthy = ResourceCounters::new().with_requests(100, 100);
    assert_eq!(tracker.observe(&groq(), &healthy), HealthBucket::Red);
    // Pinned red has no known end
    assert_eq!(tracker.seconds_until_available(&groq()), 0);

    let snapshot = tracker.set_override(&groq(), None);
    assert_eq!(snapshot.bucket, HealthBucket::Green);
    assert!(!snapshot.overridden);
}

#[test]
fn test_shared_key_shares_health() {
    let (tracker, _) = tracker(0);
    tracker.observe_rejection(&groq(), None);
    assert_eq!(tracker.health(&ProviderKey::new("groq", "llama-3.1-8b-instant")), HealthBucket::Red);
    assert_eq!(tracker.health(&ProviderKey::new("groq", "llama-3.3-70b")), HealthBucket::Green);
    assert_eq!(tracker.seconds_until_available(&groq()), 60);
}

#[test]
fn test_concurrent_observations_land_on_one_record() {
    let (tracker, _) = tracker(0);
    let tracker = Arc::new(tracker);
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let tracker = tracker.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    if i % 2 == 0 {
                        tracker.observe(&groq(), &ResourceCounters::new().with_requests(90, 100));
                    } else {
                        tracker.observe_rejection(&groq(), Some(10));
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("thread");
    }
    assert_eq!(tracker.snapshot().len(), 1);
}

proptest! {
    #[test]
    fn prop_health_never_better_than_worst_resource(
        req_remaining in 0u64..=1_000,
        tok_remaining in 0u64..=100_000,
    ) {
        let counters = ResourceCounters::new()
            .with_requests(req_remaining, 1_000)
            .with_tokens(tok_remaining, 100_000);
        let requests =
            HealthBucket::from_percent(ResourceWindow::new(req_remaining, 1_000).percent_remaining());
        let tokens =
            HealthBucket::from_percent(ResourceWindow::new(tok_remaining, 100_000).percent_remaining());
        prop_assert_eq!(counters.bucket(), requests.min(tokens));
        prop_assert!(counters.bucket() <= requests);
        prop_assert!(counters.bucket() <= tokens);
    }
}
