//! End-to-end quorum lock scenarios (S1-S9) against the in-process mock
//! endpoint harness. These run unconditionally, with no external service;
//! the Redis-backed counterparts live in `quorum_lock_redis.rs` gated with
//! `#[ignore]`.

use std::sync::Arc;
use std::time::Duration;

use quorumlock::{Endpoint, RedlockError, RedlockOptions, RetryBudget, VoteAgainst};
use quorumlock::testing::MockEndpoint;

fn mock_endpoints(n: usize) -> Vec<Arc<dyn Endpoint>> {
    (0..n)
        .map(|_| Arc::new(MockEndpoint::new()) as Arc<dyn Endpoint>)
        .collect()
}

fn fast_retry_options() -> RedlockOptions {
    let mut opts = RedlockOptions::default();
    opts.retry_count = RetryBudget::Limited(2);
    opts.retry_delay = Duration::from_millis(5);
    opts.retry_jitter = Duration::from_millis(2);
    opts
}

// S1 — acquiring with a non-positive duration fails immediately with the
// canonical error message and never touches an endpoint.
#[tokio::test]
async fn s1_non_positive_duration_is_rejected_without_dispatch() {
    let endpoints = mock_endpoints(3);
    let coordinator = quorumlock::Redlock::new(endpoints, RedlockOptions::default()).unwrap();

    let err = coordinator.acquire(&["{s1}r"], -5).await.unwrap_err();
    match err {
        RedlockError::InvalidArgument(msg) => {
            assert_eq!(msg, "Duration must be an integer value in milliseconds.")
        }
        other => panic!("unexpected: {other:?}"),
    }
}

// S2 — a single endpoint, single resource: acquire succeeds and the key is
// visible with the right value and a TTL within drift bounds of the request.
#[tokio::test]
async fn s2_single_endpoint_acquire_sets_key_with_bounded_ttl() {
    let mock = Arc::new(MockEndpoint::new());
    let endpoints: Vec<Arc<dyn Endpoint>> = vec![mock.clone()];
    let coordinator = quorumlock::Redlock::new(endpoints, RedlockOptions::default()).unwrap();

    let handle = coordinator.acquire(&["{s2}r"], 5_000).await.unwrap();
    assert_eq!(mock.get("{s2}r").as_deref(), Some(handle.value()));

    let ttl = mock.ttl("{s2}r").unwrap();
    assert!(ttl <= Duration::from_millis(5_000));
    assert!(ttl >= Duration::from_millis(4_900));
}

// S3 — a second acquire on an already-held resource, across a full quorum
// of reachable endpoints, fails with only ResourceLocked refusals and
// leaves the original holder's value untouched.
#[tokio::test]
async fn s3_contended_resource_refuses_with_resource_locked() {
    let endpoints = mock_endpoints(3);
    let coordinator = quorumlock::Redlock::new(endpoints, fast_retry_options()).unwrap();

    let first = coordinator.acquire(&["{s3}r"], 10_000).await.unwrap();
    let err = coordinator.acquire(&["{s3}r"], 10_000).await.unwrap_err();

    match err {
        RedlockError::Execution { attempts } => {
            for attempt in &attempts {
                for vote in attempt.votes_against.values() {
                    assert!(matches!(vote, VoteAgainst::ResourceLocked));
                }
            }
        }
        other => panic!("unexpected: {other:?}"),
    }

    first.release().await.unwrap();
}

// S4 — a minority of unreachable endpoints doesn't prevent quorum.
#[tokio::test]
async fn s4_minority_unreachable_still_acquires() {
    let mut endpoints = mock_endpoints(2);
    endpoints.push(Arc::new(MockEndpoint::unreachable()));
    let coordinator = quorumlock::Redlock::new(endpoints, RedlockOptions::default()).unwrap();

    let handle = coordinator.acquire(&["{s4}r"], 10_000).await.unwrap();
    assert_eq!(handle.attempts().len(), 1);
}

// S5 — a majority of unreachable endpoints exhausts retries with only
// transport refusals on the final attempt.
#[tokio::test]
async fn s5_majority_unreachable_exhausts_with_transport_refusals() {
    let endpoints: Vec<Arc<dyn Endpoint>> = vec![
        Arc::new(MockEndpoint::unreachable()),
        Arc::new(MockEndpoint::unreachable()),
        Arc::new(MockEndpoint::new()),
    ];
    let coordinator = quorumlock::Redlock::new(endpoints, fast_retry_options()).unwrap();

    let err = coordinator.acquire(&["{s5}r"], 10_000).await.unwrap_err();
    match err {
        RedlockError::Execution { attempts } => {
            assert_eq!(attempts.len(), 3);
            for vote in attempts.last().unwrap().votes_against.values() {
                assert!(matches!(vote, VoteAgainst::Transport(_)));
            }
        }
        other => panic!("unexpected: {other:?}"),
    }
}

// S6 — extending a held lock advances its expiration and keeps the value.
#[tokio::test]
async fn s6_extend_advances_expiration_keeps_value() {
    let endpoints = mock_endpoints(3);
    let coordinator = quorumlock::Redlock::new(endpoints, RedlockOptions::default()).unwrap();

    let mut handle = coordinator.acquire(&["{s6}r"], 2_000).await.unwrap();
    let value_before = handle.value().to_string();
    let expiration_before = handle.expiration();

    handle.extend(30_000).await.unwrap();

    assert_eq!(handle.value(), value_before);
    assert!(handle.expiration() > expiration_before);
}

// S7 — release removes the key from every endpoint that had accepted it.
#[tokio::test]
async fn s7_release_clears_key_on_every_accepting_endpoint() {
    let mocks: Vec<Arc<MockEndpoint>> = (0..3).map(|_| Arc::new(MockEndpoint::new())).collect();
    let endpoints: Vec<Arc<dyn Endpoint>> = mocks
        .iter()
        .map(|m| m.clone() as Arc<dyn Endpoint>)
        .collect();
    let coordinator = quorumlock::Redlock::new(endpoints, RedlockOptions::default()).unwrap();

    let handle = coordinator.acquire(&["{s7}r"], 10_000).await.unwrap();
    handle.release().await.unwrap();

    for mock in &mocks {
        assert!(mock.get("{s7}r").is_none());
    }
}

// S8 — round trip: acquire, release, acquire again on the same resource.
#[tokio::test]
async fn s8_round_trip_acquire_release_acquire() {
    let endpoints = mock_endpoints(3);
    let coordinator = quorumlock::Redlock::new(endpoints, RedlockOptions::default()).unwrap();

    let handle = coordinator.acquire(&["{s8}r"], 5_000).await.unwrap();
    handle.release().await.unwrap();

    let handle2 = coordinator.acquire(&["{s8}r"], 5_000).await.unwrap();
    handle2.release().await.unwrap();
}

// S9 — extend fails once quorum can no longer be reached (e.g. the value
// no longer matches because the lock already expired and was reclaimed
// elsewhere), invalidating the handle.
#[tokio::test]
async fn s9_failed_extend_invalidates_handle() {
    let mocks: Vec<Arc<MockEndpoint>> = (0..3).map(|_| Arc::new(MockEndpoint::new())).collect();
    let endpoints: Vec<Arc<dyn Endpoint>> = mocks
        .iter()
        .map(|m| m.clone() as Arc<dyn Endpoint>)
        .collect();
    let coordinator = quorumlock::Redlock::new(endpoints, fast_retry_options()).unwrap();

    let mut handle = coordinator.acquire(&["{s9}r"], 50).await.unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    // The lock has expired on every endpoint; someone else takes it.
    let _squatter = coordinator.acquire(&["{s9}r"], 10_000).await.unwrap();

    let err = handle.extend(10_000).await.unwrap_err();
    assert!(matches!(err, RedlockError::Execution { .. }));
    assert!(!handle.is_valid());
}

#[tokio::test]
async fn multiple_resources_are_acquired_and_released_atomically() {
    let endpoints = mock_endpoints(3);
    let coordinator = quorumlock::Redlock::new(endpoints, RedlockOptions::default()).unwrap();

    let handle = coordinator
        .acquire(&["{m}a", "{m}b", "{m}c"], 5_000)
        .await
        .unwrap();
    assert_eq!(handle.resources().len(), 3);
    handle.release().await.unwrap();
}

#[tokio::test]
async fn using_runs_routine_and_releases_afterwards() {
    let endpoints = mock_endpoints(3);
    let coordinator = quorumlock::Redlock::new(endpoints, RedlockOptions::default()).unwrap();

    let sum = coordinator
        .using(
            &["{u}r"],
            5_000,
            quorumlock::UsingOptions::default(),
            |signal| async move {
                assert!(!signal.aborted());
                2 + 2
            },
        )
        .await
        .unwrap();
    assert_eq!(sum, 4);

    // Released: a fresh acquire succeeds right away.
    let handle = coordinator.acquire(&["{u}r"], 1_000).await.unwrap();
    handle.release().await.unwrap();
}
