//! The scoped execution helper: run user work under a held lock with
//! background auto-extension and a cooperative cancellation signal.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::warn;

use crate::coordinator::Redlock;
use crate::error::{RedlockError, Result};
use crate::options::UsingOptions;

struct SignalInner {
    aborted: AtomicBool,
    error: Mutex<Option<RedlockError>>,
}

/// Handed to the routine passed to [`using`]. Reflects whether the
/// keep-alive extension loop has given up on the lock.
///
/// Cheaply cloneable; every clone observes the same underlying state. The
/// error is always stored before `aborted` flips, so a routine that reads
/// `aborted() == true` is guaranteed to also see `error()` populated.
#[derive(Clone)]
pub struct SafetySignal(Arc<SignalInner>);

impl SafetySignal {
    fn new() -> Self {
        Self(Arc::new(SignalInner {
            aborted: AtomicBool::new(false),
            error: Mutex::new(None),
        }))
    }

    fn trip(&self, err: RedlockError) {
        *self.0.error.lock().unwrap() = Some(err);
        self.0.aborted.store(true, Ordering::SeqCst);
    }

    /// True once the keep-alive loop has lost the ability to extend this lock.
    pub fn aborted(&self) -> bool {
        self.0.aborted.load(Ordering::SeqCst)
    }

    /// The extension failure that tripped the signal, if any.
    pub fn error(&self) -> Option<RedlockError> {
        self.0.error.lock().unwrap().clone()
    }
}

/// Run `routine` while holding a lock on `resources`, auto-extending it in
/// the background and exposing a [`SafetySignal`] the routine can poll.
///
/// Acquisition failure propagates immediately. Once acquired, `using`
/// always resolves to `Ok(routine's output)`; a fallible routine should
/// encode its own failure in `R` (e.g. by returning a `Result` itself) —
/// this helper does not reinterpret it. Release runs after the routine
/// settles and after the keep-alive loop has stopped scheduling new
/// extensions; a release failure is logged and does not override the
/// routine's result.
pub async fn using<F, Fut, R>(
    redlock: &Redlock,
    resources: &[&str],
    duration_ms: i64,
    options: UsingOptions,
    routine: F,
) -> Result<R>
where
    F: FnOnce(SafetySignal) -> Fut,
    Fut: Future<Output = R>,
{
    let handle = redlock.acquire(resources, duration_ms).await?;

    let signal = SafetySignal::new();
    let stop = Arc::new(Notify::new());
    let threshold = options.automatic_extension_threshold;

    let keepalive_signal = signal.clone();
    let keepalive_stop = stop.clone();
    let keepalive = tokio::spawn(async move {
        let mut handle = handle;
        let mut stopped_by_caller = false;

        loop {
            let wait = handle
                .remaining_validity()
                .saturating_sub(threshold);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if handle.remaining_validity() <= threshold {
                        if let Err(err) = handle.extend(duration_ms).await {
                            keepalive_signal.trip(err);
                            break;
                        }
                    }
                }
                _ = keepalive_stop.notified() => {
                    stopped_by_caller = true;
                    break;
                }
            }
        }

        if !stopped_by_caller {
            keepalive_stop.notified().await;
        }
        handle.release().await
    });

    let result = routine(signal).await;
    stop.notify_one();

    match keepalive.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(%err, "release after scoped execution failed"),
        Err(join_err) => warn!(%join_err, "keep-alive task did not complete cleanly"),
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::options::RedlockOptions;
    use crate::testing::MockEndpoint;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration as StdDuration;

    fn endpoints(n: usize) -> Vec<Arc<dyn Endpoint>> {
        (0..n)
            .map(|_| Arc::new(MockEndpoint::new()) as Arc<dyn Endpoint>)
            .collect()
    }

    #[tokio::test]
    async fn routine_result_is_returned_and_signal_stays_clean() {
        let rl = Redlock::new(endpoints(3), RedlockOptions::default()).unwrap();
        let opts = UsingOptions::default();

        let result = using(&rl, &["{r}s"], 10_000, opts, |signal| async move {
            assert!(!signal.aborted());
            assert!(signal.error().is_none());
            42
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn lock_is_released_after_routine_settles() {
        let rl = Redlock::new(endpoints(3), RedlockOptions::default()).unwrap();

        using(&rl, &["{r}t"], 10_000, UsingOptions::default(), |_signal| async move {
            tokio::time::sleep(StdDuration::from_millis(1)).await;
        })
        .await
        .unwrap();

        // The resource must be free again: a fresh acquire succeeds.
        let handle = rl.acquire(&["{r}t"], 5_000).await.unwrap();
        handle.release().await.unwrap();
    }

    #[tokio::test]
    async fn keepalive_extends_before_expiration() {
        let mocks: Vec<Arc<MockEndpoint>> = (0..3).map(|_| Arc::new(MockEndpoint::new())).collect();
        let endpoints: Vec<Arc<dyn Endpoint>> =
            mocks.iter().map(|m| m.clone() as Arc<dyn Endpoint>).collect();
        let rl = Redlock::new(endpoints, RedlockOptions::default()).unwrap();
        let mut opts = UsingOptions::default();
        opts.automatic_extension_threshold = StdDuration::from_millis(90);

        let extend_count = Arc::new(AtomicU32::new(0));
        let counter = extend_count.clone();
        let probe = mocks[0].clone();

        using(&rl, &["{r}u"], 150, opts, move |signal| async move {
            tokio::time::sleep(StdDuration::from_millis(400)).await;
            if !signal.aborted() {
                counter.fetch_add(1, Ordering::SeqCst);
            }

            // Without the keep-alive loop actually renewing the lock, the
            // original 150ms TTL would have lapsed well before this 400ms
            // sleep elapsed and the key would be gone. Finding it still
            // present with a fresh TTL positively confirms `extend` was
            // invoked against the endpoint, not merely that the signal
            // stayed clean (which would also hold if auto-extension were
            // deleted entirely).
            let ttl = probe
                .ttl("{r}u")
                .expect("lock should still be held after at least one renewal");
            assert!(ttl > StdDuration::from_millis(0));
            assert!(ttl <= StdDuration::from_millis(150));
        })
        .await
        .unwrap();

        assert_eq!(extend_count.load(Ordering::SeqCst), 1);
    }
}
