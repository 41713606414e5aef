//! The Redlock quorum protocol: acquire, extend, and release over N
//! independent endpoints, with retry, jittered backoff, and drift
//! compensation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::broker::ScriptBroker;
use crate::endpoint::Endpoint;
use crate::error::{AttemptRecord, RedlockError, Result, VoteAgainst};
use crate::handle::LockHandle;
use crate::options::{RedlockOptions, RetryBudget};

/// Which server-side operation a quorum attempt dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Acquire,
    Extend,
}

struct Inner {
    endpoints: Vec<Arc<dyn Endpoint>>,
    brokers: Vec<ScriptBroker>,
    options: RedlockOptions,
    quorum: usize,
}

/// Coordinates the quorum protocol across a fixed set of endpoints.
///
/// Cheaply cloneable: internally an `Arc`, so a [`LockHandle`] can hold a
/// copy to re-enter `extend`/`release` without borrowing back through the
/// caller.
#[derive(Clone)]
pub struct Redlock {
    inner: Arc<Inner>,
}

impl Redlock {
    /// Construct a coordinator over the given endpoints.
    ///
    /// Quorum is `floor(N/2) + 1`. Fails with `InvalidArgument` if
    /// `endpoints` is empty.
    pub fn new(endpoints: Vec<Arc<dyn Endpoint>>, options: RedlockOptions) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(RedlockError::InvalidArgument(
                "at least one endpoint is required".to_string(),
            ));
        }
        let quorum = endpoints.len() / 2 + 1;
        let brokers = endpoints
            .iter()
            .enumerate()
            .map(|(i, ep)| ScriptBroker::new(i, ep.clone()))
            .collect();
        Ok(Self {
            inner: Arc::new(Inner {
                endpoints,
                brokers,
                options,
                quorum,
            }),
        })
    }

    fn validate_duration(duration_ms: i64) -> Result<()> {
        if duration_ms <= 0 {
            return Err(RedlockError::invalid_duration());
        }
        Ok(())
    }

    fn validate_resources(resources: &[String]) -> Result<()> {
        if resources.is_empty() {
            return Err(RedlockError::InvalidArgument(
                "resources must be a non-empty list".to_string(),
            ));
        }
        Ok(())
    }

    fn drift_budget(&self, duration_ms: i64) -> i64 {
        (self.inner.options.drift_factor * duration_ms as f64).floor() as i64 + 2
    }

    fn max_attempts(&self) -> Option<u32> {
        match self.inner.options.retry_count {
            RetryBudget::Limited(n) => Some(n + 1),
            RetryBudget::Unbounded => None,
        }
    }

    fn backoff(&self) -> Duration {
        let base = self.inner.options.retry_delay.as_millis() as i64;
        let jitter = self.inner.options.retry_jitter.as_millis() as i64;
        let offset = if jitter > 0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0
        };
        Duration::from_millis((base + offset).max(0) as u64)
    }

    /// Dispatch `op` to every endpoint concurrently and aggregate the votes.
    async fn dispatch_attempt(
        &self,
        op: Op,
        resources: &[String],
        value: &str,
        duration_ms: i64,
    ) -> AttemptRecord {
        let futures = self.inner.brokers.iter().enumerate().map(|(id, broker)| {
            let resources = resources.to_vec();
            let value = value.to_string();
            async move {
                let outcome = match op {
                    Op::Acquire => {
                        broker
                            .acquire(&resources, &value, duration_ms, self.inner.options.db)
                            .await
                    }
                    Op::Extend => {
                        broker
                            .extend(&resources, &value, duration_ms, self.inner.options.db)
                            .await
                    }
                };
                (id, outcome)
            }
        });

        let results = join_all(futures).await;
        let mut record = AttemptRecord::new();
        for (id, outcome) in results {
            match outcome {
                Ok(n) if n as usize == resources.len() => {
                    record.votes_for.insert(id, ());
                }
                Ok(_) => {
                    record.votes_against.insert(id, VoteAgainst::ResourceLocked);
                }
                Err(err) => {
                    record
                        .votes_against
                        .insert(id, VoteAgainst::Transport(err.0));
                }
            }
        }
        record
    }

    /// Best-effort release against every endpoint, ignoring outcomes. Used
    /// both by the public `release` and internally whenever an
    /// acquire/extend attempt fails to reach quorum, so stranded minority
    /// votes don't sit around until their TTL expires.
    async fn release_everywhere(&self, resources: &[String], value: &str) -> Vec<(usize, bool)> {
        let futures = self.inner.brokers.iter().enumerate().map(|(id, broker)| {
            let resources = resources.to_vec();
            let value = value.to_string();
            async move {
                let ok = broker
                    .release(&resources, &value, self.inner.options.db)
                    .await
                    .is_ok();
                (id, ok)
            }
        });
        join_all(futures).await
    }

    /// Shared retry loop used by both `acquire` and `extend`: both dispatch
    /// the same way and both release-on-failure before the next attempt, per
    /// the reference Redlock implementation.
    async fn run_quorum_loop(
        &self,
        op: Op,
        resources: &[String],
        value: &str,
        duration_ms: i64,
    ) -> Result<(Instant, i64, Vec<AttemptRecord>)> {
        let mut attempts = Vec::new();
        let max_attempts = self.max_attempts();
        let mut attempt_idx: u32 = 0;

        loop {
            let t0 = Instant::now();
            let record = self.dispatch_attempt(op, resources, value, duration_ms).await;
            let elapsed_ms = t0.elapsed().as_millis() as i64;
            let drift = self.drift_budget(duration_ms);
            let remaining = duration_ms - elapsed_ms - drift;
            let votes_for = record.votes_for.len();

            debug!(
                attempt = attempt_idx,
                votes_for,
                quorum = self.inner.quorum,
                remaining,
                "quorum attempt completed"
            );

            if votes_for >= self.inner.quorum && remaining > 0 {
                info!(votes_for, resources = ?resources, "quorum reached");
                attempts.push(record);
                return Ok((t0, duration_ms - drift, attempts));
            }

            self.release_everywhere(resources, value).await;
            attempts.push(record);
            attempt_idx += 1;

            if let Some(max) = max_attempts {
                if attempt_idx >= max {
                    warn!(attempts = attempts.len(), resources = ?resources, "quorum not reached, attempts exhausted");
                    return Err(RedlockError::Execution { attempts });
                }
            }

            tokio::time::sleep(self.backoff()).await;
        }
    }

    /// Acquire a lock on `resources` for `duration_ms` milliseconds.
    pub async fn acquire(&self, resources: &[&str], duration_ms: i64) -> Result<LockHandle> {
        Self::validate_duration(duration_ms)?;
        let resources: Vec<String> = resources.iter().map(|s| s.to_string()).collect();
        Self::validate_resources(&resources)?;

        let value = crate::value::generate();
        let (t0, effective_ms, attempts) = self
            .run_quorum_loop(Op::Acquire, &resources, &value, duration_ms)
            .await?;

        let expiration = t0 + Duration::from_millis(effective_ms.max(0) as u64);
        info!(resources = ?resources, "lock acquired");
        Ok(LockHandle::new(
            resources,
            value,
            expiration,
            attempts,
            self.clone(),
        ))
    }

    /// Acquire a lock, run `routine` under it with background
    /// auto-extension, and release once the routine settles. See
    /// [`crate::scoped::using`] for the full contract.
    pub async fn using<F, Fut, R>(
        &self,
        resources: &[&str],
        duration_ms: i64,
        options: crate::options::UsingOptions,
        routine: F,
    ) -> Result<R>
    where
        F: FnOnce(crate::scoped::SafetySignal) -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        crate::scoped::using(self, resources, duration_ms, options, routine).await
    }

    /// Re-enter the quorum loop to extend an existing handle. Used by
    /// [`LockHandle::extend`]; not part of the crate's public surface on
    /// its own since it needs the handle's current value.
    pub(crate) async fn extend_handle(
        &self,
        resources: &[String],
        value: &str,
        duration_ms: i64,
    ) -> Result<(Instant, i64, Vec<AttemptRecord>)> {
        Self::validate_duration(duration_ms)?;
        self.run_quorum_loop(Op::Extend, resources, value, duration_ms)
            .await
    }

    /// Re-enter the protocol to release an existing handle. Always attempts
    /// every endpoint; succeeds unless zero endpoints responded at all.
    pub(crate) async fn release_handle(
        &self,
        resources: &[String],
        value: &str,
    ) -> Result<Vec<AttemptRecord>> {
        let outcomes = self.release_everywhere(resources, value).await;
        let responded = outcomes.iter().filter(|(_, ok)| *ok).count();

        let mut record = AttemptRecord::new();
        for (id, ok) in &outcomes {
            if *ok {
                record.votes_for.insert(*id, ());
            }
        }
        let attempts = vec![record];

        if responded == 0 && !self.inner.endpoints.is_empty() {
            warn!(resources = ?resources, "release reached zero responsive endpoints");
            return Err(RedlockError::Execution { attempts });
        }
        info!(resources = ?resources, responded, "lock released");
        Ok(attempts)
    }
}
