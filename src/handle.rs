//! The lock handle returned by a successful acquisition.

use std::time::Instant;

use tracing::warn;

use crate::coordinator::Redlock;
use crate::error::{AttemptRecord, RedlockError, Result};

/// Ownership of a quorum-held lock.
///
/// Produced by [`Redlock::acquire`]. `extend` re-enters the quorum protocol
/// to push the expiration out; `release` consumes the handle and relinquishes
/// it. A handle that fails to extend is left invalid: further calls return
/// an error immediately without touching the network, since the original
/// `extend` attempt already ran its own best-effort release.
pub struct LockHandle {
    resources: Vec<String>,
    value: String,
    expiration: Instant,
    attempts: Vec<AttemptRecord>,
    coordinator: Redlock,
    valid: bool,
}

impl LockHandle {
    pub(crate) fn new(
        resources: Vec<String>,
        value: String,
        expiration: Instant,
        attempts: Vec<AttemptRecord>,
        coordinator: Redlock,
    ) -> Self {
        Self {
            resources,
            value,
            expiration,
            attempts,
            coordinator,
            valid: true,
        }
    }

    /// The resource keys this handle covers.
    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// The random ownership token stored at each resource key. Exposed for
    /// diagnostics; never needed to call `extend`/`release`.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// This handle's current expiration, accounting for clock-drift
    /// compensation already applied at acquire/extend time.
    pub fn expiration(&self) -> Instant {
        self.expiration
    }

    /// Remaining validity, or `Duration::ZERO` if already expired.
    pub fn remaining_validity(&self) -> std::time::Duration {
        self.expiration.saturating_duration_since(Instant::now())
    }

    /// The full per-attempt vote log from the acquisition (or the most
    /// recent `extend`).
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// True if this handle is still usable. False once `extend` has failed;
    /// `release` always consumes the handle regardless.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Re-run the quorum protocol to push this handle's expiration out to
    /// `new_duration_ms` from now.
    ///
    /// On success, `expiration` and the attempt log are updated in place. On
    /// failure the handle is marked invalid: quorum may have been lost, so
    /// the resources should be treated as no longer reliably held.
    pub async fn extend(&mut self, new_duration_ms: i64) -> Result<()> {
        if !self.valid {
            return Err(RedlockError::InvalidArgument(
                "handle was invalidated by a prior failed extend".to_string(),
            ));
        }

        match self
            .coordinator
            .extend_handle(&self.resources, &self.value, new_duration_ms)
            .await
        {
            Ok((t0, effective_ms, attempts)) => {
                self.expiration = t0 + std::time::Duration::from_millis(effective_ms.max(0) as u64);
                self.attempts = attempts;
                Ok(())
            }
            Err(err) => {
                self.valid = false;
                Err(err)
            }
        }
    }

    /// Release this handle. Consumes it: a handle must never be reused after
    /// release, successful or not.
    pub async fn release(self) -> Result<()> {
        if !self.valid {
            warn!(resources = ?self.resources, "releasing a handle already invalidated by a failed extend");
        }
        self.coordinator
            .release_handle(&self.resources, &self.value)
            .await
            .map(|_| ())
    }
}
