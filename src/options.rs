//! Tunable knobs for the quorum protocol and the scoped execution helper.

use std::time::Duration;

/// Retry budget for the coordinator's retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryBudget {
    /// At most this many retries after the initial attempt (so
    /// `retries + 1` total attempts).
    Limited(u32),
    /// Retry indefinitely until quorum is reached.
    Unbounded,
}

impl Default for RetryBudget {
    fn default() -> Self {
        RetryBudget::Limited(10)
    }
}

/// Options accepted by [`crate::Redlock::new`].
#[derive(Debug, Clone)]
pub struct RedlockOptions {
    /// Fraction of the requested duration subtracted as clock-drift allowance.
    pub drift_factor: f64,
    /// Maximum retries after the initial attempt.
    pub retry_count: RetryBudget,
    /// Nominal backoff between attempts.
    pub retry_delay: Duration,
    /// Uniform jitter range added to `retry_delay` (symmetric, `[-jitter, +jitter]`).
    pub retry_jitter: Duration,
    /// Logical database index passed to the server-side scripts.
    pub db: i64,
}

impl Default for RedlockOptions {
    fn default() -> Self {
        Self {
            drift_factor: 0.01,
            retry_count: RetryBudget::Limited(10),
            retry_delay: Duration::from_millis(200),
            retry_jitter: Duration::from_millis(100),
            db: 0,
        }
    }
}

/// Options accepted by [`crate::Redlock::using`], layered on top of the
/// acquisition itself.
#[derive(Debug, Clone)]
pub struct UsingOptions {
    /// Extension is attempted once remaining validity drops below this.
    pub automatic_extension_threshold: Duration,
}

impl Default for UsingOptions {
    fn default() -> Self {
        Self {
            automatic_extension_threshold: Duration::from_millis(500),
        }
    }
}
