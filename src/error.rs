//! Error taxonomy for the quorum lock client.
//!
//! Per-endpoint failures never propagate individually; they accumulate into
//! an [`AttemptRecord`] and only surface once every permitted attempt has
//! been exhausted.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Why a single endpoint refused or failed to honor a lock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteAgainst {
    /// The endpoint already held the resource under a different (or the
    /// same, but that still counts as "occupied") value.
    ResourceLocked,
    /// The endpoint could not be reached, or the script invocation itself
    /// failed for a reason unrelated to lock contention.
    Transport(String),
}

impl fmt::Display for VoteAgainst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteAgainst::ResourceLocked => write!(f, "resource already locked"),
            VoteAgainst::Transport(reason) => write!(f, "{reason}"),
        }
    }
}

/// A single endpoint's identity within the configured quorum set.
///
/// Endpoints are identified by their position in the list passed to
/// [`crate::Redlock::new`] — stable for the lifetime of a coordinator, and
/// sufficient to let callers correlate votes with the endpoint they configured.
pub type EndpointId = usize;

/// Per-retry summary of which endpoints accepted and which refused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptRecord {
    pub votes_for: HashMap<EndpointId, ()>,
    pub votes_against: HashMap<EndpointId, VoteAgainst>,
}

impl AttemptRecord {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// True if every refusal in this attempt was a contention refusal (as
    /// opposed to a transport failure).
    pub fn all_refusals_are_resource_locked(&self) -> bool {
        !self.votes_against.is_empty()
            && self
                .votes_against
                .values()
                .all(|v| matches!(v, VoteAgainst::ResourceLocked))
    }
}

/// Transport-level failure surfaced by the endpoint adapter.
///
/// This is the error type the `Endpoint` trait returns; the coordinator
/// never propagates it on its own — it folds each occurrence into a
/// [`VoteAgainst::Transport`] entry of the current attempt.
#[derive(Debug, Error, Clone)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<redis::RedisError> for TransportError {
    fn from(err: redis::RedisError) -> Self {
        TransportError(err.to_string())
    }
}

/// Errors surfaced by the public coordinator API.
#[derive(Debug, Error, Clone)]
pub enum RedlockError {
    /// The caller passed a malformed argument: a non-integer/non-positive
    /// duration, an empty resource list, or a coordinator with zero
    /// configured endpoints.
    #[error("{0}")]
    InvalidArgument(String),

    /// Quorum was not reached (or was lost) across every permitted attempt,
    /// or a best-effort `release` found zero responsive endpoints.
    #[error("failed to reach quorum after {} attempt(s)", .attempts.len())]
    Execution { attempts: Vec<AttemptRecord> },
}

impl RedlockError {
    pub(crate) fn invalid_duration() -> Self {
        RedlockError::InvalidArgument(
            "Duration must be an integer value in milliseconds.".to_string(),
        )
    }

    /// The attempts log carried by an execution failure, if any.
    pub fn attempts(&self) -> Option<&[AttemptRecord]> {
        match self {
            RedlockError::Execution { attempts } => Some(attempts),
            RedlockError::InvalidArgument(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RedlockError>;
