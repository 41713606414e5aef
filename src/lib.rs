//! `quorumlock`: a distributed mutual-exclusion client implementing the
//! Redlock algorithm against N independent key-value endpoints.
//!
//! ```ignore
//! use std::sync::Arc;
//! use quorumlock::{Endpoint, Redlock, RedlockOptions, RedisEndpoint};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoints: Vec<Arc<dyn Endpoint>> = vec![
//!     Arc::new(RedisEndpoint::new("redis://127.0.0.1:6379")?),
//!     Arc::new(RedisEndpoint::new("redis://127.0.0.1:6380")?),
//!     Arc::new(RedisEndpoint::new("redis://127.0.0.1:6381")?),
//! ];
//! let redlock = Redlock::new(endpoints, RedlockOptions::default())?;
//!
//! let handle = redlock.acquire(&["inventory:sku-42"], 10_000).await?;
//! handle.release().await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod handle;
pub mod options;
pub mod scoped;
pub mod testing;
pub mod value;

pub use coordinator::Redlock;
pub use endpoint::{Endpoint, RedisEndpoint, ScriptArg, ScriptDigest};
pub use error::{AttemptRecord, EndpointId, RedlockError, Result, TransportError, VoteAgainst};
pub use handle::LockHandle;
pub use options::{RedlockOptions, RetryBudget, UsingOptions};
pub use scoped::{using, SafetySignal};
