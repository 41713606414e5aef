//! The seam between the quorum algorithm and a concrete key-value server.
//!
//! `Endpoint` is intentionally narrow: load a script, invoke it by digest,
//! and report liveness. Connection pooling, pipelining, and retry-at-the-
//! transport-layer are the endpoint client library's job, not the
//! coordinator's — callers may swap in their own [`Endpoint`] impl for a
//! cluster client, a mock, or anything else that can run an atomic script.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;

use crate::error::TransportError;

/// Opaque, server-assigned identifier for a loaded script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptDigest(pub String);

/// An argument passed to a server-side script invocation.
#[derive(Debug, Clone)]
pub enum ScriptArg {
    Str(String),
    Int(i64),
}

impl From<&str> for ScriptArg {
    fn from(s: &str) -> Self {
        ScriptArg::Str(s.to_string())
    }
}

impl From<String> for ScriptArg {
    fn from(s: String) -> Self {
        ScriptArg::Str(s)
    }
}

impl From<i64> for ScriptArg {
    fn from(n: i64) -> Self {
        ScriptArg::Int(n)
    }
}

/// One independent key-value server participating in the quorum set.
///
/// Implementations must be safe to call concurrently: a single coordinator
/// attempt dispatches to every configured endpoint at once.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Load a script by its textual body, returning a stable digest. Must be
    /// idempotent: loading the same body twice returns the same digest.
    async fn load_script(&self, body: &str) -> Result<ScriptDigest, TransportError>;

    /// Invoke a previously loaded script by digest. On a "script not found"
    /// response the caller should reload via `body` and retry once; `body`
    /// is threaded through for exactly that purpose.
    async fn eval_script(
        &self,
        digest: &ScriptDigest,
        body: &str,
        keys: &[String],
        args: &[ScriptArg],
        db: i64,
    ) -> Result<i64, TransportError>;

    /// Liveness check. Not required before every call; used by diagnostics
    /// and by callers warming up a coordinator.
    async fn ping(&self) -> Result<(), TransportError>;
}

/// Concrete [`Endpoint`] over a Redis-protocol-compatible server.
///
/// Holds a lazily-established [`ConnectionManager`] so the adapter survives
/// transient disconnects the way a long-lived service expects.
pub struct RedisEndpoint {
    client: Client,
    manager: tokio::sync::OnceCell<ConnectionManager>,
}

impl RedisEndpoint {
    /// Build an endpoint from a connection URI (e.g. `redis://127.0.0.1:6379`).
    pub fn new(uri: impl redis::IntoConnectionInfo) -> Result<Self, TransportError> {
        let client = Client::open(uri).map_err(TransportError::from)?;
        Ok(Self {
            client,
            manager: tokio::sync::OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, TransportError> {
        let manager = self
            .manager
            .get_or_try_init(|| async { self.client.get_connection_manager().await })
            .await
            .map_err(TransportError::from)?;
        Ok(manager.clone())
    }
}

fn is_noscript(err: &redis::RedisError) -> bool {
    err.code() == Some("NOSCRIPT")
}

#[async_trait]
impl Endpoint for RedisEndpoint {
    async fn load_script(&self, body: &str) -> Result<ScriptDigest, TransportError> {
        let mut conn = self.connection().await?;
        let digest: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(body)
            .query_async(&mut conn)
            .await
            .map_err(TransportError::from)?;
        Ok(ScriptDigest(digest))
    }

    async fn eval_script(
        &self,
        digest: &ScriptDigest,
        body: &str,
        keys: &[String],
        args: &[ScriptArg],
        db: i64,
    ) -> Result<i64, TransportError> {
        let mut conn = self.connection().await?;
        let run = |digest: &ScriptDigest, conn: &mut ConnectionManager| {
            let mut cmd = redis::cmd("EVALSHA");
            cmd.arg(&digest.0).arg(keys.len());
            for key in keys {
                cmd.arg(key);
            }
            for arg in args {
                match arg {
                    ScriptArg::Str(s) => {
                        cmd.arg(s);
                    }
                    ScriptArg::Int(n) => {
                        cmd.arg(*n);
                    }
                }
            }
            cmd.arg(db);
            cmd
        };

        match run(digest, &mut conn).query_async(&mut conn).await {
            Ok(n) => Ok(n),
            Err(err) if is_noscript(&err) => {
                let reloaded = self.load_script(body).await?;
                run(&reloaded, &mut conn)
                    .query_async(&mut conn)
                    .await
                    .map_err(TransportError::from)
            }
            Err(err) => Err(TransportError::from(err)),
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(TransportError::from)?;
        Ok(())
    }
}
