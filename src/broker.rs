//! Script Broker: the three idempotent, atomic operations every endpoint
//! must support, expressed as Lua bodies plus the digest cache needed to
//! invoke them efficiently.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::endpoint::{Endpoint, ScriptArg, ScriptDigest};
use crate::error::TransportError;

pub(crate) const ACQUIRE_SCRIPT: &str = r#"
pcall(redis.call, "SELECT", ARGV[1])
for i = 2, #KEYS + 1 do
  if redis.call("EXISTS", KEYS[i - 1]) == 1 then
    return 0
  end
end
for i = 1, #KEYS do
  redis.call("SET", KEYS[i], ARGV[2], "PX", ARGV[3])
end
return #KEYS
"#;

pub(crate) const EXTEND_SCRIPT: &str = r#"
pcall(redis.call, "SELECT", ARGV[1])
for i = 1, #KEYS do
  if redis.call("GET", KEYS[i]) ~= ARGV[2] then
    return 0
  end
end
for i = 1, #KEYS do
  redis.call("SET", KEYS[i], ARGV[2], "PX", ARGV[3])
end
return #KEYS
"#;

pub(crate) const RELEASE_SCRIPT: &str = r#"
pcall(redis.call, "SELECT", ARGV[1])
local removed = 0
for i = 1, #KEYS do
  if redis.call("GET", KEYS[i]) == ARGV[2] then
    redis.call("DEL", KEYS[i])
    removed = removed + 1
  end
end
return removed
"#;

/// Process-wide digest cache, keyed by endpoint identity and script body.
///
/// Shared across broker instances so repeated `Redlock` construction within
/// one process doesn't re-issue `SCRIPT LOAD` needlessly. A cache miss is
/// handled by [`Endpoint::eval_script`] itself (reload-on-`NOSCRIPT`); this
/// map only avoids the *first* load on a warm endpoint.
type DigestCache = DashMap<(usize, &'static str), ScriptDigest>;

fn digest_cache() -> &'static DigestCache {
    static CACHE: std::sync::OnceLock<DigestCache> = std::sync::OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// Issues the acquire/extend/release scripts against a single endpoint,
/// transparently handling the script-cache-miss reload path.
pub struct ScriptBroker {
    endpoint_index: usize,
    endpoint: Arc<dyn Endpoint>,
}

impl ScriptBroker {
    pub fn new(endpoint_index: usize, endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            endpoint_index,
            endpoint,
        }
    }

    async fn digest_for(&self, body: &'static str) -> Result<ScriptDigest, TransportError> {
        if let Some(cached) = digest_cache().get(&(self.endpoint_index, body)) {
            return Ok(cached.clone());
        }
        let digest = self.endpoint.load_script(body).await?;
        digest_cache().insert((self.endpoint_index, body), digest.clone());
        Ok(digest)
    }

    async fn invoke(
        &self,
        body: &'static str,
        keys: &[String],
        args: &[ScriptArg],
        db: i64,
    ) -> Result<i64, TransportError> {
        let digest = self.digest_for(body).await?;
        self.endpoint
            .eval_script(&digest, body, keys, args, db)
            .await
    }

    /// `acquire(keys, value, ttl_ms, db)`. Returns `len(keys)` on success or
    /// `0` if any key was already occupied.
    pub async fn acquire(
        &self,
        resources: &[String],
        value: &str,
        ttl_ms: i64,
        db: i64,
    ) -> Result<i64, TransportError> {
        let args = [
            ScriptArg::from(db),
            ScriptArg::from(value.to_string()),
            ScriptArg::from(ttl_ms),
        ];
        debug!(endpoint = self.endpoint_index, resources = ?resources, "dispatching acquire");
        self.invoke(ACQUIRE_SCRIPT, resources, &args, db).await
    }

    /// `extend(keys, value, ttl_ms, db)`. Returns `len(keys)` on success or
    /// `0` if the value no longer matches.
    pub async fn extend(
        &self,
        resources: &[String],
        value: &str,
        ttl_ms: i64,
        db: i64,
    ) -> Result<i64, TransportError> {
        let args = [
            ScriptArg::from(db),
            ScriptArg::from(value.to_string()),
            ScriptArg::from(ttl_ms),
        ];
        debug!(endpoint = self.endpoint_index, resources = ?resources, "dispatching extend");
        self.invoke(EXTEND_SCRIPT, resources, &args, db).await
    }

    /// `release(keys, value, db)`. Returns the number of keys actually removed.
    pub async fn release(
        &self,
        resources: &[String],
        value: &str,
        db: i64,
    ) -> Result<i64, TransportError> {
        let args = [ScriptArg::from(db), ScriptArg::from(value.to_string())];
        debug!(endpoint = self.endpoint_index, resources = ?resources, "dispatching release");
        self.invoke(RELEASE_SCRIPT, resources, &args, db).await
    }
}
