//! In-process mock [`Endpoint`] used by this crate's own tests and
//! available to downstream callers who want to exercise `Redlock` without a
//! real server. Not behind a feature flag for the same reason the teacher's
//! own service modules keep their test doubles inline: keeping it in the
//! main crate means the mock and the real semantics can't silently drift.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::broker::{ACQUIRE_SCRIPT, EXTEND_SCRIPT, RELEASE_SCRIPT};
use crate::endpoint::{Endpoint, ScriptArg, ScriptDigest};
use crate::error::TransportError;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// A single simulated endpoint: a key→(value, expiry) map guarded by a
/// mutex, plus the three scripts interpreted directly in Rust instead of
/// round-tripping through a Lua VM.
pub struct MockEndpoint {
    store: Mutex<HashMap<String, Entry>>,
    loads: AtomicU32,
    /// When true, every call fails with a transport error (simulates an
    /// unreachable endpoint).
    unreachable: std::sync::atomic::AtomicBool,
}

impl MockEndpoint {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            loads: AtomicU32::new(0),
            unreachable: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn unreachable() -> Self {
        let ep = Self::new();
        ep.unreachable.store(true, Ordering::SeqCst);
        ep
    }

    pub fn set_unreachable(&self, value: bool) {
        self.unreachable.store(value, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> u32 {
        self.loads.load(Ordering::SeqCst)
    }

    /// Directly inspect a key's current value, ignoring expiry bookkeeping
    /// races; used by tests asserting post-conditions.
    pub fn get(&self, key: &str) -> Option<String> {
        let store = self.store.lock().unwrap();
        store.get(key).filter(|e| e.expires_at > Instant::now()).map(|e| e.value.clone())
    }

    /// Remaining TTL for a key, if present and unexpired.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let store = self.store.lock().unwrap();
        store
            .get(key)
            .map(|e| e.expires_at.saturating_duration_since(Instant::now()))
    }

    fn check_reachable(&self) -> Result<(), TransportError> {
        if self.unreachable.load(Ordering::SeqCst) {
            Err(TransportError("Connection is closed.".to_string()))
        } else {
            Ok(())
        }
    }

    fn run_acquire(&self, keys: &[String], value: &str, ttl_ms: i64) -> i64 {
        let mut store = self.store.lock().unwrap();
        let now = Instant::now();
        for key in keys {
            if let Some(entry) = store.get(key) {
                if entry.expires_at > now {
                    return 0;
                }
            }
        }
        let expires_at = now + Duration::from_millis(ttl_ms.max(0) as u64);
        for key in keys {
            store.insert(
                key.clone(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
        }
        keys.len() as i64
    }

    fn run_extend(&self, keys: &[String], value: &str, ttl_ms: i64) -> i64 {
        let mut store = self.store.lock().unwrap();
        let now = Instant::now();
        for key in keys {
            match store.get(key) {
                Some(entry) if entry.expires_at > now && entry.value == value => {}
                _ => return 0,
            }
        }
        let expires_at = now + Duration::from_millis(ttl_ms.max(0) as u64);
        for key in keys {
            store.insert(
                key.clone(),
                Entry {
                    value: value.to_string(),
                    expires_at,
                },
            );
        }
        keys.len() as i64
    }

    fn run_release(&self, keys: &[String], value: &str) -> i64 {
        let mut store = self.store.lock().unwrap();
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = store.get(key) {
                if entry.expires_at > now && entry.value == value {
                    store.remove(key);
                    removed += 1;
                }
            }
        }
        removed
    }
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

fn string_arg(args: &[ScriptArg], idx: usize) -> String {
    match &args[idx] {
        ScriptArg::Str(s) => s.clone(),
        ScriptArg::Int(n) => n.to_string(),
    }
}

fn int_arg(args: &[ScriptArg], idx: usize) -> i64 {
    match &args[idx] {
        ScriptArg::Int(n) => *n,
        ScriptArg::Str(s) => s.parse().unwrap_or(0),
    }
}

#[async_trait]
impl Endpoint for MockEndpoint {
    async fn load_script(&self, _body: &str) -> Result<ScriptDigest, TransportError> {
        self.check_reachable()?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptDigest("mock-digest".to_string()))
    }

    async fn eval_script(
        &self,
        _digest: &ScriptDigest,
        body: &str,
        keys: &[String],
        args: &[ScriptArg],
        _db: i64,
    ) -> Result<i64, TransportError> {
        self.check_reachable()?;
        // args[0] is always the db index, mirroring the real Lua bodies.
        if body == ACQUIRE_SCRIPT {
            let value = string_arg(args, 1);
            let ttl_ms = int_arg(args, 2);
            Ok(self.run_acquire(keys, &value, ttl_ms))
        } else if body == EXTEND_SCRIPT {
            let value = string_arg(args, 1);
            let ttl_ms = int_arg(args, 2);
            Ok(self.run_extend(keys, &value, ttl_ms))
        } else if body == RELEASE_SCRIPT {
            let value = string_arg(args, 1);
            Ok(self.run_release(keys, &value))
        } else {
            Err(TransportError("unknown script".to_string()))
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.check_reachable()
    }
}
