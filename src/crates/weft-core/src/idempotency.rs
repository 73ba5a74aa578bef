//! Content-addressed at-most-once cache for tool, step, and intent results
//!
//! Deterministic work is fingerprinted — a SHA-256 over the tool name and
//! the *canonicalized* arguments (object keys recursively sorted, so two
//! semantically equal argument maps hash identically) — and executed at most
//! once per fingerprint within the TTL window of its [`CacheKind`].
//! Concurrent callers of the same fingerprint are collapsed by a
//! single-flight guard: one invokes, the rest await and read the cached
//! result.
//!
//! The cache is optional. With no store configured, lookups miss and stores
//! are no-ops; the engine degrades to plain re-execution.
//!
//! ```text
//! fingerprint(tool, args)
//!        │
//!        ▼ get(key, kind)
//!   fresh entry? ──yes──► cached value, tool not invoked
//!        │ no
//!        ▼ single-flight lock(key)
//!   re-check, invoke once, put(key, kind, value, ttl)
//! ```
//!
//! Failures are never cached. A fingerprint stored under one kind and read
//! under another is a [`CacheKeyConflict`](crate::EngineError::CacheKeyConflict).

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// What kind of work a cache entry memoizes; determines the default TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// A single tool invocation (default TTL: 1 hour)
    ToolCall,
    /// A workflow step result (default TTL: 6 hours)
    Step,
    /// A resolved user intent (default TTL: 1 day)
    Intent,
}

impl CacheKind {
    /// Default freshness window for this kind
    pub fn default_ttl(&self) -> Duration {
        match self {
            CacheKind::ToolCall => Duration::from_secs(60 * 60),
            CacheKind::Step => Duration::from_secs(6 * 60 * 60),
            CacheKind::Intent => Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Serialize a value with object keys recursively sorted
fn canonicalize(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                canonicalize(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Stable fingerprint of a tool invocation
///
/// Key order in `arguments` does not affect the result.
pub fn fingerprint(tool_name: &str, arguments: &serde_json::Value) -> String {
    let mut canonical = String::new();
    canonicalize(arguments, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\x00");
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// At-most-once result cache
///
/// Implementations must be thread-safe; the engine accesses the store from
/// concurrent runs.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Fresh cached value for the fingerprint, if any
    ///
    /// Expired entries behave as misses. Reading a fingerprint stored under
    /// a different kind fails with `CacheKeyConflict`.
    async fn get(&self, key: &str, kind: CacheKind) -> Result<Option<serde_json::Value>>;

    /// Store a successful result; `ttl` defaults to the kind's TTL
    async fn put(
        &self,
        key: &str,
        kind: CacheKind,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<()>;

    /// Drop one entry
    async fn remove(&self, key: &str) -> Result<()>;

    /// Drop all expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<usize>;
}

/// Cache tunables for the in-memory store
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL override for [`CacheKind::ToolCall`]
    pub tool_call_ttl: Duration,
    /// TTL override for [`CacheKind::Step`]
    pub step_ttl: Duration,
    /// TTL override for [`CacheKind::Intent`]
    pub intent_ttl: Duration,
    /// Optional size cap; oldest entries are evicted past it
    pub max_entries: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tool_call_ttl: CacheKind::ToolCall.default_ttl(),
            step_ttl: CacheKind::Step.default_ttl(),
            intent_ttl: CacheKind::Intent.default_ttl(),
            max_entries: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool_call_ttl(mut self, ttl: Duration) -> Self {
        self.tool_call_ttl = ttl;
        self
    }

    pub fn with_step_ttl(mut self, ttl: Duration) -> Self {
        self.step_ttl = ttl;
        self
    }

    pub fn with_intent_ttl(mut self, ttl: Duration) -> Self {
        self.intent_ttl = ttl;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    fn ttl_for(&self, kind: CacheKind) -> Duration {
        match kind {
            CacheKind::ToolCall => self.tool_call_ttl,
            CacheKind::Step => self.step_ttl,
            CacheKind::Intent => self.intent_ttl,
        }
    }
}

/// Hit/miss counters
#[derive(Debug, Default, Clone)]
pub struct CacheMetrics {
    pub hits: usize,
    pub misses: usize,
    pub stores: usize,
    pub evictions: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    kind: CacheKind,
    created_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// In-memory reference implementation of [`IdempotencyStore`]
pub struct InMemoryIdempotencyStore {
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    metrics: RwLock<CacheMetrics>,
}

impl InMemoryIdempotencyStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
            metrics: RwLock::new(CacheMetrics::default()),
        }
    }

    pub async fn metrics(&self) -> CacheMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str, kind: CacheKind) -> Result<Option<serde_json::Value>> {
        let mut entries = self.entries.write().await;

        match entries.get(key) {
            Some(entry) if entry.kind != kind => Err(EngineError::CacheKeyConflict {
                fingerprint: key.to_string(),
            }),
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                self.metrics.write().await.misses += 1;
                Ok(None)
            }
            Some(entry) => {
                let value = entry.value.clone();
                self.metrics.write().await.hits += 1;
                Ok(Some(value))
            }
            None => {
                self.metrics.write().await.misses += 1;
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        key: &str,
        kind: CacheKind,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let ttl = ttl.unwrap_or_else(|| self.config.ttl_for(kind));
        let now = Instant::now();

        let mut entries = self.entries.write().await;
        if let Some(cap) = self.config.max_entries {
            if entries.len() >= cap && !entries.contains_key(key) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.created_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    self.metrics.write().await.evictions += 1;
                }
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                kind,
                created_at: now,
                expires_at: now + ttl,
            },
        );
        self.metrics.write().await.stores += 1;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired());
        Ok(before - entries.len())
    }
}

/// Collapses concurrent invocations of the same fingerprint
///
/// `acquire` returns a guard; while it is held, other callers of the same
/// key await. Callers re-check the cache after acquiring, so only the first
/// one through actually invokes.
#[derive(Default)]
pub struct SingleFlight {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
