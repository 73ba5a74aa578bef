//! Dead-letter queue: bounded capture of undeliverable envelopes
//!
//! When delivery retries are exhausted or an envelope fails the schema
//! compatibility gate, the bus parks it here instead of dropping it. The
//! queue is partitioned per channel with FIFO eviction: a channel past
//! `max_size_per_channel` evicts its own oldest entry first, and the queue
//! past the global `max_size` evicts the oldest entry across all channels.
//! Every eviction invokes the registered hook exactly once, so operators
//! can count and alert on loss.
//!
//! `retry` only records the attempt (`retry_count`, `last_retry_at`);
//! republishing the envelope is the caller's duty — the queue has no
//! reference to the bus and never re-delivers on its own.

use crate::envelope::EventEnvelope;
use crate::error::{EventError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Hook invoked once per evicted entry
pub type EvictionHook = Arc<dyn Fn(&DeadLetter) + Send + Sync>;

/// Capacity bounds for the queue
#[derive(Debug, Clone)]
pub struct DlqConfig {
    /// Global cap across all channels
    pub max_size: usize,

    /// Cap per channel
    pub max_size_per_channel: usize,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_size_per_channel: 1_000,
        }
    }
}

impl DlqConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_size_per_channel(mut self, max_size_per_channel: usize) -> Self {
        self.max_size_per_channel = max_size_per_channel;
        self
    }
}

/// An undeliverable envelope with its failure context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Unique id of this entry
    pub id: String,

    /// The envelope that could not be delivered
    pub envelope: EventEnvelope,

    /// Short failure reason, e.g. "handler failure", "incompatible schema"
    pub reason: String,

    /// Full error detail (message, stack) when available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    /// When the entry was enqueued
    pub enqueued_at: DateTime<Utc>,

    /// How many times `retry` has been called on this entry
    pub retry_count: u32,

    /// When `retry` was last called
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_retry_at: Option<DateTime<Utc>>,
}

/// Aggregate queue statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DlqStats {
    /// Entries currently held
    pub total: usize,

    /// Entries per channel
    pub per_channel: HashMap<String, usize>,

    /// Entries per failure reason
    pub per_reason: HashMap<String, usize>,

    /// Enqueue time of the oldest entry
    pub oldest: Option<DateTime<Utc>>,

    /// Enqueue time of the newest entry
    pub newest: Option<DateTime<Utc>>,

    /// Entries evicted since construction
    pub total_evicted: u64,
}

#[derive(Default)]
struct DlqInner {
    channels: HashMap<String, VecDeque<DeadLetter>>,
    total: usize,
    total_evicted: u64,
}

/// Bounded, per-channel partitioned dead-letter queue
pub struct DeadLetterQueue {
    config: DlqConfig,
    inner: RwLock<DlqInner>,
    on_evict: RwLock<Option<EvictionHook>>,
}

impl DeadLetterQueue {
    pub fn new(config: DlqConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(DlqInner::default()),
            on_evict: RwLock::new(None),
        }
    }

    /// Register the eviction hook (replaces any previous hook)
    pub async fn set_eviction_hook(&self, hook: EvictionHook) {
        *self.on_evict.write().await = Some(hook);
    }

    /// Park an undeliverable envelope, returning the entry id
    pub async fn push(
        &self,
        envelope: EventEnvelope,
        reason: impl Into<String>,
        error_detail: Option<String>,
    ) -> String {
        let letter = DeadLetter {
            id: Uuid::new_v4().to_string(),
            envelope,
            reason: reason.into(),
            error_detail,
            enqueued_at: Utc::now(),
            retry_count: 0,
            last_retry_at: None,
        };
        let id = letter.id.clone();
        let channel = letter.envelope.channel_name.clone();

        let mut evicted = Vec::new();
        {
            let mut inner = self.inner.write().await;

            let queue = inner.channels.entry(channel.clone()).or_default();
            if queue.len() >= self.config.max_size_per_channel {
                if let Some(old) = queue.pop_front() {
                    evicted.push(old);
                }
            }
            queue.push_back(letter);
            inner.total = inner.channels.values().map(|q| q.len()).sum();

            // Global bound: evict the oldest entry across all channels.
            while inner.total > self.config.max_size {
                let oldest_channel = inner
                    .channels
                    .iter()
                    .filter_map(|(name, q)| q.front().map(|l| (name.clone(), l.enqueued_at)))
                    .min_by_key(|(_, at)| *at)
                    .map(|(name, _)| name);
                let Some(name) = oldest_channel else { break };
                if let Some(q) = inner.channels.get_mut(&name) {
                    if let Some(old) = q.pop_front() {
                        evicted.push(old);
                    }
                }
                inner.total = inner.channels.values().map(|q| q.len()).sum();
            }

            inner.total_evicted += evicted.len() as u64;
            inner.channels.retain(|_, q| !q.is_empty());
        }

        if !evicted.is_empty() {
            let hook = self.on_evict.read().await;
            for letter in &evicted {
                tracing::warn!(
                    channel = %letter.envelope.channel_name,
                    reason = %letter.reason,
                    "Dead letter evicted"
                );
                if let Some(hook) = hook.as_ref() {
                    hook(letter);
                }
            }
        }

        id
    }

    /// Look up an entry by id
    pub async fn get(&self, id: &str) -> Option<DeadLetter> {
        let inner = self.inner.read().await;
        inner
            .channels
            .values()
            .flat_map(|q| q.iter())
            .find(|l| l.id == id)
            .cloned()
    }

    /// All entries of one channel, oldest first
    pub async fn list_channel(&self, channel: &str) -> Vec<DeadLetter> {
        let inner = self.inner.read().await;
        inner
            .channels
            .get(channel)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Record a retry attempt; does not republish
    pub async fn retry(&self, id: &str) -> Result<DeadLetter> {
        let mut inner = self.inner.write().await;
        for queue in inner.channels.values_mut() {
            if let Some(letter) = queue.iter_mut().find(|l| l.id == id) {
                letter.retry_count += 1;
                letter.last_retry_at = Some(Utc::now());
                return Ok(letter.clone());
            }
        }
        Err(EventError::DeadLetterNotFound(id.to_string()))
    }

    /// Remove an entry (after a successful caller-side republish)
    pub async fn remove(&self, id: &str) -> Result<DeadLetter> {
        let mut inner = self.inner.write().await;
        let mut removed = None;
        for queue in inner.channels.values_mut() {
            if let Some(pos) = queue.iter().position(|l| l.id == id) {
                removed = queue.remove(pos);
                break;
            }
        }
        inner.channels.retain(|_, q| !q.is_empty());
        inner.total = inner.channels.values().map(|q| q.len()).sum();
        removed.ok_or_else(|| EventError::DeadLetterNotFound(id.to_string()))
    }

    /// Entries currently held
    pub async fn size(&self) -> usize {
        self.inner.read().await.total
    }

    /// Entries currently held for one channel
    pub async fn channel_size(&self, channel: &str) -> usize {
        let inner = self.inner.read().await;
        inner.channels.get(channel).map(|q| q.len()).unwrap_or(0)
    }

    /// Aggregate statistics
    pub async fn get_stats(&self) -> DlqStats {
        let inner = self.inner.read().await;
        let mut stats = DlqStats {
            total: inner.total,
            total_evicted: inner.total_evicted,
            ..Default::default()
        };

        for (channel, queue) in &inner.channels {
            stats.per_channel.insert(channel.clone(), queue.len());
            for letter in queue {
                *stats.per_reason.entry(letter.reason.clone()).or_insert(0) += 1;
                stats.oldest = Some(match stats.oldest {
                    Some(t) if t <= letter.enqueued_at => t,
                    _ => letter.enqueued_at,
                });
                stats.newest = Some(match stats.newest {
                    Some(t) if t >= letter.enqueued_at => t,
                    _ => letter.enqueued_at,
                });
            }
        }

        stats
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(DlqConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn envelope(channel: &str, event_type: &str) -> EventEnvelope {
        EventEnvelope::new(channel, event_type, "1.0.0", "{}").unwrap()
    }

    #[tokio::test]
    async fn test_push_and_get() {
        let dlq = DeadLetterQueue::default();
        let id = dlq
            .push(envelope("a", "t"), "handler failure", Some("boom".into()))
            .await;

        let letter = dlq.get(&id).await.unwrap();
        assert_eq!(letter.reason, "handler failure");
        assert_eq!(letter.error_detail.as_deref(), Some("boom"));
        assert_eq!(dlq.size().await, 1);
    }

    #[tokio::test]
    async fn test_per_channel_eviction() {
        // Three envelopes into a channel capped at two: the two newest stay,
        // the oldest is evicted through the hook exactly once.
        let dlq = DeadLetterQueue::new(DlqConfig::new().with_max_size_per_channel(2));
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = evictions.clone();
        dlq.set_eviction_hook(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .await;

        dlq.push(envelope("a", "first"), "r", None).await;
        dlq.push(envelope("a", "second"), "r", None).await;
        dlq.push(envelope("a", "third"), "r", None).await;

        let entries = dlq.list_channel("a").await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].envelope.event_type, "second");
        assert_eq!(entries[1].envelope.event_type, "third");
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
        assert_eq!(dlq.get_stats().await.total_evicted, 1);
    }

    #[tokio::test]
    async fn test_global_eviction_takes_oldest_across_channels() {
        let dlq = DeadLetterQueue::new(
            DlqConfig::new()
                .with_max_size(2)
                .with_max_size_per_channel(10),
        );

        dlq.push(envelope("a", "oldest"), "r", None).await;
        dlq.push(envelope("b", "middle"), "r", None).await;
        dlq.push(envelope("c", "newest"), "r", None).await;

        assert_eq!(dlq.size().await, 2);
        assert_eq!(dlq.channel_size("a").await, 0);
        assert_eq!(dlq.channel_size("b").await, 1);
        assert_eq!(dlq.channel_size("c").await, 1);
        assert_eq!(dlq.get_stats().await.total_evicted, 1);
    }

    #[tokio::test]
    async fn test_retry_marks_without_republish() {
        let dlq = DeadLetterQueue::default();
        let id = dlq.push(envelope("a", "t"), "r", None).await;

        let letter = dlq.retry(&id).await.unwrap();
        assert_eq!(letter.retry_count, 1);
        assert!(letter.last_retry_at.is_some());

        let letter = dlq.retry(&id).await.unwrap();
        assert_eq!(letter.retry_count, 2);

        // Entry is still parked.
        assert_eq!(dlq.size().await, 1);
        assert!(matches!(
            dlq.retry("missing").await,
            Err(EventError::DeadLetterNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let dlq = DeadLetterQueue::default();
        let id = dlq.push(envelope("a", "t"), "r", None).await;

        dlq.remove(&id).await.unwrap();
        assert_eq!(dlq.size().await, 0);
        assert!(dlq.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let dlq = DeadLetterQueue::default();
        dlq.push(envelope("a", "t"), "handler failure", None).await;
        dlq.push(envelope("a", "t"), "handler failure", None).await;
        dlq.push(envelope("b", "t"), "incompatible schema", None).await;

        let stats = dlq.get_stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.per_channel.get("a"), Some(&2));
        assert_eq!(stats.per_channel.get("b"), Some(&1));
        assert_eq!(stats.per_reason.get("handler failure"), Some(&2));
        assert_eq!(stats.per_reason.get("incompatible schema"), Some(&1));
        assert!(stats.oldest.unwrap() <= stats.newest.unwrap());
    }

    #[tokio::test]
    async fn test_bounds_hold_under_load() {
        let dlq = DeadLetterQueue::new(
            DlqConfig::new()
                .with_max_size(20)
                .with_max_size_per_channel(5),
        );

        for i in 0..100 {
            let channel = format!("ch-{}", i % 7);
            dlq.push(envelope(&channel, "t"), "r", None).await;

            let stats = dlq.get_stats().await;
            assert!(stats.total <= 20);
            for count in stats.per_channel.values() {
                assert!(*count <= 5);
            }
        }
    }
}
