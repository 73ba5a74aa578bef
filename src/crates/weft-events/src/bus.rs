//! Publish/subscribe event bus with pluggable backends
//!
//! The bus moves [`EventEnvelope`]s between subsystems over named channels.
//! Two backends ship with this crate:
//!
//! - [`InMemoryEventBus`] — envelopes are delivered to subscribers during
//!   `publish`; an `Ack` means every subscriber was attempted. The default
//!   for tests and single-process deployments.
//! - [`LogEventBus`] — envelopes are appended to an in-process per-channel
//!   log first (`Ack` carries the log offset), then drained to consumer
//!   groups tracking their own offsets. New groups replay the channel from
//!   offset zero, giving at-least-once delivery with replay.
//!
//! # Delivery contract
//!
//! ```text
//! publish(channel, envelope)
//!        │
//!        ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ per subscription:                                   │
//! │   schema gate ──incompatible──► DLQ ("incompatible  │
//! │        │                         schema")           │
//! │        ▼ ok                                         │
//! │   handler(envelope)                                 │
//! │        │ Err → retry (max_delivery_attempts)        │
//! │        ▼ exhausted                                  │
//! │   DLQ ("handler failure", error detail)             │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Guarantees: FIFO per channel per publisher (a publisher awaiting each
//! `publish` observes its envelopes delivered in order); no ordering across
//! channels; at-least-once per consumer group. Handler failures never
//! propagate to the publisher — they end in the dead-letter queue.
//!
//! # Schema gate
//!
//! A subscription may declare the event type and schema version it expects
//! ([`SubscriptionOptions`]). At delivery time the envelope must carry that
//! type and a major-compatible version — checked against the
//! [`SchemaRegistry`] when one is attached, or by direct major comparison
//! otherwise. Envelopes failing the gate go to the DLQ with reason
//! `"incompatible schema"` instead of reaching the handler.

use crate::dlq::DeadLetterQueue;
use crate::envelope::{parse_semver, EventEnvelope};
use crate::error::{EventError, Result};
use crate::registry::SchemaRegistry;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Identifier returned by `subscribe`, consumed by `unsubscribe`
pub type SubscriptionId = String;

/// Async subscriber callback
pub type EventHandler =
    Arc<dyn Fn(EventEnvelope) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`]
pub fn handler_fn<F, Fut>(f: F) -> EventHandler
where
    F: Fn(EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |envelope| Box::pin(f(envelope)))
}

/// Acknowledgement of a durable publish handoff
///
/// For the in-memory backend an ack means the envelope was delivered to
/// every current subscriber; for the log backend it means the envelope was
/// appended to the channel log at `offset`.
#[derive(Debug, Clone)]
pub struct Ack {
    pub envelope_id: String,
    pub channel: String,
    pub offset: Option<u64>,
}

/// Per-subscription delivery options
#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    /// Consumer group; subscriptions sharing a group share one delivery
    /// stream and offset. Defaults to a unique group per subscription
    /// (broadcast semantics).
    pub group: Option<String>,

    /// Expected event type; envelopes of other types fail the schema gate
    pub expected_type: Option<String>,

    /// Expected schema version; envelopes with a different major fail the gate
    pub expected_version: Option<String>,
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn expecting(
        mut self,
        event_type: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.expected_type = Some(event_type.into());
        self.expected_version = Some(version.into());
        self
    }
}

/// Backend selection for [`EventBusConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventBusBackend {
    /// Deliver inline during publish
    #[default]
    InMemory,

    /// Append-only log with replay and consumer-group offsets
    StreamLog,

    /// Append-only log partitioned per channel
    ///
    /// The in-process [`LogEventBus`] keeps one log per channel, so this
    /// and [`EventBusBackend::StreamLog`] share the implementation; the
    /// distinction matters for external backends.
    LogPartitioned,
}

/// Bus tunables
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub backend: EventBusBackend,

    /// How many times a failing handler is attempted before the envelope is
    /// dead-lettered
    pub max_delivery_attempts: u32,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            backend: EventBusBackend::InMemory,
            max_delivery_attempts: 3,
        }
    }
}

impl EventBusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: EventBusBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts.max(1);
        self
    }
}

/// Publish/subscribe contract over named channels
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an envelope; success is a durable handoff per backend
    /// semantics
    async fn publish(&self, channel: &str, envelope: EventEnvelope) -> Result<Ack>;

    /// Subscribe with default options (unique consumer group, no schema gate)
    async fn subscribe(&self, channel: &str, handler: EventHandler) -> Result<SubscriptionId> {
        self.subscribe_with(channel, handler, SubscriptionOptions::default())
            .await
    }

    /// Subscribe with explicit group / expected-schema options
    async fn subscribe_with(
        &self,
        channel: &str,
        handler: EventHandler,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionId>;

    /// Remove a subscription; unknown ids are a no-op
    async fn unsubscribe(&self, id: &str) -> Result<()>;
}

/// Build a bus for the configured backend
pub fn create_event_bus(
    config: EventBusConfig,
    registry: Option<Arc<SchemaRegistry>>,
    dlq: Option<Arc<DeadLetterQueue>>,
) -> Arc<dyn EventBus> {
    match config.backend {
        EventBusBackend::InMemory => Arc::new(InMemoryEventBus::new(config, registry, dlq)),
        EventBusBackend::StreamLog | EventBusBackend::LogPartitioned => {
            Arc::new(LogEventBus::new(config, registry, dlq))
        }
    }
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    handler: EventHandler,
    options: SubscriptionOptions,
}

/// Check an envelope against a subscription's expected schema
///
/// Returns the rejection reason when the envelope must not reach the handler.
async fn schema_gate(
    registry: Option<&SchemaRegistry>,
    options: &SubscriptionOptions,
    envelope: &EventEnvelope,
) -> Option<String> {
    let Some(expected_type) = options.expected_type.as_deref() else {
        return None;
    };

    if envelope.event_type != expected_type {
        return Some(format!(
            "expected type '{}', got '{}'",
            expected_type, envelope.event_type
        ));
    }

    let Some(expected_version) = options.expected_version.as_deref() else {
        return None;
    };

    let compatible = match registry {
        Some(registry) => {
            registry
                .is_compatible(expected_type, &envelope.schema_version, expected_version)
                .await
        }
        // No registry attached: fall back to comparing majors directly.
        None => match (
            parse_semver(&envelope.schema_version),
            parse_semver(expected_version),
        ) {
            (Ok((from, _, _)), Ok((to, _, _))) => from == to,
            _ => false,
        },
    };

    if compatible {
        None
    } else {
        Some(format!(
            "version {} is not compatible with expected {}",
            envelope.schema_version, expected_version
        ))
    }
}

/// Attempt delivery with retries; returns the final error message on
/// exhaustion
async fn deliver_with_retry(
    subscription: &Subscription,
    envelope: &EventEnvelope,
    max_attempts: u32,
) -> std::result::Result<(), String> {
    let mut last_error = String::new();
    for attempt in 1..=max_attempts {
        match (subscription.handler)(envelope.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_error = e.to_string();
                tracing::warn!(
                    envelope_id = %envelope.id,
                    channel = %envelope.channel_name,
                    attempt,
                    error = %last_error,
                    "Event handler failed"
                );
            }
        }
    }
    Err(last_error)
}

/// Route a delivery failure to the DLQ, if one is attached
async fn dead_letter(
    dlq: Option<&Arc<DeadLetterQueue>>,
    envelope: &EventEnvelope,
    reason: &str,
    detail: Option<String>,
) {
    match dlq {
        Some(dlq) => {
            dlq.push(envelope.clone(), reason, detail).await;
        }
        None => {
            tracing::error!(
                envelope_id = %envelope.id,
                channel = %envelope.channel_name,
                reason,
                "Envelope dropped: no dead-letter queue attached"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Deliver-on-publish bus
///
/// `publish` walks the channel's subscriptions in registration order and
/// awaits each delivery, so a publisher that awaits its own publishes gets
/// per-channel FIFO for free.
pub struct InMemoryEventBus {
    config: EventBusConfig,
    registry: Option<Arc<SchemaRegistry>>,
    dlq: Option<Arc<DeadLetterQueue>>,
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    // subscription id -> channel, for unsubscribe
    index: RwLock<HashMap<SubscriptionId, String>>,
}

impl InMemoryEventBus {
    pub fn new(
        config: EventBusConfig,
        registry: Option<Arc<SchemaRegistry>>,
        dlq: Option<Arc<DeadLetterQueue>>,
    ) -> Self {
        Self {
            config,
            registry,
            dlq,
            subscriptions: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, channel: &str, envelope: EventEnvelope) -> Result<Ack> {
        let subscribers: Vec<Subscription> = {
            let subs = self.subscriptions.read().await;
            subs.get(channel).cloned().unwrap_or_default()
        };

        for subscription in &subscribers {
            if let Some(reason) =
                schema_gate(self.registry.as_deref(), &subscription.options, &envelope).await
            {
                dead_letter(
                    self.dlq.as_ref(),
                    &envelope,
                    "incompatible schema",
                    Some(reason),
                )
                .await;
                continue;
            }

            if let Err(error) =
                deliver_with_retry(subscription, &envelope, self.config.max_delivery_attempts).await
            {
                dead_letter(self.dlq.as_ref(), &envelope, "handler failure", Some(error)).await;
            }
        }

        Ok(Ack {
            envelope_id: envelope.id,
            channel: channel.to_string(),
            offset: None,
        })
    }

    async fn subscribe_with(
        &self,
        channel: &str,
        handler: EventHandler,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionId> {
        if let Some(version) = options.expected_version.as_deref() {
            parse_semver(version)?;
        }

        let id = Uuid::new_v4().to_string();
        let subscription = Subscription {
            id: id.clone(),
            handler,
            options,
        };

        self.subscriptions
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(subscription);
        self.index.write().await.insert(id.clone(), channel.to_string());

        Ok(id)
    }

    async fn unsubscribe(&self, id: &str) -> Result<()> {
        let channel = self.index.write().await.remove(id);
        if let Some(channel) = channel {
            let mut subs = self.subscriptions.write().await;
            if let Some(list) = subs.get_mut(&channel) {
                list.retain(|s| s.id != id);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log-partitioned backend
// ---------------------------------------------------------------------------

struct GroupState {
    offset: usize,
    members: Vec<Subscription>,
}

#[derive(Default)]
struct LogState {
    // channel -> append-only envelope log
    logs: HashMap<String, Vec<EventEnvelope>>,
    // channel -> group name -> state
    groups: HashMap<String, HashMap<String, GroupState>>,
    // subscription id -> (channel, group)
    index: HashMap<SubscriptionId, (String, String)>,
}

/// Append-log bus with consumer-group offsets
///
/// `publish` acks once the envelope is in the channel log; delivery to each
/// consumer group happens from the group's stored offset, so a new group
/// replays the channel from the beginning and a group that falls behind
/// catches up in order. A group is one logical consumer: its first member
/// handles deliveries, additional members are failover.
pub struct LogEventBus {
    config: EventBusConfig,
    registry: Option<Arc<SchemaRegistry>>,
    dlq: Option<Arc<DeadLetterQueue>>,
    state: RwLock<LogState>,
    // Serializes draining per bus so channel order is never interleaved.
    drain_lock: Mutex<()>,
}

impl LogEventBus {
    pub fn new(
        config: EventBusConfig,
        registry: Option<Arc<SchemaRegistry>>,
        dlq: Option<Arc<DeadLetterQueue>>,
    ) -> Self {
        Self {
            config,
            registry,
            dlq,
            state: RwLock::new(LogState::default()),
            drain_lock: Mutex::new(()),
        }
    }

    /// Current length of a channel's log
    pub async fn log_len(&self, channel: &str) -> usize {
        self.state
            .read()
            .await
            .logs
            .get(channel)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// A consumer group's current offset
    pub async fn group_offset(&self, channel: &str, group: &str) -> Option<usize> {
        self.state
            .read()
            .await
            .groups
            .get(channel)
            .and_then(|g| g.get(group))
            .map(|s| s.offset)
    }

    /// Deliver pending log entries to every group of a channel
    async fn drain(&self, channel: &str) {
        let _guard = self.drain_lock.lock().await;

        loop {
            // Snapshot the next pending (group, envelope) pairs without
            // holding the state lock across handler calls.
            let pending: Vec<(String, Subscription, EventEnvelope)> = {
                let state = self.state.read().await;
                let Some(log) = state.logs.get(channel) else { return };
                let Some(groups) = state.groups.get(channel) else { return };

                groups
                    .iter()
                    .filter_map(|(name, group)| {
                        let member = group.members.first()?;
                        let envelope = log.get(group.offset)?;
                        Some((name.clone(), member.clone(), envelope.clone()))
                    })
                    .collect()
            };

            if pending.is_empty() {
                return;
            }

            for (group_name, subscription, envelope) in pending {
                if let Some(reason) =
                    schema_gate(self.registry.as_deref(), &subscription.options, &envelope).await
                {
                    dead_letter(
                        self.dlq.as_ref(),
                        &envelope,
                        "incompatible schema",
                        Some(reason),
                    )
                    .await;
                } else if let Err(error) =
                    deliver_with_retry(&subscription, &envelope, self.config.max_delivery_attempts)
                        .await
                {
                    // At-least-once was honored; park the poison envelope and
                    // move on so the group is not wedged forever.
                    dead_letter(self.dlq.as_ref(), &envelope, "handler failure", Some(error))
                        .await;
                }

                let mut state = self.state.write().await;
                if let Some(group) = state
                    .groups
                    .get_mut(channel)
                    .and_then(|g| g.get_mut(&group_name))
                {
                    group.offset += 1;
                }
            }
        }
    }
}

#[async_trait]
impl EventBus for LogEventBus {
    async fn publish(&self, channel: &str, envelope: EventEnvelope) -> Result<Ack> {
        let (envelope_id, offset) = {
            let mut state = self.state.write().await;
            let log = state.logs.entry(channel.to_string()).or_default();
            log.push(envelope.clone());
            (envelope.id.clone(), (log.len() - 1) as u64)
        };

        self.drain(channel).await;

        Ok(Ack {
            envelope_id,
            channel: channel.to_string(),
            offset: Some(offset),
        })
    }

    async fn subscribe_with(
        &self,
        channel: &str,
        handler: EventHandler,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionId> {
        if let Some(version) = options.expected_version.as_deref() {
            parse_semver(version)?;
        }

        let id = Uuid::new_v4().to_string();
        let group_name = options
            .group
            .clone()
            .unwrap_or_else(|| format!("group-{}", id));
        let subscription = Subscription {
            id: id.clone(),
            handler,
            options,
        };

        {
            let mut state = self.state.write().await;
            state
                .groups
                .entry(channel.to_string())
                .or_default()
                .entry(group_name.clone())
                .or_insert_with(|| GroupState {
                    offset: 0,
                    members: Vec::new(),
                })
                .members
                .push(subscription);
            state
                .index
                .insert(id.clone(), (channel.to_string(), group_name));
        }

        // Replay the backlog to the (possibly new) group.
        self.drain(channel).await;

        Ok(id)
    }

    async fn unsubscribe(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some((channel, group_name)) = state.index.remove(id) {
            if let Some(group) = state
                .groups
                .get_mut(&channel)
                .and_then(|g| g.get_mut(&group_name))
            {
                // The group's offset survives so a re-subscribed consumer
                // continues where the group left off.
                group.members.retain(|s| s.id != id);
            }
        }
        Ok(())
    }
}
