//! # weft-events - Versioned Event Envelopes, Bus, and Dead-Letter Queue
//!
//! The integration bus every other weft subsystem consumes. Events travel as
//! [`EventEnvelope`]s — semver-versioned, correlation/causation-tracked,
//! validated at construction — over an [`EventBus`] with pluggable backends,
//! gated by a [`SchemaRegistry`] and backed by a bounded [`DeadLetterQueue`]
//! for everything that cannot be delivered.
//!
//! ## Delivery guarantees
//!
//! - **At-least-once** per consumer group; no global exactly-once.
//! - **FIFO per channel within a single publisher**; no ordering across
//!   channels or across publishers.
//! - Handler errors are retried up to the configured attempt count, then the
//!   envelope is dead-lettered with the failure reason. Handler errors never
//!   reach the publisher.
//! - Schema-incompatible envelopes (major version mismatch against a
//!   subscriber's declared expectation) are dead-lettered with reason
//!   `"incompatible schema"`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use weft_events::{
//!     handler_fn, DeadLetterQueue, DlqConfig, EventBus, EventBusConfig,
//!     EventEnvelope, InMemoryEventBus,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dlq = Arc::new(DeadLetterQueue::new(DlqConfig::default()));
//!     let bus = InMemoryEventBus::new(EventBusConfig::default(), None, Some(dlq));
//!
//!     bus.subscribe(
//!         "orders",
//!         handler_fn(|envelope: EventEnvelope| async move {
//!             println!("got {} v{}", envelope.event_type, envelope.schema_version);
//!             Ok(())
//!         }),
//!     )
//!     .await?;
//!
//!     let envelope = EventEnvelope::new(
//!         "orders",
//!         "order.created",
//!         "1.0.0",
//!         r#"{"order_id": 7}"#,
//!     )?;
//!     bus.publish("orders", envelope).await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod dlq;
pub mod envelope;
pub mod error;
pub mod registry;

pub use bus::{
    create_event_bus, handler_fn, Ack, EventBus, EventBusBackend, EventBusConfig, EventHandler,
    InMemoryEventBus, LogEventBus, SubscriptionId, SubscriptionOptions,
};
pub use dlq::{DeadLetter, DeadLetterQueue, DlqConfig, DlqStats, EvictionHook};
pub use envelope::{parse_semver, EventEnvelope, EventMetadata};
pub use error::{EventError, Result};
pub use registry::{EventSerializer, JsonEventSerializer, SchemaInfo, SchemaRegistry};
