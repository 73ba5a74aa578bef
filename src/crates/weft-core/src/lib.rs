//! # weft-core - Agentic Workflow Graph Execution Engine
//!
//! Weft executes user-defined directed graphs of computation nodes — LLM
//! agents, tools, decisions, human-in-the-loop pauses, parallel fan-outs,
//! and nested subgraphs — over a typed [`Message`](message::Message)
//! carrying content, a data blackboard, tracing metadata, and a lifecycle
//! state machine. Runs are long-lived and resumable: any node may suspend
//! pending an external event, and a later resume call — on the same or a
//! different process — continues from the persisted checkpoint.
//!
//! ## Core pieces
//!
//! | Piece | Module |
//! |---|---|
//! | Message + state machine | [`message`] |
//! | Typed metadata context | [`context`] |
//! | Node variants | [`node`], [`decision`], [`human`], [`parallel`], [`subgraph`], [`tool`] |
//! | Edges + graph + builder | [`edge`], [`graph`], [`builder`] |
//! | The scheduler | [`runner`] |
//! | Transformer chain | [`middleware`] |
//! | Tool cache / idempotency | [`idempotency`] |
//! | Reports | [`report`] |
//!
//! Checkpointing lives in the `weft-checkpoint` crate; the event envelope,
//! schema registry, event bus, and dead-letter queue live in `weft-events`.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use weft_core::agent::FnAgent;
//! use weft_core::graph::Graph;
//! use weft_core::message::Message;
//! use weft_core::node::{AgentNode, OutputNode};
//! use weft_core::runner::Runner;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shout = Arc::new(FnAgent::new("shout", |msg: Message| async move {
//!         let content = msg.content.to_uppercase();
//!         Ok(msg.with_content(content))
//!     }));
//!
//!     let graph = Graph::builder("demo")
//!         .add_node(AgentNode::new("shout", shout))
//!         .add_node(OutputNode::from_data_key("out", "shout"))
//!         .set_entry_point("shout")
//!         .add_edge("shout", "out")
//!         .build()?;
//!
//!     let report = Runner::new().run(&graph, Message::text("hello")).await?;
//!     assert_eq!(report.result, Some(serde_json::json!("HELLO")));
//!     Ok(())
//! }
//! ```
//!
//! ## Suspension at a glance
//!
//! A human node emits a `waiting` message; the runner writes a checkpoint
//! and returns a `PAUSED` report carrying the checkpoint id and the pending
//! interaction. `Runner::resume` validates the supplied response and
//! continues from the paused node's outgoing edges. Subgraph pauses chain:
//! the parent checkpoint links the child checkpoint, and resume is child
//! first.

pub mod agent;
pub mod builder;
pub mod config;
pub mod context;
pub mod decision;
pub mod edge;
pub mod error;
pub mod graph;
pub mod human;
pub mod idempotency;
pub mod message;
pub mod middleware;
pub mod node;
pub mod parallel;
pub mod report;
pub mod runner;
pub mod subgraph;
pub mod tool;

pub use agent::{Agent, FnAgent};
pub use builder::GraphBuilder;
pub use config::RunnerConfig;
pub use context::AgentContext;
pub use decision::{Branch, DecisionNode};
pub use edge::Edge;
pub use error::{EngineError, Result};
pub use graph::Graph;
pub use human::{DynamicHumanNode, HumanInteraction, HumanNode, InteractionOption};
pub use idempotency::{
    fingerprint, CacheConfig, CacheKind, IdempotencyStore, InMemoryIdempotencyStore,
};
pub use message::{Message, MessageState, MessageType, StateTransition, ToolCall};
pub use middleware::{MessageTransformer, TransformerChain};
pub use node::{AgentNode, Node, NodeHandler, OutputNode};
pub use parallel::{MergeNode, MergeStrategy, ParallelNode};
pub use report::{NodeReport, NodeStatus, Report, RunStatus};
pub use runner::Runner;
pub use subgraph::SubgraphNode;
pub use tool::{
    FnTool, Tool, ToolCallEvent, ToolCallEventBus, ToolError, ToolLifecycleListener, ToolNode,
};

// Re-exported for downstream convenience: the persistence and event crates
// are part of the engine's public contract.
pub use weft_checkpoint;
pub use weft_events;
