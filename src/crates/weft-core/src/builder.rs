//! Fluent graph construction with eager validation
//!
//! [`GraphBuilder`] collects nodes, edges, middleware, and subsystem
//! handles, then validates the whole structure in [`GraphBuilder::build`].
//! Edge declaration order is preserved and is the tie-break for
//! equal-priority routing.
//!
//! Adding a [`DecisionNode`] auto-generates one conditional edge per branch
//! target (and the `otherwise` target), conditioned on the decision's
//! recorded choice — decision routing is ordinary edge selection at run
//! time.
//!
//! ```rust
//! use std::sync::Arc;
//! use weft_core::agent::FnAgent;
//! use weft_core::graph::Graph;
//! use weft_core::message::Message;
//! use weft_core::node::{AgentNode, OutputNode};
//!
//! let agent = Arc::new(FnAgent::new("echo", |msg: Message| async move { Ok(msg) }));
//!
//! let graph = Graph::builder("pipeline")
//!     .add_node(AgentNode::new("step", agent))
//!     .add_node(OutputNode::from_data_key("out", "step"))
//!     .set_entry_point("step")
//!     .add_edge("step", "out")
//!     .build()
//!     .unwrap();
//! assert_eq!(graph.entry_point, "step");
//! ```

use crate::decision::DECISION_KEY;
use crate::edge::Edge;
use crate::error::{EngineError, Result};
use crate::graph::{Graph, DEFAULT_EVENT_CHANNEL};
use crate::idempotency::IdempotencyStore;
use crate::message::Message;
use crate::middleware::{MessageTransformer, TransformerChain};
use crate::node::Node;
use crate::tool::{ToolCallEventBus, ToolLifecycleListener};
use std::collections::HashMap;
use std::sync::Arc;
use weft_checkpoint::CheckpointStore;
use weft_events::EventBus;

/// Builder for [`Graph`]
pub struct GraphBuilder {
    id: String,
    nodes: HashMap<String, Node>,
    edges: Vec<Edge>,
    entry_point: Option<String>,
    middleware: TransformerChain,
    allow_cycles: bool,
    event_bus: Option<Arc<dyn EventBus>>,
    event_channel: String,
    tool_call_bus: Option<Arc<ToolCallEventBus>>,
    idempotency_store: Option<Arc<dyn IdempotencyStore>>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    tool_listeners: Vec<Arc<dyn ToolLifecycleListener>>,
    errors: Vec<String>,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            entry_point: None,
            middleware: TransformerChain::new(),
            allow_cycles: false,
            event_bus: None,
            event_channel: DEFAULT_EVENT_CHANNEL.to_string(),
            tool_call_bus: None,
            idempotency_store: None,
            checkpoint_store: None,
            tool_listeners: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Add a node; ids must be unique
    ///
    /// Decision nodes auto-generate their routing edges here.
    pub fn add_node(mut self, node: impl Into<Node>) -> Self {
        let node = node.into();
        let id = node.id().to_string();

        if let Node::Decision(decision) = &node {
            for (index, target) in decision.targets().into_iter().enumerate() {
                let expected = target.to_string();
                let target = target.to_string();
                self.edges.push(
                    Edge::new(id.clone(), target)
                        .with_priority(index as i32)
                        .with_condition(move |msg: &Message| {
                            msg.data(DECISION_KEY).and_then(|v| v.as_str())
                                == Some(expected.as_str())
                        })
                        .with_name(format!("{}:{}", id, index)),
                );
            }
        }

        if self.nodes.insert(id.clone(), node).is_some() {
            self.errors.push(format!("duplicate node id '{}'", id));
        }
        self
    }

    /// The node that receives the initial message
    pub fn set_entry_point(mut self, node_id: impl Into<String>) -> Self {
        self.entry_point = Some(node_id.into());
        self
    }

    /// Unconditional edge
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    /// Edge gated by a predicate over the message
    pub fn add_conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: F,
    ) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.edges.push(Edge::new(from, to).with_condition(condition));
        self
    }

    /// Edge taken only when no non-fallback edge matched
    pub fn add_fallback_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::fallback(from, to));
        self
    }

    /// Fully specified edge (priority, condition, fallback, name)
    pub fn add_edge_spec(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Append a transformer to the middleware chain
    pub fn with_middleware(mut self, transformer: Arc<dyn MessageTransformer>) -> Self {
        self.middleware.push(transformer);
        self
    }

    /// Keep running later transformers after one fails
    pub fn continue_on_middleware_failure(mut self, continue_on_failure: bool) -> Self {
        self.middleware.set_continue_on_failure(continue_on_failure);
        self
    }

    /// Permit cyclic routing (bounded by the runner's activation budget)
    pub fn allow_cycles(mut self, allow_cycles: bool) -> Self {
        self.allow_cycles = allow_cycles;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_event_channel(mut self, channel: impl Into<String>) -> Self {
        self.event_channel = channel.into();
        self
    }

    pub fn with_tool_call_bus(mut self, bus: Arc<ToolCallEventBus>) -> Self {
        self.tool_call_bus = Some(bus);
        self
    }

    pub fn with_idempotency_store(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency_store = Some(store);
        self
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn with_tool_listener(mut self, listener: Arc<dyn ToolLifecycleListener>) -> Self {
        self.tool_listeners.push(listener);
        self
    }

    /// Validate and produce the immutable graph
    pub fn build(self) -> Result<Graph> {
        if !self.errors.is_empty() {
            return Err(EngineError::Validation(self.errors.join("; ")));
        }

        let entry_point = self
            .entry_point
            .ok_or_else(|| EngineError::MissingEntryPoint("<unset>".to_string()))?;

        let graph = Graph {
            id: self.id,
            nodes: self.nodes,
            edges: self.edges,
            entry_point,
            middleware: self.middleware,
            allow_cycles: self.allow_cycles,
            event_bus: self.event_bus,
            event_channel: self.event_channel,
            tool_call_bus: self.tool_call_bus,
            idempotency_store: self.idempotency_store,
            checkpoint_store: self.checkpoint_store,
            tool_listeners: self.tool_listeners,
        };
        graph.validate()?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionNode;
    use crate::node::OutputNode;
    use serde_json::json;

    #[test]
    fn test_duplicate_node_id_rejected() {
        let result = Graph::builder("g")
            .add_node(OutputNode::content("same"))
            .add_node(OutputNode::content("same"))
            .set_entry_point("same")
            .build();
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_entry_point_required() {
        let result = Graph::builder("g").add_node(OutputNode::content("a")).build();
        assert!(matches!(result, Err(EngineError::MissingEntryPoint(_))));
    }

    #[test]
    fn test_decision_node_auto_edges() {
        let graph = Graph::builder("g")
            .add_node(
                DecisionNode::new("route")
                    .branch("yes", |m: &Message| {
                        m.data("ok").and_then(|v| v.as_bool()).unwrap_or(false)
                    })
                    .otherwise("no"),
            )
            .add_node(OutputNode::content("yes"))
            .add_node(OutputNode::content("no"))
            .set_entry_point("route")
            .build()
            .unwrap();

        let outgoing = graph.outgoing_edges("route");
        assert_eq!(outgoing.len(), 2);
        assert_eq!(outgoing[0].to, "yes");
        assert_eq!(outgoing[1].to, "no");

        // The auto-edges key off the recorded decision.
        let chose_yes = Message::text("x").with_data(DECISION_KEY, json!("yes"));
        assert!(outgoing[0].matches(&chose_yes));
        assert!(!outgoing[1].matches(&chose_yes));
    }
}
