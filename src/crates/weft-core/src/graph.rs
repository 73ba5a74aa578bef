//! The immutable graph bundle
//!
//! A [`Graph`] is nodes + edges + an entry point + the middleware chain,
//! plus optional handles to the subsystems the runner integrates with: the
//! event bus, the tool-call notification bus, the idempotency store, the
//! checkpoint store, and tool lifecycle listeners. Graphs are built through
//! [`GraphBuilder`](crate::builder::GraphBuilder), validated eagerly, and
//! immutable afterwards — safe to share across concurrent runs.
//!
//! Validation checks, in order: entry-point existence, edge endpoint
//! existence, reachability of every node from the entry point, and the DAG
//! property (skipped when `allow_cycles` is set). Invalid graphs never
//! reach the runner.

use crate::edge::Edge;
use crate::error::{EngineError, Result};
use crate::middleware::TransformerChain;
use crate::node::Node;
use crate::tool::{ToolCallEventBus, ToolLifecycleListener};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use weft_checkpoint::CheckpointStore;
use weft_events::EventBus;

/// Default channel the runner publishes lifecycle events on
pub const DEFAULT_EVENT_CHANNEL: &str = "workflow.events";

/// Immutable bundle of nodes, edges, and subsystem handles
#[derive(Clone)]
pub struct Graph {
    /// Graph identifier
    pub id: String,

    /// Nodes by id
    pub nodes: HashMap<String, Node>,

    /// Edges in declaration order
    pub edges: Vec<Edge>,

    /// Node receiving the initial message
    pub entry_point: String,

    /// Cross-cutting transformer chain
    pub middleware: TransformerChain,

    /// Whether cyclic routing is permitted
    pub allow_cycles: bool,

    /// Lifecycle events are published here, when attached
    pub event_bus: Option<Arc<dyn EventBus>>,

    /// Channel name for lifecycle events
    pub event_channel: String,

    /// Tool invocation notification bus
    pub tool_call_bus: Option<Arc<ToolCallEventBus>>,

    /// At-most-once cache for tool results
    pub idempotency_store: Option<Arc<dyn crate::idempotency::IdempotencyStore>>,

    /// Default checkpoint store for suspension
    pub checkpoint_store: Option<Arc<dyn CheckpointStore>>,

    /// Synchronous tool lifecycle observers
    pub tool_listeners: Vec<Arc<dyn ToolLifecycleListener>>,
}

impl Graph {
    /// Start building a graph
    pub fn builder(id: impl Into<String>) -> crate::builder::GraphBuilder {
        crate::builder::GraphBuilder::new(id)
    }

    /// Outgoing edges of a node, by ascending priority
    ///
    /// The sort is stable: equal priorities keep declaration order.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.edges.iter().filter(|e| e.from == node_id).collect();
        edges.sort_by_key(|e| e.priority);
        edges
    }

    /// Validate graph structure
    pub fn validate(&self) -> Result<()> {
        if !self.nodes.contains_key(&self.entry_point) {
            return Err(EngineError::MissingEntryPoint(self.entry_point.clone()));
        }

        for edge in &self.edges {
            if !self.nodes.contains_key(&edge.from) || !self.nodes.contains_key(&edge.to) {
                return Err(EngineError::InvalidEdgeTarget {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                });
            }
        }

        self.check_reachability()?;

        if !self.allow_cycles {
            self.check_acyclic()?;
        }

        Ok(())
    }

    fn check_reachability(&self) -> Result<()> {
        let mut reached: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        reached.insert(self.entry_point.as_str());
        queue.push_back(self.entry_point.as_str());

        while let Some(current) = queue.pop_front() {
            for edge in self.edges.iter().filter(|e| e.from == current) {
                if reached.insert(edge.to.as_str()) {
                    queue.push_back(edge.to.as_str());
                }
            }
        }

        let mut unreached: Vec<&String> = self
            .nodes
            .keys()
            .filter(|id| !reached.contains(id.as_str()))
            .collect();
        unreached.sort();

        match unreached.first() {
            Some(id) => Err(EngineError::UnreachableNode((*id).clone())),
            None => Ok(()),
        }
    }

    fn check_acyclic(&self) -> Result<()> {
        // Iterative DFS with a three-color marking; a back edge is a cycle.
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: HashMap<&str, Color> =
            self.nodes.keys().map(|id| (id.as_str(), Color::White)).collect();
        let mut order: Vec<&String> = self.nodes.keys().collect();
        order.sort();

        for start in order {
            if colors[start.as_str()] != Color::White {
                continue;
            }
            // (node, next child index) stack
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            colors.insert(start.as_str(), Color::Gray);

            while let Some((node, child_index)) = stack.pop() {
                let children: Vec<&str> = self
                    .edges
                    .iter()
                    .filter(|e| e.from == node)
                    .map(|e| e.to.as_str())
                    .collect();

                if child_index < children.len() {
                    stack.push((node, child_index + 1));
                    let child = children[child_index];
                    match colors[child] {
                        Color::Gray => {
                            return Err(EngineError::CycleDetected(format!(
                                "node '{}' re-enters the active path",
                                child
                            )));
                        }
                        Color::White => {
                            colors.insert(child, Color::Gray);
                            stack.push((child, 0));
                        }
                        Color::Black => {}
                    }
                } else {
                    colors.insert(node, Color::Black);
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges.len())
            .field("entry_point", &self.entry_point)
            .field("allow_cycles", &self.allow_cycles)
            .field("event_bus", &self.event_bus.is_some())
            .field("idempotency_store", &self.idempotency_store.is_some())
            .field("checkpoint_store", &self.checkpoint_store.is_some())
            .finish()
    }
}
