//! The scheduler: walks graphs, routes messages, suspends and resumes runs
//!
//! The [`Runner`] is single-threaded per run — nodes execute sequentially
//! because the message state machine is strictly serial — with concurrency
//! introduced only at explicit fan-out points (parallel nodes) and on the
//! notification paths (event bus, tool listeners). Distinct runs are fully
//! independent and may run concurrently; the runner itself is a cheap
//! clonable handle around its configuration.
//!
//! # The routing loop
//!
//! ```text
//!        ┌────────────────────────────────────────────────────┐
//!        │  before_node ─► execute node ─► after_node         │
//!        │       │              │                │            │
//!        │       │         waiting?──► checkpoint ─► Paused   │
//!        │       │              │                │            │
//!        │       ▼         failure ─► on_error chain          │
//!        │  (on_error)          │         │                   │
//!        │                 recovered   no recovery ─► Failed  │
//!        │                      │                             │
//!        │                      ▼                             │
//!        │  edge selection: non-fallback by priority,         │
//!        │  declaration-order tie-break, then fallbacks       │
//!        │       │                        │                   │
//!        │   target found             none match ─► Completed │
//!        └───────┴────────────────────────────────────────────┘
//! ```
//!
//! Output nodes are terminal: reaching one computes the run result through
//! its selector and completes the run. A node emitting `waiting` suspends
//! the whole run: the runner persists a checkpoint (including the pending
//! interaction and, for nested subgraphs, the link to the child
//! checkpoint) and returns a `PAUSED` report. [`Runner::resume`] restores
//! the message from the checkpoint, validates the external input, and
//! continues from the paused node's outgoing edges.
//!
//! # Cycle safety
//!
//! With `allow_cycles = false` a per-run visited set fails the run on any
//! re-entry. With cycles allowed, an activation budget
//! ([`RunnerConfig::max_node_activations`]) terminates runaway loops; both
//! paths fail with `CycleDetected`.

use crate::config::RunnerConfig;
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::human::{HumanInteraction, INTERACTION_KEY};
use crate::idempotency::SingleFlight;
use crate::message::{Message, MessageState, MessageType};
use crate::node::Node;
use crate::parallel::ParallelNode;
use crate::report::{NodeReport, NodeStatus, Report, RunStatus};
use crate::subgraph::SubgraphNode;
use crate::tool::ToolExecutionContext;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;
use weft_checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use weft_events::EventEnvelope;

/// Reserved checkpoint state key carrying the paused message's content
const CONTENT_KEY: &str = "__content__";

/// Outcome of driving a graph to a stopping point
enum Flow {
    Completed {
        message: Message,
        result: Value,
    },
    Paused {
        message: Message,
        checkpoint_id: String,
        interaction: Option<HumanInteraction>,
    },
    Failed {
        message: Message,
        error: EngineError,
    },
}

/// Outcome of executing a single node
enum NodeOutcome {
    Message(Message),
    SubgraphPaused {
        message: Message,
        child_checkpoint_id: String,
        interaction: Option<HumanInteraction>,
    },
}

/// The graph scheduler
#[derive(Clone, Default)]
pub struct Runner {
    config: RunnerConfig,
    single_flight: Arc<SingleFlight>,
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            config,
            single_flight: Arc::new(SingleFlight::new()),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run a graph to completion (or suspension, when the graph carries a
    /// checkpoint store)
    #[tracing::instrument(skip(self, graph, message), fields(graph_id = %graph.id))]
    pub async fn run(&self, graph: &Graph, message: Message) -> Result<Report> {
        self.run_inner(graph, message, None).await
    }

    /// Run with an explicit checkpoint store, overriding the graph's
    #[tracing::instrument(skip(self, graph, message, store), fields(graph_id = %graph.id))]
    pub async fn run_with_checkpoint(
        &self,
        graph: &Graph,
        message: Message,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Report> {
        self.run_inner(graph, message, Some(store)).await
    }

    /// Resume a paused run from a checkpoint
    ///
    /// `external_input` is merged into the message data under the paused
    /// node's id after passing option membership and validator checks.
    /// Nested subgraph pauses resume two-phase: the child checkpoint first,
    /// then the parent continues from its subgraph node.
    #[tracing::instrument(skip(self, graph, external_input, store), fields(graph_id = %graph.id, checkpoint_id))]
    pub async fn resume(
        &self,
        graph: &Graph,
        checkpoint_id: &str,
        external_input: Option<Value>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Report> {
        let mut reports = Vec::new();
        let flow = self
            .resume_flow(graph, checkpoint_id, external_input, store, &mut reports)
            .await?;
        Ok(Self::report_from(flow, reports))
    }

    /// The pending interactions at a checkpoint, outermost first
    ///
    /// Follows the child-checkpoint chain of nested subgraph pauses.
    pub async fn get_pending_interactions(
        &self,
        checkpoint_id: &str,
        store: &Arc<dyn CheckpointStore>,
    ) -> Result<Vec<HumanInteraction>> {
        let mut interactions = Vec::new();
        let mut next = Some(checkpoint_id.to_string());
        while let Some(id) = next {
            let checkpoint = Self::load_checkpoint(store, &id).await?;
            if let Some(value) = &checkpoint.pending_interaction {
                interactions.push(serde_json::from_value(value.clone())?);
            }
            next = checkpoint.child_checkpoint_id;
        }
        Ok(interactions)
    }

    async fn run_inner(
        &self,
        graph: &Graph,
        message: Message,
        store_override: Option<Arc<dyn CheckpointStore>>,
    ) -> Result<Report> {
        let store = store_override.or_else(|| graph.checkpoint_store.clone());
        let mut reports = Vec::new();
        let flow = self.drive_graph(graph, message, store, &mut reports).await?;
        Ok(Self::report_from(flow, reports))
    }

    /// Full run of one graph: validation, lifecycle transitions, execution
    /// hooks, the routing loop, and completion duties
    fn drive_graph<'a>(
        &'a self,
        graph: &'a Graph,
        message: Message,
        store: Option<Arc<dyn CheckpointStore>>,
        reports: &'a mut Vec<NodeReport>,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            graph.validate()?;

            let mut message = message;
            if message.state != MessageState::Ready {
                return Err(EngineError::Execution(format!(
                    "initial message must be in state 'ready', got '{}'",
                    message.state
                )));
            }
            if message.run_id.is_none() {
                message.run_id = Some(Uuid::new_v4().to_string());
            }
            message.graph_id = Some(graph.id.clone());

            let message = message
                .with_type(MessageType::WorkflowStart)
                .transition_to(MessageState::Running, "run started", Some(&graph.entry_point))?;
            self.publish_event(graph, "run.started", &message).await;
            tracing::info!(run_id = ?message.run_id, "Starting graph execution");

            let initial = message.clone();
            let message = match graph.middleware.before_execution(graph, message).await {
                Ok(message) => message,
                Err(error) => {
                    let failed = initial.clone().transition_to(
                        MessageState::Failed,
                        error.to_string(),
                        None,
                    )?;
                    self.publish_event(graph, "run.failed", &failed).await;
                    return Ok(Flow::Failed {
                        message: failed,
                        error,
                    });
                }
            };

            let flow = self
                .drive(graph, message, graph.entry_point.clone(), store.clone(), reports)
                .await?;
            self.finish(graph, &initial, flow, store).await
        })
    }

    /// Completion duties shared by fresh runs and resumed runs
    async fn finish(
        &self,
        graph: &Graph,
        input: &Message,
        flow: Flow,
        store: Option<Arc<dyn CheckpointStore>>,
    ) -> Result<Flow> {
        match flow {
            Flow::Completed { message, result } => {
                let message = graph.middleware.after_execution(graph, input, message).await;
                if let (Some(store), Some(run_id)) = (store.as_ref(), message.run_id.clone()) {
                    // Best-effort cleanup of the run's checkpoints.
                    if let Err(error) = store.delete_by_run(&run_id).await {
                        tracing::warn!(error = %error, run_id = %run_id, "Checkpoint cleanup failed");
                    }
                }
                self.publish_event(graph, "run.completed", &message).await;
                Ok(Flow::Completed { message, result })
            }
            Flow::Paused {
                message,
                checkpoint_id,
                interaction,
            } => {
                self.publish_event(graph, "run.paused", &message).await;
                Ok(Flow::Paused {
                    message,
                    checkpoint_id,
                    interaction,
                })
            }
            Flow::Failed { message, error } => {
                if self.config.save_on_error {
                    if let Some(store) = store.as_ref() {
                        let node_id = message.node_id.clone().unwrap_or_default();
                        if let Err(save_error) = self
                            .save_checkpoint(graph, &message, &node_id, store, None, None)
                            .await
                        {
                            tracing::warn!(error = %save_error, "Error checkpoint save failed");
                        }
                    }
                }
                self.publish_event(graph, "run.failed", &message).await;
                Ok(Flow::Failed { message, error })
            }
        }
    }

    /// The routing loop (§ the module docs)
    fn drive<'a>(
        &'a self,
        graph: &'a Graph,
        message: Message,
        start_node: String,
        store: Option<Arc<dyn CheckpointStore>>,
        reports: &'a mut Vec<NodeReport>,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let mut current = start_node;
            let mut message = message;
            let mut visited: HashSet<String> = HashSet::new();
            let mut activations: usize = 0;
            let mut routed_since_save: usize = 0;

            loop {
                if !graph.allow_cycles && !visited.insert(current.clone()) {
                    let error = EngineError::CycleDetected(format!(
                        "node '{}' re-entered within one run",
                        current
                    ));
                    return Ok(Self::fail(message, error, Some(&current))?);
                }
                activations += 1;
                if activations > self.config.max_node_activations {
                    let error = EngineError::CycleDetected(format!(
                        "activation budget of {} exhausted at node '{}'",
                        self.config.max_node_activations, current
                    ));
                    return Ok(Self::fail(message, error, Some(&current))?);
                }

                let node = graph.nodes.get(&current).ok_or_else(|| {
                    EngineError::Execution(format!("node '{}' vanished from the graph", current))
                })?;

                message = match graph.middleware.before_node(graph, &current, message.clone()).await
                {
                    Ok(message) => message,
                    Err(error) => {
                        match graph.middleware.on_error(graph, &message, &error).await {
                            Some(recovered) => recovered,
                            None => {
                                return Ok(Self::fail(message, error, Some(&current))?);
                            }
                        }
                    }
                };
                message.node_id = Some(current.clone());

                // Terminal: an output node computes the run result.
                if let Node::Output(output) = node {
                    let started = Instant::now();
                    let result = output.select(&message);
                    let message = message.transition_to(
                        MessageState::Completed,
                        "run completed",
                        Some(&current),
                    )?;
                    reports.push(NodeReport::new(
                        &current,
                        NodeStatus::Completed,
                        started.elapsed(),
                    ));
                    return Ok(Flow::Completed { message, result });
                }

                let started = Instant::now();
                let input_snapshot = message.clone();
                let outcome = self
                    .execute_node(graph, node, message.clone(), store.clone(), reports)
                    .await;

                let mut output = match outcome {
                    Ok(NodeOutcome::Message(output)) => output,
                    Ok(NodeOutcome::SubgraphPaused {
                        message: paused,
                        child_checkpoint_id,
                        interaction,
                    }) => {
                        reports.push(NodeReport::new(
                            &current,
                            NodeStatus::Waiting,
                            started.elapsed(),
                        ));
                        let Some(store) = store.as_ref() else {
                            let error = EngineError::invalid_suspension(
                                &current,
                                "no checkpoint store configured",
                            );
                            return Ok(Self::fail(paused, error, Some(&current))?);
                        };
                        // The interaction itself lives in the child
                        // checkpoint; the parent records only the link.
                        let checkpoint_id = self
                            .save_checkpoint(
                                graph,
                                &paused,
                                &current,
                                store,
                                None,
                                Some(child_checkpoint_id),
                            )
                            .await?;
                        return Ok(Flow::Paused {
                            message: paused,
                            checkpoint_id,
                            interaction,
                        });
                    }
                    Err(error) => {
                        match graph.middleware.on_error(graph, &input_snapshot, &error).await {
                            Some(recovered) => recovered,
                            None => {
                                reports.push(
                                    NodeReport::new(
                                        &current,
                                        NodeStatus::Failed,
                                        started.elapsed(),
                                    )
                                    .with_error(error.to_string()),
                                );
                                return Ok(Self::fail(input_snapshot, error, Some(&current))?);
                            }
                        }
                    }
                };

                // Suspension: checkpoint and yield the run entirely.
                if output.state == MessageState::Waiting {
                    reports.push(NodeReport::new(
                        &current,
                        NodeStatus::Waiting,
                        started.elapsed(),
                    ));
                    let Some(store) = store.as_ref() else {
                        let error = EngineError::invalid_suspension(
                            &current,
                            "no checkpoint store configured",
                        );
                        return Ok(Self::fail(output, error, Some(&current))?);
                    };
                    let interaction_value = output.data(INTERACTION_KEY).cloned();
                    let checkpoint_id = self
                        .save_checkpoint(
                            graph,
                            &output,
                            &current,
                            store,
                            interaction_value.clone(),
                            None,
                        )
                        .await?;
                    let interaction = interaction_value
                        .and_then(|value| serde_json::from_value(value).ok());
                    return Ok(Flow::Paused {
                        message: output,
                        checkpoint_id,
                        interaction,
                    });
                }

                output = match graph
                    .middleware
                    .after_node(graph, &current, &input_snapshot, output)
                    .await
                {
                    Ok(output) => output,
                    Err(error) => {
                        match graph.middleware.on_error(graph, &input_snapshot, &error).await {
                            Some(recovered) => recovered,
                            None => {
                                reports.push(
                                    NodeReport::new(
                                        &current,
                                        NodeStatus::Failed,
                                        started.elapsed(),
                                    )
                                    .with_error(error.to_string()),
                                );
                                return Ok(Self::fail(input_snapshot, error, Some(&current))?);
                            }
                        }
                    }
                };

                reports.push(NodeReport::new(
                    &current,
                    NodeStatus::Completed,
                    started.elapsed(),
                ));
                self.publish_event(graph, "node.completed", &output).await;

                let output =
                    output.transition_to(MessageState::Running, "node completed", Some(&current))?;

                match self.select_edge(graph, &current, &output) {
                    Some(target) => {
                        tracing::debug!(from = %current, to = %target, "Routing");
                        routed_since_save += 1;
                        if self.config.save_every_n_nodes > 0
                            && routed_since_save >= self.config.save_every_n_nodes
                        {
                            routed_since_save = 0;
                            if let Some(store) = store.as_ref() {
                                // Recorded against the node that just
                                // completed, so resume re-routes from its
                                // outgoing edges.
                                self.save_checkpoint(graph, &output, &current, store, None, None)
                                    .await?;
                            }
                        }
                        current = target;
                        message = output;
                    }
                    None => {
                        // No outgoing edge matched: the message is terminal.
                        let message = output.transition_to(
                            MessageState::Completed,
                            "no outgoing edges",
                            Some(&current),
                        )?;
                        let result = json!(message.content);
                        return Ok(Flow::Completed { message, result });
                    }
                }
            }
        })
    }

    /// Transition a message into `failed`, producing the failed flow
    fn fail(message: Message, error: EngineError, node_id: Option<&str>) -> Result<Flow> {
        let failed = message.transition_to(MessageState::Failed, error.to_string(), node_id)?;
        Ok(Flow::Failed {
            message: failed,
            error,
        })
    }

    /// Execute one node, dispatching on its kind
    fn execute_node<'a>(
        &'a self,
        graph: &'a Graph,
        node: &'a Node,
        message: Message,
        store: Option<Arc<dyn CheckpointStore>>,
        reports: &'a mut Vec<NodeReport>,
    ) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            match node {
                Node::Agent(n) => n.run(message).await.map(NodeOutcome::Message),
                Node::Decision(n) => n.run(message).map(NodeOutcome::Message),
                Node::Human(n) => n.run(message).map(NodeOutcome::Message),
                Node::DynamicHuman(n) => n.run(message).map(NodeOutcome::Message),
                Node::Merge(n) => Ok(NodeOutcome::Message(n.run(message))),
                Node::Custom(n) => n.run(message).await.map(NodeOutcome::Message),
                Node::Output(n) => {
                    // Reached only inside parallel branches; the main loop
                    // intercepts output nodes as terminals.
                    let value = n.select(&message);
                    Ok(NodeOutcome::Message(message.with_data(n.id.clone(), value)))
                }
                Node::Tool(n) => n
                    .invoke(message, &self.tool_context(graph))
                    .await
                    .map(NodeOutcome::Message),
                Node::Parallel(n) => self
                    .run_parallel(n, message, self.tool_context(graph))
                    .await
                    .map(NodeOutcome::Message),
                Node::Subgraph(n) => self.run_subgraph(n, message, store, reports).await,
            }
        })
    }

    /// Enforce the engine-level nesting cap alongside the node's own limit
    fn check_depth(&self, node: &SubgraphNode, message: &Message) -> Result<()> {
        let depth = SubgraphNode::depth_of(message);
        if depth >= self.config.max_subgraph_depth {
            return Err(EngineError::SubgraphDepthExceeded {
                node: node.id.clone(),
                depth,
                max_depth: self.config.max_subgraph_depth,
            });
        }
        Ok(())
    }

    /// The tool execution context for one graph's handles
    fn tool_context(&self, graph: &Graph) -> ToolExecutionContext {
        ToolExecutionContext {
            idempotency: graph.idempotency_store.clone(),
            listeners: graph.tool_listeners.clone(),
            call_bus: graph.tool_call_bus.clone(),
            default_timeout: self.config.tool_timeout,
            single_flight: self.single_flight.clone(),
        }
    }

    /// Execute a child graph inline with the same runner instance
    async fn run_subgraph(
        &self,
        node: &SubgraphNode,
        message: Message,
        store: Option<Arc<dyn CheckpointStore>>,
        reports: &mut Vec<NodeReport>,
    ) -> Result<NodeOutcome> {
        self.check_depth(node, &message)?;
        let child_initial = node.child_message(&message)?;
        let started = Instant::now();

        let child_flow = self
            .drive_graph(&node.graph, child_initial, store, reports)
            .await?;

        match child_flow {
            Flow::Completed {
                message: child_message,
                ..
            } => Ok(NodeOutcome::Message(node.merge_back(
                &message,
                &child_message,
                started.elapsed(),
            ))),
            Flow::Paused {
                checkpoint_id,
                interaction,
                ..
            } => {
                // The parent suspends with the child: its own checkpoint
                // will link the child checkpoint for two-phase resume.
                let paused = message.transition_to(
                    MessageState::Waiting,
                    "subgraph paused",
                    Some(&node.id),
                )?;
                Ok(NodeOutcome::SubgraphPaused {
                    message: paused,
                    child_checkpoint_id: checkpoint_id,
                    interaction,
                })
            }
            Flow::Failed { error, .. } => Err(error),
        }
    }

    /// Run all branches of a parallel node concurrently and join
    async fn run_parallel(
        &self,
        node: &ParallelNode,
        message: Message,
        tool_ctx: ToolExecutionContext,
    ) -> Result<Message> {
        if node.branches.is_empty() {
            return Ok(message);
        }

        let mut tasks = FuturesUnordered::new();
        let mut abort_handles = Vec::with_capacity(node.branches.len());
        for (index, branch) in node.branches.iter().enumerate() {
            let branch_message = node.branch_message(&message, &branch.name);
            let task = tokio::spawn(Self::run_branch(
                self.clone(),
                branch.node.clone(),
                branch_message,
                tool_ctx.clone(),
            ));
            abort_handles.push(task.abort_handle());
            tasks.push(async move { (index, task.await) });
        }

        let mut slots: Vec<Option<Value>> = vec![None; node.branches.len()];
        let abort_all = |handles: &[tokio::task::AbortHandle]| {
            for handle in handles {
                handle.abort();
            }
        };

        let collect = async {
            while let Some((index, joined)) = tasks.next().await {
                let branch = &node.branches[index];
                match joined {
                    Ok(Ok(output)) => {
                        if output.state == MessageState::Waiting {
                            return Err(EngineError::invalid_suspension(
                                branch.node.id(),
                                "human input requested inside a parallel branch",
                            ));
                        }
                        let result = output
                            .data(branch.node.id())
                            .cloned()
                            .unwrap_or_else(|| json!(output.content));
                        slots[index] = Some(result);
                    }
                    Ok(Err(error)) if node.fail_fast => {
                        return Err(EngineError::node_execution(
                            &node.id,
                            format!("branch '{}' failed: {}", branch.name, error),
                        ));
                    }
                    Ok(Err(error)) => {
                        tracing::warn!(
                            branch = %branch.name,
                            error = %error,
                            "Parallel branch failed; recording null"
                        );
                        slots[index] = Some(Value::Null);
                    }
                    Err(join_error) if node.fail_fast => {
                        return Err(EngineError::node_execution(
                            &node.id,
                            format!("branch '{}' aborted: {}", branch.name, join_error),
                        ));
                    }
                    Err(_) => {
                        slots[index] = Some(Value::Null);
                    }
                }
            }
            Ok(())
        };

        let outcome = match node.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, collect).await {
                Ok(outcome) => outcome,
                Err(_) if node.fail_fast => {
                    abort_all(&abort_handles);
                    return Err(EngineError::node_execution(
                        &node.id,
                        format!("deadline of {:?} exceeded", deadline),
                    ));
                }
                Err(_) => {
                    // Cancel stragglers; their slots stay null.
                    abort_all(&abort_handles);
                    Ok(())
                }
            },
            None => collect.await,
        };

        if let Err(error) = outcome {
            abort_all(&abort_handles);
            return Err(error);
        }

        let results: Vec<(String, Value)> = node
            .branches
            .iter()
            .zip(slots)
            .map(|(branch, slot)| (branch.name.clone(), slot.unwrap_or(Value::Null)))
            .collect();
        Ok(node.store_results(message, results))
    }

    /// Execute one parallel branch on its own task
    ///
    /// Branches may be any node kind; subgraphs run without a checkpoint
    /// store so any suspension inside them fails the branch.
    fn run_branch(
        runner: Runner,
        node: Node,
        message: Message,
        tool_ctx: ToolExecutionContext,
    ) -> BoxFuture<'static, Result<Message>> {
        Box::pin(async move {
            match node {
                Node::Agent(n) => n.run(message).await,
                Node::Tool(n) => n.invoke(message, &tool_ctx).await,
                Node::Decision(n) => n.run(message),
                Node::Merge(n) => Ok(n.run(message)),
                Node::Custom(n) => n.run(message).await,
                Node::Output(n) => {
                    let value = n.select(&message);
                    Ok(message.with_data(n.id.clone(), value))
                }
                Node::Human(n) => Err(EngineError::invalid_suspension(
                    &n.id,
                    "human input requested inside a parallel branch",
                )),
                Node::DynamicHuman(n) => Err(EngineError::invalid_suspension(
                    &n.id,
                    "human input requested inside a parallel branch",
                )),
                Node::Parallel(n) => runner.run_parallel(&n, message, tool_ctx.clone()).await,
                Node::Subgraph(n) => {
                    runner.check_depth(&n, &message)?;
                    let child_initial = n.child_message(&message)?;
                    let started = Instant::now();
                    let mut reports = Vec::new();
                    let graph = n.graph.clone();
                    match runner
                        .drive_graph(&graph, child_initial, None, &mut reports)
                        .await?
                    {
                        Flow::Completed {
                            message: child_message,
                            ..
                        } => Ok(n.merge_back(&message, &child_message, started.elapsed())),
                        Flow::Paused { .. } => Err(EngineError::invalid_suspension(
                            &n.id,
                            "subgraph paused inside a parallel branch",
                        )),
                        Flow::Failed { error, .. } => Err(error),
                    }
                }
            }
        })
    }

    /// Choose the next node from a node's outgoing edges
    ///
    /// Non-fallback edges first, by priority then declaration order; the
    /// first match wins. Fallback edges are consulted only when no
    /// non-fallback edge matched.
    fn select_edge(&self, graph: &Graph, node_id: &str, message: &Message) -> Option<String> {
        let edges = graph.outgoing_edges(node_id);
        edges
            .iter()
            .filter(|e| !e.is_fallback)
            .find(|e| e.matches(message))
            .or_else(|| edges.iter().filter(|e| e.is_fallback).find(|e| e.matches(message)))
            .map(|e| e.to.clone())
    }

    fn resume_flow<'a>(
        &'a self,
        graph: &'a Graph,
        checkpoint_id: &'a str,
        external_input: Option<Value>,
        store: Arc<dyn CheckpointStore>,
        reports: &'a mut Vec<NodeReport>,
    ) -> BoxFuture<'a, Result<Flow>> {
        Box::pin(async move {
            let checkpoint = Self::load_checkpoint(&store, checkpoint_id).await?;
            let current = checkpoint.current_node_id.clone();
            let node = graph.nodes.get(&current).ok_or_else(|| {
                EngineError::Validation(format!(
                    "checkpoint node '{}' does not exist in graph '{}'",
                    current, graph.id
                ))
            })?;

            if let Some(child_checkpoint_id) = checkpoint.child_checkpoint_id.clone() {
                return self
                    .resume_subgraph(
                        graph,
                        node,
                        checkpoint,
                        &child_checkpoint_id,
                        external_input,
                        store,
                        reports,
                    )
                    .await;
            }

            let message = Self::message_from_checkpoint(&checkpoint);

            if let Some(value) = &checkpoint.pending_interaction {
                let interaction: HumanInteraction = serde_json::from_value(value.clone())?;
                if interaction.is_expired() {
                    return Err(EngineError::InteractionExpired { node: current });
                }
                self.validate_response(node, &current, external_input.as_ref())?;
            }

            let mut message =
                message.transition_to(MessageState::Running, "resumed", Some(&current))?;
            message.data.remove(INTERACTION_KEY);
            if let Some(input) = external_input {
                message.data.insert(current.clone(), input);
            }

            let initial = message.clone();
            let flow = self
                .continue_from(graph, message, &current, store.clone(), reports)
                .await?;
            self.finish(graph, &initial, flow, Some(store)).await
        })
    }

    /// Two-phase resume of a parent whose subgraph is paused
    #[allow(clippy::too_many_arguments)]
    async fn resume_subgraph(
        &self,
        graph: &Graph,
        node: &Node,
        checkpoint: Checkpoint,
        child_checkpoint_id: &str,
        external_input: Option<Value>,
        store: Arc<dyn CheckpointStore>,
        reports: &mut Vec<NodeReport>,
    ) -> Result<Flow> {
        let Node::Subgraph(subgraph) = node else {
            return Err(EngineError::Validation(format!(
                "checkpoint '{}' links a child checkpoint but node '{}' is not a subgraph",
                checkpoint.id, checkpoint.current_node_id
            )));
        };
        let current = checkpoint.current_node_id.clone();
        let started = Instant::now();

        let child_flow = self
            .resume_flow(
                &subgraph.graph,
                child_checkpoint_id,
                external_input,
                store.clone(),
                reports,
            )
            .await?;

        match child_flow {
            Flow::Completed {
                message: child_message,
                ..
            } => {
                let parent_waiting = Self::message_from_checkpoint(&checkpoint);
                let parent_running =
                    parent_waiting.transition_to(MessageState::Running, "resumed", Some(&current))?;
                let mut merged =
                    subgraph.merge_back(&parent_running, &child_message, started.elapsed());
                merged.data.remove(INTERACTION_KEY);

                // The parent checkpoint is consumed.
                if let Err(error) = store.delete(&checkpoint.id).await {
                    tracing::warn!(error = %error, "Parent checkpoint cleanup failed");
                }

                let initial = merged.clone();
                let flow = self
                    .continue_from(graph, merged, &current, store.clone(), reports)
                    .await?;
                self.finish(graph, &initial, flow, Some(store)).await
            }
            Flow::Paused {
                checkpoint_id: new_child_id,
                interaction,
                ..
            } => {
                // The child paused again: re-link the parent checkpoint.
                let parent_message = Self::message_from_checkpoint(&checkpoint);
                let new_parent_id = self
                    .save_checkpoint(
                        graph,
                        &parent_message,
                        &current,
                        &store,
                        checkpoint.pending_interaction.clone(),
                        Some(new_child_id),
                    )
                    .await?;
                if let Err(error) = store.delete(&checkpoint.id).await {
                    tracing::warn!(error = %error, "Stale parent checkpoint cleanup failed");
                }
                Ok(Flow::Paused {
                    message: parent_message,
                    checkpoint_id: new_parent_id,
                    interaction,
                })
            }
            Flow::Failed { error, .. } => {
                let parent_message = Self::message_from_checkpoint(&checkpoint);
                Ok(Self::fail(parent_message, error, Some(&current))?)
            }
        }
    }

    /// Continue a resumed run from the paused node's outgoing edges
    ///
    /// The paused node is not re-executed.
    async fn continue_from(
        &self,
        graph: &Graph,
        message: Message,
        node_id: &str,
        store: Arc<dyn CheckpointStore>,
        reports: &mut Vec<NodeReport>,
    ) -> Result<Flow> {
        match self.select_edge(graph, node_id, &message) {
            Some(target) => {
                self.drive(graph, message, target, Some(store), reports)
                    .await
            }
            None => {
                let message = message.transition_to(
                    MessageState::Completed,
                    "no outgoing edges",
                    Some(node_id),
                )?;
                let result = json!(message.content);
                Ok(Flow::Completed { message, result })
            }
        }
    }

    /// Enforce option membership and the node's validator on a response
    ///
    /// Validators are enforced for every human-node subtype.
    fn validate_response(
        &self,
        node: &Node,
        node_id: &str,
        input: Option<&Value>,
    ) -> Result<()> {
        if let Some((options, allow_free_text)) = node.human_options() {
            if !options.is_empty() && !allow_free_text {
                let selected = input
                    .and_then(|v| v.get("selectedOption"))
                    .and_then(|v| v.as_str());
                let valid = selected
                    .map(|s| options.iter().any(|o| o.value == s))
                    .unwrap_or(false);
                if !valid {
                    return Err(EngineError::validation_failed(
                        node_id,
                        "selectedOption is not among the offered options",
                    ));
                }
            }
        }

        if let Some(validator) = node.response_validator() {
            let value = input.cloned().unwrap_or(Value::Null);
            validator(&value)
                .map_err(|reason| EngineError::validation_failed(node_id, reason))?;
        }

        Ok(())
    }

    async fn load_checkpoint(
        store: &Arc<dyn CheckpointStore>,
        id: &str,
    ) -> Result<Checkpoint> {
        match store.load(id).await {
            Ok(checkpoint) => Ok(checkpoint),
            Err(CheckpointError::NotFound(id)) => Err(EngineError::CheckpointMissing(id)),
            Err(CheckpointError::Expired(id)) => Err(EngineError::CheckpointExpired(id)),
            Err(error) => Err(error.into()),
        }
    }

    /// Reconstruct the paused message from a checkpoint, in state `waiting`
    fn message_from_checkpoint(checkpoint: &Checkpoint) -> Message {
        let mut data = checkpoint.state.clone();
        let content = data
            .remove(CONTENT_KEY)
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();

        Message {
            id: Uuid::new_v4().to_string(),
            content,
            from: None,
            to: None,
            message_type: MessageType::Resume,
            state: MessageState::Waiting,
            context: Some(crate::context::AgentContext::from_metadata(&checkpoint.metadata)),
            data,
            metadata: checkpoint.metadata.clone(),
            tool_calls: Vec::new(),
            graph_id: Some(checkpoint.graph_id.clone()),
            node_id: Some(checkpoint.current_node_id.clone()),
            run_id: Some(checkpoint.run_id.clone()),
            state_history: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    async fn save_checkpoint(
        &self,
        graph: &Graph,
        message: &Message,
        node_id: &str,
        store: &Arc<dyn CheckpointStore>,
        pending_interaction: Option<Value>,
        child_checkpoint_id: Option<String>,
    ) -> Result<String> {
        let run_id = message
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut state = message.data.clone();
        state.insert(CONTENT_KEY.to_string(), json!(message.content));

        let mut checkpoint =
            Checkpoint::new(run_id, &graph.id, node_id, state, message.metadata.clone());
        if let Some(interaction) = pending_interaction {
            checkpoint = checkpoint.with_pending_interaction(interaction);
        }
        if let Some(child_id) = child_checkpoint_id {
            checkpoint = checkpoint.with_child_checkpoint(child_id);
        }
        if let Some(ttl) = self.config.checkpoint_ttl {
            if let Ok(ttl) = chrono::Duration::from_std(ttl) {
                checkpoint = checkpoint.with_expiry(Utc::now() + ttl);
            }
        }

        Ok(store.save(checkpoint).await?)
    }

    /// Publish a lifecycle event; failures are logged, never surfaced
    async fn publish_event(&self, graph: &Graph, event_type: &str, message: &Message) {
        let Some(bus) = &graph.event_bus else {
            return;
        };

        let payload = json!({
            "runId": message.run_id,
            "graphId": message.graph_id,
            "nodeId": message.node_id,
            "state": message.state.to_string(),
        })
        .to_string();

        let envelope = match EventEnvelope::new(&graph.event_channel, event_type, "1.0.0", payload)
        {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::warn!(error = %error, event_type, "Lifecycle envelope construction failed");
                return;
            }
        };
        let correlation = message
            .meta(crate::context::CORRELATION_ID_KEY)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .or_else(|| message.run_id.clone());
        let envelope = match correlation {
            Some(correlation) => envelope.with_correlation_id(correlation),
            None => envelope,
        };

        if let Err(error) = bus.publish(&graph.event_channel, envelope).await {
            tracing::warn!(error = %error, event_type, "Lifecycle event publish failed");
        }
    }

    /// Build the user-visible report from a flow
    fn report_from(flow: Flow, node_reports: Vec<NodeReport>) -> Report {
        match flow {
            Flow::Completed { message, result } => Report {
                status: RunStatus::Success,
                result: Some(result),
                node_reports,
                checkpoint_id: None,
                pending_interaction: None,
                error: None,
                final_message: Some(message),
            },
            Flow::Paused {
                message,
                checkpoint_id,
                interaction,
            } => Report {
                status: RunStatus::Paused,
                result: None,
                node_reports,
                checkpoint_id: Some(checkpoint_id),
                pending_interaction: interaction,
                error: None,
                final_message: Some(message),
            },
            Flow::Failed { message, error } => Report {
                status: RunStatus::Failure,
                result: None,
                node_reports,
                checkpoint_id: None,
                pending_interaction: None,
                error: Some(error.to_string()),
                final_message: Some(message),
            },
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner").field("config", &self.config).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::FnAgent;
    use crate::node::{AgentNode, OutputNode};

    fn echo(id: &str, prefix: &'static str) -> AgentNode {
        AgentNode::new(
            id,
            Arc::new(FnAgent::new("echo", move |msg: Message| async move {
                let content = format!("{}{}", prefix, msg.content);
                Ok(msg.with_content(content))
            })),
        )
    }

    #[tokio::test]
    async fn test_cycle_budget_terminates_runaway_loop() {
        let graph = Graph::builder("looping")
            .add_node(echo("a", "."))
            .add_node(echo("b", "."))
            .set_entry_point("a")
            .add_edge("a", "b")
            .add_edge("b", "a")
            .allow_cycles(true)
            .build()
            .unwrap();

        let runner = Runner::with_config(RunnerConfig::new().with_max_node_activations(10));
        let report = runner.run(&graph, Message::text("x")).await.unwrap();

        assert_eq!(report.status, RunStatus::Failure);
        assert!(report.error.unwrap().contains("Cycle detected"));
    }

    #[tokio::test]
    async fn test_fallback_edge_taken_when_nothing_matches() {
        let graph = Graph::builder("g")
            .add_node(echo("start", "got: "))
            .add_node(OutputNode::content("primary"))
            .add_node(OutputNode::content("rescue"))
            .set_entry_point("start")
            .add_conditional_edge("start", "primary", |_| false)
            .add_fallback_edge("start", "rescue")
            .build()
            .unwrap();

        let report = Runner::new().run(&graph, Message::text("x")).await.unwrap();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.last_node(), Some("rescue"));
    }

    #[tokio::test]
    async fn test_suspension_without_store_fails() {
        let graph = Graph::builder("g")
            .add_node(crate::human::HumanNode::new("ask", "?"))
            .set_entry_point("ask")
            .build()
            .unwrap();

        let report = Runner::new().run(&graph, Message::text("x")).await.unwrap();
        assert_eq!(report.status, RunStatus::Failure);
        assert!(report.error.unwrap().contains("Invalid suspension"));
    }
}
