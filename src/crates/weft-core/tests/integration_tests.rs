//! End-to-end engine scenarios: linear chains, HITL suspension and resume,
//! idempotent tools, subgraph composition, parallel fan-out, and the event
//! integration path.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft_checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use weft_core::agent::FnAgent;
use weft_core::decision::DecisionNode;
use weft_core::graph::Graph;
use weft_core::human::{HumanNode, InteractionOption};
use weft_core::idempotency::InMemoryIdempotencyStore;
use weft_core::message::{Message, MessageState};
use weft_core::node::{AgentNode, OutputNode};
use weft_core::parallel::{MergeNode, MergeStrategy, ParallelNode};
use weft_core::report::RunStatus;
use weft_core::runner::Runner;
use weft_core::subgraph::SubgraphNode;
use weft_core::tool::{FnTool, Tool, ToolNode, TOOL_PARAMS_KEY, TOOL_RESULT_KEY};
use weft_core::{EngineError, RunnerConfig};
use weft_events::{
    handler_fn, DeadLetterQueue, DlqConfig, EventBus, EventBusConfig, EventEnvelope,
    InMemoryEventBus,
};

fn echo_agent(id: &str, prefix: &'static str) -> AgentNode {
    AgentNode::new(
        id,
        Arc::new(FnAgent::new(id, move |msg: Message| async move {
            let content = format!("{}{}", prefix, msg.content);
            Ok(msg.with_content(content))
        })),
    )
}

fn counting_uppercase_tool(calls: Arc<AtomicUsize>) -> Arc<dyn Tool> {
    Arc::new(FnTool::new("uppercase", move |args: Value| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let text = args["text"].as_str().unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        }
    }))
}

// Scenario A: two agents chained into an output selector.
#[tokio::test]
async fn test_linear_chain() {
    let graph = Graph::builder("linear")
        .add_node(echo_agent("node1", "Step 1: "))
        .add_node(echo_agent("node2", "Step 2: "))
        .add_node(OutputNode::from_data_key("output", "node2"))
        .set_entry_point("node1")
        .add_edge("node1", "node2")
        .add_edge("node2", "output")
        .build()
        .unwrap();

    let report = Runner::new().run(&graph, Message::text("Start")).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.result, Some(json!("Step 2: Step 1: Start")));
    let executed: Vec<&str> = report
        .node_reports
        .iter()
        .map(|r| r.node_id.as_str())
        .collect();
    assert_eq!(executed, vec!["node1", "node2", "output"]);
}

fn approval_graph(store: Arc<InMemoryCheckpointStore>) -> Graph {
    Graph::builder("approval")
        .add_node(echo_agent("draft", "draft of "))
        .add_node(
            HumanNode::new("review", "Please review the draft").with_options([
                InteractionOption::new("approve"),
                InteractionOption::new("reject"),
            ]),
        )
        .add_node(echo_agent("publish", "published "))
        .add_node(OutputNode::new("rejected-output", |_| {
            json!("Draft was rejected by human reviewer")
        }))
        .set_entry_point("draft")
        .add_edge("draft", "review")
        .add_conditional_edge("review", "publish", |m: &Message| {
            m.data("review").and_then(|v| v["selectedOption"].as_str()) == Some("approve")
        })
        .add_conditional_edge("review", "rejected-output", |m: &Message| {
            m.data("review").and_then(|v| v["selectedOption"].as_str()) == Some("reject")
        })
        .with_checkpoint_store(store)
        .build()
        .unwrap()
}

// Scenario B: the approval path through a human review.
#[tokio::test]
async fn test_approval_hitl() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = approval_graph(store.clone());
    let runner = Runner::new();

    let paused = runner.run(&graph, Message::text("post")).await.unwrap();
    assert_eq!(paused.status, RunStatus::Paused);
    let checkpoint_id = paused.checkpoint_id.clone().unwrap();

    let interaction = paused.pending_interaction.unwrap();
    assert_eq!(interaction.node_id, "review");
    assert_eq!(interaction.prompt, "Please review the draft");
    assert_eq!(interaction.options.len(), 2);

    // The checkpoint exists the moment the runner reports Paused, and it
    // carries the same interaction.
    assert!(store.exists(&checkpoint_id).await.unwrap());
    let listed = runner
        .get_pending_interactions(&checkpoint_id, &(store.clone() as Arc<dyn CheckpointStore>))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].prompt, interaction.prompt);

    let report = runner
        .resume(
            &graph,
            &checkpoint_id,
            Some(json!({"nodeId": "review", "selectedOption": "approve"})),
            store.clone(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.last_node(), Some("publish"));
    // Terminal checkpoints are cleaned up.
    assert!(!store.exists(&checkpoint_id).await.unwrap());
}

// Scenario C: the rejection branch routes to the rejection output.
#[tokio::test]
async fn test_rejection_branch() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = approval_graph(store.clone());
    let runner = Runner::new();

    let paused = runner.run(&graph, Message::text("post")).await.unwrap();
    let checkpoint_id = paused.checkpoint_id.unwrap();

    let report = runner
        .resume(
            &graph,
            &checkpoint_id,
            Some(json!({"nodeId": "review", "selectedOption": "reject"})),
            store,
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(
        report.result,
        Some(json!("Draft was rejected by human reviewer"))
    );
}

// A response outside the offered options is rejected without consuming the
// checkpoint.
#[tokio::test]
async fn test_resume_validation_failure_keeps_checkpoint() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = approval_graph(store.clone());
    let runner = Runner::new();

    let paused = runner.run(&graph, Message::text("post")).await.unwrap();
    let checkpoint_id = paused.checkpoint_id.unwrap();

    let err = runner
        .resume(
            &graph,
            &checkpoint_id,
            Some(json!({"selectedOption": "maybe"})),
            store.clone(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ValidationFailed { .. }));

    // The checkpoint is untouched; a valid resume still succeeds.
    assert!(store.exists(&checkpoint_id).await.unwrap());
    let report = runner
        .resume(
            &graph,
            &checkpoint_id,
            Some(json!({"selectedOption": "approve"})),
            store,
        )
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Success);
}

#[tokio::test]
async fn test_resume_missing_checkpoint() {
    let store: Arc<InMemoryCheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let graph = approval_graph(store.clone());

    let err = Runner::new()
        .resume(&graph, "no-such-checkpoint", None, store)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CheckpointMissing(_)));
}

// Scenario D: two sequential calls with the same arguments invoke the tool
// exactly once.
#[tokio::test]
async fn test_idempotent_tool() {
    let calls = Arc::new(AtomicUsize::new(0));
    let tool = counting_uppercase_tool(calls.clone());

    let graph = Graph::builder("tools")
        .add_node(ToolNode::new("call1", tool.clone()))
        .add_node(ToolNode::new("call2", tool))
        .add_node(OutputNode::from_data_key("output", TOOL_RESULT_KEY))
        .set_entry_point("call1")
        .add_edge("call1", "call2")
        .add_edge("call2", "output")
        .with_idempotency_store(Arc::new(InMemoryIdempotencyStore::default()))
        .build()
        .unwrap();

    let message = Message::text("go").with_data(TOOL_PARAMS_KEY, json!({"text": "hello"}));
    let report = Runner::new().run(&graph, message).await.unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.result, Some(json!("HELLO")));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let final_message = report.final_message.unwrap();
    assert_eq!(final_message.data("call1"), Some(&json!("HELLO")));
    assert_eq!(final_message.data("call2"), Some(&json!("HELLO")));
}

// Scenario E: metadata preservation across a subgraph boundary.
#[tokio::test]
async fn test_subgraph_metadata_preservation() {
    // The child records the metadata it actually observes.
    let child_graph = Arc::new(
        Graph::builder("child")
            .add_node(AgentNode::new(
                "inspect",
                Arc::new(FnAgent::new("inspect", |msg: Message| async move {
                    let observed = json!({
                        "userId": msg.meta("userId"),
                        "tenantId": msg.meta("tenantId"),
                        "secret": msg.meta("secret"),
                        "subgraphDepth": msg.meta("subgraphDepth"),
                    });
                    Ok(msg
                        .with_data("observed", observed)
                        .with_content("child done"))
                })),
            ))
            .set_entry_point("inspect")
            .build()
            .unwrap(),
    );

    let graph = Graph::builder("parent")
        .add_node(
            SubgraphNode::new("sub", child_graph).with_preserve_keys(["userId", "tenantId"]),
        )
        .set_entry_point("sub")
        .build()
        .unwrap();

    let message = Message::text("start")
        .with_metadata("userId", json!("u1"))
        .with_metadata("tenantId", json!("t1"))
        .with_metadata("secret", json!("s"));

    let report = Runner::new().run(&graph, message).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);

    let final_message = report.final_message.unwrap();
    let observed = final_message.data("observed").unwrap();
    assert_eq!(observed["userId"], json!("u1"));
    assert_eq!(observed["tenantId"], json!("t1"));
    assert_eq!(observed["subgraphDepth"], json!(1));
    assert_eq!(observed["secret"], Value::Null);

    // Child terminal data merged back; parent identity restored.
    assert_eq!(
        final_message.data("subgraph_result"),
        Some(&json!("child done"))
    );
    assert_eq!(final_message.node_id.as_deref(), Some("sub"));
    assert!(!final_message
        .run_id
        .as_deref()
        .unwrap()
        .contains(":subgraph:"));
}

#[tokio::test]
async fn test_subgraph_depth_limit() {
    let child = Arc::new(
        Graph::builder("child")
            .add_node(OutputNode::content("out"))
            .set_entry_point("out")
            .build()
            .unwrap(),
    );

    let graph = Graph::builder("parent")
        .add_node(SubgraphNode::new("sub", child).with_max_depth(1))
        .set_entry_point("sub")
        .build()
        .unwrap();

    // Entering at the configured depth fails the run.
    let message = Message::text("x").with_metadata("subgraphDepth", json!(1));
    let report = Runner::new().run(&graph, message).await.unwrap();
    assert_eq!(report.status, RunStatus::Failure);
    assert!(report.error.unwrap().contains("depth limit"));
}

// HITL inside a subgraph: the parent pauses with the child, resume is
// two-phase and the parent continues past its subgraph node.
#[tokio::test]
async fn test_subgraph_hitl_two_phase_resume() {
    let store = Arc::new(InMemoryCheckpointStore::new());

    let child = Arc::new(
        Graph::builder("child")
            .add_node(
                HumanNode::new("confirm", "Proceed?").with_options([
                    InteractionOption::new("yes"),
                    InteractionOption::new("no"),
                ]),
            )
            .add_node(OutputNode::new("done", |m: &Message| {
                m.data("confirm")
                    .and_then(|v| v["selectedOption"].as_str())
                    .map(|s| json!(s))
                    .unwrap_or(Value::Null)
            }))
            .set_entry_point("confirm")
            .add_edge("confirm", "done")
            .build()
            .unwrap(),
    );

    let graph = Graph::builder("parent")
        .add_node(SubgraphNode::new("sub", child))
        .add_node(OutputNode::from_data_key("output", "subgraph_result"))
        .set_entry_point("sub")
        .add_edge("sub", "output")
        .with_checkpoint_store(store.clone())
        .build()
        .unwrap();

    let runner = Runner::new();
    let paused = runner.run(&graph, Message::text("x")).await.unwrap();
    assert_eq!(paused.status, RunStatus::Paused);
    let checkpoint_id = paused.checkpoint_id.unwrap();

    // Both the parent pause and the inner interaction are visible.
    let interactions = runner
        .get_pending_interactions(&checkpoint_id, &(store.clone() as Arc<dyn CheckpointStore>))
        .await
        .unwrap();
    assert_eq!(interactions.len(), 1);
    assert_eq!(interactions[0].node_id, "confirm");

    let report = runner
        .resume(
            &graph,
            &checkpoint_id,
            Some(json!({"selectedOption": "yes"})),
            store,
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.last_node(), Some("output"));
}

#[tokio::test]
async fn test_decision_routing() {
    let graph = Graph::builder("decide")
        .add_node(
            DecisionNode::new("route")
                .branch("big", |m: &Message| {
                    m.data("n").and_then(|v| v.as_i64()).unwrap_or(0) > 100
                })
                .otherwise("small"),
        )
        .add_node(OutputNode::new("big", |_| json!("big")))
        .add_node(OutputNode::new("small", |_| json!("small")))
        .set_entry_point("route")
        .build()
        .unwrap();

    let report = Runner::new()
        .run(&graph, Message::text("x").with_data("n", json!(500)))
        .await
        .unwrap();
    assert_eq!(report.result, Some(json!("big")));

    let report = Runner::new()
        .run(&graph, Message::text("x").with_data("n", json!(7)))
        .await
        .unwrap();
    assert_eq!(report.result, Some(json!("small")));
}

#[tokio::test]
async fn test_decision_without_match_fails() {
    let graph = Graph::builder("decide")
        .add_node(DecisionNode::new("route").branch("never", |_| false))
        .add_node(OutputNode::content("never"))
        .set_entry_point("route")
        .build()
        .unwrap();

    let report = Runner::new().run(&graph, Message::text("x")).await.unwrap();
    assert_eq!(report.status, RunStatus::Failure);
    assert!(report.error.unwrap().contains("no matching branch"));
}

#[tokio::test]
async fn test_parallel_fan_out_and_merge() {
    let parallel = ParallelNode::new("fan")
        .branch("upper", echo_agent("upper-agent", "A:"))
        .branch("lower", echo_agent("lower-agent", "B:"));

    let graph = Graph::builder("parallel")
        .add_node(parallel)
        .add_node(MergeNode::new("merged", "fan", MergeStrategy::Concat))
        .add_node(OutputNode::from_data_key("output", "merged"))
        .set_entry_point("fan")
        .add_edge("fan", "merged")
        .add_edge("merged", "output")
        .build()
        .unwrap();

    let report = Runner::new().run(&graph, Message::text("x")).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.result, Some(json!(["A:x", "B:x"])));

    // Results are keyed by branch name on the message.
    let final_message = report.final_message.unwrap();
    let results = final_message.data("fan").unwrap();
    assert_eq!(results["upper"], json!("A:x"));
    assert_eq!(results["lower"], json!("B:x"));
}

#[tokio::test]
async fn test_parallel_branch_failure_records_null_when_not_fail_fast() {
    let failing = AgentNode::new(
        "failing",
        Arc::new(FnAgent::new("failing", |_msg: Message| async move {
            Err(EngineError::Custom("branch exploded".into()))
        })),
    );

    let parallel = ParallelNode::new("fan")
        .branch("ok", echo_agent("ok-agent", "ok:"))
        .branch("bad", failing)
        .fail_fast(false);

    let graph = Graph::builder("parallel")
        .add_node(parallel)
        .add_node(MergeNode::new("merged", "fan", MergeStrategy::First))
        .add_node(OutputNode::from_data_key("output", "merged"))
        .set_entry_point("fan")
        .add_edge("fan", "merged")
        .add_edge("merged", "output")
        .build()
        .unwrap();

    let report = Runner::new().run(&graph, Message::text("x")).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);
    // First skips the null from the failed branch.
    assert_eq!(report.result, Some(json!("ok:x")));

    let results = report.final_message.unwrap().data("fan").unwrap().clone();
    assert_eq!(results["bad"], Value::Null);
}

#[tokio::test]
async fn test_parallel_branch_fail_fast() {
    let failing = AgentNode::new(
        "failing",
        Arc::new(FnAgent::new("failing", |_msg: Message| async move {
            Err(EngineError::Custom("branch exploded".into()))
        })),
    );

    let graph = Graph::builder("parallel")
        .add_node(
            ParallelNode::new("fan")
                .branch("ok", echo_agent("ok-agent", "ok:"))
                .branch("bad", failing),
        )
        .set_entry_point("fan")
        .build()
        .unwrap();

    let report = Runner::new().run(&graph, Message::text("x")).await.unwrap();
    assert_eq!(report.status, RunStatus::Failure);
    assert!(report.error.unwrap().contains("branch 'bad' failed"));
}

#[tokio::test]
async fn test_parallel_human_branch_is_invalid_suspension() {
    let graph = Graph::builder("parallel")
        .add_node(
            ParallelNode::new("fan")
                .branch("ok", echo_agent("ok-agent", "ok:"))
                .branch("ask", HumanNode::new("ask", "approve?")),
        )
        .set_entry_point("fan")
        .build()
        .unwrap();

    let report = Runner::new().run(&graph, Message::text("x")).await.unwrap();
    assert_eq!(report.status, RunStatus::Failure);
    assert!(report.error.unwrap().contains("Invalid suspension"));
}

// Law: with deterministic nodes, running with checkpoint cadence enabled
// yields the same result as running without checkpointing.
#[tokio::test]
async fn test_checkpoint_cadence_is_transparent() {
    let graph = Graph::builder("chain")
        .add_node(echo_agent("a", "a."))
        .add_node(echo_agent("b", "b."))
        .add_node(echo_agent("c", "c."))
        .add_node(OutputNode::from_data_key("out", "c"))
        .set_entry_point("a")
        .add_edge("a", "b")
        .add_edge("b", "c")
        .add_edge("c", "out")
        .build()
        .unwrap();

    let plain = Runner::new().run(&graph, Message::text("x")).await.unwrap();

    let store = Arc::new(InMemoryCheckpointStore::new());
    let checkpointed = Runner::with_config(RunnerConfig::new().with_save_every_n_nodes(1))
        .run_with_checkpoint(&graph, Message::text("x"), store.clone())
        .await
        .unwrap();

    assert_eq!(plain.result, checkpointed.result);
    // Completed runs clean their checkpoints up.
    assert_eq!(store.checkpoint_count().await, 0);
}

// Property: every recorded state transition is legal, pairwise chained.
#[tokio::test]
async fn test_state_history_legality() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = approval_graph(store.clone());
    let runner = Runner::new();

    let paused = runner.run(&graph, Message::text("post")).await.unwrap();
    let history = &paused.final_message.as_ref().unwrap().state_history;
    assert!(!history.is_empty());

    for window in history.windows(2) {
        assert_eq!(window[0].to, window[1].from, "history must chain");
    }
    for transition in history {
        assert!(
            transition.from.can_transition_to(transition.to),
            "illegal transition {:?} -> {:?}",
            transition.from,
            transition.to
        );
    }
    assert_eq!(
        paused.final_message.as_ref().unwrap().state,
        MessageState::Waiting
    );
}

// Scenario F: per-channel DLQ eviction with the hook observing the evicted
// envelope.
#[tokio::test]
async fn test_dlq_eviction() {
    let dlq = DeadLetterQueue::new(DlqConfig::new().with_max_size_per_channel(2));
    let evicted: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = evicted.clone();
    dlq.set_eviction_hook(Arc::new(move |letter| {
        sink.lock().unwrap().push(letter.envelope.event_type.clone());
    }))
    .await;

    for event_type in ["first", "second", "third"] {
        let envelope = EventEnvelope::new("A", event_type, "1.0.0", "{}").unwrap();
        dlq.push(envelope, "handler failure", None).await;
    }

    assert_eq!(dlq.channel_size("A").await, 2);
    let remaining: Vec<String> = dlq
        .list_channel("A")
        .await
        .into_iter()
        .map(|l| l.envelope.event_type)
        .collect();
    assert_eq!(remaining, vec!["second", "third"]);

    let stats = dlq.get_stats().await;
    assert_eq!(stats.total_evicted, 1);
    assert_eq!(*evicted.lock().unwrap(), vec!["first"]);
}

// The runner publishes lifecycle events on the graph's event channel.
#[tokio::test]
async fn test_run_lifecycle_events_published() {
    let bus = Arc::new(InMemoryEventBus::new(EventBusConfig::default(), None, None));
    let seen: Arc<tokio::sync::Mutex<Vec<String>>> = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe(
        "workflow.events",
        handler_fn(move |envelope: EventEnvelope| {
            let sink = sink.clone();
            async move {
                sink.lock().await.push(envelope.event_type.clone());
                Ok(())
            }
        }),
    )
    .await
    .unwrap();

    let graph = Graph::builder("observed")
        .add_node(echo_agent("step", "s:"))
        .add_node(OutputNode::from_data_key("out", "step"))
        .set_entry_point("step")
        .add_edge("step", "out")
        .with_event_bus(bus)
        .build()
        .unwrap();

    let report = Runner::new().run(&graph, Message::text("x")).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);

    let events = seen.lock().await.clone();
    assert_eq!(events.first().map(|s| s.as_str()), Some("run.started"));
    assert!(events.iter().any(|e| e == "node.completed"));
    assert_eq!(events.last().map(|s| s.as_str()), Some("run.completed"));
}
