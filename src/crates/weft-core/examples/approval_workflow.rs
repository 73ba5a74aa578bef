//! Human-in-the-loop approval: run until the review pause, then resume
//! with a decision.
//!
//! ```sh
//! cargo run --example approval_workflow
//! ```

use serde_json::json;
use std::sync::Arc;
use weft_checkpoint::InMemoryCheckpointStore;
use weft_core::agent::FnAgent;
use weft_core::graph::Graph;
use weft_core::human::{HumanNode, InteractionOption};
use weft_core::message::Message;
use weft_core::node::{AgentNode, OutputNode};
use weft_core::runner::Runner;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(InMemoryCheckpointStore::new());

    let drafter = Arc::new(FnAgent::new("drafter", |msg: Message| async move {
        let content = format!("Draft: {}", msg.content);
        Ok(msg.with_content(content))
    }));
    let publisher = Arc::new(FnAgent::new("publisher", |msg: Message| async move {
        let content = format!("Published: {}", msg.content);
        Ok(msg.with_content(content))
    }));

    let graph = Graph::builder("approval")
        .add_node(AgentNode::new("draft", drafter))
        .add_node(
            HumanNode::new("review", "Please review the draft").with_options([
                InteractionOption::new("approve"),
                InteractionOption::new("reject"),
            ]),
        )
        .add_node(AgentNode::new("publish", publisher))
        .add_node(OutputNode::new("rejected", |_| json!("rejected by reviewer")))
        .set_entry_point("draft")
        .add_edge("draft", "review")
        .add_conditional_edge("review", "publish", |m: &Message| {
            m.data("review").and_then(|v| v["selectedOption"].as_str()) == Some("approve")
        })
        .add_conditional_edge("review", "rejected", |m: &Message| {
            m.data("review").and_then(|v| v["selectedOption"].as_str()) == Some("reject")
        })
        .with_checkpoint_store(store.clone())
        .build()?;

    let runner = Runner::new();

    let paused = runner.run(&graph, Message::text("launch post")).await?;
    let checkpoint_id = paused.checkpoint_id.expect("run pauses at review");
    let interaction = paused.pending_interaction.expect("interaction pending");
    println!("Paused at '{}': {}", interaction.node_id, interaction.prompt);
    for option in &interaction.options {
        println!("  - {}", option.value);
    }

    // A human (here: this example) approves.
    let report = runner
        .resume(
            &graph,
            &checkpoint_id,
            Some(json!({"selectedOption": "approve"})),
            store,
        )
        .await?;

    println!("Status: {:?}", report.status);
    println!("Result: {:?}", report.result);
    Ok(())
}
