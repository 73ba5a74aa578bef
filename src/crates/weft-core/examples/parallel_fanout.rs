//! Parallel fan-out with a vote merge.
//!
//! ```sh
//! cargo run --example parallel_fanout
//! ```

use std::sync::Arc;
use weft_core::agent::FnAgent;
use weft_core::graph::Graph;
use weft_core::message::Message;
use weft_core::node::{AgentNode, OutputNode};
use weft_core::parallel::{MergeNode, MergeStrategy, ParallelNode};
use weft_core::runner::Runner;

fn classifier(id: &str, verdict: &'static str) -> AgentNode {
    AgentNode::new(
        id,
        Arc::new(FnAgent::new(id, move |msg: Message| async move {
            Ok(msg.with_content(verdict))
        })),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let graph = Graph::builder("ensemble")
        .add_node(
            ParallelNode::new("classify")
                .branch("fast", classifier("fast-model", "positive"))
                .branch("deep", classifier("deep-model", "positive"))
                .branch("rules", classifier("rule-engine", "negative")),
        )
        .add_node(MergeNode::new("verdict", "classify", MergeStrategy::Vote))
        .add_node(OutputNode::from_data_key("out", "verdict"))
        .set_entry_point("classify")
        .add_edge("classify", "verdict")
        .add_edge("verdict", "out")
        .build()?;

    let report = Runner::new().run(&graph, Message::text("the product is great")).await?;
    println!("Majority verdict: {:?}", report.result);
    Ok(())
}
