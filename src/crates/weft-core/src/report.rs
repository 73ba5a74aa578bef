//! Run reports: the single user-visible result surface
//!
//! Every runner entry point returns a [`Report`]: the overall status, the
//! final result value, per-node reports with durations, the checkpoint id
//! when paused, and the final message snapshot.

use crate::human::HumanInteraction;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Paused,
    Failure,
}

/// Outcome of one node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Completed,
    Waiting,
    Failed,
}

/// Per-node execution record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: String,
    pub status: NodeStatus,
    /// Execution duration in milliseconds
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeReport {
    pub fn new(node_id: impl Into<String>, status: NodeStatus, duration: Duration) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            duration_ms: duration.as_millis() as u64,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// The result of one runner invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Overall status
    pub status: RunStatus,

    /// Final result value on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Per-node execution records, in execution order
    pub node_reports: Vec<NodeReport>,

    /// Present when the run paused
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,

    /// Present when the run paused on a human interaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_interaction: Option<HumanInteraction>,

    /// Run-terminating error on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Snapshot of the terminal (or paused) message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_message: Option<Message>,
}

impl Report {
    /// The id of the last node that executed
    pub fn last_node(&self) -> Option<&str> {
        self.node_reports.last().map(|r| r.node_id.as_str())
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn is_paused(&self) -> bool {
        self.status == RunStatus::Paused
    }
}
