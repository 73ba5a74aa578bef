//! Core checkpoint data structures for suspension and resume
//!
//! A [`Checkpoint`] is a durable snapshot of a paused run: the node the run
//! stopped at, the message's `data` blackboard and `metadata` envelope, and
//! (when the pause was caused by a human-in-the-loop node) the pending
//! interaction descriptor the caller must answer before the run can continue.
//!
//! # Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  Checkpoint                                          │
//! │  • id: "uuid-abc"                                    │
//! │  • run_id: "run-1:subgraph:billing"                  │
//! │  • graph_id: "billing"                               │
//! │  • current_node_id: "review"                         │
//! │  • state: { "draft": "...", "__interaction__": ... } │
//! │  • metadata: { "userId": "u1", "tenantId": "t1" }    │
//! │  • pending_interaction: { prompt, options, ... }     │
//! │  • child_checkpoint_id: link for nested subgraphs    │
//! │  • created_at / expires_at                           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Run ids are namespaced across nested subgraphs as
//! `parent:subgraph:child`, so `list_by_run` on the parent id never picks up
//! child checkpoints and vice versa. A parent that pauses because its
//! subgraph paused records the child checkpoint id in
//! [`Checkpoint::child_checkpoint_id`]; resume is two-phase, child first.
//!
//! All fields are persisted verbatim by every backend — the engine performs
//! no schema migration on checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint ID type
pub type CheckpointId = String;

/// Durable snapshot of a paused run, sufficient to resume it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique id of this checkpoint
    pub id: CheckpointId,

    /// The run this checkpoint belongs to (subgraph-namespaced)
    pub run_id: String,

    /// The graph the run was executing
    pub graph_id: String,

    /// Node the run is paused at; resume continues from this node's
    /// outgoing edges
    pub current_node_id: String,

    /// The paused message's `data` blackboard
    pub state: HashMap<String, serde_json::Value>,

    /// The paused message's `metadata` envelope
    pub metadata: HashMap<String, serde_json::Value>,

    /// Present when the pause was caused by a human node: the serialized
    /// interaction descriptor the caller must answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_interaction: Option<serde_json::Value>,

    /// Present when the pause originated inside a subgraph: the child run's
    /// own checkpoint, to be resumed before this one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_checkpoint_id: Option<CheckpointId>,

    /// When the checkpoint was written
    pub created_at: DateTime<Utc>,

    /// Optional expiry; expired checkpoints fail to load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    /// Create a checkpoint with a fresh id and the current timestamp
    pub fn new(
        run_id: impl Into<String>,
        graph_id: impl Into<String>,
        current_node_id: impl Into<String>,
        state: HashMap<String, serde_json::Value>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            graph_id: graph_id.into(),
            current_node_id: current_node_id.into(),
            state,
            metadata,
            pending_interaction: None,
            child_checkpoint_id: None,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Attach the pending interaction descriptor
    pub fn with_pending_interaction(mut self, interaction: serde_json::Value) -> Self {
        self.pending_interaction = Some(interaction);
        self
    }

    /// Link the checkpoint of a paused child subgraph
    pub fn with_child_checkpoint(mut self, child_id: impl Into<CheckpointId>) -> Self {
        self.child_checkpoint_id = Some(child_id.into());
        self
    }

    /// Set an expiry time
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the checkpoint's expiry has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Utc::now() > t).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample() -> Checkpoint {
        let mut state = HashMap::new();
        state.insert("draft".to_string(), json!("text"));
        let mut metadata = HashMap::new();
        metadata.insert("userId".to_string(), json!("u1"));
        Checkpoint::new("run-1", "graph-1", "review", state, metadata)
    }

    #[test]
    fn test_checkpoint_creation() {
        let cp = sample();
        assert!(!cp.id.is_empty());
        assert_eq!(cp.run_id, "run-1");
        assert_eq!(cp.current_node_id, "review");
        assert!(cp.pending_interaction.is_none());
        assert!(!cp.is_expired());
    }

    #[test]
    fn test_checkpoint_expiry() {
        let cp = sample().with_expiry(Utc::now() - Duration::seconds(1));
        assert!(cp.is_expired());

        let cp = sample().with_expiry(Utc::now() + Duration::hours(1));
        assert!(!cp.is_expired());
    }

    #[test]
    fn test_checkpoint_serde_round_trip() {
        let cp = sample()
            .with_pending_interaction(json!({"prompt": "Approve?"}))
            .with_child_checkpoint("child-1");

        let encoded = serde_json::to_string(&cp).unwrap();
        let decoded: Checkpoint = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.id, cp.id);
        assert_eq!(decoded.state.get("draft"), Some(&json!("text")));
        assert_eq!(
            decoded.pending_interaction,
            Some(json!({"prompt": "Approve?"}))
        );
        assert_eq!(decoded.child_checkpoint_id.as_deref(), Some("child-1"));
    }
}
