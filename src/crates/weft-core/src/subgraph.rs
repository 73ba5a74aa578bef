//! Nested subgraph composition
//!
//! A [`SubgraphNode`] embeds a child [`Graph`](crate::graph::Graph) inside
//! a parent graph. On entry the parent message is projected into a child
//! message: fresh `ready` state, namespaced run id
//! (`parentRunId:subgraph:childGraphId`), metadata filtered down to the
//! configured preserve keys plus the subgraph tracking keys. On exit the
//! child's terminal data and metadata merge back into the parent message
//! (child wins on conflicts) and the parent's graph/node/run identifiers
//! are restored.
//!
//! Depth is bounded: entering at `subgraphDepth >= max_depth` fails with
//! `SubgraphDepthExceeded`. The runner executes the child with the same
//! runner instance; a child suspension suspends the parent too, with the
//! parent checkpoint linking the child checkpoint for two-phase resume.

use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::message::Message;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Metadata key: current nesting level (root is 0)
pub const SUBGRAPH_DEPTH_KEY: &str = "subgraphDepth";
/// Metadata key: set while executing inside a subgraph
pub const IS_SUBGRAPH_KEY: &str = "isSubgraph";
/// Metadata key: the parent graph's id
pub const PARENT_GRAPH_KEY: &str = "parentGraphId";
/// Metadata key: arrow-separated trail of graph ids
pub const SUBGRAPH_PATH_KEY: &str = "subgraphPath";
/// Metadata key: when the subgraph was entered
pub const SUBGRAPH_ENTERED_AT_KEY: &str = "subgraphEnteredAt";
/// Metadata key: the parent run's id
pub const PARENT_RUN_KEY: &str = "parentRunId";

/// Data key: the child's terminal content
pub const SUBGRAPH_RESULT_KEY: &str = "subgraph_result";
/// Data key: the child's terminal state
pub const SUBGRAPH_STATE_KEY: &str = "subgraph_state";
/// Metadata key: duration of the last subgraph execution, in milliseconds
pub const LAST_SUBGRAPH_DURATION_KEY: &str = "lastSubgraphDuration";
/// Metadata key: id of the last subgraph executed
pub const LAST_SUBGRAPH_ID_KEY: &str = "lastSubgraphId";
/// Metadata key: terminal state of the last subgraph executed
pub const LAST_SUBGRAPH_STATE_KEY: &str = "lastSubgraphState";

const TRACKING_KEYS: &[&str] = &[
    SUBGRAPH_DEPTH_KEY,
    IS_SUBGRAPH_KEY,
    PARENT_GRAPH_KEY,
    SUBGRAPH_PATH_KEY,
    SUBGRAPH_ENTERED_AT_KEY,
    PARENT_RUN_KEY,
];

/// Metadata keys preserved into the child by default
pub fn default_preserve_keys() -> Vec<String> {
    [
        "userId",
        "tenantId",
        "traceId",
        "spanId",
        "sessionToken",
        "correlationId",
        "isLoggedIn",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

/// Node executing a child graph with namespaced run id and bounded depth
#[derive(Clone)]
pub struct SubgraphNode {
    pub id: String,
    pub graph: Arc<Graph>,
    pub max_depth: usize,
    pub preserve_keys: Vec<String>,
}

impl SubgraphNode {
    pub fn new(id: impl Into<String>, graph: Arc<Graph>) -> Self {
        Self {
            id: id.into(),
            graph,
            max_depth: 10,
            preserve_keys: default_preserve_keys(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Replace the preserved metadata key set
    pub fn with_preserve_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.preserve_keys = keys.into_iter().map(|k| k.into()).collect();
        self
    }

    /// Current nesting depth recorded on a message (root is 0)
    pub fn depth_of(message: &Message) -> usize {
        message
            .meta(SUBGRAPH_DEPTH_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize
    }

    /// Project the parent message into the child's initial message
    ///
    /// Fails with `SubgraphDepthExceeded` at the depth limit. The child
    /// starts in `ready` state with an empty history, carries only the
    /// preserved metadata keys plus the tracking keys, and gets the
    /// namespaced run id.
    pub fn child_message(&self, parent: &Message) -> Result<Message> {
        let depth = Self::depth_of(parent);
        if depth >= self.max_depth {
            return Err(EngineError::SubgraphDepthExceeded {
                node: self.id.clone(),
                depth,
                max_depth: self.max_depth,
            });
        }

        let parent_run_id = parent
            .run_id
            .clone()
            .unwrap_or_else(|| "run".to_string());
        let parent_graph_id = parent.graph_id.clone().unwrap_or_default();

        let mut metadata: HashMap<String, Value> = parent
            .metadata
            .iter()
            .filter(|(key, _)| self.preserve_keys.iter().any(|k| k == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let path = match parent.meta(SUBGRAPH_PATH_KEY).and_then(|v| v.as_str()) {
            Some(trail) => format!("{} -> {}", trail, self.graph.id),
            None => format!("{} -> {}", parent_graph_id, self.graph.id),
        };
        metadata.insert(SUBGRAPH_DEPTH_KEY.to_string(), json!(depth + 1));
        metadata.insert(IS_SUBGRAPH_KEY.to_string(), json!(true));
        metadata.insert(PARENT_GRAPH_KEY.to_string(), json!(parent_graph_id));
        metadata.insert(SUBGRAPH_PATH_KEY.to_string(), json!(path));
        metadata.insert(
            SUBGRAPH_ENTERED_AT_KEY.to_string(),
            json!(Utc::now().to_rfc3339()),
        );
        metadata.insert(PARENT_RUN_KEY.to_string(), json!(parent_run_id));

        let mut child = parent.clone();
        child.graph_id = Some(self.graph.id.clone());
        child.node_id = None;
        child.run_id = Some(format!("{}:subgraph:{}", parent_run_id, self.graph.id));
        child.metadata = metadata;
        child.context = Some(crate::context::AgentContext::from_metadata(&child.metadata));
        child.state = crate::message::MessageState::Ready;
        child.state_history = Vec::new();
        Ok(child)
    }

    /// Fold the child's terminal message back into the parent
    ///
    /// Child data wins on conflicts; subgraph-internal tracking metadata is
    /// not merged back; the parent's graph/run identifiers are restored and
    /// `node_id` points at this subgraph node.
    pub fn merge_back(&self, parent: &Message, child: &Message, duration: Duration) -> Message {
        let mut merged = parent.clone();

        merged.data.extend(
            child
                .data
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        merged.data.insert(
            SUBGRAPH_RESULT_KEY.to_string(),
            json!(child.content.clone()),
        );
        merged
            .data
            .insert(SUBGRAPH_STATE_KEY.to_string(), json!(child.state.to_string()));

        for (key, value) in &child.metadata {
            if !TRACKING_KEYS.contains(&key.as_str()) {
                merged.metadata.insert(key.clone(), value.clone());
            }
        }
        merged.metadata.insert(
            LAST_SUBGRAPH_DURATION_KEY.to_string(),
            json!(duration.as_millis() as u64),
        );
        merged
            .metadata
            .insert(LAST_SUBGRAPH_ID_KEY.to_string(), json!(self.graph.id.clone()));
        merged.metadata.insert(
            LAST_SUBGRAPH_STATE_KEY.to_string(),
            json!(child.state.to_string()),
        );

        merged.content = child.content.clone();
        merged.graph_id = parent.graph_id.clone();
        merged.run_id = parent.run_id.clone();
        merged.node_id = Some(self.id.clone());
        merged
    }
}

impl std::fmt::Debug for SubgraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubgraphNode")
            .field("id", &self.id)
            .field("graph", &self.graph.id)
            .field("max_depth", &self.max_depth)
            .field("preserve_keys", &self.preserve_keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::message::MessageState;
    use crate::node::OutputNode;

    fn child_graph(id: &str) -> Arc<Graph> {
        Arc::new(
            Graph::builder(id)
                .add_node(OutputNode::content("out"))
                .set_entry_point("out")
                .build()
                .unwrap(),
        )
    }

    fn parent_message() -> Message {
        Message::text("payload")
            .with_graph_id("parent-graph")
            .with_run_id("run-1")
            .with_metadata("userId", json!("u1"))
            .with_metadata("tenantId", json!("t1"))
            .with_metadata("secret", json!("s"))
            .transition_to(MessageState::Running, "r", None)
            .unwrap()
    }

    #[test]
    fn test_child_message_namespacing_and_filtering() {
        let node = SubgraphNode::new("sub", child_graph("billing"))
            .with_preserve_keys(["userId", "tenantId"]);
        let child = node.child_message(&parent_message()).unwrap();

        assert_eq!(child.run_id.as_deref(), Some("run-1:subgraph:billing"));
        assert_eq!(child.graph_id.as_deref(), Some("billing"));
        assert_eq!(child.state, MessageState::Ready);
        assert!(child.state_history.is_empty());
        assert!(child.node_id.is_none());

        assert_eq!(child.meta("userId"), Some(&json!("u1")));
        assert_eq!(child.meta("tenantId"), Some(&json!("t1")));
        assert!(child.meta("secret").is_none());

        assert_eq!(child.meta(SUBGRAPH_DEPTH_KEY), Some(&json!(1)));
        assert_eq!(child.meta(IS_SUBGRAPH_KEY), Some(&json!(true)));
        assert_eq!(child.meta(PARENT_GRAPH_KEY), Some(&json!("parent-graph")));
        assert_eq!(child.meta(PARENT_RUN_KEY), Some(&json!("run-1")));
        assert_eq!(
            child.meta(SUBGRAPH_PATH_KEY),
            Some(&json!("parent-graph -> billing"))
        );
    }

    #[test]
    fn test_depth_limit() {
        let node = SubgraphNode::new("sub", child_graph("billing")).with_max_depth(2);

        let at_limit = parent_message().with_metadata(SUBGRAPH_DEPTH_KEY, json!(2));
        assert!(matches!(
            node.child_message(&at_limit),
            Err(EngineError::SubgraphDepthExceeded { depth: 2, .. })
        ));

        let below = parent_message().with_metadata(SUBGRAPH_DEPTH_KEY, json!(1));
        let child = node.child_message(&below).unwrap();
        assert_eq!(child.meta(SUBGRAPH_DEPTH_KEY), Some(&json!(2)));
    }

    #[test]
    fn test_path_extends_existing_trail() {
        let node = SubgraphNode::new("sub", child_graph("inner"));
        let parent = parent_message().with_metadata(SUBGRAPH_PATH_KEY, json!("root -> mid"));
        let child = node.child_message(&parent).unwrap();
        assert_eq!(
            child.meta(SUBGRAPH_PATH_KEY),
            Some(&json!("root -> mid -> inner"))
        );
    }

    #[test]
    fn test_merge_back_restores_parent_identity() {
        let node = SubgraphNode::new("sub", child_graph("billing"));
        let parent = parent_message();
        let child = node.child_message(&parent).unwrap();

        let child_final = child
            .with_content("child says done")
            .with_data("invoice", json!(99))
            .with_metadata("childKey", json!("kept"))
            .transition_to(MessageState::Running, "r", None)
            .unwrap()
            .transition_to(MessageState::Completed, "done", None)
            .unwrap();

        let merged = node.merge_back(&parent, &child_final, Duration::from_millis(12));

        // Parent identifiers restored; node id points at the subgraph node.
        assert_eq!(merged.graph_id.as_deref(), Some("parent-graph"));
        assert_eq!(merged.run_id.as_deref(), Some("run-1"));
        assert_eq!(merged.node_id.as_deref(), Some("sub"));

        // Child data merged in, child wins.
        assert_eq!(merged.data("invoice"), Some(&json!(99)));
        assert_eq!(merged.data(SUBGRAPH_RESULT_KEY), Some(&json!("child says done")));
        assert_eq!(merged.data(SUBGRAPH_STATE_KEY), Some(&json!("completed")));

        // Child metadata merged except tracking keys.
        assert_eq!(merged.meta("childKey"), Some(&json!("kept")));
        assert!(merged.meta(IS_SUBGRAPH_KEY).is_none());
        assert_eq!(merged.meta(LAST_SUBGRAPH_ID_KEY), Some(&json!("billing")));
        assert!(merged.meta(LAST_SUBGRAPH_DURATION_KEY).is_some());

        // Depth of the parent is strictly less than the child's.
        assert!(SubgraphNode::depth_of(&merged) < SubgraphNode::depth_of(&child_final));
    }
}
