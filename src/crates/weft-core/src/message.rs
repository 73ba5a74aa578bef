//! The typed message flowing through the graph
//!
//! A [`Message`] is the unit of flow: it carries conversational content, the
//! `data` blackboard nodes read and write, the `metadata` tracing envelope,
//! structured tool calls, and a lifecycle [`MessageState`] with its full
//! transition history.
//!
//! # Lifecycle state machine
//!
//! ```text
//!             ┌──────────────────────────┐
//!             │                          ▼
//! ready ──► running ──► waiting ──► running ──► completed
//!             │             │
//!             │             └────────────┐
//!             ▼                          ▼
//!           failed ◄─────────────────  failed
//! ```
//!
//! `ready` only appears on initial submission, `waiting` only as a node's
//! output when suspension is requested, and `completed`/`failed` are
//! terminal. Every transition goes through [`Message::transition_to`], which
//! validates legality and appends a [`StateTransition`] to the history;
//! there is no other way to change `state`.
//!
//! # Value semantics
//!
//! Messages are treated as values: `with_data`, `with_metadata`,
//! `transition_to` and friends return a new instance. No in-place mutation
//! crosses a node boundary, which is what makes messages safe to copy into
//! parallel branches and to persist into checkpoints.

use crate::context::AgentContext;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Semantic type of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Text,
    Prompt,
    System,
    Action,
    Result,
    Error,
    ToolCall,
    ToolResult,
    Branch,
    Merge,
    WorkflowStart,
    WorkflowEnd,
    Interrupt,
    Resume,
}

/// Execution lifecycle state, distinct from [`MessageType`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    /// Initial submission, not yet picked up by the runner
    Ready,
    /// A node is executing, or routing is in progress
    Running,
    /// Suspended pending external input
    Waiting,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
}

impl MessageState {
    /// Whether the state machine permits a transition to `next`
    pub fn can_transition_to(&self, next: MessageState) -> bool {
        use MessageState::*;
        matches!(
            (self, next),
            (Ready, Running)
                | (Running, Running)
                | (Running, Waiting)
                | (Running, Completed)
                | (Running, Failed)
                | (Waiting, Running)
                | (Waiting, Failed)
        )
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageState::Completed | MessageState::Failed)
    }
}

impl std::fmt::Display for MessageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageState::Ready => "ready",
            MessageState::Running => "running",
            MessageState::Waiting => "waiting",
            MessageState::Completed => "completed",
            MessageState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One recorded lifecycle transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// State before the transition
    pub from: MessageState,
    /// State after the transition
    pub to: MessageState,
    /// Why the transition happened, e.g. "run started", "resumed"
    pub reason: String,
    /// Node responsible for the transition, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// Structured tool-invocation descriptor carried on a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Correlation id of this call
    pub id: String,
    /// Tool name
    pub name: String,
    /// Invocation arguments
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

/// The record flowing through the graph
///
/// See the [module docs](self) for lifecycle and value semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique id of this message
    pub id: String,

    /// Primary textual payload
    pub content: String,

    /// Logical sender label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    /// Logical recipient label
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Semantic type
    pub message_type: MessageType,

    /// Lifecycle state; only [`Message::transition_to`] changes this
    pub state: MessageState,

    /// The mutable blackboard passed between nodes
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,

    /// Cross-cutting tracing/context envelope
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Structured tool-invocation descriptors
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Typed view over recognized metadata keys
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<AgentContext>,

    /// Graph the message is flowing through; set by the runner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<String>,

    /// Node the message is at; set by the runner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Run identifier; subgraph children carry
    /// `parentRunId:subgraph:childGraphId`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// Ordered trail of lifecycle transitions
    #[serde(default)]
    pub state_history: Vec<StateTransition>,

    /// Creation time of the current revision
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with the given content and type, in state `ready`
    pub fn new(content: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            from: None,
            to: None,
            message_type,
            state: MessageState::Ready,
            data: HashMap::new(),
            metadata: HashMap::new(),
            tool_calls: Vec::new(),
            context: None,
            graph_id: None,
            node_id: None,
            run_id: None,
            state_history: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// A plain text message
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(content, MessageType::Text)
    }

    /// A system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(content, MessageType::System)
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Set one blackboard entry
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Set one metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_context(mut self, context: AgentContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_graph_id(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = Some(graph_id.into());
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.push(tool_call);
        self
    }

    /// Read a blackboard entry
    pub fn data(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Read a metadata entry
    pub fn meta(&self, key: &str) -> Option<&serde_json::Value> {
        self.metadata.get(key)
    }

    /// Merge entries into the blackboard; incoming values win on conflicts
    pub fn merge_data(mut self, entries: HashMap<String, serde_json::Value>) -> Self {
        self.data.extend(entries);
        self
    }

    /// Merge entries into the metadata; incoming values win on conflicts
    pub fn merge_metadata(mut self, entries: HashMap<String, serde_json::Value>) -> Self {
        self.metadata.extend(entries);
        self
    }

    /// Transition the lifecycle state, recording the transition
    ///
    /// The only legal way to change [`Message::state`]. Returns
    /// [`EngineError::IllegalStateTransition`] when the state machine
    /// forbids the move (e.g. out of a terminal state).
    pub fn transition_to(
        mut self,
        state: MessageState,
        reason: impl Into<String>,
        node_id: Option<&str>,
    ) -> Result<Self> {
        if !self.state.can_transition_to(state) {
            return Err(EngineError::IllegalStateTransition {
                from: self.state.to_string(),
                to: state.to_string(),
            });
        }

        self.state_history.push(StateTransition {
            from: self.state,
            to: state,
            reason: reason.into(),
            node_id: node_id.map(|n| n.to_string()),
            at: Utc::now(),
        });
        self.state = state;
        self.timestamp = Utc::now();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_starts_ready() {
        let msg = Message::text("hello");
        assert_eq!(msg.state, MessageState::Ready);
        assert!(msg.state_history.is_empty());
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_transition_records_history() {
        let msg = Message::text("hello")
            .transition_to(MessageState::Running, "run started", Some("entry"))
            .unwrap()
            .transition_to(MessageState::Completed, "done", Some("output"))
            .unwrap();

        assert_eq!(msg.state, MessageState::Completed);
        assert_eq!(msg.state_history.len(), 2);
        assert_eq!(msg.state_history[0].from, MessageState::Ready);
        assert_eq!(msg.state_history[0].to, MessageState::Running);
        assert_eq!(msg.state_history[1].reason, "done");
        assert_eq!(msg.state_history[1].node_id.as_deref(), Some("output"));
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let msg = Message::text("x");
        // ready -> completed skips running
        assert!(matches!(
            msg.clone().transition_to(MessageState::Completed, "r", None),
            Err(EngineError::IllegalStateTransition { .. })
        ));

        let done = msg
            .transition_to(MessageState::Running, "r", None)
            .unwrap()
            .transition_to(MessageState::Completed, "r", None)
            .unwrap();
        // terminal states admit nothing
        assert!(done
            .transition_to(MessageState::Running, "r", None)
            .is_err());
    }

    #[test]
    fn test_waiting_round_trip() {
        let msg = Message::text("x")
            .transition_to(MessageState::Running, "r", None)
            .unwrap()
            .transition_to(MessageState::Waiting, "awaiting human input", Some("review"))
            .unwrap()
            .transition_to(MessageState::Running, "resumed", Some("review"))
            .unwrap();
        assert_eq!(msg.state, MessageState::Running);
    }

    #[test]
    fn test_value_semantics() {
        let original = Message::text("x").with_data("k", json!(1));
        let updated = original.clone().with_data("k", json!(2));

        assert_eq!(original.data("k"), Some(&json!(1)));
        assert_eq!(updated.data("k"), Some(&json!(2)));
    }

    #[test]
    fn test_merge_data_incoming_wins() {
        let msg = Message::text("x").with_data("a", json!(1)).with_data("b", json!(1));
        let mut incoming = HashMap::new();
        incoming.insert("b".to_string(), json!(2));
        incoming.insert("c".to_string(), json!(3));

        let merged = msg.merge_data(incoming);
        assert_eq!(merged.data("a"), Some(&json!(1)));
        assert_eq!(merged.data("b"), Some(&json!(2)));
        assert_eq!(merged.data("c"), Some(&json!(3)));
    }

    #[test]
    fn test_serde_round_trip() {
        let msg = Message::text("hello")
            .with_data("k", json!({"nested": true}))
            .with_metadata("userId", json!("u1"))
            .with_tool_call(ToolCall::new("uppercase", json!({"text": "hi"})))
            .transition_to(MessageState::Running, "r", None)
            .unwrap();

        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.content, "hello");
        assert_eq!(decoded.state, MessageState::Running);
        assert_eq!(decoded.tool_calls.len(), 1);
        assert_eq!(decoded.state_history.len(), 1);
    }

    #[test]
    fn test_message_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&MessageType::ToolCall).unwrap(),
            "\"tool-call\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::WorkflowStart).unwrap(),
            "\"workflow-start\""
        );
    }
}
