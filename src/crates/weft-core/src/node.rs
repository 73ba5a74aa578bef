//! The polymorphic unit of work
//!
//! [`Node`] is a tagged sum over the built-in node kinds — agent, tool,
//! decision, human, output, merge, parallel, subgraph — with
//! [`NodeHandler`] as the escape hatch for user-supplied nodes. The engine
//! never owns agents or tools transitively; node variants hold shared
//! references to the behavioral contracts they delegate to.
//!
//! Simple variants (agent, decision, human, output, merge, custom) run
//! self-contained; tool, parallel, and subgraph variants are driven by the
//! runner, which supplies the subsystem handles and recursion they need.

use crate::agent::Agent;
use crate::decision::DecisionNode;
use crate::error::{EngineError, Result};
use crate::human::{DynamicHumanNode, HumanNode};
use crate::message::{Message, MessageType};
use crate::parallel::{MergeNode, ParallelNode};
use crate::subgraph::SubgraphNode;
use crate::tool::ToolNode;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// User-supplied node implementation
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Stable node identifier
    fn id(&self) -> &str;

    /// Consume a message, return the transformed message
    async fn run(&self, message: Message) -> Result<Message>;
}

/// Node delegating to an [`Agent`]
///
/// The reply's content, data, metadata, and tool calls are merged onto the
/// incoming message (reply wins), and the reply content is additionally
/// stored under the node's own data key.
#[derive(Clone)]
pub struct AgentNode {
    pub id: String,
    pub agent: Arc<dyn Agent>,
    pub input_key: Option<String>,
}

impl AgentNode {
    pub fn new(id: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self {
            id: id.into(),
            agent,
            input_key: None,
        }
    }

    /// Feed the agent `data[input_key]` instead of the message content
    pub fn with_input_key(mut self, input_key: impl Into<String>) -> Self {
        self.input_key = Some(input_key.into());
        self
    }

    pub async fn run(&self, message: Message) -> Result<Message> {
        let request = match &self.input_key {
            Some(key) => {
                let content = message
                    .data(key)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| message.content.clone());
                message.clone().with_content(content)
            }
            None => message.clone(),
        };

        let reply = self
            .agent
            .respond(request)
            .await
            .map_err(|e| EngineError::node_execution(&self.id, e.to_string()))?;

        // Prior data and context propagate; the reply wins on conflicts.
        let mut out = message;
        out.content = reply.content;
        out.message_type = MessageType::Result;
        out.data.extend(reply.data);
        out.metadata.extend(reply.metadata);
        out.tool_calls.extend(reply.tool_calls);
        if reply.context.is_some() {
            out.context = reply.context;
        }
        let content = out.content.clone();
        Ok(out.with_data(self.id.clone(), Value::String(content)))
    }
}

impl std::fmt::Debug for AgentNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentNode")
            .field("id", &self.id)
            .field("agent", &self.agent.id())
            .field("input_key", &self.input_key)
            .finish()
    }
}

/// Extracts the final run result from the terminal message
pub type OutputSelector = Arc<dyn Fn(&Message) -> Value + Send + Sync>;

/// Terminal node producing the run result
#[derive(Clone)]
pub struct OutputNode {
    pub id: String,
    selector: OutputSelector,
}

impl OutputNode {
    pub fn new<F>(id: impl Into<String>, selector: F) -> Self
    where
        F: Fn(&Message) -> Value + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            selector: Arc::new(selector),
        }
    }

    /// Result is `data[key]` (null when absent)
    pub fn from_data_key(id: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(id, move |msg: &Message| {
            msg.data(&key).cloned().unwrap_or(Value::Null)
        })
    }

    /// Result is the message content
    pub fn content(id: impl Into<String>) -> Self {
        Self::new(id, |msg: &Message| json!(msg.content))
    }

    /// Compute the run result from the terminal message
    pub fn select(&self, message: &Message) -> Value {
        (self.selector)(message)
    }
}

impl std::fmt::Debug for OutputNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputNode")
            .field("id", &self.id)
            .field("selector", &"<function>")
            .finish()
    }
}

/// Polymorphic unit of work
#[derive(Debug, Clone)]
pub enum Node {
    Agent(AgentNode),
    Tool(ToolNode),
    Decision(DecisionNode),
    Human(HumanNode),
    DynamicHuman(DynamicHumanNode),
    Output(OutputNode),
    Merge(MergeNode),
    Parallel(ParallelNode),
    Subgraph(SubgraphNode),
    Custom(Arc<dyn NodeHandler>),
}

impl Node {
    /// The node's identifier
    pub fn id(&self) -> &str {
        match self {
            Node::Agent(n) => &n.id,
            Node::Tool(n) => &n.id,
            Node::Decision(n) => &n.id,
            Node::Human(n) => &n.id,
            Node::DynamicHuman(n) => &n.id,
            Node::Output(n) => &n.id,
            Node::Merge(n) => &n.id,
            Node::Parallel(n) => &n.id,
            Node::Subgraph(n) => &n.id,
            Node::Custom(n) => n.id(),
        }
    }

    /// Whether this node is terminal
    pub fn is_output(&self) -> bool {
        matches!(self, Node::Output(_))
    }

    /// The response validator, for human-node variants
    pub(crate) fn response_validator(&self) -> Option<&crate::human::ResponseValidator> {
        match self {
            Node::Human(n) => n.validator.as_ref(),
            Node::DynamicHuman(n) => n.validator.as_ref(),
            _ => None,
        }
    }

    /// Option constraints, for human-node variants:
    /// `(options, allow_free_text)`
    pub(crate) fn human_options(&self) -> Option<(&[crate::human::InteractionOption], bool)> {
        match self {
            Node::Human(n) => Some((&n.options, n.allow_free_text)),
            Node::DynamicHuman(n) => Some((&n.options, n.allow_free_text)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for dyn NodeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandler").field("id", &self.id()).finish()
    }
}

impl From<AgentNode> for Node {
    fn from(n: AgentNode) -> Self {
        Node::Agent(n)
    }
}

impl From<ToolNode> for Node {
    fn from(n: ToolNode) -> Self {
        Node::Tool(n)
    }
}

impl From<DecisionNode> for Node {
    fn from(n: DecisionNode) -> Self {
        Node::Decision(n)
    }
}

impl From<HumanNode> for Node {
    fn from(n: HumanNode) -> Self {
        Node::Human(n)
    }
}

impl From<DynamicHumanNode> for Node {
    fn from(n: DynamicHumanNode) -> Self {
        Node::DynamicHuman(n)
    }
}

impl From<OutputNode> for Node {
    fn from(n: OutputNode) -> Self {
        Node::Output(n)
    }
}

impl From<MergeNode> for Node {
    fn from(n: MergeNode) -> Self {
        Node::Merge(n)
    }
}

impl From<ParallelNode> for Node {
    fn from(n: ParallelNode) -> Self {
        Node::Parallel(n)
    }
}

impl From<SubgraphNode> for Node {
    fn from(n: SubgraphNode) -> Self {
        Node::Subgraph(n)
    }
}
