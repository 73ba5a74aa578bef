//! Cross-cutting transformer chain around node execution
//!
//! A [`MessageTransformer`] implements up to five hooks, all defaulting to
//! pass-through: `before_execution`, `before_node`, `after_node`,
//! `after_execution`, and `on_error`. The [`TransformerChain`] runs them in
//! declaration order with these semantics:
//!
//! - On a failing hook: with `continue_on_failure` the current message is
//!   preserved and the next transformer runs; otherwise the chain
//!   short-circuits and surfaces the failure.
//! - `after_execution` is cleanup-phase and never aborts the run; its
//!   failures are logged and the chain continues.
//! - `on_error` gives transformers a chance to recover a failed node by
//!   returning a replacement message; the first recovery wins.

use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;

/// Cross-cutting interceptor invoked around node execution
///
/// All hooks default to pass-through; implement only what you need.
#[async_trait]
pub trait MessageTransformer: Send + Sync {
    /// Name for diagnostics
    fn name(&self) -> &str {
        "transformer"
    }

    /// Once per run, before the entry node
    async fn before_execution(&self, _graph: &Graph, message: Message) -> Result<Message> {
        Ok(message)
    }

    /// Before every node
    async fn before_node(
        &self,
        _graph: &Graph,
        _node_id: &str,
        message: Message,
    ) -> Result<Message> {
        Ok(message)
    }

    /// After every node; receives the node's input and output
    async fn after_node(
        &self,
        _graph: &Graph,
        _node_id: &str,
        _input: &Message,
        output: Message,
    ) -> Result<Message> {
        Ok(output)
    }

    /// Once per run, after the terminal node; cleanup-phase, never aborts
    async fn after_execution(
        &self,
        _graph: &Graph,
        _input: &Message,
        output: Message,
    ) -> Result<Message> {
        Ok(output)
    }

    /// A node failed; return a replacement message to recover the run
    async fn on_error(
        &self,
        _graph: &Graph,
        _message: &Message,
        _error: &EngineError,
    ) -> Result<Option<Message>> {
        Ok(None)
    }
}

/// Ordered chain of transformers
#[derive(Clone, Default)]
pub struct TransformerChain {
    transformers: Vec<Arc<dyn MessageTransformer>>,
    continue_on_failure: bool,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transformer: Arc<dyn MessageTransformer>) {
        self.transformers.push(transformer);
    }

    pub fn set_continue_on_failure(&mut self, continue_on_failure: bool) {
        self.continue_on_failure = continue_on_failure;
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    /// Run every `before_execution` hook
    pub async fn before_execution(&self, graph: &Graph, message: Message) -> Result<Message> {
        let mut current = message;
        for transformer in &self.transformers {
            match transformer.before_execution(graph, current.clone()).await {
                Ok(next) => current = next,
                Err(error) if self.continue_on_failure => {
                    tracing::warn!(
                        transformer = transformer.name(),
                        error = %error,
                        "before_execution failed; continuing with unchanged message"
                    );
                }
                Err(error) => return Err(error),
            }
        }
        Ok(current)
    }

    /// Run every `before_node` hook
    pub async fn before_node(
        &self,
        graph: &Graph,
        node_id: &str,
        message: Message,
    ) -> Result<Message> {
        let mut current = message;
        for transformer in &self.transformers {
            match transformer.before_node(graph, node_id, current.clone()).await {
                Ok(next) => current = next,
                Err(error) if self.continue_on_failure => {
                    tracing::warn!(
                        transformer = transformer.name(),
                        node_id,
                        error = %error,
                        "before_node failed; continuing with unchanged message"
                    );
                }
                Err(error) => return Err(error),
            }
        }
        Ok(current)
    }

    /// Run every `after_node` hook
    pub async fn after_node(
        &self,
        graph: &Graph,
        node_id: &str,
        input: &Message,
        output: Message,
    ) -> Result<Message> {
        let mut current = output;
        for transformer in &self.transformers {
            match transformer
                .after_node(graph, node_id, input, current.clone())
                .await
            {
                Ok(next) => current = next,
                Err(error) if self.continue_on_failure => {
                    tracing::warn!(
                        transformer = transformer.name(),
                        node_id,
                        error = %error,
                        "after_node failed; continuing with unchanged message"
                    );
                }
                Err(error) => return Err(error),
            }
        }
        Ok(current)
    }

    /// Run every `after_execution` hook; failures are logged, never surfaced
    pub async fn after_execution(&self, graph: &Graph, input: &Message, output: Message) -> Message {
        let mut current = output;
        for transformer in &self.transformers {
            match transformer
                .after_execution(graph, input, current.clone())
                .await
            {
                Ok(next) => current = next,
                Err(error) => {
                    tracing::warn!(
                        transformer = transformer.name(),
                        error = %error,
                        "after_execution failed; cleanup phase continues"
                    );
                }
            }
        }
        current
    }

    /// Offer a failed node to every `on_error` hook; first recovery wins
    pub async fn on_error(
        &self,
        graph: &Graph,
        message: &Message,
        error: &EngineError,
    ) -> Option<Message> {
        for transformer in &self.transformers {
            match transformer.on_error(graph, message, error).await {
                Ok(Some(recovered)) => {
                    tracing::debug!(
                        transformer = transformer.name(),
                        "Transformer recovered a failed node"
                    );
                    return Some(recovered);
                }
                Ok(None) => {}
                Err(hook_error) => {
                    tracing::warn!(
                        transformer = transformer.name(),
                        error = %hook_error,
                        "on_error hook itself failed; continuing"
                    );
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for TransformerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerChain")
            .field(
                "transformers",
                &self.transformers.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("continue_on_failure", &self.continue_on_failure)
            .finish()
    }
}
