//! The agent contract the engine consumes
//!
//! The engine never owns agent instances or resolves them by name; it holds
//! shared references to implementations of [`Agent`] and calls
//! [`Agent::respond`]. LLM-backed agents, rule engines, and test stubs all
//! sit behind the same trait.

use crate::error::Result;
use crate::message::Message;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// An external capability that turns a message into a reply
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier of this agent
    fn id(&self) -> &str;

    /// Declared capabilities, used by hosts for explicit wiring
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Produce a reply to the given message
    async fn respond(&self, message: Message) -> Result<Message>;
}

/// Adapter turning an async closure into an [`Agent`]
///
/// ```rust
/// use weft_core::agent::FnAgent;
/// use weft_core::message::Message;
///
/// let echo = FnAgent::new("echo", |msg: Message| async move {
///     let content = format!("echo: {}", msg.content);
///     Ok(msg.with_content(content))
/// });
/// ```
#[derive(Clone)]
pub struct FnAgent {
    id: String,
    f: Arc<dyn Fn(Message) -> BoxFuture<'static, Result<Message>> + Send + Sync>,
}

impl FnAgent {
    pub fn new<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Message>> + Send + 'static,
    {
        Self {
            id: id.into(),
            f: Arc::new(move |msg| Box::pin(f(msg))),
        }
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn respond(&self, message: Message) -> Result<Message> {
        (self.f)(message).await
    }
}

impl std::fmt::Debug for FnAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnAgent").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_agent_responds() {
        let agent = FnAgent::new("shout", |msg: Message| async move {
            let content = msg.content.to_uppercase();
            Ok(msg.with_content(content))
        });

        assert_eq!(agent.id(), "shout");
        let reply = agent.respond(Message::text("hello")).await.unwrap();
        assert_eq!(reply.content, "HELLO");
    }
}
