//! Tools, tool nodes, and the tool lifecycle notification path
//!
//! A [`Tool`] is a side-effecting callable identified by name, invoked with
//! a JSON parameter mapping and returning a structured result. [`ToolNode`]
//! wires a tool into a graph: it extracts parameters from the incoming
//! message, consults the idempotency cache, invokes under a single-flight
//! guarantee and a timeout, and embeds the result into the outgoing
//! message's data under the conventional keys:
//!
//! | key | value |
//! |---|---|
//! | `tool_result` | the tool's structured result |
//! | `tool_success` | `true` on success |
//! | `tool_name` | the tool's name |
//! | `_tool.lastMetadata` | latency, fingerprint, cache-hit flag |
//! | `<node id>` | the result again, under the node's own key |
//!
//! Two notification paths observe invocations without ever blocking or
//! failing the run: synchronous [`ToolLifecycleListener`]s (exceptions are
//! caught and logged) and the async [`ToolCallEventBus`] broadcasting
//! [`ToolCallEvent`]s to any number of subscribers.

use crate::error::{EngineError, Result};
use crate::idempotency::{fingerprint, CacheKind, IdempotencyStore, SingleFlight};
use crate::message::{Message, MessageType};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Data key holding the tool's structured result
pub const TOOL_RESULT_KEY: &str = "tool_result";
/// Data key holding the invocation success flag
pub const TOOL_SUCCESS_KEY: &str = "tool_success";
/// Data key holding the invoked tool's name
pub const TOOL_NAME_KEY: &str = "tool_name";
/// Data key holding invocation metadata (latency, fingerprint, cache hit)
pub const TOOL_LAST_METADATA_KEY: &str = "_tool.lastMetadata";
/// Default data key a [`ToolNode`] reads its parameters from
pub const TOOL_PARAMS_KEY: &str = "tool_params";

/// Errors produced by tool implementations
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Invalid arguments for tool '{tool}': {error}")]
    InvalidArguments { tool: String, error: String },

    #[error("Tool '{tool}' execution failed: {error}")]
    ExecutionFailed { tool: String, error: String },
}

impl From<ToolError> for EngineError {
    fn from(err: ToolError) -> Self {
        match &err {
            ToolError::InvalidArguments { tool, .. } | ToolError::ExecutionFailed { tool, .. } => {
                EngineError::node_execution(tool.clone(), err.to_string())
            }
        }
    }
}

/// A side-effecting callable the engine invokes by explicit reference
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable tool name, part of the cache fingerprint
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Per-tool timeout override; falls back to the runner configuration
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Invoke the tool with a JSON parameter mapping
    async fn execute(&self, args: Value) -> std::result::Result<Value, ToolError>;
}

/// Adapter turning an async closure into a [`Tool`]
#[derive(Clone)]
pub struct FnTool {
    name: String,
    f: Arc<dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, ToolError>> + Send + Sync>,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Arc::new(move |args| Box::pin(f(args))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, args: Value) -> std::result::Result<Value, ToolError> {
        (self.f)(args).await
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish()
    }
}

/// Synchronous observer of tool invocations
///
/// Listener panics are caught and logged; they never propagate into the
/// run. Implementations must be re-entrant and must not hold locks across
/// calls.
pub trait ToolLifecycleListener: Send + Sync {
    fn on_start(&self, _tool: &str, _args_fingerprint: &str) {}

    fn on_success(&self, _tool: &str, _result: &Value, _latency: Duration) {}

    fn on_error(&self, _tool: &str, _error: &str, _latency: Duration) {}

    fn on_cache_hit(&self, _tool: &str) {}
}

/// Broadcast event describing one tool invocation phase
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ToolCallEvent {
    Started {
        tool: String,
        args_fingerprint: String,
    },
    Succeeded {
        tool: String,
        latency_ms: u64,
    },
    Failed {
        tool: String,
        error: String,
        latency_ms: u64,
    },
    CacheHit {
        tool: String,
    },
}

/// Specialized notification path for tool invocations
///
/// Subscribers receive events on their own tasks via a tokio broadcast
/// channel; a slow subscriber lags and drops events rather than blocking
/// the runner.
#[derive(Debug, Clone)]
pub struct ToolCallEventBus {
    sender: tokio::sync::broadcast::Sender<ToolCallEvent>,
}

impl ToolCallEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ToolCallEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as an async stream
    pub fn stream(&self) -> tokio_stream::wrappers::BroadcastStream<ToolCallEvent> {
        tokio_stream::wrappers::BroadcastStream::new(self.subscribe())
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: ToolCallEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for ToolCallEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Extracts the tool parameter mapping from the incoming message
pub type ParamMapper = Arc<dyn Fn(&Message) -> Value + Send + Sync>;

/// Handles a [`ToolNode`] invocation needs beyond the message itself
///
/// Built by the runner from the graph's optional subsystem handles; all
/// fields are cheaply clonable shared references.
#[derive(Clone, Default)]
pub struct ToolExecutionContext {
    pub idempotency: Option<Arc<dyn IdempotencyStore>>,
    pub listeners: Vec<Arc<dyn ToolLifecycleListener>>,
    pub call_bus: Option<Arc<ToolCallEventBus>>,
    pub default_timeout: Option<Duration>,
    pub single_flight: Arc<SingleFlight>,
}

impl ToolExecutionContext {
    fn notify<F: Fn(&dyn ToolLifecycleListener)>(&self, f: F) {
        for listener in &self.listeners {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
            if result.is_err() {
                tracing::warn!("Tool lifecycle listener panicked; ignoring");
            }
        }
    }

    fn emit(&self, event: ToolCallEvent) {
        if let Some(bus) = &self.call_bus {
            bus.publish(event);
        }
    }
}

/// Graph node invoking a [`Tool`]
#[derive(Clone)]
pub struct ToolNode {
    pub id: String,
    pub tool: Arc<dyn Tool>,
    param_mapper: Option<ParamMapper>,
}

impl ToolNode {
    pub fn new(id: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        Self {
            id: id.into(),
            tool,
            param_mapper: None,
        }
    }

    /// Override how parameters are extracted from the incoming message
    pub fn with_param_mapper<F>(mut self, mapper: F) -> Self
    where
        F: Fn(&Message) -> Value + Send + Sync + 'static,
    {
        self.param_mapper = Some(Arc::new(mapper));
        self
    }

    /// The parameter mapping for an incoming message
    ///
    /// Defaults to `data["tool_params"]`, or an empty object when absent.
    pub fn params(&self, message: &Message) -> Value {
        match &self.param_mapper {
            Some(mapper) => mapper(message),
            None => message
                .data(TOOL_PARAMS_KEY)
                .cloned()
                .unwrap_or_else(|| json!({})),
        }
    }

    /// Invoke the tool for a message
    ///
    /// Consults the idempotency cache first; on a hit the tool is not
    /// invoked and the cached result is embedded with `cache_hit` metadata.
    /// Otherwise the invocation runs under the single-flight guard and the
    /// effective timeout (tool override, then context default). Failures
    /// are not cached.
    pub async fn invoke(&self, message: Message, ctx: &ToolExecutionContext) -> Result<Message> {
        let args = self.params(&message);
        let key = fingerprint(self.tool.name(), &args);

        if let Some(cached) = self.cache_lookup(&key, ctx).await? {
            return Ok(self.embed(message, cached, &key, Duration::ZERO, true));
        }

        // Collapse concurrent invocations of the same fingerprint; the
        // losers of the race find the winner's result on the re-check.
        let _guard = ctx.single_flight.acquire(&key).await;
        if let Some(cached) = self.cache_lookup(&key, ctx).await? {
            return Ok(self.embed(message, cached, &key, Duration::ZERO, true));
        }

        ctx.notify(|l| l.on_start(self.tool.name(), &key));
        ctx.emit(ToolCallEvent::Started {
            tool: self.tool.name().to_string(),
            args_fingerprint: key.clone(),
        });

        let timeout = self.tool.timeout().or(ctx.default_timeout);
        let started = Instant::now();
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, self.tool.execute(args)).await {
                Ok(result) => result,
                Err(_) => {
                    let latency = started.elapsed();
                    let err = EngineError::ToolTimeout {
                        tool: self.tool.name().to_string(),
                        duration_ms: limit.as_millis() as u64,
                    };
                    ctx.notify(|l| l.on_error(self.tool.name(), &err.to_string(), latency));
                    ctx.emit(ToolCallEvent::Failed {
                        tool: self.tool.name().to_string(),
                        error: err.to_string(),
                        latency_ms: latency.as_millis() as u64,
                    });
                    return Err(err);
                }
            },
            None => self.tool.execute(args).await,
        };
        let latency = started.elapsed();

        match outcome {
            Ok(value) => {
                if let Some(store) = &ctx.idempotency {
                    store
                        .put(&key, CacheKind::ToolCall, value.clone(), None)
                        .await?;
                }
                ctx.notify(|l| l.on_success(self.tool.name(), &value, latency));
                ctx.emit(ToolCallEvent::Succeeded {
                    tool: self.tool.name().to_string(),
                    latency_ms: latency.as_millis() as u64,
                });
                Ok(self.embed(message, value, &key, latency, false))
            }
            Err(err) => {
                ctx.notify(|l| l.on_error(self.tool.name(), &err.to_string(), latency));
                ctx.emit(ToolCallEvent::Failed {
                    tool: self.tool.name().to_string(),
                    error: err.to_string(),
                    latency_ms: latency.as_millis() as u64,
                });
                Err(err.into())
            }
        }
    }

    async fn cache_lookup(
        &self,
        key: &str,
        ctx: &ToolExecutionContext,
    ) -> Result<Option<Value>> {
        let Some(store) = &ctx.idempotency else {
            return Ok(None);
        };
        let cached = store.get(key, CacheKind::ToolCall).await?;
        if cached.is_some() {
            ctx.notify(|l| l.on_cache_hit(self.tool.name()));
            ctx.emit(ToolCallEvent::CacheHit {
                tool: self.tool.name().to_string(),
            });
        }
        Ok(cached)
    }

    fn embed(
        &self,
        message: Message,
        value: Value,
        key: &str,
        latency: Duration,
        cache_hit: bool,
    ) -> Message {
        message
            .with_data(TOOL_RESULT_KEY, value.clone())
            .with_data(TOOL_SUCCESS_KEY, json!(true))
            .with_data(TOOL_NAME_KEY, json!(self.tool.name()))
            .with_data(
                TOOL_LAST_METADATA_KEY,
                json!({
                    "fingerprint": key,
                    "latencyMs": latency.as_millis() as u64,
                    "cacheHit": cache_hit,
                }),
            )
            .with_data(self.id.clone(), value)
            .with_metadata("cache_hit", json!(cache_hit))
            .with_type(MessageType::ToolResult)
    }
}

impl std::fmt::Debug for ToolNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolNode")
            .field("id", &self.id)
            .field("tool", &self.tool.name())
            .field("param_mapper", &self.param_mapper.as_ref().map(|_| "<function>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::InMemoryIdempotencyStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn uppercase_tool(calls: Arc<AtomicUsize>) -> Arc<dyn Tool> {
        Arc::new(FnTool::new("uppercase", move |args: Value| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let text = args["text"].as_str().unwrap_or_default();
                Ok(json!(text.to_uppercase()))
            }
        }))
    }

    fn message_with_params(params: Value) -> Message {
        Message::text("go").with_data(TOOL_PARAMS_KEY, params)
    }

    #[tokio::test]
    async fn test_invoke_embeds_result_keys() {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = ToolNode::new("upper", uppercase_tool(calls));
        let ctx = ToolExecutionContext::default();

        let out = node
            .invoke(message_with_params(json!({"text": "hello"})), &ctx)
            .await
            .unwrap();

        assert_eq!(out.data(TOOL_RESULT_KEY), Some(&json!("HELLO")));
        assert_eq!(out.data(TOOL_SUCCESS_KEY), Some(&json!(true)));
        assert_eq!(out.data(TOOL_NAME_KEY), Some(&json!("uppercase")));
        assert_eq!(out.data("upper"), Some(&json!("HELLO")));
        assert_eq!(
            out.data(TOOL_LAST_METADATA_KEY).unwrap()["cacheHit"],
            json!(false)
        );
        assert_eq!(out.message_type, MessageType::ToolResult);
    }

    #[tokio::test]
    async fn test_cache_prevents_second_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = ToolNode::new("upper", uppercase_tool(calls.clone()));
        let ctx = ToolExecutionContext {
            idempotency: Some(Arc::new(InMemoryIdempotencyStore::default())),
            ..Default::default()
        };

        let first = node
            .invoke(message_with_params(json!({"text": "hello"})), &ctx)
            .await
            .unwrap();
        let second = node
            .invoke(message_with_params(json!({"text": "hello"})), &ctx)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.data(TOOL_RESULT_KEY), second.data(TOOL_RESULT_KEY));
        assert_eq!(second.meta("cache_hit"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_different_args_invoke_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let node = ToolNode::new("upper", uppercase_tool(calls.clone()));
        let ctx = ToolExecutionContext {
            idempotency: Some(Arc::new(InMemoryIdempotencyStore::default())),
            ..Default::default()
        };

        node.invoke(message_with_params(json!({"text": "a"})), &ctx)
            .await
            .unwrap();
        node.invoke(message_with_params(json!({"text": "b"})), &ctx)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let tool: Arc<dyn Tool> = Arc::new(FnTool::new("flaky", move |_| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(ToolError::ExecutionFailed {
                        tool: "flaky".into(),
                        error: "first call fails".into(),
                    })
                } else {
                    Ok(json!("ok"))
                }
            }
        }));
        let node = ToolNode::new("flaky-node", tool);
        let ctx = ToolExecutionContext {
            idempotency: Some(Arc::new(InMemoryIdempotencyStore::default())),
            ..Default::default()
        };

        assert!(node
            .invoke(message_with_params(json!({})), &ctx)
            .await
            .is_err());
        // The failure was not cached: the second call actually runs.
        let out = node
            .invoke(message_with_params(json!({})), &ctx)
            .await
            .unwrap();
        assert_eq!(out.data(TOOL_RESULT_KEY), Some(&json!("ok")));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_fails_retriable() {
        struct SlowTool;
        #[async_trait]
        impl Tool for SlowTool {
            fn name(&self) -> &str {
                "slow"
            }
            fn timeout(&self) -> Option<Duration> {
                Some(Duration::from_millis(10))
            }
            async fn execute(&self, _args: Value) -> std::result::Result<Value, ToolError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!(null))
            }
        }

        let node = ToolNode::new("slow-node", Arc::new(SlowTool));
        let err = node
            .invoke(message_with_params(json!({})), &ToolExecutionContext::default())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ToolTimeout { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_listener_panic_does_not_propagate() {
        struct PanickyListener;
        impl ToolLifecycleListener for PanickyListener {
            fn on_start(&self, _tool: &str, _fp: &str) {
                panic!("listener bug");
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let node = ToolNode::new("upper", uppercase_tool(calls));
        let ctx = ToolExecutionContext {
            listeners: vec![Arc::new(PanickyListener)],
            ..Default::default()
        };

        let out = node
            .invoke(message_with_params(json!({"text": "x"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out.data(TOOL_RESULT_KEY), Some(&json!("X")));
    }

    #[tokio::test]
    async fn test_call_bus_observes_phases() {
        let bus = Arc::new(ToolCallEventBus::default());
        let mut rx = bus.subscribe();

        let calls = Arc::new(AtomicUsize::new(0));
        let node = ToolNode::new("upper", uppercase_tool(calls));
        let ctx = ToolExecutionContext {
            call_bus: Some(bus),
            ..Default::default()
        };
        node.invoke(message_with_params(json!({"text": "x"})), &ctx)
            .await
            .unwrap();

        assert!(matches!(rx.recv().await.unwrap(), ToolCallEvent::Started { .. }));
        assert!(matches!(rx.recv().await.unwrap(), ToolCallEvent::Succeeded { .. }));
    }
}
