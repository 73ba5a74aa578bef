//! Human-in-the-loop nodes and the interaction descriptor
//!
//! A [`HumanNode`] always suspends: it emits a `waiting` message carrying a
//! [`HumanInteraction`] under the reserved data key
//! [`INTERACTION_KEY`]. The runner checkpoints the run and returns a paused
//! report; a later resume call supplies the human's response, which is
//! validated against the node's options and validator before the run
//! continues.
//!
//! [`DynamicHumanNode`] is the same protocol with a runtime-resolved
//! prompt: `data[prompt_key]` first, then `metadata[prompt_key]`, then the
//! fallback prompt.

use crate::error::Result;
use crate::message::{Message, MessageState, MessageType};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Reserved data key carrying the suspension descriptor
pub const INTERACTION_KEY: &str = "__interaction__";

/// Validates a human response; returns a rejection message on failure
pub type ResponseValidator = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// One selectable choice presented to the human
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionOption {
    /// Machine-readable value returned as `selectedOption`
    pub value: String,
    /// Human-readable label
    pub label: String,
}

impl InteractionOption {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            value,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// The suspension descriptor embedded into a waiting message and persisted
/// in the checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanInteraction {
    /// The node awaiting input
    pub node_id: String,

    /// Prompt shown to the human
    pub prompt: String,

    /// Selectable options; may be empty for free-text-only interactions
    #[serde(default)]
    pub options: Vec<InteractionOption>,

    /// Whether a response outside `options` is acceptable
    pub allow_free_text: bool,

    /// When the interaction was requested
    pub requested_at: DateTime<Utc>,

    /// Deadline; answering after it fails with `InteractionExpired`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl HumanInteraction {
    /// Whether the response deadline has passed
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Utc::now() > t).unwrap_or(false)
    }
}

/// Node that suspends the run pending a human decision
#[derive(Clone)]
pub struct HumanNode {
    pub id: String,
    pub prompt: String,
    pub options: Vec<InteractionOption>,
    pub timeout: Option<Duration>,
    pub validator: Option<ResponseValidator>,
    pub allow_free_text: bool,
}

impl HumanNode {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            options: Vec::new(),
            timeout: None,
            validator: None,
            allow_free_text: true,
        }
    }

    /// Add a selectable option; also disables free text until
    /// [`allow_free_text`](Self::with_free_text) re-enables it
    pub fn with_option(mut self, option: InteractionOption) -> Self {
        self.options.push(option);
        self.allow_free_text = false;
        self
    }

    pub fn with_options<I: IntoIterator<Item = InteractionOption>>(mut self, options: I) -> Self {
        self.options.extend(options);
        self.allow_free_text = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_free_text(mut self, allow: bool) -> Self {
        self.allow_free_text = allow;
        self
    }

    /// Build the interaction descriptor for one suspension
    pub fn interaction(&self, prompt: &str) -> HumanInteraction {
        let requested_at = Utc::now();
        HumanInteraction {
            node_id: self.id.clone(),
            prompt: prompt.to_string(),
            options: self.options.clone(),
            allow_free_text: self.allow_free_text,
            requested_at,
            expires_at: self
                .timeout
                .and_then(|t| ChronoDuration::from_std(t).ok())
                .map(|t| requested_at + t),
        }
    }

    /// Emit the waiting message carrying the interaction descriptor
    pub fn run(&self, message: Message) -> Result<Message> {
        suspend(message, &self.id, self.interaction(&self.prompt))
    }
}

impl std::fmt::Debug for HumanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HumanNode")
            .field("id", &self.id)
            .field("prompt", &self.prompt)
            .field("options", &self.options)
            .field("timeout", &self.timeout)
            .field("validator", &self.validator.as_ref().map(|_| "<function>"))
            .field("allow_free_text", &self.allow_free_text)
            .finish()
    }
}

/// Human node whose prompt is resolved at run time
#[derive(Clone)]
pub struct DynamicHumanNode {
    pub id: String,
    pub prompt_key: String,
    pub fallback_prompt: String,
    pub options: Vec<InteractionOption>,
    pub timeout: Option<Duration>,
    pub validator: Option<ResponseValidator>,
    pub allow_free_text: bool,
}

impl DynamicHumanNode {
    pub fn new(
        id: impl Into<String>,
        prompt_key: impl Into<String>,
        fallback_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            prompt_key: prompt_key.into(),
            fallback_prompt: fallback_prompt.into(),
            options: Vec::new(),
            timeout: None,
            validator: None,
            allow_free_text: true,
        }
    }

    pub fn with_options<I: IntoIterator<Item = InteractionOption>>(mut self, options: I) -> Self {
        self.options.extend(options);
        self.allow_free_text = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn with_free_text(mut self, allow: bool) -> Self {
        self.allow_free_text = allow;
        self
    }

    /// Resolve the prompt: data, then metadata, then the fallback
    pub fn resolve_prompt(&self, message: &Message) -> String {
        message
            .data(&self.prompt_key)
            .or_else(|| message.meta(&self.prompt_key))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| self.fallback_prompt.clone())
    }

    pub fn run(&self, message: Message) -> Result<Message> {
        let prompt = self.resolve_prompt(&message);
        let requested_at = Utc::now();
        let interaction = HumanInteraction {
            node_id: self.id.clone(),
            prompt,
            options: self.options.clone(),
            allow_free_text: self.allow_free_text,
            requested_at,
            expires_at: self
                .timeout
                .and_then(|t| ChronoDuration::from_std(t).ok())
                .map(|t| requested_at + t),
        };
        suspend(message, &self.id, interaction)
    }
}

impl std::fmt::Debug for DynamicHumanNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicHumanNode")
            .field("id", &self.id)
            .field("prompt_key", &self.prompt_key)
            .field("fallback_prompt", &self.fallback_prompt)
            .finish()
    }
}

fn suspend(message: Message, node_id: &str, interaction: HumanInteraction) -> Result<Message> {
    message
        .with_data(INTERACTION_KEY, serde_json::to_value(&interaction)?)
        .with_type(MessageType::Interrupt)
        .transition_to(MessageState::Waiting, "awaiting human input", Some(node_id))
}
