//! Directed edges with priority, conditions, and fallbacks
//!
//! Routing iterates a node's outgoing edges by ascending priority (equal
//! priorities keep declaration order), choosing the first non-fallback edge
//! whose condition holds; an absent condition always holds. Fallback edges
//! are considered only when no non-fallback edge matched. A condition that
//! panics counts as false and is logged — a broken predicate skips its
//! edge, it does not fail the run.

use crate::message::Message;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Predicate over the message deciding whether an edge is taken
pub type EdgeCondition = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// Directed link between two nodes
#[derive(Clone)]
pub struct Edge {
    /// Source node id
    pub from: String,

    /// Target node id
    pub to: String,

    /// Lower priorities are evaluated first; default 0
    pub priority: i32,

    /// Optional predicate; absent means the edge always matches
    pub condition: Option<EdgeCondition>,

    /// Considered only when no non-fallback edge matched
    pub is_fallback: bool,

    /// Optional display name for diagnostics
    pub name: Option<String>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            priority: 0,
            condition: None,
            is_fallback: false,
            name: None,
        }
    }

    /// A fallback edge, taken only when nothing else matched
    pub fn fallback(from: impl Into<String>, to: impl Into<String>) -> Self {
        let mut edge = Self::new(from, to);
        edge.is_fallback = true;
        edge
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether this edge matches the message
    ///
    /// Condition panics count as false and are logged; the edge is skipped,
    /// never failed.
    pub fn matches(&self, message: &Message) -> bool {
        let Some(condition) = &self.condition else {
            return true;
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| condition(message))) {
            Ok(matched) => matched,
            Err(_) => {
                tracing::warn!(
                    from = %self.from,
                    to = %self.to,
                    "Edge condition panicked; treating as no match"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("priority", &self.priority)
            .field("condition", &self.condition.as_ref().map(|_| "<function>"))
            .field("is_fallback", &self.is_fallback)
            .field("name", &self.name)
            .finish()
    }
}
