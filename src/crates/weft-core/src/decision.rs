//! Decision nodes: first-match routing without transformation
//!
//! A [`DecisionNode`] evaluates its branch predicates in declaration order
//! against the incoming message; the first match wins and its target name
//! is written under [`DECISION_KEY`]. The builder auto-generates one edge
//! per branch target conditioned on that key, so routing stays ordinary
//! edge selection. No branch matching falls through to the `otherwise`
//! target; with neither, the decision fails with `NoMatchingBranch`.

use crate::error::{EngineError, Result};
use crate::message::{Message, MessageType};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Reserved data key carrying the chosen branch target
pub const DECISION_KEY: &str = "__decision__";

/// Predicate over the incoming message
pub type BranchCondition = Arc<dyn Fn(&Message) -> bool + Send + Sync>;

/// One decision branch: a predicate and its target node
#[derive(Clone)]
pub struct Branch {
    pub target: String,
    pub condition: BranchCondition,
    pub name: Option<String>,
}

impl Branch {
    pub fn new<F>(target: impl Into<String>, condition: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        Self {
            target: target.into(),
            condition: Arc::new(condition),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn matches(&self, message: &Message) -> bool {
        match std::panic::catch_unwind(AssertUnwindSafe(|| (self.condition)(message))) {
            Ok(matched) => matched,
            Err(_) => {
                tracing::warn!(
                    target_node = %self.target,
                    "Branch condition panicked; treating as no match"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("target", &self.target)
            .field("condition", &"<function>")
            .field("name", &self.name)
            .finish()
    }
}

/// Routing node choosing among declared branches
#[derive(Debug, Clone)]
pub struct DecisionNode {
    pub id: String,
    pub branches: Vec<Branch>,
    pub otherwise: Option<String>,
}

impl DecisionNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            branches: Vec::new(),
            otherwise: None,
        }
    }

    /// Add a branch; declaration order is evaluation order
    pub fn branch<F>(mut self, target: impl Into<String>, condition: F) -> Self
    where
        F: Fn(&Message) -> bool + Send + Sync + 'static,
    {
        self.branches.push(Branch::new(target, condition));
        self
    }

    /// Target when no branch matches
    pub fn otherwise(mut self, target: impl Into<String>) -> Self {
        self.otherwise = Some(target.into());
        self
    }

    /// All targets this decision can route to, in declaration order
    pub fn targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = self.branches.iter().map(|b| b.target.as_str()).collect();
        if let Some(otherwise) = &self.otherwise {
            targets.push(otherwise.as_str());
        }
        targets
    }

    /// Choose the branch target for a message
    pub fn choose(&self, message: &Message) -> Result<&str> {
        for branch in &self.branches {
            if branch.matches(message) {
                return Ok(&branch.target);
            }
        }
        self.otherwise
            .as_deref()
            .ok_or_else(|| EngineError::NoMatchingBranch {
                node: self.id.clone(),
            })
    }

    /// Route without transforming: record the chosen target on the message
    pub fn run(&self, message: Message) -> Result<Message> {
        let target = self.choose(&message)?.to_string();
        Ok(message
            .with_data(DECISION_KEY, serde_json::Value::String(target))
            .with_type(MessageType::Branch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_match_wins_in_declaration_order() {
        let node = DecisionNode::new("route")
            .branch("a", |m| m.data("n").and_then(|v| v.as_i64()).unwrap_or(0) > 0)
            .branch("b", |m| m.data("n").and_then(|v| v.as_i64()).unwrap_or(0) > -10);

        // Both match; the first declared wins.
        let msg = Message::text("x").with_data("n", json!(5));
        assert_eq!(node.choose(&msg).unwrap(), "a");

        let msg = Message::text("x").with_data("n", json!(-5));
        assert_eq!(node.choose(&msg).unwrap(), "b");
    }

    #[test]
    fn test_otherwise_fallback() {
        let node = DecisionNode::new("route")
            .branch("a", |_| false)
            .otherwise("default");
        let out = node.run(Message::text("x")).unwrap();
        assert_eq!(out.data(DECISION_KEY), Some(&json!("default")));
        assert_eq!(out.message_type, MessageType::Branch);
    }

    #[test]
    fn test_no_match_no_otherwise_fails() {
        let node = DecisionNode::new("route").branch("a", |_| false);
        let err = node.run(Message::text("x")).unwrap_err();
        assert!(matches!(err, EngineError::NoMatchingBranch { .. }));
    }

    #[test]
    fn test_panicking_condition_is_skipped() {
        let node = DecisionNode::new("route")
            .branch("boom", |m| m.data("missing").unwrap().as_bool().unwrap())
            .branch("safe", |_| true);
        assert_eq!(node.choose(&Message::text("x")).unwrap(), "safe");
    }

    #[test]
    fn test_otherwise_only_equals_unconditional_route() {
        let node = DecisionNode::new("route").otherwise("target");
        assert_eq!(node.choose(&Message::text("x")).unwrap(), "target");
    }
}
