//! Parallel fan-out and merge nodes
//!
//! A [`ParallelNode`] runs its declared branches concurrently, each on a
//! copy of the incoming message tagged with a `branch-id` metadata entry.
//! Results land in `data[parallel_id]` keyed by branch name, with the
//! declaration order preserved alongside under
//! [`order_key`]`(parallel_id)`. Branch execution itself is driven by the
//! runner (branches may be any node kind, including nested parallels and
//! subgraphs); this module owns the data model and the merge semantics.
//!
//! Failure policy: with `fail_fast` (the default) the first failing branch
//! cancels the rest and fails the node; otherwise failed branches are
//! recorded as `null` in the results map. A branch that requests human
//! input fails the node with `InvalidSuspension` — suspension cannot cross
//! a fan-out boundary.
//!
//! A [`MergeNode`] reduces the results map with a [`MergeStrategy`]:
//! `first`, `last`, `concat`, `vote`, `average`, `sum`, `min`, `max`, or a
//! custom reduction, storing the merged value under its own node key.

use crate::message::{Message, MessageType};
use crate::node::Node;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Metadata key tagging each branch copy with its branch name
pub const BRANCH_ID_KEY: &str = "branch-id";

/// Data key holding a parallel node's branch declaration order
pub fn order_key(parallel_id: &str) -> String {
    format!("{}__order", parallel_id)
}

/// One concurrent path of a [`ParallelNode`]
#[derive(Debug, Clone)]
pub struct ParallelBranch {
    pub name: String,
    pub node: Node,
}

/// Fan-out node running all branches concurrently
#[derive(Debug, Clone)]
pub struct ParallelNode {
    pub id: String,
    pub branches: Vec<ParallelBranch>,
    /// Cancel outstanding branches and fail on the first branch failure
    pub fail_fast: bool,
    /// Overall deadline for the join
    pub deadline: Option<Duration>,
}

impl ParallelNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            branches: Vec::new(),
            fail_fast: true,
            deadline: None,
        }
    }

    /// Add a branch; declaration order is the result order
    pub fn branch(mut self, name: impl Into<String>, node: impl Into<Node>) -> Self {
        self.branches.push(ParallelBranch {
            name: name.into(),
            node: node.into(),
        });
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The message copy handed to one branch
    pub fn branch_message(&self, message: &Message, branch_name: &str) -> Message {
        message
            .clone()
            .with_metadata(BRANCH_ID_KEY, json!(branch_name))
    }

    /// Store collected branch results on the message
    ///
    /// `results` is in branch declaration order; failed branches carry
    /// `null`.
    pub fn store_results(&self, message: Message, results: Vec<(String, Value)>) -> Message {
        let order: Vec<Value> = results.iter().map(|(name, _)| json!(name)).collect();
        let mut map = serde_json::Map::new();
        for (name, value) in results {
            map.insert(name, value);
        }
        message
            .with_data(self.id.clone(), Value::Object(map))
            .with_data(order_key(&self.id), Value::Array(order))
            .with_type(MessageType::Branch)
    }
}

/// Reduction applied by a [`MergeNode`] over branch results
#[derive(Clone)]
pub enum MergeStrategy {
    /// First non-null result in declaration order
    First,
    /// Last non-null result in declaration order
    Last,
    /// All non-null results as an array; nested arrays are flattened
    Concat,
    /// Most frequent result; ties go to the earlier branch
    Vote,
    /// Arithmetic mean of numeric results
    Average,
    /// Sum of numeric results
    Sum,
    /// Minimum of numeric results
    Min,
    /// Maximum of numeric results
    Max,
    /// User-supplied reduction over `(branch, value)` pairs in order
    Custom(Arc<dyn Fn(&[(String, Value)]) -> Value + Send + Sync>),
}

impl MergeStrategy {
    /// Apply the strategy; `None` when there is nothing to merge
    pub fn apply(&self, results: &[(String, Value)]) -> Option<Value> {
        if results.is_empty() {
            return None;
        }
        let present = || results.iter().filter(|(_, v)| !v.is_null());
        let numbers = || {
            results
                .iter()
                .filter_map(|(_, v)| v.as_f64())
                .collect::<Vec<f64>>()
        };

        match self {
            MergeStrategy::First => present().next().map(|(_, v)| v.clone()),
            MergeStrategy::Last => present().last().map(|(_, v)| v.clone()),
            MergeStrategy::Concat => {
                let mut merged = Vec::new();
                for (_, value) in present() {
                    match value {
                        Value::Array(items) => merged.extend(items.iter().cloned()),
                        other => merged.push(other.clone()),
                    }
                }
                Some(Value::Array(merged))
            }
            MergeStrategy::Vote => {
                let mut best: Option<(&Value, usize)> = None;
                for (_, candidate) in present() {
                    let count = present().filter(|(_, v)| v == candidate).count();
                    match best {
                        Some((_, best_count)) if best_count >= count => {}
                        _ => best = Some((candidate, count)),
                    }
                }
                best.map(|(v, _)| v.clone())
            }
            MergeStrategy::Average => {
                let nums = numbers();
                if nums.is_empty() {
                    Some(Value::Null)
                } else {
                    Some(json!(nums.iter().sum::<f64>() / nums.len() as f64))
                }
            }
            MergeStrategy::Sum => {
                let nums = numbers();
                if nums.is_empty() {
                    Some(Value::Null)
                } else {
                    Some(json!(nums.iter().sum::<f64>()))
                }
            }
            MergeStrategy::Min => numbers()
                .into_iter()
                .fold(None::<f64>, |acc, n| Some(acc.map_or(n, |a| a.min(n))))
                .map(|n| json!(n))
                .or(Some(Value::Null)),
            MergeStrategy::Max => numbers()
                .into_iter()
                .fold(None::<f64>, |acc, n| Some(acc.map_or(n, |a| a.max(n))))
                .map(|n| json!(n))
                .or(Some(Value::Null)),
            MergeStrategy::Custom(f) => Some(f(results)),
        }
    }
}

impl std::fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MergeStrategy::First => "First",
            MergeStrategy::Last => "Last",
            MergeStrategy::Concat => "Concat",
            MergeStrategy::Vote => "Vote",
            MergeStrategy::Average => "Average",
            MergeStrategy::Sum => "Sum",
            MergeStrategy::Min => "Min",
            MergeStrategy::Max => "Max",
            MergeStrategy::Custom(_) => "Custom",
        };
        write!(f, "MergeStrategy::{}", name)
    }
}

/// Node reducing a prior [`ParallelNode`]'s results map
#[derive(Debug, Clone)]
pub struct MergeNode {
    pub id: String,
    pub parallel_node_id: String,
    pub strategy: MergeStrategy,
}

impl MergeNode {
    pub fn new(
        id: impl Into<String>,
        parallel_node_id: impl Into<String>,
        strategy: MergeStrategy,
    ) -> Self {
        Self {
            id: id.into(),
            parallel_node_id: parallel_node_id.into(),
            strategy,
        }
    }

    /// Read the results map in declaration order
    fn ordered_results(&self, message: &Message) -> Vec<(String, Value)> {
        let Some(Value::Object(map)) = message.data(&self.parallel_node_id) else {
            return Vec::new();
        };

        let order: Vec<String> = message
            .data(&order_key(&self.parallel_node_id))
            .and_then(|v| v.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str())
                    .map(|n| n.to_string())
                    .collect()
            })
            .unwrap_or_else(|| map.keys().cloned().collect());

        order
            .into_iter()
            .filter_map(|name| map.get(&name).map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Apply the merge, storing the merged value as this node's result
    ///
    /// An empty results map is the identity on the message.
    pub fn run(&self, message: Message) -> Message {
        let results = self.ordered_results(&message);
        match self.strategy.apply(&results) {
            Some(merged) => message
                .with_data(self.id.clone(), merged)
                .with_type(MessageType::Merge),
            None => message,
        }
    }
}
