//! Error types and error handling for the graph engine
//!
//! All engine errors are variants of [`EngineError`]. The runner
//! distinguishes *run-terminating* errors (recorded in the report, message
//! transitioned to `failed`) from *node-local* errors that the transformer
//! chain recovered; protocol errors around suspension (missing checkpoint,
//! failed response validation) are fatal to the operation that produced
//! them and surface as `Err` from the runner's public API.

use thiserror::Error;

/// Convenience result type using [`EngineError`]
pub type Result<T> = std::result::Result<T, EngineError>;

/// Comprehensive error type for all engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Graph structure validation failed
    #[error("Graph validation failed: {0}")]
    Validation(String),

    /// The configured entry point does not exist in the graph
    #[error("Entry point '{0}' does not exist")]
    MissingEntryPoint(String),

    /// An edge references a node that does not exist
    #[error("Edge '{from}' -> '{to}' references a missing node")]
    InvalidEdgeTarget {
        /// Edge source
        from: String,
        /// Edge target
        to: String,
    },

    /// A node cannot be reached from the entry point
    #[error("Node '{0}' is unreachable from the entry point")]
    UnreachableNode(String),

    /// A cycle was found in a graph that disallows cycles, or a run
    /// exceeded its activation budget
    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    /// A message state transition violated the lifecycle state machine
    #[error("Illegal state transition: {from} -> {to}")]
    IllegalStateTransition {
        /// State before the attempted transition
        from: String,
        /// Requested state
        to: String,
    },

    /// Node execution failed with context
    #[error("Node '{node}' execution failed: {error}")]
    NodeExecution {
        /// Name of the node that failed
        node: String,
        /// Error message from node execution
        error: String,
    },

    /// A decision node matched no branch and had no otherwise branch
    #[error("Decision node '{node}' has no matching branch")]
    NoMatchingBranch {
        /// The decision node
        node: String,
    },

    /// A tool invocation exceeded its timeout (retriable)
    #[error("Tool '{tool}' timed out after {duration_ms}ms")]
    ToolTimeout {
        /// Tool name
        tool: String,
        /// Configured timeout in milliseconds
        duration_ms: u64,
    },

    /// A parallel branch requested suspension, or a node suspended without
    /// a checkpoint store configured
    #[error("Invalid suspension in node '{node}': {reason}")]
    InvalidSuspension {
        /// The offending node
        node: String,
        /// Why the suspension is invalid
        reason: String,
    },

    /// A subgraph exceeded the configured nesting depth
    #[error("Subgraph '{node}' exceeded depth limit: {depth} >= {max_depth}")]
    SubgraphDepthExceeded {
        /// The subgraph node
        node: String,
        /// Depth at entry
        depth: usize,
        /// Configured limit
        max_depth: usize,
    },

    /// A human response failed validation; the checkpoint is untouched
    #[error("Response validation failed at node '{node}': {reason}")]
    ValidationFailed {
        /// The human node whose validator rejected the response
        node: String,
        /// Validator message
        reason: String,
    },

    /// A human interaction was answered after its timeout elapsed
    #[error("Interaction at node '{node}' has expired")]
    InteractionExpired {
        /// The human node
        node: String,
    },

    /// No checkpoint exists under the given id
    #[error("Checkpoint missing: {0}")]
    CheckpointMissing(String),

    /// The checkpoint exists but its expiry has passed
    #[error("Checkpoint expired: {0}")]
    CheckpointExpired(String),

    /// A cache fingerprint was reused under a different cache kind
    #[error("Cache key conflict for fingerprint '{fingerprint}'")]
    CacheKeyConflict {
        /// The conflicting fingerprint
        fingerprint: String,
    },

    /// Checkpoint persistence error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] weft_checkpoint::CheckpointError),

    /// Event bus error
    #[error("Event error: {0}")]
    Event(#[from] weft_events::EventError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic execution error without specific node context
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Custom application-defined error
    #[error("{0}")]
    Custom(String),
}

impl EngineError {
    /// Create a node execution error with context
    pub fn node_execution(node: impl Into<String>, error: impl Into<String>) -> Self {
        Self::NodeExecution {
            node: node.into(),
            error: error.into(),
        }
    }

    /// Create a response validation error
    pub fn validation_failed(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-suspension error
    pub fn invalid_suspension(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSuspension {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Whether a retry of the same operation may succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ToolTimeout { .. })
    }
}
