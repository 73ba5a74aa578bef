//! Engine-level tunables

use std::time::Duration;

/// Runner configuration
///
/// All knobs have conservative defaults; override with the `with_*`
/// builders.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Save a checkpoint every N routed nodes; 0 disables cadence saves
    pub save_every_n_nodes: usize,

    /// Persist a checkpoint when a run fails
    pub save_on_error: bool,

    /// Hard cap on node activations per run; exceeded means a runaway loop
    pub max_node_activations: usize,

    /// Default nesting limit for subgraphs
    pub max_subgraph_depth: usize,

    /// Default tool timeout when the tool declares none
    pub tool_timeout: Option<Duration>,

    /// Expiry applied to saved checkpoints
    pub checkpoint_ttl: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            save_every_n_nodes: 0,
            save_on_error: false,
            max_node_activations: 1000,
            max_subgraph_depth: 10,
            tool_timeout: None,
            checkpoint_ttl: None,
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_every_n_nodes(mut self, n: usize) -> Self {
        self.save_every_n_nodes = n;
        self
    }

    pub fn with_save_on_error(mut self, save_on_error: bool) -> Self {
        self.save_on_error = save_on_error;
        self
    }

    pub fn with_max_node_activations(mut self, max: usize) -> Self {
        self.max_node_activations = max;
        self
    }

    pub fn with_max_subgraph_depth(mut self, max: usize) -> Self {
        self.max_subgraph_depth = max;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn with_checkpoint_ttl(mut self, ttl: Duration) -> Self {
        self.checkpoint_ttl = Some(ttl);
        self
    }
}
