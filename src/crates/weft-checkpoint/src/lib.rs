//! # weft-checkpoint - Run Suspension & Resume Persistence
//!
//! **Trait-based checkpoint abstractions and an in-memory implementation**
//! for persisting suspended workflow runs. A run suspends when a node emits
//! a `waiting` message (human input, an async callback) — the runner writes
//! a [`Checkpoint`] through a [`CheckpointStore`] and returns; a later
//! `resume` call, possibly on another process, loads the checkpoint and
//! continues the run.
//!
//! ## What a checkpoint captures
//!
//! - The node the run paused at, plus the run/graph identifiers
//! - The paused message's `data` blackboard and `metadata` envelope
//! - The pending [human interaction](Checkpoint::pending_interaction), when
//!   the pause was caused by a human-in-the-loop node
//! - The linked child checkpoint when the pause came from a nested subgraph
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use weft_checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryCheckpointStore::new();
//!
//!     let checkpoint = Checkpoint::new(
//!         "run-42",
//!         "approval-flow",
//!         "review",
//!         HashMap::new(),
//!         HashMap::new(),
//!     );
//!     let id = store.save(checkpoint).await?;
//!
//!     let loaded = store.load(&id).await?;
//!     assert_eq!(loaded.current_node_id, "review");
//!
//!     // After the run completes, clean up every checkpoint of the run.
//!     store.delete_by_run("run-42").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Custom backends
//!
//! Implement [`CheckpointStore`] over your storage of choice; the only
//! contract is that all fields round-trip verbatim and that `load`
//! distinguishes missing from expired. Checkpoints hit storage as bytes
//! produced by a [`CheckpointCodec`] (JSON by default), so a backend
//! stores opaque blobs plus whatever index columns it needs. See the
//! [`store`] module docs for a sketch of a PostgreSQL backend.

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointId};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use serializer::{CheckpointCodec, JsonCodec};
pub use store::CheckpointStore;
