//! Extensible checkpoint storage trait for custom backend implementations
//!
//! This module defines the **[`CheckpointStore`]** trait - the abstraction the
//! runner persists suspended runs through. Implementing it lets downstream
//! projects back suspension with any storage system (PostgreSQL, SQLite,
//! Redis, S3, ...) while keeping the resume protocol unchanged.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  weft-core Runner                                            │
//! │  • human node emits state=waiting                            │
//! │  • runner builds Checkpoint from the paused message          │
//! │  • store.save(checkpoint) → Paused outcome with the id       │
//! │  • later: store.load(id) → reconstruct message → continue    │
//! └───────────────┬──────────────────────────────────────────────┘
//!                 │ CheckpointStore trait
//!                 ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storage Backend (your implementation)                       │
//! │  • InMemoryCheckpointStore (this crate, reference)           │
//! │  • PostgreSQL / SQLite / Redis / object storage              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Implementation requirements
//!
//! - **Persist fields verbatim.** The engine performs no migration; a loaded
//!   checkpoint must equal the saved one.
//! - **Thread safety.** Stores are shared across concurrent runs and must be
//!   `Send + Sync`; checkpoint writes for a single run are serialized by the
//!   runner, but distinct runs write concurrently.
//! - **`load` distinguishes missing from expired.** Missing ids return
//!   [`CheckpointError::NotFound`]; present-but-expired ids return
//!   [`CheckpointError::Expired`] so callers can tell the difference.
//! - **Run-scoped cleanup.** `delete_by_run` removes every checkpoint of one
//!   run id exactly (run ids are subgraph-namespaced, so a parent's cleanup
//!   never deletes child checkpoints).
//!
//! # Example: custom backend
//!
//! ```rust,ignore
//! use weft_checkpoint::{Checkpoint, CheckpointStore};
//! use async_trait::async_trait;
//!
//! struct PostgresCheckpointStore { pool: sqlx::PgPool }
//!
//! #[async_trait]
//! impl CheckpointStore for PostgresCheckpointStore {
//!     async fn save(&self, checkpoint: Checkpoint) -> weft_checkpoint::Result<String> {
//!         let data = serde_json::to_value(&checkpoint)?;
//!         sqlx::query("INSERT INTO checkpoints (id, run_id, graph_id, data) VALUES ($1, $2, $3, $4)")
//!             .bind(&checkpoint.id)
//!             .bind(&checkpoint.run_id)
//!             .bind(&checkpoint.graph_id)
//!             .bind(&data)
//!             .execute(&self.pool)
//!             .await
//!             .map_err(|e| weft_checkpoint::CheckpointError::Storage(e.to_string()))?;
//!         Ok(checkpoint.id)
//!     }
//!
//!     // ... remaining methods ...
//! #   async fn load(&self, _: &str) -> weft_checkpoint::Result<Checkpoint> { unimplemented!() }
//! #   async fn list_by_graph(&self, _: &str) -> weft_checkpoint::Result<Vec<Checkpoint>> { unimplemented!() }
//! #   async fn list_by_run(&self, _: &str) -> weft_checkpoint::Result<Vec<Checkpoint>> { unimplemented!() }
//! #   async fn delete(&self, _: &str) -> weft_checkpoint::Result<()> { unimplemented!() }
//! #   async fn delete_by_run(&self, _: &str) -> weft_checkpoint::Result<usize> { unimplemented!() }
//! #   async fn delete_expired(&self) -> weft_checkpoint::Result<usize> { unimplemented!() }
//! #   async fn exists(&self, _: &str) -> weft_checkpoint::Result<bool> { unimplemented!() }
//! }
//! ```

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use async_trait::async_trait;

/// Persistence contract for run suspension
///
/// All methods take `&self`; implementations are expected to use interior
/// mutability and be safe under concurrent access.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint, returning its id
    async fn save(&self, checkpoint: Checkpoint) -> Result<String>;

    /// Load a checkpoint by id
    ///
    /// Returns [`CheckpointError::NotFound`](crate::CheckpointError::NotFound)
    /// for unknown ids and
    /// [`CheckpointError::Expired`](crate::CheckpointError::Expired) for
    /// checkpoints whose expiry has passed.
    async fn load(&self, id: &str) -> Result<Checkpoint>;

    /// List all checkpoints for a graph, oldest first
    async fn list_by_graph(&self, graph_id: &str) -> Result<Vec<Checkpoint>>;

    /// List all checkpoints for a run id, oldest first
    ///
    /// Matches the run id exactly; subgraph children have their own
    /// namespaced ids and are not included.
    async fn list_by_run(&self, run_id: &str) -> Result<Vec<Checkpoint>>;

    /// Delete a single checkpoint; unknown ids are a no-op
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete every checkpoint of a run, returning how many were removed
    async fn delete_by_run(&self, run_id: &str) -> Result<usize>;

    /// Delete every expired checkpoint, returning how many were removed
    async fn delete_expired(&self) -> Result<usize>;

    /// Whether a (non-expired) checkpoint with this id exists
    async fn exists(&self, id: &str) -> Result<bool>;
}
