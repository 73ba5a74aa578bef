//! In-memory reference implementation of [`CheckpointStore`]
//!
//! Useful for tests, examples, and single-process deployments. Checkpoints
//! are held as codec-encoded bytes behind a `tokio::sync::RwLock`, with a
//! small index (run id, graph id, timestamps) for the list/delete queries,
//! so every `save`/`load` exercises the same encode/decode path a durable
//! backend would. Nothing survives process restart; for durable suspension
//! implement [`CheckpointStore`] against a real backend.

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::serializer::{CheckpointCodec, JsonCodec};
use crate::store::CheckpointStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One stored checkpoint: the encoded bytes plus the fields the store
/// queries without decoding
#[derive(Debug, Clone)]
struct StoredCheckpoint {
    bytes: Vec<u8>,
    run_id: String,
    graph_id: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredCheckpoint {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Utc::now() > t).unwrap_or(false)
    }
}

type CheckpointStorage = Arc<RwLock<HashMap<String, StoredCheckpoint>>>;

/// Thread-safe in-memory checkpoint store
#[derive(Clone)]
pub struct InMemoryCheckpointStore {
    storage: CheckpointStorage,
    codec: Arc<dyn CheckpointCodec>,
}

impl InMemoryCheckpointStore {
    /// A store encoding through the default [`JsonCodec`]
    pub fn new() -> Self {
        Self::with_codec(Arc::new(JsonCodec::new()))
    }

    /// A store encoding through a custom codec
    pub fn with_codec(codec: Arc<dyn CheckpointCodec>) -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
            codec,
        }
    }

    /// Number of checkpoints currently held
    pub async fn checkpoint_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Drop everything (test helper)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }

    async fn decode_matching<F>(&self, matches: F) -> Result<Vec<Checkpoint>>
    where
        F: Fn(&StoredCheckpoint) -> bool,
    {
        let storage = self.storage.read().await;
        let mut found = Vec::new();
        for entry in storage.values().filter(|e| matches(e)) {
            found.push(self.codec.decode(&entry.bytes)?);
        }
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCheckpointStore")
            .field("codec", &"<codec>")
            .finish()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<String> {
        // Unrepresentable values fail here, not on a later load.
        let bytes = self.codec.encode(&checkpoint)?;

        let id = checkpoint.id.clone();
        let entry = StoredCheckpoint {
            bytes,
            run_id: checkpoint.run_id.clone(),
            graph_id: checkpoint.graph_id.clone(),
            created_at: checkpoint.created_at,
            expires_at: checkpoint.expires_at,
        };
        self.storage.write().await.insert(id.clone(), entry);
        Ok(id)
    }

    async fn load(&self, id: &str) -> Result<Checkpoint> {
        let storage = self.storage.read().await;
        let entry = storage
            .get(id)
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))?;

        if entry.is_expired() {
            return Err(CheckpointError::Expired(id.to_string()));
        }

        self.codec.decode(&entry.bytes)
    }

    async fn list_by_graph(&self, graph_id: &str) -> Result<Vec<Checkpoint>> {
        self.decode_matching(|e| e.graph_id == graph_id).await
    }

    async fn list_by_run(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        self.decode_matching(|e| e.run_id == run_id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.storage.write().await.remove(id);
        Ok(())
    }

    async fn delete_by_run(&self, run_id: &str) -> Result<usize> {
        let mut storage = self.storage.write().await;
        let before = storage.len();
        storage.retain(|_, e| e.run_id != run_id);
        Ok(before - storage.len())
    }

    async fn delete_expired(&self) -> Result<usize> {
        let mut storage = self.storage.write().await;
        let before = storage.len();
        storage.retain(|_, e| !e.is_expired());
        Ok(before - storage.len())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let storage = self.storage.read().await;
        Ok(storage.get(id).map(|e| !e.is_expired()).unwrap_or(false))
    }
}
