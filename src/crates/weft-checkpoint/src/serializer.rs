//! Checkpoint wire codec
//!
//! Backends persist checkpoints as bytes; a [`CheckpointCodec`] decides the
//! encoding. The store encodes on `save` and decodes on `load`, so whatever
//! a codec cannot represent is rejected before anything hits storage —
//! never silently lost and recreated on read.
//!
//! [`JsonCodec`] is the shipped encoding. A checkpoint's `state` and
//! `metadata` maps hold arbitrary `serde_json::Value`s, which rules out
//! non-self-describing formats: they cannot decode a `Value` without the
//! type tags JSON carries inline. Custom codecs (compressed JSON, an
//! encrypted wrapper) implement the trait and are handed to the store.

use crate::checkpoint::Checkpoint;
use crate::error::Result;

/// Encoding used to persist checkpoints
pub trait CheckpointCodec: Send + Sync {
    /// Encode a checkpoint for storage
    ///
    /// Fails when the checkpoint holds a value the format cannot
    /// represent; the store surfaces this at save time.
    fn encode(&self, checkpoint: &Checkpoint) -> Result<Vec<u8>>;

    /// Decode stored bytes back into a checkpoint
    fn decode(&self, bytes: &[u8]) -> Result<Checkpoint>;
}

/// JSON checkpoint encoding (human-readable, cross-language)
#[derive(Debug, Clone, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

impl CheckpointCodec for JsonCodec {
    fn encode(&self, checkpoint: &Checkpoint) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(checkpoint)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Checkpoint> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
