//! Checkpointers: per-thread snapshots of messages, state, and any
//! pending interrupt, behind pluggable stores.
//!
//! Every saver namespaces its keys for multi-tenant isolation, deep-copies
//! on read and write (serde round-trips), preserves `thread_id` and
//! `created_at` across updates, and loads structurally-invalid data as
//! `None` rather than failing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::agent::turn::InterruptDescriptor;
use crate::model::Message;
use crate::state::StateSnapshot;

mod file;
mod memory;
mod store;

pub use file::FileCheckpointer;
pub use memory::MemoryCheckpointer;
pub use store::{KeyValueStore, KvCheckpointer, MemoryKeyValueStore};

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Checkpoint store error: {0}")]
    Store(String),
}

/// A serializable snapshot of one thread's progress.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub step: u64,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub state: StateSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<InterruptDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: impl Into<String>, step: u64) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            step,
            messages: Vec::new(),
            state: StateSnapshot::default(),
            interrupt: None,
            metadata: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_state(mut self, state: StateSnapshot) -> Self {
        self.state = state;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Option<InterruptDescriptor>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Carry `thread_id` and `created_at` forward from the stored record:
/// both are immutable after first save. `updated_at` always advances.
pub(crate) fn merge_for_save(existing: Option<&Checkpoint>, incoming: &Checkpoint) -> Checkpoint {
    let mut merged = incoming.clone();
    if let Some(existing) = existing {
        merged.created_at = existing.created_at;
        merged.thread_id = existing.thread_id.clone();
    }
    merged.updated_at = Utc::now();
    merged
}

/// Decode a stored value leniently: structural mismatches load as `None`.
pub(crate) fn decode_checkpoint(value: Value) -> Option<Checkpoint> {
    serde_json::from_value(value).ok()
}

/// Per-thread snapshot persistence.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    async fn exists(&self, thread_id: &str) -> Result<bool, CheckpointError> {
        Ok(self.load(thread_id).await?.is_some())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, CheckpointError>;

    /// All checkpoints in the namespace, ordered by `updated_at`.
    async fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_preserves_identity_fields() {
        let original = Checkpoint::new("t1", 1);
        let created = original.created_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        let mut update = Checkpoint::new("t1", 2);
        update.metadata = Some(json!({"source": "test"}));
        let merged = merge_for_save(Some(&original), &update);
        assert_eq!(merged.created_at, created);
        assert_eq!(merged.step, 2);
        assert!(merged.updated_at > created);
    }

    #[test]
    fn test_decode_malformed_is_none() {
        assert!(decode_checkpoint(json!({"not": "a checkpoint"})).is_none());
        assert!(decode_checkpoint(json!([1, 2, 3])).is_none());
    }
}
