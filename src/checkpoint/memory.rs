//! In-memory checkpointer for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    decode_checkpoint, merge_for_save, Checkpoint, CheckpointError, Checkpointer,
    DEFAULT_NAMESPACE,
};

/// Stores serialized checkpoints in a map keyed by `namespace/thread_id`.
/// Serialization on write and deserialization on read give the deep-copy
/// guarantee for free.
pub struct MemoryCheckpointer {
    namespace: String,
    data: RwLock<HashMap<String, Value>>,
}

impl Default for MemoryCheckpointer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            data: RwLock::new(HashMap::new()),
        }
    }

    fn key(&self, thread_id: &str) -> String {
        format!("{}/{}", self.namespace, thread_id)
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let key = self.key(&checkpoint.thread_id);
        let mut data = self.data.write().await;
        let existing = data.get(&key).cloned().and_then(decode_checkpoint);
        let merged = merge_for_save(existing.as_ref(), checkpoint);
        data.insert(key, serde_json::to_value(&merged)?);
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let data = self.data.read().await;
        Ok(data
            .get(&self.key(thread_id))
            .cloned()
            .and_then(decode_checkpoint))
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, CheckpointError> {
        let mut data = self.data.write().await;
        Ok(data.remove(&self.key(thread_id)).is_some())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let data = self.data.read().await;
        let prefix = format!("{}/", self.namespace);
        let mut out: Vec<Checkpoint> = data
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(_, value)| decode_checkpoint(value.clone()))
            .collect();
        out.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip_field_for_field() {
        let saver = MemoryCheckpointer::new();
        let checkpoint = Checkpoint::new("thread-1", 10)
            .with_messages(vec![crate::model::Message::user("hello")])
            .with_metadata(json!({"source": "test"}));
        saver.save(&checkpoint).await.unwrap();

        let loaded = saver.load("thread-1").await.unwrap().unwrap();
        assert_eq!(loaded.thread_id, "thread-1");
        assert_eq!(loaded.step, 10);
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.metadata, Some(json!({"source": "test"})));
        assert_eq!(loaded.created_at, checkpoint.created_at);
    }

    #[tokio::test]
    async fn test_created_at_preserved_on_update() {
        let saver = MemoryCheckpointer::new();
        let first = Checkpoint::new("t", 1);
        saver.save(&first).await.unwrap();
        let update = Checkpoint::new("t", 2);
        saver.save(&update).await.unwrap();
        let loaded = saver.load("t").await.unwrap().unwrap();
        assert_eq!(loaded.step, 2);
        assert_eq!(loaded.created_at, first.created_at);
        assert!(loaded.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let a = MemoryCheckpointer::with_namespace("tenant-a");
        let b = MemoryCheckpointer::with_namespace("tenant-b");
        a.save(&Checkpoint::new("t", 1)).await.unwrap();
        assert!(a.exists("t").await.unwrap());
        assert!(!b.exists("t").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let saver = MemoryCheckpointer::new();
        saver.save(&Checkpoint::new("a", 1)).await.unwrap();
        saver.save(&Checkpoint::new("b", 1)).await.unwrap();
        assert_eq!(saver.list().await.unwrap().len(), 2);
        assert!(saver.delete("a").await.unwrap());
        assert!(!saver.delete("a").await.unwrap());
        assert_eq!(saver.list().await.unwrap().len(), 1);
    }
}
