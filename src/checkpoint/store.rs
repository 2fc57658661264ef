//! Key-value-backed checkpointer: plug any store that speaks
//! [KeyValueStore].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    decode_checkpoint, merge_for_save, Checkpoint, CheckpointError, Checkpointer,
    DEFAULT_NAMESPACE,
};

/// Minimal namespaced key-value contract.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, namespace: &[&str], key: &str) -> Option<Value>;

    async fn put(&self, namespace: &[&str], key: &str, value: Value);

    async fn delete(&self, namespace: &[&str], key: &str) -> bool;

    async fn list(&self, namespace: &[&str]) -> Vec<String>;
}

/// In-memory [KeyValueStore].
#[derive(Default)]
pub struct MemoryKeyValueStore {
    data: RwLock<HashMap<String, Value>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn make_key(namespace: &[&str], key: &str) -> String {
        if namespace.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", namespace.join(":"), key)
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, namespace: &[&str], key: &str) -> Option<Value> {
        let data = self.data.read().await;
        data.get(&Self::make_key(namespace, key)).cloned()
    }

    async fn put(&self, namespace: &[&str], key: &str, value: Value) {
        let mut data = self.data.write().await;
        data.insert(Self::make_key(namespace, key), value);
    }

    async fn delete(&self, namespace: &[&str], key: &str) -> bool {
        let mut data = self.data.write().await;
        data.remove(&Self::make_key(namespace, key)).is_some()
    }

    async fn list(&self, namespace: &[&str]) -> Vec<String> {
        let data = self.data.read().await;
        let prefix = if namespace.is_empty() {
            String::new()
        } else {
            format!("{}:", namespace.join(":"))
        };
        let mut keys: Vec<String> = data
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .map(|k| k[prefix.len()..].to_string())
            .collect();
        keys.sort();
        keys
    }
}

/// Checkpointer over a [KeyValueStore]; keys live under
/// `["checkpoints", <namespace>]`.
pub struct KvCheckpointer {
    store: Arc<dyn KeyValueStore>,
    namespace: String,
}

impl KvCheckpointer {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn namespace_parts(&self) -> [&str; 2] {
        ["checkpoints", self.namespace.as_str()]
    }
}

#[async_trait]
impl Checkpointer for KvCheckpointer {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let namespace = self.namespace_parts();
        let existing = self
            .store
            .get(&namespace, &checkpoint.thread_id)
            .await
            .and_then(decode_checkpoint);
        let merged = merge_for_save(existing.as_ref(), checkpoint);
        self.store
            .put(&namespace, &checkpoint.thread_id, serde_json::to_value(&merged)?)
            .await;
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self
            .store
            .get(&self.namespace_parts(), thread_id)
            .await
            .and_then(decode_checkpoint))
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, CheckpointError> {
        Ok(self.store.delete(&self.namespace_parts(), thread_id).await)
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let namespace = self.namespace_parts();
        let mut out = Vec::new();
        for key in self.store.list(&namespace).await {
            if let Some(checkpoint) = self
                .store
                .get(&namespace, &key)
                .await
                .and_then(decode_checkpoint)
            {
                out.push(checkpoint);
            }
        }
        out.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_kv_round_trip() {
        let store = Arc::new(MemoryKeyValueStore::new());
        let saver = KvCheckpointer::new(store);
        let checkpoint = Checkpoint::new("t1", 7).with_metadata(json!({"k": "v"}));
        saver.save(&checkpoint).await.unwrap();
        let loaded = saver.load("t1").await.unwrap().unwrap();
        assert_eq!(loaded.step, 7);
        assert_eq!(loaded.metadata, Some(json!({"k": "v"})));
    }

    #[tokio::test]
    async fn test_kv_malformed_loads_none() {
        let store = Arc::new(MemoryKeyValueStore::new());
        store
            .put(&["checkpoints", "default"], "weird", json!("just a string"))
            .await;
        let saver = KvCheckpointer::new(store);
        assert!(saver.load("weird").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kv_namespacing_and_list() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
        let a = KvCheckpointer::new(Arc::clone(&store)).with_namespace("a");
        let b = KvCheckpointer::new(Arc::clone(&store)).with_namespace("b");
        a.save(&Checkpoint::new("t", 1)).await.unwrap();
        b.save(&Checkpoint::new("t", 2)).await.unwrap();
        assert_eq!(a.load("t").await.unwrap().unwrap().step, 1);
        assert_eq!(b.load("t").await.unwrap().unwrap().step, 2);
        assert_eq!(a.list().await.unwrap().len(), 1);
    }
}
