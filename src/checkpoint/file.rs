//! File-directory checkpointer: one JSON file per thread.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{
    decode_checkpoint, merge_for_save, Checkpoint, CheckpointError, Checkpointer,
    DEFAULT_NAMESPACE,
};

/// Persists checkpoints under `<dir>/<namespace>/<thread_id>.json`.
/// Pretty-printed by default; compact mode optional. Thread ids are
/// sanitized into safe filenames.
pub struct FileCheckpointer {
    dir: PathBuf,
    namespace: String,
    pretty: bool,
}

impl FileCheckpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            pretty: true,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    fn sanitize(thread_id: &str) -> String {
        thread_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.dir
            .join(&self.namespace)
            .join(format!("{}.json", Self::sanitize(thread_id)))
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let existing = self.load(&checkpoint.thread_id).await?;
        let merged = merge_for_save(existing.as_ref(), checkpoint);
        let path = self.path_for(&checkpoint.thread_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = if self.pretty {
            serde_json::to_string_pretty(&merged)?
        } else {
            serde_json::to_string(&merged)?
        };
        tokio::fs::write(&path, body).await?;
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(thread_id);
        let body = match tokio::fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // Invalid JSON is an error; a valid JSON value that is not a
        // checkpoint loads as None.
        let value: serde_json::Value = serde_json::from_str(&body)?;
        Ok(decode_checkpoint(value))
    }

    async fn delete(&self, thread_id: &str) -> Result<bool, CheckpointError> {
        let path = self.path_for(thread_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        let dir = self.dir.join(&self.namespace);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(body) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&body) {
                if let Some(checkpoint) = decode_checkpoint(value) {
                    out.push(checkpoint);
                }
            }
        }
        out.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_round_trip_and_sanitized_name() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileCheckpointer::new(dir.path());
        let checkpoint = Checkpoint::new("user/42:session", 3);
        saver.save(&checkpoint).await.unwrap();

        let expected = dir
            .path()
            .join(DEFAULT_NAMESPACE)
            .join("user_42_session.json");
        assert!(expected.exists());

        let loaded = saver.load("user/42:session").await.unwrap().unwrap();
        assert_eq!(loaded.step, 3);
        // Stored thread id is the original, not the sanitized filename.
        assert_eq!(loaded.thread_id, "user/42:session");
    }

    #[tokio::test]
    async fn test_pretty_by_default_compact_optional() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileCheckpointer::new(dir.path());
        saver.save(&Checkpoint::new("t", 0)).await.unwrap();
        let body =
            std::fs::read_to_string(dir.path().join(DEFAULT_NAMESPACE).join("t.json")).unwrap();
        assert!(body.contains('\n'));

        let compact = FileCheckpointer::new(dir.path())
            .with_namespace("c")
            .compact();
        compact.save(&Checkpoint::new("t", 0)).await.unwrap();
        let body = std::fs::read_to_string(dir.path().join("c").join("t.json")).unwrap();
        assert!(!body.trim_end().contains('\n'));
    }

    #[tokio::test]
    async fn test_invalid_json_errors_malformed_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileCheckpointer::new(dir.path());
        let ns_dir = dir.path().join(DEFAULT_NAMESPACE);
        std::fs::create_dir_all(&ns_dir).unwrap();

        std::fs::write(ns_dir.join("bad.json"), "{not json").unwrap();
        assert!(saver.load("bad").await.is_err());

        std::fs::write(ns_dir.join("odd.json"), "{\"just\": \"json\"}").unwrap();
        assert!(saver.load("odd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileCheckpointer::new(dir.path());
        assert!(saver.load("absent").await.unwrap().is_none());
        assert!(!saver.delete("absent").await.unwrap());
    }
}
