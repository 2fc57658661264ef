//! Agent state: the ordered todo list and the virtual file map.
//!
//! State is a plain value container with no policy. All mutation is local
//! and sequential within a single agent turn; subagents fork it with
//! [crate::subagent::SubagentContext]. The file map lives behind a shared
//! handle so a subagent context with shared files aliases the parent's map
//! by reference, while an isolated context deep-copies it.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a todo item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// A single planning item.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    pub created_at: DateTime<Utc>,
}

impl Todo {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            status: TodoStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// One virtual file: ordered lines plus timestamps.
///
/// Lines never contain embedded newlines; `created_at <= modified_at`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileEntry {
    pub lines: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl FileEntry {
    pub fn new(content: &str) -> Self {
        let now = Utc::now();
        Self {
            lines: split_lines(content),
            created_at: now,
            modified_at: now,
        }
    }

    pub fn content(&self) -> String {
        self.lines.join("\n")
    }

    /// Size in bytes of the joined content.
    pub fn size(&self) -> u64 {
        let newlines = self.lines.len().saturating_sub(1);
        (self.lines.iter().map(String::len).sum::<usize>() + newlines) as u64
    }
}

/// Split content into lines, keeping an empty trailing line out.
pub fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return vec![String::new()];
    }
    content.split('\n').map(String::from).collect()
}

/// Canonicalize a virtual path: trimmed, leading `/`, no trailing `/`
/// except for the root itself.
pub fn canonicalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let mut out = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    while out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Shared handle to the virtual file map. Cloning the handle aliases the
/// same map; [FileSystem::deep_clone] produces an independent copy.
#[derive(Clone, Debug, Default)]
pub struct FileSystem {
    inner: Arc<RwLock<BTreeMap<String, FileEntry>>>,
}

impl FileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `other` aliases the same underlying map.
    pub fn shares_with(&self, other: &FileSystem) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn deep_clone(&self) -> Self {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner()).clone();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn get(&self, path: &str) -> Option<FileEntry> {
        let key = canonicalize_path(path);
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        let key = canonicalize_path(path);
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&key)
    }

    /// Insert or overwrite; `created_at` is preserved on overwrite.
    pub fn put(&self, path: &str, content: &str) -> String {
        let key = canonicalize_path(path);
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        match map.get_mut(&key) {
            Some(existing) => {
                existing.lines = split_lines(content);
                existing.modified_at = now;
            }
            None => {
                map.insert(key.clone(), FileEntry::new(content));
            }
        }
        key
    }

    /// Replace a file's lines, bumping `modified_at`. No-op when absent.
    pub fn update_lines(&self, path: &str, lines: Vec<String>) {
        let key = canonicalize_path(path);
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = map.get_mut(&key) {
            entry.lines = lines;
            entry.modified_at = Utc::now();
        }
    }

    pub fn remove(&self, path: &str) -> Option<FileEntry> {
        let key = canonicalize_path(path);
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key)
    }

    pub fn paths(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot the whole map (deep copy).
    pub fn snapshot(&self) -> BTreeMap<String, FileEntry> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the entire map in place, keeping the handle (and every
    /// alias of it) intact.
    pub fn replace_contents(&self, map: BTreeMap<String, FileEntry>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *inner = map;
    }

    /// Copy entries from `other` that this map does not have yet.
    pub fn absorb_missing(&self, other: &FileSystem) {
        let theirs = other.snapshot();
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        for (path, entry) in theirs {
            map.entry(path).or_insert(entry);
        }
    }
}

/// Per-agent state: todos plus files. Background tasks live in the session
/// driver's task manager and are shared by handle, not stored here.
#[derive(Clone, Debug, Default)]
pub struct AgentState {
    pub todos: Vec<Todo>,
    pub files: FileSystem,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_todos(&mut self, todos: Vec<Todo>) {
        self.todos = todos;
    }

    /// Serializable snapshot for checkpointing.
    pub fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            todos: self.todos.clone(),
            files: self.files.snapshot(),
        }
    }

    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        let files = FileSystem::new();
        files.replace_contents(snapshot.files);
        Self {
            todos: snapshot.todos,
            files,
        }
    }

    /// Restore from a snapshot in place: the file map's handle (and any
    /// backend aliasing it) is preserved.
    pub fn restore_snapshot(&mut self, snapshot: StateSnapshot) {
        self.todos = snapshot.todos;
        self.files.replace_contents(snapshot.files);
    }
}

/// Deep-copied, serializable view of [AgentState].
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct StateSnapshot {
    #[serde(default)]
    pub todos: Vec<Todo>,
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
}
