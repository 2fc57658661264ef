//! Background task table: lifecycle tracking plus a completion event
//! channel. Tasks run as independent continuations and communicate back
//! only through this manager.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Lifecycle: `pending → running → {completed | failed | killed}`.
/// Monotonic; terminal states are sinks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Killed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Killed
        )
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Running => 1,
            _ => 2,
        }
    }
}

/// One background task record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: String,
    pub subagent_type: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {0} is not in a terminal state")]
    NotTerminal(String),

    #[error("Task {0} is already terminal")]
    AlreadyTerminal(String),
}

struct TaskEntry {
    task: BackgroundTask,
    cancel: CancellationToken,
}

/// Task table plus completion events. Cheap to clone via `Arc`.
pub struct BackgroundTaskManager {
    tasks: Mutex<HashMap<String, TaskEntry>>,
    events: broadcast::Sender<BackgroundTask>,
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTaskManager {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            tasks: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Spawn a background continuation. The future's Ok/Err lands in the
    /// task record; a kill cancels the token and wins the race.
    pub fn spawn<F>(
        self: &Arc<Self>,
        subagent_type: impl Into<String>,
        description: impl Into<String>,
        metadata: Option<Value>,
        future: F,
    ) -> String
    where
        F: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let task = BackgroundTask {
            id: id.clone(),
            subagent_type: subagent_type.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            result: None,
            error: None,
            metadata,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let cancel = CancellationToken::new();
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.insert(
                id.clone(),
                TaskEntry {
                    task,
                    cancel: cancel.clone(),
                },
            );
        }

        let manager = Arc::clone(self);
        let task_id = id.clone();
        tokio::spawn(async move {
            manager.transition(&task_id, TaskStatus::Running, None, None);
            tokio::select! {
                _ = cancel.cancelled() => {
                    // kill() already moved the record to Killed.
                }
                outcome = future => match outcome {
                    Ok(result) => {
                        manager.transition(&task_id, TaskStatus::Completed, Some(result), None);
                    }
                    Err(error) => {
                        manager.transition(&task_id, TaskStatus::Failed, None, Some(error));
                    }
                },
            }
        });
        id
    }

    /// Apply a monotonic status transition. Terminal states are sinks;
    /// out-of-order transitions are ignored.
    fn transition(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) {
        let updated = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            match tasks.get_mut(id) {
                Some(entry) => {
                    let current = entry.task.status;
                    if current.is_terminal() || status.rank() < current.rank() {
                        None
                    } else {
                        entry.task.status = status;
                        entry.task.updated_at = Utc::now();
                        if status.is_terminal() {
                            entry.task.completed_at = Some(entry.task.updated_at);
                            entry.task.result = result;
                            entry.task.error = error;
                        }
                        Some(entry.task.clone())
                    }
                }
                None => None,
            }
        };
        if let Some(task) = updated {
            let _ = self.events.send(task);
        }
    }

    pub fn get(&self, id: &str) -> Option<BackgroundTask> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.get(id).map(|e| e.task.clone())
    }

    pub fn list(&self) -> Vec<BackgroundTask> {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<BackgroundTask> = tasks.values().map(|e| e.task.clone()).collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Any task still pending or running.
    pub fn has_active(&self) -> bool {
        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.values().any(|e| !e.task.status.is_terminal())
    }

    /// Kill a non-terminal task. Always permitted from `running` (and from
    /// `pending`); terminal tasks are left untouched.
    pub fn kill(&self, id: &str) -> Result<BackgroundTask, TaskError> {
        let (task, cancel) = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            let entry = tasks
                .get_mut(id)
                .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
            if entry.task.status.is_terminal() {
                return Err(TaskError::AlreadyTerminal(id.to_string()));
            }
            entry.task.status = TaskStatus::Killed;
            entry.task.updated_at = Utc::now();
            entry.task.completed_at = Some(entry.task.updated_at);
            (entry.task.clone(), entry.cancel.clone())
        };
        cancel.cancel();
        let _ = self.events.send(task.clone());
        Ok(task)
    }

    /// Remove a task record. Permitted only from terminal states.
    pub fn remove(&self, id: &str) -> Result<BackgroundTask, TaskError> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let entry = tasks
            .remove(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if !entry.task.status.is_terminal() {
            tasks.insert(id.to_string(), entry);
            return Err(TaskError::NotTerminal(id.to_string()));
        }
        Ok(entry.task)
    }

    /// Resolve with the earliest already-terminal task, or await the next
    /// terminal transition. `None` when nothing is tracked at all.
    pub async fn wait_for_next_completion(&self) -> Option<BackgroundTask> {
        let mut receiver = self.events.subscribe();
        {
            let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            if tasks.is_empty() {
                return None;
            }
            let mut terminal: Vec<&BackgroundTask> = tasks
                .values()
                .map(|e| &e.task)
                .filter(|t| t.status.is_terminal())
                .collect();
            terminal.sort_by_key(|t| t.completed_at);
            if let Some(first) = terminal.first() {
                return Some((*first).clone());
            }
        }
        loop {
            match receiver.recv().await {
                Ok(task) if task.status.is_terminal() => return Some(task),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Subscribe to every status change.
    pub fn subscribe(&self) -> broadcast::Receiver<BackgroundTask> {
        self.events.subscribe()
    }

    /// Status changes as a stream, for consumers that prefer stream
    /// combinators over a receiver loop.
    pub fn event_stream(
        &self,
    ) -> tokio_stream::wrappers::BroadcastStream<BackgroundTask> {
        tokio_stream::wrappers::BroadcastStream::new(self.events.subscribe())
    }
}
