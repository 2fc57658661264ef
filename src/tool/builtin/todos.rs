//! write_todos: replace the agent's todo list (planning).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::state::{AgentState, Todo, TodoStatus};
use crate::tool::{Tool, ToolError, ToolInvocation};

/// Writes the full todo list into agent state. Replace semantics: the model
/// passes the complete list each time it updates the plan.
pub struct WriteTodosTool {
    state: Arc<Mutex<AgentState>>,
}

impl WriteTodosTool {
    pub fn new(state: Arc<Mutex<AgentState>>) -> Self {
        Self { state }
    }

    fn parse_status(raw: Option<&str>) -> TodoStatus {
        match raw {
            Some("in_progress") => TodoStatus::InProgress,
            Some("completed") => TodoStatus::Completed,
            _ => TodoStatus::Pending,
        }
    }
}

#[async_trait]
impl Tool for WriteTodosTool {
    fn name(&self) -> String {
        "write_todos".to_string()
    }

    fn description(&self) -> String {
        "Write or update the current to-do list. Use this to break complex \
         tasks into steps and track progress. Pass the full list; each item \
         has 'content' and optional 'id' and 'status' (pending, in_progress, \
         completed)."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "Complete todo list, in order.",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed"]
                            }
                        },
                        "required": ["content"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let items = input
            .get("todos")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidInput("'todos' must be an array".to_string()))?;

        let now = Utc::now();
        let todos: Vec<Todo> = items
            .iter()
            .map(|item| Todo {
                id: item
                    .get("id")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                content: item
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                status: Self::parse_status(item.get("status").and_then(Value::as_str)),
                created_at: now,
            })
            .collect();

        let count = todos.len();
        self.state.lock().await.set_todos(todos);
        Ok(json!({
            "success": true,
            "message": format!("Todo list updated ({count} items)."),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_todos_replaces_list() {
        let state = Arc::new(Mutex::new(AgentState::new()));
        let tool = WriteTodosTool::new(Arc::clone(&state));
        let result = tool
            .execute(
                json!({"todos": [
                    {"content": "first", "status": "in_progress"},
                    {"content": "second"}
                ]}),
                &ToolInvocation::new("c1"),
            )
            .await
            .unwrap();
        assert_eq!(result["success"], true);

        let guard = state.lock().await;
        assert_eq!(guard.todos.len(), 2);
        assert_eq!(guard.todos[0].status, TodoStatus::InProgress);
        assert_eq!(guard.todos[1].status, TodoStatus::Pending);
    }

    #[tokio::test]
    async fn test_missing_todos_field() {
        let state = Arc::new(Mutex::new(AgentState::new()));
        let tool = WriteTodosTool::new(state);
        let err = tool
            .execute(json!({}), &ToolInvocation::new("c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
