//! task: delegate work to a named subagent, optionally in the background.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::session::BackgroundTaskManager;
use crate::subagent::{execute_subagent, SubagentDefinition, SubagentEnv};
use crate::tool::{require_str, Tool, ToolError, ToolInvocation};

/// Delegates to one of the configured subagents. Foreground runs block the
/// turn and merge the subagent context back; background runs go through the
/// task manager and report a task id immediately.
pub struct TaskTool {
    definitions: HashMap<String, SubagentDefinition>,
    env: SubagentEnv,
    tasks: Option<Arc<BackgroundTaskManager>>,
}

impl TaskTool {
    pub fn new(definitions: Vec<SubagentDefinition>, env: SubagentEnv) -> Self {
        Self {
            definitions: definitions
                .into_iter()
                .map(|d| (d.subagent_type.clone(), d))
                .collect(),
            env,
            tasks: None,
        }
    }

    pub fn with_task_manager(mut self, tasks: Arc<BackgroundTaskManager>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    fn catalog(&self) -> String {
        let mut entries: Vec<String> = self
            .definitions
            .values()
            .map(|d| format!("- {}: {}", d.subagent_type, d.description))
            .collect();
        entries.sort();
        entries.join("\n")
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> String {
        "task".to_string()
    }

    fn description(&self) -> String {
        format!(
            "Delegate a task to a specialized subagent. Available subagents:\n{}",
            self.catalog()
        )
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subagent_type": {
                    "type": "string",
                    "description": "Name of the subagent to run"
                },
                "description": {
                    "type": "string",
                    "description": "The task for the subagent to perform"
                },
                "run_in_background": {
                    "type": "boolean",
                    "description": "Run as a background task and return a task id"
                }
            },
            "required": ["subagent_type", "description"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let subagent_type = require_str(&input, "subagent_type")?;
        let description = require_str(&input, "description")?.to_string();
        let background = input
            .get("run_in_background")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let definition = self
            .definitions
            .get(subagent_type)
            .ok_or_else(|| {
                ToolError::InvalidInput(format!(
                    "unknown subagent_type '{subagent_type}'; available: {}",
                    {
                        let mut names: Vec<&str> =
                            self.definitions.keys().map(String::as_str).collect();
                        names.sort_unstable();
                        names.join(", ")
                    }
                ))
            })?
            .clone();

        if background {
            let manager = self.tasks.as_ref().ok_or_else(|| {
                ToolError::Configuration(
                    "background tasks are not enabled for this agent".to_string(),
                )
            })?;
            let env = self.env.clone();
            let prompt = description.clone();
            let task_id = manager.spawn(
                definition.subagent_type.clone(),
                description,
                None,
                async move {
                    let outcome = execute_subagent(&definition, &prompt, &env, None).await;
                    if outcome.success {
                        Ok(json!({
                            "text": outcome.text,
                            "steps": outcome.steps,
                            "finish_reason": outcome.finish_reason,
                        }))
                    } else {
                        Err(outcome
                            .error
                            .unwrap_or_else(|| "subagent failed".to_string()))
                    }
                },
            );
            return Ok(json!({
                "task_id": task_id,
                "status": "pending",
            }));
        }

        let outcome = execute_subagent(&definition, &description, &self.env, None).await;
        {
            let mut parent = self.env.parent_state.lock().await;
            outcome.context.merge_into(&mut parent);
        }
        if outcome.success {
            Ok(json!({
                "success": true,
                "text": outcome.text,
                "steps": outcome.steps,
                "finish_reason": outcome.finish_reason,
                "duration_ms": outcome.duration.as_millis() as u64,
            }))
        } else {
            Ok(json!({
                "success": false,
                "error": outcome.error,
            }))
        }
    }
}
