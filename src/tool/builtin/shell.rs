//! bash: shell execution through the backend.
//!
//! Exposed only when the backend reports the execute capability.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backend::Backend;
use crate::tool::{require_str, Tool, ToolError, ToolInvocation};

pub struct BashTool {
    backend: Arc<dyn Backend>,
}

impl BashTool {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> String {
        "bash".to_string()
    }

    fn description(&self) -> String {
        "Run a shell command in the workspace and return its exit code and \
         output."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        _invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        let command = require_str(&input, "command")?;
        let result = self.backend.execute(command).await?;
        Ok(serde_json::to_value(result)?)
    }
}

/// Pattern gate in front of another tool's `command` input. Installed by
/// `accept_edits` mode with `block_shell_file_ops`.
pub struct CommandGuard {
    inner: Arc<dyn Tool>,
    patterns: Vec<regex::Regex>,
}

impl CommandGuard {
    pub fn new(inner: Arc<dyn Tool>, patterns: &[&str]) -> Self {
        Self {
            inner,
            patterns: patterns
                .iter()
                .filter_map(|p| regex::Regex::new(p).ok())
                .collect(),
        }
    }
}

#[async_trait]
impl Tool for CommandGuard {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn description(&self) -> String {
        self.inner.description()
    }

    fn parameters(&self) -> Value {
        self.inner.parameters()
    }

    async fn execute(
        &self,
        input: Value,
        invocation: &ToolInvocation,
    ) -> Result<Value, ToolError> {
        if let Some(command) = input.get("command").and_then(Value::as_str) {
            for pattern in &self.patterns {
                if pattern.is_match(command) {
                    return Err(ToolError::Backend(
                        crate::backend::BackendError::CommandBlocked {
                            pattern: pattern.as_str().to_string(),
                        },
                    ));
                }
            }
        }
        self.inner.execute(input, invocation).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;

    #[tokio::test]
    async fn test_bash_runs_command() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(HostBackend::new(dir.path()).with_shell());
        let tool = BashTool::new(backend);
        let result = tool
            .execute(json!({"command": "echo ok"}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(result["exit_code"], 0);
        assert!(result["output"].as_str().unwrap().contains("ok"));
    }

    #[tokio::test]
    async fn test_blocked_command_is_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(
            HostBackend::new(dir.path())
                .with_shell()
                .with_file_ops_blocked(),
        );
        let tool = BashTool::new(backend);
        let err = tool
            .execute(
                json!({"command": "rm -rf ."}),
                &ToolInvocation::new("c1"),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CommandBlockedError"));
    }
}
