//! Tools: the trait handed to the model SDK, the hook-gating wrapper, and
//! the built-in tool set.
//!
//! A tool is a value with a name, a description, a JSON-schema parameter
//! block, and an async `execute`. Built-in tools are factories closing over
//! shared handles (backend, state, subagent set) rather than reaching for
//! globals; the runtime injects per-call information through
//! [ToolInvocation].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agent::turn::TurnState;
use crate::backend::BackendError;

pub mod builtin;
mod wrapper;

pub use wrapper::HookedTool;

/// Errors raised by tool execution. The wrapper packages these into tool
/// result values; they never terminate generation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid tool input: {0}")]
    InvalidInput(String),

    #[error("Tool execution failed: {0}")]
    Execution(String),

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool configuration error: {0}")]
    Configuration(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-call information injected by the runtime. The model SDK constructs
/// the bare invocation (id + signal); the wrapper enriches it with the turn
/// handle before delegating to the inner tool.
#[derive(Clone, Default)]
pub struct ToolInvocation {
    pub tool_call_id: String,
    /// Cancellation signal; tools that honor it must return promptly.
    pub signal: CancellationToken,
    /// Turn control plane: interrupts and handoffs. Present only when the
    /// call flows through an agent turn.
    pub turn: Option<Arc<TurnState>>,
}

impl ToolInvocation {
    pub fn new(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            signal: CancellationToken::new(),
            turn: None,
        }
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_turn(mut self, turn: Arc<TurnState>) -> Self {
        self.turn = Some(turn);
        self
    }

    /// Request a handoff of turn control. No-op outside an agent turn.
    pub fn request_handoff(&self, request: crate::agent::turn::HandoffRequest) {
        if let Some(turn) = &self.turn {
            turn.request_handoff(request);
        }
    }
}

/// A named capability the model may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> String;

    fn description(&self) -> String;

    /// JSON schema for the tool's input. The default is a single free-form
    /// `input` string described by the tool's description.
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "input": {
                    "type": "string",
                    "description": self.description()
                }
            },
            "required": ["input"]
        })
    }

    async fn execute(
        &self,
        input: Value,
        invocation: &ToolInvocation,
    ) -> Result<Value, ToolError>;
}

/// Read a required string field out of a tool input object.
pub(crate) fn require_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing required field '{field}'")))
}

/// Read an optional string field.
pub(crate) fn optional_str<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> String {
            "echo".to_string()
        }

        fn description(&self) -> String {
            "Echo the input back".to_string()
        }

        async fn execute(
            &self,
            input: Value,
            _invocation: &ToolInvocation,
        ) -> Result<Value, ToolError> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn test_default_parameters_shape() {
        let tool = Echo;
        let schema = tool.parameters();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"][0], "input");
        let out = tool
            .execute(json!({"input": "hi"}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(out["input"], "hi");
    }

    #[test]
    fn test_require_str() {
        let value = json!({"file_path": "/a"});
        assert_eq!(require_str(&value, "file_path").unwrap(), "/a");
        assert!(require_str(&value, "content").is_err());
    }
}
