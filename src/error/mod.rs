//! Unified error surface.
//!
//! Each module owns a `thiserror` enum; this umbrella lets callers
//! propagate any of them with `?`.

pub use crate::agent::AgentError;
pub use crate::backend::BackendError;
pub use crate::checkpoint::CheckpointError;
pub use crate::hooks::HookError;
pub use crate::mcp::McpError;
pub use crate::model::ModelError;
pub use crate::plugin::PluginError;
pub use crate::registry::RegistryError;
pub use crate::session::{SessionError, TaskError};
pub use crate::tool::ToolError;

/// Top-level error combining every module error.
#[derive(thiserror::Error, Debug)]
pub enum AgentLoomError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Hook error: {0}")]
    Hook(#[from] HookError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentLoomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_unification() {
        let tool_error = ToolError::Execution("test".to_string());
        let unified: AgentLoomError = tool_error.into();
        match unified {
            AgentLoomError::Tool(_) => {}
            other => panic!("expected Tool variant, got {other:?}"),
        }

        let model_error = ModelError::RateLimited("slow down".to_string());
        let unified: AgentLoomError = model_error.into();
        assert!(unified.to_string().contains("slow down"));
    }
}
