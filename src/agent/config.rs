//! Agent configuration: permission modes, generation options, delegation.

use serde::{Deserialize, Serialize};

use crate::hooks::MAX_RETRY_ATTEMPTS;
use crate::registry::DEFAULT_TOOL_SEARCH_THRESHOLD;

use super::turn::ApprovalDecision;
use crate::model::Message;

/// How aggregated `ask` decisions are handled at tool-call time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// `ask` raises an interrupt; `deny` produces a tool error.
    #[default]
    Default,
    /// `ask` is treated as `allow`; shell file operations may additionally
    /// be pattern-blocked.
    AcceptEdits,
    /// Everything is treated as `allow`.
    BypassPermissions,
}

/// Agent-level override of per-plugin subagent delegation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DelegatePluginTools {
    #[default]
    PerPlugin,
    All,
    Named(Vec<String>),
}

impl DelegatePluginTools {
    pub fn applies_to(&self, plugin: &str) -> Option<bool> {
        match self {
            DelegatePluginTools::PerPlugin => None,
            DelegatePluginTools::All => Some(true),
            DelegatePluginTools::Named(names) => Some(names.iter().any(|n| n == plugin)),
        }
    }
}

/// Static agent configuration, assembled by the builder.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub session_id: String,
    pub cwd: String,
    pub permission_mode: PermissionMode,
    pub max_steps: Option<u32>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub max_retries: u32,
    pub tool_search_threshold: usize,
    pub block_shell_file_ops: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            cwd: "/".to_string(),
            permission_mode: PermissionMode::Default,
            max_steps: None,
            temperature: None,
            max_output_tokens: None,
            max_retries: MAX_RETRY_ATTEMPTS,
            tool_search_threshold: DEFAULT_TOOL_SEARCH_THRESHOLD,
            block_shell_file_ops: false,
        }
    }
}

/// A human decision resuming a suspended tool call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResumeDecision {
    pub tool_call_id: String,
    pub decision: ApprovalDecision,
}

/// Options for one `generate`/`stream` call.
#[derive(Clone, Debug, Default)]
pub struct GenerateOptions {
    pub messages: Vec<Message>,
    pub thread_id: Option<String>,
    /// Step counter carried through interrupts (unchanged on resume).
    pub step: u64,
    pub resume: Option<ResumeDecision>,
}

impl GenerateOptions {
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
            ..Self::default()
        }
    }

    pub fn messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }

    pub fn with_resume(mut self, resume: ResumeDecision) -> Self {
        self.resume = Some(resume);
        self
    }
}
