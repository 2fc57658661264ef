//! Hook pipeline: typed lifecycle events, matchers, dispatch, aggregation.
//!
//! Hooks are user-supplied async callbacks keyed by event name and, for
//! tool-call events, an optional tool-name regex. Dispatch runs matchers in
//! registration order; hooks within a matcher are awaited concurrently and
//! bounded by the matcher's timeout. A hook that fails, times out, or is
//! cancelled contributes the empty output, so a user callback can never
//! take down a turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::state::AgentState;

mod aggregate;
mod engine;
mod error;
pub mod retry;

pub use aggregate::{
    aggregate_permission, first_respond_with, first_updated_input, first_updated_result,
    retry_decision, PermissionResolution,
};
pub use engine::{ErrorSink, HookEngine};
pub use error::HookError;
pub use retry::{run_with_retry, BackoffHook, RetryDecision, RetryStats, MAX_RETRY_ATTEMPTS};

/// Default per-matcher timeout.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Lifecycle events, strictly typed by `hook_event_name`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    PreGenerate,
    PostGenerate,
    PostGenerateFailure,
    PreToolUse,
    PostToolUse,
    PostToolUseFailure,
    SessionStart,
    SessionEnd,
    SubagentStart,
    SubagentStop,
    #[serde(rename = "MCPConnectionFailed")]
    McpConnectionFailed,
    #[serde(rename = "MCPConnectionRestored")]
    McpConnectionRestored,
    ToolRegistered,
    ToolLoadError,
    PreCompact,
    PostCompact,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreGenerate => "PreGenerate",
            HookEvent::PostGenerate => "PostGenerate",
            HookEvent::PostGenerateFailure => "PostGenerateFailure",
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::PostToolUseFailure => "PostToolUseFailure",
            HookEvent::SessionStart => "SessionStart",
            HookEvent::SessionEnd => "SessionEnd",
            HookEvent::SubagentStart => "SubagentStart",
            HookEvent::SubagentStop => "SubagentStop",
            HookEvent::McpConnectionFailed => "MCPConnectionFailed",
            HookEvent::McpConnectionRestored => "MCPConnectionRestored",
            HookEvent::ToolRegistered => "ToolRegistered",
            HookEvent::ToolLoadError => "ToolLoadError",
            HookEvent::PreCompact => "PreCompact",
            HookEvent::PostCompact => "PostCompact",
        }
    }

    /// Pre-events accept permission decisions and input replacement.
    pub fn is_pre_event(&self) -> bool {
        matches!(self, HookEvent::PreGenerate | HookEvent::PreToolUse)
    }

    pub fn is_failure_event(&self) -> bool {
        matches!(
            self,
            HookEvent::PostGenerateFailure | HookEvent::PostToolUseFailure
        )
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission vote carried by pre-event hook outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Ask,
    Deny,
}

/// Input handed to every hook. Always carries `hook_event_name`,
/// `session_id`, and `cwd`; the remaining fields depend on the event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HookInput {
    pub hook_event_name: HookEvent,
    pub session_id: String,
    pub cwd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    /// Finished result for post-events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Stringified error for failure events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Retry-attempt counter for failure events.
    #[serde(default)]
    pub attempt: u32,
    /// Generation payload for PreGenerate (messages about to be sent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Value>,
}

impl HookInput {
    pub fn new(
        event: HookEvent,
        session_id: impl Into<String>,
        cwd: impl Into<String>,
    ) -> Self {
        Self {
            hook_event_name: event,
            session_id: session_id.into(),
            cwd: cwd.into(),
            tool_name: None,
            tool_input: None,
            tool_use_id: None,
            result: None,
            error: None,
            attempt: 0,
            prompt: None,
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, input: Value) -> Self {
        self.tool_name = Some(name.into());
        self.tool_input = Some(input);
        self
    }

    pub fn with_tool_use_id(mut self, id: impl Into<String>) -> Self {
        self.tool_use_id = Some(id.into());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_prompt(mut self, prompt: Value) -> Self {
        self.prompt = Some(prompt);
        self
    }
}

/// Output of one hook. The empty (default) output contributes nothing to
/// aggregation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HookOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<PermissionDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    /// Replace the payload about to flow downstream (pre-events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Value>,
    /// Short-circuit the underlying call (PreGenerate, PreToolUse).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub respond_with: Option<Value>,
    /// Replace the upstream result (PostGenerate, PostToolUse).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_result: Option<Value>,
    /// Request one more attempt (failure events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay_ms: Option<u64>,
    /// Event-specific extras, shaped `{hook_event_name, …}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<Value>,
}

impl HookOutput {
    pub fn allow() -> Self {
        Self {
            permission_decision: Some(PermissionDecision::Allow),
            ..Self::default()
        }
    }

    pub fn ask(reason: impl Into<String>) -> Self {
        Self {
            permission_decision: Some(PermissionDecision::Ask),
            permission_decision_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            permission_decision: Some(PermissionDecision::Deny),
            permission_decision_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn respond_with(value: Value) -> Self {
        Self {
            respond_with: Some(value),
            ..Self::default()
        }
    }

    pub fn updated_input(value: Value) -> Self {
        Self {
            updated_input: Some(value),
            ..Self::default()
        }
    }

    pub fn updated_result(value: Value) -> Self {
        Self {
            updated_result: Some(value),
            ..Self::default()
        }
    }

    pub fn retry_after(delay_ms: u64) -> Self {
        Self {
            retry: Some(true),
            retry_delay_ms: Some(delay_ms),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.permission_decision.is_none()
            && self.updated_input.is_none()
            && self.respond_with.is_none()
            && self.updated_result.is_none()
            && self.retry.is_none()
            && self.hook_specific_output.is_none()
    }
}

/// Dispatch-time context. The owning agent's state is reachable only
/// through this parameter; hooks hold no back-reference.
#[derive(Clone, Default)]
pub struct HookContext {
    /// Shared cancellation signal; aborted when the matcher timeout fires.
    pub signal: CancellationToken,
    /// Retry-attempt counter for failure events.
    pub attempt: u32,
    /// Owning agent's state, when dispatched from within a turn.
    pub state: Option<Arc<Mutex<AgentState>>>,
}

impl HookContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: Arc<Mutex<AgentState>>) -> Self {
        self.state = Some(state);
        self
    }
}

/// A user-supplied lifecycle callback.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn run(&self, input: &HookInput, ctx: &HookContext) -> Result<HookOutput, HookError>;
}

type BoxHookFn = Box<
    dyn Fn(HookInput, HookContext) -> BoxFuture<'static, Result<HookOutput, HookError>>
        + Send
        + Sync,
>;

struct FnHook {
    f: BoxHookFn,
}

#[async_trait]
impl Hook for FnHook {
    async fn run(&self, input: &HookInput, ctx: &HookContext) -> Result<HookOutput, HookError> {
        (self.f)(input.clone(), ctx.clone()).await
    }
}

/// Wrap an async closure as a [Hook].
pub fn hook_fn<F, Fut>(f: F) -> Arc<dyn Hook>
where
    F: Fn(HookInput, HookContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<HookOutput, HookError>> + Send + 'static,
{
    Arc::new(FnHook {
        f: Box::new(move |input, ctx| f(input, ctx).boxed()),
    })
}

/// Grouping of hooks with an optional tool-name regex and a timeout.
///
/// A pattern that does not compile as a regex falls back to a literal
/// string-equality test against the tool name.
#[derive(Clone)]
pub struct HookMatcher {
    pattern: Option<String>,
    regex: Option<Regex>,
    pub hooks: Vec<Arc<dyn Hook>>,
    pub timeout: Duration,
}

impl HookMatcher {
    pub fn new(hooks: Vec<Arc<dyn Hook>>) -> Self {
        Self {
            pattern: None,
            regex: None,
            hooks,
            timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    pub fn single(hook: Arc<dyn Hook>) -> Self {
        Self::new(vec![hook])
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        self.regex = Regex::new(&pattern).ok();
        self.pattern = Some(pattern);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether this matcher applies. `None` (no tool in play) matches all.
    pub fn matches_tool(&self, tool_name: Option<&str>) -> bool {
        let Some(pattern) = &self.pattern else {
            return true;
        };
        let Some(name) = tool_name else {
            return true;
        };
        match &self.regex {
            Some(regex) => regex.is_match(name),
            None => pattern == name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_exact() {
        assert_eq!(HookEvent::PreToolUse.as_str(), "PreToolUse");
        assert_eq!(
            HookEvent::McpConnectionFailed.as_str(),
            "MCPConnectionFailed"
        );
        let json = serde_json::to_string(&HookEvent::McpConnectionRestored).unwrap();
        assert_eq!(json, "\"MCPConnectionRestored\"");
    }

    #[test]
    fn test_input_always_has_base_fields() {
        let input = HookInput::new(HookEvent::SessionStart, "s1", "/work");
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["hook_event_name"], "SessionStart");
        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["cwd"], "/work");
    }

    #[test]
    fn test_matcher_regex_and_literal_fallback() {
        let matcher = HookMatcher::new(vec![]).with_pattern("write_.*");
        assert!(matcher.matches_tool(Some("write_file")));
        assert!(!matcher.matches_tool(Some("read_file")));

        // Broken regex becomes a literal comparison.
        let literal = HookMatcher::new(vec![]).with_pattern("write_file(");
        assert!(literal.matches_tool(Some("write_file(")));
        assert!(!literal.matches_tool(Some("write_file")));

        let open = HookMatcher::new(vec![]);
        assert!(open.matches_tool(Some("anything")));
        assert!(open.matches_tool(None));
    }

    #[test]
    fn test_output_empty() {
        assert!(HookOutput::default().is_empty());
        assert!(!HookOutput::deny("no").is_empty());
    }
}
