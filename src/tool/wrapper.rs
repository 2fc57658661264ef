//! The tool-call control plane: every tool handed to the model SDK is
//! wrapped so that invocation runs the PreToolUse/PostToolUse/failure
//! gates, permission resolution, and the interrupt protocol.

use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::agent::turn::{ApprovalDecision, TurnState};
use crate::agent::PermissionMode;
use crate::hooks::{
    aggregate_permission, first_respond_with, first_updated_input, first_updated_result,
    run_with_retry, HookContext, HookEngine, HookEvent, HookInput, PermissionDecision,
};
use crate::state::AgentState;

use super::{Tool, ToolError, ToolInvocation};

/// Wraps a tool with the hook pipeline. Execution never propagates an
/// error to the model: failures, denials, and pauses all come back as tool
/// result values so generation continues.
pub struct HookedTool {
    inner: Arc<dyn Tool>,
    engine: Arc<HookEngine>,
    turn: Arc<TurnState>,
    state: Arc<Mutex<AgentState>>,
    session_id: String,
    cwd: String,
    mode: PermissionMode,
    max_retries: u32,
}

impl HookedTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inner: Arc<dyn Tool>,
        engine: Arc<HookEngine>,
        turn: Arc<TurnState>,
        state: Arc<Mutex<AgentState>>,
        session_id: impl Into<String>,
        cwd: impl Into<String>,
        mode: PermissionMode,
        max_retries: u32,
    ) -> Self {
        Self {
            inner,
            engine,
            turn,
            state,
            session_id: session_id.into(),
            cwd: cwd.into(),
            mode,
            max_retries,
        }
    }

    fn base_input(&self, event: HookEvent, tool_input: &Value, tool_call_id: &str) -> HookInput {
        HookInput::new(event, self.session_id.clone(), self.cwd.clone())
            .with_tool(self.inner.name(), tool_input.clone())
            .with_tool_use_id(tool_call_id)
    }

    fn denial_result(reason: Option<&str>) -> Value {
        let detail = reason.unwrap_or("denied by policy");
        json!({
            "success": false,
            "error": format!("Permission denied: {detail}"),
        })
    }

    /// Run PostToolUse and apply any `updated_result`.
    async fn post_tool_use(
        &self,
        tool_input: &Value,
        tool_call_id: &str,
        result: Value,
        ctx: &HookContext,
    ) -> Value {
        let input = self
            .base_input(HookEvent::PostToolUse, tool_input, tool_call_id)
            .with_result(result.clone());
        let outputs = self.engine.dispatch(&input, ctx).await;
        first_updated_result(&outputs).cloned().unwrap_or(result)
    }
}

#[async_trait]
impl Tool for HookedTool {
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
        let ctx = HookContext {
            signal: invocation.signal.clone(),
            attempt: 0,
            state: Some(Arc::clone(&self.state)),
        };
        let tool_call_id = invocation.tool_call_id.clone();

        // 1. PreToolUse.
        let pre = self.base_input(HookEvent::PreToolUse, &input, &tool_call_id);
        let pre_outputs = self.engine.dispatch(&pre, &ctx).await;

        // 2. Permission resolution under the configured mode.
        let resolution = aggregate_permission(&pre_outputs);
        let decision = match self.mode {
            PermissionMode::BypassPermissions => PermissionDecision::Allow,
            PermissionMode::AcceptEdits => match resolution.decision {
                PermissionDecision::Ask => PermissionDecision::Allow,
                other => other,
            },
            PermissionMode::Default => resolution.decision,
        };

        match decision {
            PermissionDecision::Deny => {
                let result = Self::denial_result(resolution.reason.as_deref());
                return Ok(self
                    .post_tool_use(&input, &tool_call_id, result, &ctx)
                    .await);
            }
            PermissionDecision::Ask => {
                match self.turn.take_resume_decision(&tool_call_id) {
                    Some(ApprovalDecision::Allow) => {}
                    Some(ApprovalDecision::Deny) => {
                        let result = Self::denial_result(Some("denied by user"));
                        return Ok(self
                            .post_tool_use(&input, &tool_call_id, result, &ctx)
                            .await);
                    }
                    None => {
                        // Suspend: record the interrupt and hand a pause
                        // result back so the enclosing generation can halt.
                        // PostToolUse waits for the resumed invocation.
                        let descriptor =
                            self.turn
                                .raise_interrupt(&self.inner.name(), input.clone(), &tool_call_id);
                        return Ok(json!({
                            "success": false,
                            "error": "Tool execution paused pending approval",
                            "interrupt_id": descriptor.id,
                        }));
                    }
                }
            }
            PermissionDecision::Allow => {}
        }

        // 3. Cache short-circuit: skip the underlying call, keep PostToolUse.
        if let Some(cached) = first_respond_with(&pre_outputs) {
            return Ok(self
                .post_tool_use(&input, &tool_call_id, cached.clone(), &ctx)
                .await);
        }

        // 4. Input substitution.
        let effective_input = first_updated_input(&pre_outputs)
            .cloned()
            .unwrap_or_else(|| input.clone());

        // 5. Invoke under the retry loop with PostToolUseFailure eligible.
        let enriched = invocation.clone().with_turn(Arc::clone(&self.turn));
        let failure_template =
            self.base_input(HookEvent::PostToolUseFailure, &effective_input, &tool_call_id);
        let inner = Arc::clone(&self.inner);
        let exec_input = effective_input.clone();
        let outcome = run_with_retry(
            &self.engine,
            HookEvent::PostToolUseFailure,
            &failure_template,
            &ctx,
            self.max_retries,
            move |_attempt| {
                let inner = Arc::clone(&inner);
                let input = exec_input.clone();
                let enriched = enriched.clone();
                async move { inner.execute(input, &enriched).await }.boxed()
            },
        )
        .await;

        // Errors are packaged so generation continues.
        let result = match outcome {
            Ok(value) => value,
            Err(error) => json!({
                "success": false,
                "error": error.to_string(),
            }),
        };

        // 6. PostToolUse with `updated_result` replacement.
        Ok(self
            .post_tool_use(&effective_input, &tool_call_id, result, &ctx)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{hook_fn, HookMatcher, HookOutput};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: Arc<AtomicU32>,
        fail_times: u32,
    }

    #[async_trait]
    impl Tool for Flaky {
        fn name(&self) -> String {
            "flaky".to_string()
        }

        fn description(&self) -> String {
            "Fails a configurable number of times".to_string()
        }

        async fn execute(
            &self,
            _input: Value,
            _invocation: &ToolInvocation,
        ) -> Result<Value, ToolError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(ToolError::Execution("transient".to_string()))
            } else {
                Ok(json!({"success": true}))
            }
        }
    }

    fn wrapped(
        inner: Arc<dyn Tool>,
        engine: Arc<HookEngine>,
        mode: PermissionMode,
    ) -> (HookedTool, Arc<TurnState>) {
        let turn = Arc::new(TurnState::new("t1", 0, HashMap::new()));
        let tool = HookedTool::new(
            inner,
            engine,
            Arc::clone(&turn),
            Arc::new(Mutex::new(AgentState::new())),
            "s1",
            "/",
            mode,
            3,
        );
        (tool, turn)
    }

    #[tokio::test]
    async fn test_deny_packages_error_and_fires_post_hook() {
        let engine = Arc::new(HookEngine::new());
        engine
            .add_matcher(
                HookEvent::PreToolUse,
                HookMatcher::single(hook_fn(|_, _| async {
                    Ok(HookOutput::deny("writes to /etc are blocked"))
                }))
                .with_pattern("flaky"),
            )
            .await;
        let post_hits = Arc::new(AtomicU32::new(0));
        let post_hits_clone = Arc::clone(&post_hits);
        engine
            .on(
                HookEvent::PostToolUse,
                hook_fn(move |input, _| {
                    let hits = Arc::clone(&post_hits_clone);
                    async move {
                        assert!(input.result.is_some());
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(HookOutput::default())
                    }
                }),
            )
            .await;

        let calls = Arc::new(AtomicU32::new(0));
        let (tool, _) = wrapped(
            Arc::new(Flaky {
                calls: Arc::clone(&calls),
                fail_times: 0,
            }),
            engine,
            PermissionMode::Default,
        );

        let result = tool
            .execute(json!({}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("denied"));
        // Underlying tool never ran; PostToolUse still fired.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(post_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_respond_with_short_circuits() {
        let engine = Arc::new(HookEngine::new());
        engine
            .on(
                HookEvent::PreToolUse,
                hook_fn(|_, _| async {
                    Ok(HookOutput::respond_with(json!({"cached": true})))
                }),
            )
            .await;
        let calls = Arc::new(AtomicU32::new(0));
        let (tool, _) = wrapped(
            Arc::new(Flaky {
                calls: Arc::clone(&calls),
                fail_times: 0,
            }),
            engine,
            PermissionMode::Default,
        );
        let result = tool
            .execute(json!({}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(result["cached"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let engine = Arc::new(HookEngine::new());
        engine
            .on(
                HookEvent::PostToolUseFailure,
                hook_fn(|_, _| async { Ok(HookOutput::retry_after(1)) }),
            )
            .await;
        let calls = Arc::new(AtomicU32::new(0));
        let (tool, _) = wrapped(
            Arc::new(Flaky {
                calls: Arc::clone(&calls),
                fail_times: 2,
            }),
            engine,
            PermissionMode::Default,
        );
        let result = tool
            .execute(json!({}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_package_error() {
        let engine = Arc::new(HookEngine::new());
        let calls = Arc::new(AtomicU32::new(0));
        let (tool, _) = wrapped(
            Arc::new(Flaky {
                calls: Arc::clone(&calls),
                fail_times: 99,
            }),
            engine,
            PermissionMode::Default,
        );
        let result = tool
            .execute(json!({}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("transient"));
    }

    #[tokio::test]
    async fn test_ask_pauses_then_resumes() {
        let engine = Arc::new(HookEngine::new());
        engine
            .on(
                HookEvent::PreToolUse,
                hook_fn(|_, _| async { Ok(HookOutput::ask("needs approval")) }),
            )
            .await;
        let calls = Arc::new(AtomicU32::new(0));
        let inner = Arc::new(Flaky {
            calls: Arc::clone(&calls),
            fail_times: 0,
        });

        let (tool, turn) = wrapped(inner.clone(), Arc::clone(&engine), PermissionMode::Default);
        let paused = tool
            .execute(json!({"x": 1}), &ToolInvocation::new("call_9"))
            .await
            .unwrap();
        assert!(paused["error"]
            .as_str()
            .unwrap()
            .contains("paused pending approval"));
        let descriptor = turn.take_interrupt().unwrap();
        assert_eq!(descriptor.tool_call_id, "call_9");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Resume with an allow decision for the same call id.
        let mut decisions = HashMap::new();
        decisions.insert("call_9".to_string(), ApprovalDecision::Allow);
        let turn = Arc::new(TurnState::new("t1", 0, decisions));
        let tool = HookedTool::new(
            inner,
            engine,
            turn,
            Arc::new(Mutex::new(AgentState::new())),
            "s1",
            "/",
            PermissionMode::Default,
            3,
        );
        let result = tool
            .execute(json!({"x": 1}), &ToolInvocation::new("call_9"))
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accept_edits_auto_allows_ask() {
        let engine = Arc::new(HookEngine::new());
        engine
            .on(
                HookEvent::PreToolUse,
                hook_fn(|_, _| async { Ok(HookOutput::ask("confirm")) }),
            )
            .await;
        let calls = Arc::new(AtomicU32::new(0));
        let (tool, _) = wrapped(
            Arc::new(Flaky {
                calls: Arc::clone(&calls),
                fail_times: 0,
            }),
            engine,
            PermissionMode::AcceptEdits,
        );
        let result = tool
            .execute(json!({}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_updated_input_substitution() {
        let engine = Arc::new(HookEngine::new());
        engine
            .on(
                HookEvent::PreToolUse,
                hook_fn(|_, _| async {
                    Ok(HookOutput::updated_input(json!({"rewritten": true})))
                }),
            )
            .await;

        struct CaptureInput;
        #[async_trait]
        impl Tool for CaptureInput {
            fn name(&self) -> String {
                "capture".to_string()
            }
            fn description(&self) -> String {
                "Returns its input".to_string()
            }
            async fn execute(
                &self,
                input: Value,
                _invocation: &ToolInvocation,
            ) -> Result<Value, ToolError> {
                Ok(input)
            }
        }

        let (tool, _) = wrapped(Arc::new(CaptureInput), engine, PermissionMode::Default);
        let result = tool
            .execute(json!({"original": true}), &ToolInvocation::new("c1"))
            .await
            .unwrap();
        assert_eq!(result["rewritten"], true);
    }
}
