//! Matcher dispatch with timeout bounding and error isolation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{Hook, HookContext, HookEvent, HookInput, HookMatcher, HookOutput};

/// Destination for swallowed hook diagnostics.
pub type ErrorSink = Arc<dyn Fn(&str) + Send + Sync>;

fn default_error_sink() -> ErrorSink {
    Arc::new(|message| log::warn!("{message}"))
}

/// Registers hooks by event and dispatches them in registration order.
///
/// Registration is append-only per event; dispatch copies the matcher list
/// before iterating, so hooks registered mid-dispatch take effect on the
/// next dispatch only.
pub struct HookEngine {
    registry: RwLock<HashMap<HookEvent, Vec<HookMatcher>>>,
    error_sink: ErrorSink,
}

impl Default for HookEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HookEngine {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            error_sink: default_error_sink(),
        }
    }

    pub fn with_error_sink(mut self, sink: ErrorSink) -> Self {
        self.error_sink = sink;
        self
    }

    /// Append a matcher for an event.
    pub async fn add_matcher(&self, event: HookEvent, matcher: HookMatcher) {
        let mut registry = self.registry.write().await;
        registry.entry(event).or_default().push(matcher);
    }

    /// Append a single hook matching every tool.
    pub async fn on(&self, event: HookEvent, hook: Arc<dyn Hook>) {
        self.add_matcher(event, HookMatcher::single(hook)).await;
    }

    pub async fn has_hooks(&self, event: HookEvent) -> bool {
        let registry = self.registry.read().await;
        registry.get(&event).map(|m| !m.is_empty()).unwrap_or(false)
    }

    /// Dispatch `input` to every matching hook, in order, and return all
    /// outputs. Never fails: hook errors and timeouts contribute empty
    /// outputs and a diagnostic on the error sink.
    pub async fn dispatch(&self, input: &HookInput, ctx: &HookContext) -> Vec<HookOutput> {
        let matchers: Vec<HookMatcher> = {
            let registry = self.registry.read().await;
            match registry.get(&input.hook_event_name) {
                Some(matchers) => matchers
                    .iter()
                    .filter(|m| m.matches_tool(input.tool_name.as_deref()))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            }
        };

        let mut outputs = Vec::new();
        for matcher in &matchers {
            outputs.extend(self.run_matcher(matcher, input, ctx).await);
        }
        outputs
    }

    async fn run_matcher(
        &self,
        matcher: &HookMatcher,
        input: &HookInput,
        ctx: &HookContext,
    ) -> Vec<HookOutput> {
        let token = ctx.signal.child_token();
        let timeout_ms = matcher.timeout.as_millis() as u64;

        // The timer aborts the shared signal; any hook not yet settled then
        // resolves to the empty output. join_all completes promptly after
        // the abort, so the matcher never blocks past timeout + epsilon.
        let timer = {
            let token = token.clone();
            let timeout = matcher.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };

        let hook_ctx = HookContext {
            signal: token.clone(),
            attempt: ctx.attempt,
            state: ctx.state.clone(),
        };

        let futures = matcher.hooks.iter().map(|hook| {
            let hook = Arc::clone(hook);
            let input = input.clone();
            let hook_ctx = hook_ctx.clone();
            let token = token.clone();
            let sink = Arc::clone(&self.error_sink);
            async move {
                tokio::select! {
                    _ = token.cancelled() => {
                        sink(&format!(
                            "hook for {} timed out after {}ms",
                            input.hook_event_name, timeout_ms
                        ));
                        HookOutput::default()
                    }
                    result = hook.run(&input, &hook_ctx) => match result {
                        Ok(output) => output,
                        Err(error) => {
                            sink(&format!(
                                "hook for {} failed: {}",
                                input.hook_event_name, error
                            ));
                            HookOutput::default()
                        }
                    }
                }
            }
        });

        let outputs = futures::future::join_all(futures).await;
        timer.abort();
        outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{hook_fn, HookError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn input(event: HookEvent) -> HookInput {
        HookInput::new(event, "s", "/")
    }

    #[tokio::test]
    async fn test_dispatch_in_registration_order() {
        let engine = HookEngine::new();
        engine
            .on(
                HookEvent::PreToolUse,
                hook_fn(|_, _| async { Ok(HookOutput::respond_with(serde_json::json!(1))) }),
            )
            .await;
        engine
            .on(
                HookEvent::PreToolUse,
                hook_fn(|_, _| async { Ok(HookOutput::respond_with(serde_json::json!(2))) }),
            )
            .await;

        let outputs = engine
            .dispatch(&input(HookEvent::PreToolUse), &HookContext::new())
            .await;
        assert_eq!(outputs.len(), 2);
        assert_eq!(
            crate::hooks::first_respond_with(&outputs),
            Some(&serde_json::json!(1))
        );
    }

    #[tokio::test]
    async fn test_matcher_filters_by_tool_name() {
        let engine = HookEngine::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        engine
            .add_matcher(
                HookEvent::PreToolUse,
                HookMatcher::single(hook_fn(move |_, _| {
                    let hits = Arc::clone(&hits_clone);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(HookOutput::default())
                    }
                }))
                .with_pattern("write_file"),
            )
            .await;

        let mut matching = input(HookEvent::PreToolUse);
        matching.tool_name = Some("write_file".to_string());
        engine.dispatch(&matching, &HookContext::new()).await;

        let mut other = input(HookEvent::PreToolUse);
        other.tool_name = Some("read_file".to_string());
        engine.dispatch(&other, &HookContext::new()).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_hook_contributes_empty_and_isolates_siblings() {
        let engine = HookEngine::new();
        engine
            .add_matcher(
                HookEvent::PostToolUse,
                HookMatcher::new(vec![
                    hook_fn(|_, _| async { Err(HookError::Failed("boom".to_string())) }),
                    hook_fn(|_, _| async {
                        Ok(HookOutput::updated_result(serde_json::json!("ok")))
                    }),
                ]),
            )
            .await;

        let outputs = engine
            .dispatch(&input(HookEvent::PostToolUse), &HookContext::new())
            .await;
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].is_empty());
        assert_eq!(
            crate::hooks::first_updated_result(&outputs),
            Some(&serde_json::json!("ok"))
        );
    }

    #[tokio::test]
    async fn test_timeout_bounds_matcher() {
        let engine = HookEngine::new();
        engine
            .add_matcher(
                HookEvent::PreGenerate,
                HookMatcher::new(vec![
                    hook_fn(|_, _| async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(HookOutput::respond_with(serde_json::json!("late")))
                    }),
                    hook_fn(|_, _| async { Ok(HookOutput::deny("fast")) }),
                ])
                .with_timeout(Duration::from_millis(50)),
            )
            .await;

        let started = Instant::now();
        let outputs = engine
            .dispatch(&input(HookEvent::PreGenerate), &HookContext::new())
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].is_empty());
        assert_eq!(
            crate::hooks::aggregate_permission(&outputs).decision,
            crate::hooks::PermissionDecision::Deny
        );
    }

    #[tokio::test]
    async fn test_dispatch_without_registrations() {
        let engine = HookEngine::new();
        let outputs = engine
            .dispatch(&input(HookEvent::SessionEnd), &HookContext::new())
            .await;
        assert!(outputs.is_empty());
    }
}
