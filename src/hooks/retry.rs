//! Hook-driven retry: the core driver plus a ready-made backoff hook.
//!
//! The driver wraps a single operation (model generation or tool
//! execution). On failure it dispatches the matching failure event and asks
//! the aggregated outputs whether to try again. The hard cap lives here:
//! even a hook that always requests retry cannot loop past
//! [MAX_RETRY_ATTEMPTS].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;

use super::{
    retry_decision, Hook, HookContext, HookEngine, HookError, HookEvent, HookInput, HookOutput,
};

/// Hard cap on retries after the first attempt, regardless of what hooks
/// keep asking for.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// A failure hook's verdict on the just-failed operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay_ms: u64,
}

/// Run `op` under the hook retry loop. `template` supplies the failure
/// event's input fields; `error` and `attempt` are filled per attempt.
pub async fn run_with_retry<T, E>(
    engine: &HookEngine,
    failure_event: HookEvent,
    template: &HookInput,
    ctx: &HookContext,
    max_retries: u32,
    mut op: impl FnMut(u32) -> BoxFuture<'static, Result<T, E>>,
) -> Result<T, E>
where
    E: std::fmt::Display,
{
    let cap = max_retries.min(MAX_RETRY_ATTEMPTS);
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let mut input = template.clone();
                input.hook_event_name = failure_event;
                input.error = Some(error.to_string());
                input.attempt = attempt;
                let mut failure_ctx = ctx.clone();
                failure_ctx.attempt = attempt;

                let outputs = engine.dispatch(&input, &failure_ctx).await;
                match retry_decision(&outputs) {
                    Some(decision) if decision.retry && attempt < cap => {
                        if decision.delay_ms > 0 {
                            tokio::time::sleep(Duration::from_millis(decision.delay_ms)).await;
                        }
                        attempt += 1;
                    }
                    _ => return Err(error),
                }
            }
        }
    }
}

/// Aggregate view of a [BackoffHook]'s activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Failures observed.
    pub failures: u64,
    /// Retry requests issued.
    pub retries: u64,
    /// Distinct operations retried at least once.
    pub retried_failures: u64,
}

type RetryPredicate = Arc<dyn Fn(&str, u32) -> bool + Send + Sync>;
type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// A failure hook implementing exponential backoff with optional jitter,
/// a custom retry predicate, and a custom delay function.
pub struct BackoffHook {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
    should_retry: Option<RetryPredicate>,
    delay_fn: Option<DelayFn>,
    failures: AtomicU64,
    retries: AtomicU64,
    retried_failures: AtomicU64,
}

impl BackoffHook {
    pub fn new() -> Self {
        Self {
            max_retries: MAX_RETRY_ATTEMPTS,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
            should_retry: None,
            delay_fn: None,
            failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            retried_failures: AtomicU64::new(0),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Non-retryable (predicate-rejected) errors surface immediately.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&str, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    pub fn with_delay_fn(
        mut self,
        delay_fn: impl Fn(u32) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay_fn = Some(Arc::new(delay_fn));
        self
    }

    pub fn stats(&self) -> RetryStats {
        RetryStats {
            failures: self.failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            retried_failures: self.retried_failures.load(Ordering::Relaxed),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        if let Some(delay_fn) = &self.delay_fn {
            return delay_fn(attempt);
        }
        let base = self.base_delay.as_millis() as f64;
        let raw = base * self.multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_millis() as f64);
        let final_ms = if self.jitter {
            // Half fixed, half pseudo-random from the clock's sub-second
            // nanos; good enough to de-synchronize concurrent retries.
            let nanos = chrono::Utc::now().timestamp_subsec_nanos() as f64;
            let fraction = (nanos % 1_000_000.0) / 1_000_000.0;
            capped / 2.0 + capped / 2.0 * fraction
        } else {
            capped
        };
        Duration::from_millis(final_ms as u64)
    }
}

impl Default for BackoffHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hook for BackoffHook {
    async fn run(&self, input: &HookInput, _ctx: &HookContext) -> Result<HookOutput, HookError> {
        if !input.hook_event_name.is_failure_event() {
            return Ok(HookOutput::default());
        }
        let error = input.error.as_deref().unwrap_or("");
        self.failures.fetch_add(1, Ordering::Relaxed);

        if let Some(predicate) = &self.should_retry {
            if !predicate(error, input.attempt) {
                return Ok(HookOutput::default());
            }
        }
        if input.attempt >= self.max_retries {
            return Ok(HookOutput::default());
        }

        self.retries.fetch_add(1, Ordering::Relaxed);
        if input.attempt == 0 {
            self.retried_failures.fetch_add(1, Ordering::Relaxed);
        }
        let delay = self.delay_for(input.attempt);
        Ok(HookOutput::retry_after(delay.as_millis() as u64))
    }
}
