use thiserror::Error;

/// Hook failures. These are swallowed by the engine: a failed hook
/// contributes the empty output and a diagnostic goes to the error sink.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("HookTimeoutError: matcher timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Hook cancelled")]
    Cancelled,

    #[error("Hook failed: {0}")]
    Failed(String),
}
