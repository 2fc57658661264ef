//! Results of one agent call: complete, interrupted, or handed off.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::model::{ModelResponse, PartStream};

use super::turn::InterruptDescriptor;
use super::Agent;

/// What a `generate` call produced.
#[derive(Clone)]
pub enum GenerateOutcome {
    Complete(ModelResponse),
    Interrupted {
        interrupt: InterruptDescriptor,
        /// The response produced up to the suspension point.
        partial: ModelResponse,
    },
    Handoff {
        target: Option<Arc<Agent>>,
        context: Value,
        resumable: bool,
        is_handback: bool,
        partial: ModelResponse,
    },
}

impl GenerateOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            GenerateOutcome::Complete(_) => "complete",
            GenerateOutcome::Interrupted { .. } => "interrupted",
            GenerateOutcome::Handoff { .. } => "handoff",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, GenerateOutcome::Complete(_))
    }

    /// Text of the response, for any status.
    pub fn text(&self) -> &str {
        match self {
            GenerateOutcome::Complete(response) => &response.text,
            GenerateOutcome::Interrupted { partial, .. } => &partial.text,
            GenerateOutcome::Handoff { partial, .. } => &partial.text,
        }
    }
}

impl std::fmt::Debug for GenerateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerateOutcome::Complete(response) => f
                .debug_tuple("Complete")
                .field(&response.finish_reason)
                .finish(),
            GenerateOutcome::Interrupted { interrupt, .. } => f
                .debug_struct("Interrupted")
                .field("tool_name", &interrupt.tool_name)
                .field("tool_call_id", &interrupt.tool_call_id)
                .finish(),
            GenerateOutcome::Handoff {
                target,
                resumable,
                is_handback,
                ..
            } => f
                .debug_struct("Handoff")
                .field("target", &target.as_ref().map(|a| a.name().to_string()))
                .field("resumable", resumable)
                .field("is_handback", is_handback)
                .finish(),
        }
    }
}

/// A streaming call: live parts plus a handle resolving to the final
/// outcome once the stream's `finish` part has been observed (after
/// PostGenerate hooks ran).
pub struct AgentStream {
    pub parts: PartStream,
    pub outcome: oneshot::Receiver<GenerateOutcome>,
}

impl AgentStream {
    /// Drain the stream, returning every part and the final outcome.
    pub async fn collect(self) -> (Vec<crate::model::StreamPart>, Option<GenerateOutcome>) {
        use futures::StreamExt;
        let parts: Vec<crate::model::StreamPart> = self.parts.collect().await;
        let outcome = self.outcome.await.ok();
        (parts, outcome)
    }
}
