//! Language-model SDK interface: the contract the runtime consumes.
//!
//! The runtime is provider-agnostic. Any SDK that can implement
//! [LanguageModel] (one `generate` call that may run a multi-step tool
//! loop, and one `stream` call yielding typed parts) plugs into the agent
//! core unchanged. The concrete shapes here (steps with tool calls and
//! results, usage, finish reasons, stream part taxonomy) are the minimum
//! the hook pipeline and session driver need to observe.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::tool::Tool;

mod error;
pub use error::ModelError;

pub mod ratelimit;
pub use ratelimit::{extract_rate_limit, RateLimitInfo};

/// Role of a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
        }
    }
}

/// A tool invocation requested by the model within a step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
}

/// The outcome of one tool invocation, paired to its call by id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool_call_id: String,
    pub tool_name: String,
    pub output: serde_json::Value,
}

/// Why a generation (or step) stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool-calls",
            FinishReason::ContentFilter => "content-filter",
            FinishReason::Error => "error",
            FinishReason::Other => "other",
        };
        f.write_str(s)
    }
}

/// One step of a multi-step generation: text plus the tool round-trip.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct StepResult {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolResultRecord>,
    #[serde(default)]
    pub finish_reason: FinishReason,
}

/// Token accounting reported by the provider.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Result of a completed generation.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ModelResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub steps: Vec<StepResult>,
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Usage,
    /// Response headers (rate-limit extraction reads these).
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
}

impl ModelResponse {
    /// Text-only response, one `stop` finish. Convenience for fakes and
    /// `respond_with` hook payloads.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Options for one model invocation.
#[derive(Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<Message>,
    pub system: Option<String>,
    /// Tools the model may invoke during the call. The runtime hands these
    /// in already wrapped; the SDK calls [Tool::execute] on them directly.
    pub tools: Vec<Arc<dyn Tool>>,
    pub max_steps: Option<u32>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl std::fmt::Debug for ModelRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRequest")
            .field("messages", &self.messages.len())
            .field("system", &self.system.as_deref().map(str::len))
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("max_steps", &self.max_steps)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

impl ModelRequest {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }
}

/// Typed parts of a generation stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamPart {
    TextDelta {
        text: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: serde_json::Value,
    },
    Finish {
        finish_reason: FinishReason,
    },
}

/// Boxed part stream.
pub type PartStream = Pin<Box<dyn Stream<Item = StreamPart> + Send>>;

/// A live stream: typed parts plus a handle resolving to the final response
/// once the stream's `finish` part has been produced.
pub struct ModelStream {
    pub parts: PartStream,
    pub response: oneshot::Receiver<Result<ModelResponse, ModelError>>,
}

/// The model side of the runtime. Implementations own transport, auth, and
/// the inner tool loop; the runtime only wraps calls with its hook pipeline.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;

    /// Default streaming: run [LanguageModel::generate] and replay the
    /// finished response as synthetic parts. Providers with native
    /// streaming should override.
    async fn stream(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        let response = self.generate(request).await?;
        Ok(synthesize_stream(response))
    }
}

/// Replay a finished response as a part stream, preserving per-step
/// grouping: each step's text delta precedes its tool-call parts, which
/// precede its tool-result parts; top-level text not carried by any step is
/// emitted as one leading delta.
pub fn synthesize_stream(response: ModelResponse) -> ModelStream {
    let (tx, rx) = oneshot::channel();
    let resp = response.clone();
    let parts = async_stream::stream! {
        let step_text: usize = response.steps.iter().map(|s| s.text.len()).sum();
        if step_text == 0 && !response.text.is_empty() {
            yield StreamPart::TextDelta { text: response.text.clone() };
        }
        for step in &response.steps {
            if !step.text.is_empty() {
                yield StreamPart::TextDelta { text: step.text.clone() };
            }
            for call in &step.tool_calls {
                yield StreamPart::ToolCall {
                    tool_call_id: call.tool_call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    input: call.input.clone(),
                };
            }
            for result in &step.tool_results {
                yield StreamPart::ToolResult {
                    tool_call_id: result.tool_call_id.clone(),
                    tool_name: result.tool_name.clone(),
                    output: result.output.clone(),
                };
            }
        }
        yield StreamPart::Finish { finish_reason: response.finish_reason };
    };
    let _ = tx.send(Ok(resp));
    ModelStream {
        parts: Box::pin(parts),
        response: rx,
    }
}

/// Accumulates stream parts back into a [ModelResponse]. Used by the agent
/// core to materialize the final result observed by `PostGenerate` hooks.
#[derive(Default)]
pub struct ResponseAccumulator {
    text: String,
    current: StepResult,
    steps: Vec<StepResult>,
    finish_reason: FinishReason,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, part: &StreamPart) {
        match part {
            StreamPart::TextDelta { text } => {
                self.text.push_str(text);
                self.current.text.push_str(text);
            }
            StreamPart::ToolCall {
                tool_call_id,
                tool_name,
                input,
            } => {
                self.current.tool_calls.push(ToolCall {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    input: input.clone(),
                });
            }
            StreamPart::ToolResult {
                tool_call_id,
                tool_name,
                output,
            } => {
                self.current.tool_results.push(ToolResultRecord {
                    tool_call_id: tool_call_id.clone(),
                    tool_name: tool_name.clone(),
                    output: output.clone(),
                });
                // A completed tool round-trip closes the step.
                let mut step = std::mem::take(&mut self.current);
                step.finish_reason = FinishReason::ToolCalls;
                self.steps.push(step);
            }
            StreamPart::Finish { finish_reason } => {
                self.finish_reason = *finish_reason;
            }
        }
    }

    pub fn finish(mut self) -> ModelResponse {
        if !self.current.text.is_empty() || !self.current.tool_calls.is_empty() {
            self.current.finish_reason = self.finish_reason;
            self.steps.push(std::mem::take(&mut self.current));
        }
        ModelResponse {
            text: self.text,
            steps: self.steps,
            finish_reason: self.finish_reason,
            usage: Usage::default(),
            response_headers: HashMap::new(),
        }
    }
}
