//! # agentloom
//!
//! Build tool-using LLM agents in Rust with type safety. The runtime
//! orchestrates conversational turns against any model SDK implementing the
//! [model::LanguageModel] trait, mediating every model invocation and every
//! tool call through a pluggable hook pipeline.
//!
//! ## Overview
//!
//! - **Hooks** — typed lifecycle events with permission aggregation,
//!   input/result transformation, cache short-circuit, and retry signaling,
//!   under hard timeouts and error isolation
//! - **Tools** — every tool is gated by PreToolUse/PostToolUse hooks, with
//!   approval interrupts and a registry supporting lazy, deferred, and
//!   proxied loading, skills, and plugins
//! - **Subagents** — fork-and-optionally-merge state, parallel execution,
//!   lifecycle events, delegation via the `task` tool
//! - **Sessions** — a turn-loop state machine handling interrupts, agent
//!   handoffs with a bounded stack, and background-task draining
//! - **Checkpointers** — per-thread snapshots through pluggable stores
//!   (memory, file directory, key-value)
//! - **Backends** — a virtual filesystem (state-backed) or a sandboxed host
//!   directory with optional shell execution
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use agentloom::agent::{Agent, GenerateOptions};
//!
//! # async fn run(model: Arc<dyn agentloom::model::LanguageModel>) -> agentloom::error::Result<()> {
//! let agent = Agent::builder("assistant", model)
//!     .system_prompt("You are a careful coding assistant.")
//!     .build()
//!     .await?;
//! let outcome = agent.generate(GenerateOptions::prompt("List the files")).await?;
//! println!("{}", outcome.text());
//! # Ok(()) }
//! ```

/// Agent core: builder, generate/stream, permission modes, turn state.
pub mod agent;
/// Filesystem/shell backend abstraction and implementations.
pub mod backend;
/// Checkpointers: per-thread snapshots over pluggable stores.
pub mod checkpoint;
/// Unified error types.
pub mod error;
/// Hook engine: events, matchers, dispatch, aggregation, retry.
pub mod hooks;
/// MCP manager: remote tool servers as namespaced tools.
pub mod mcp;
/// Language-model SDK interface and rate-limit extraction.
pub mod model;
/// Plugin manifests and exposure options.
pub mod plugin;
/// Tool registry, skills, and meta-tools.
pub mod registry;
/// Session driver and background tasks.
pub mod session;
/// Agent state: todos and the virtual file map.
pub mod state;
/// Subagent coordinator: fork/merge, execution, parallelism.
pub mod subagent;
/// Tool trait, hook-gating wrapper, and built-in tools.
pub mod tool;

pub use agent::{Agent, AgentBuilder, GenerateOptions, GenerateOutcome, PermissionMode};
pub use error::{AgentLoomError, Result};
pub use hooks::{Hook, HookEngine, HookEvent, HookInput, HookMatcher, HookOutput};
pub use model::{LanguageModel, Message, ModelRequest, ModelResponse};
pub use session::{Session, SessionOutput, SessionStatus};
pub use tool::{Tool, ToolInvocation};

/// Convenience alias for a tool set.
pub type Tools = Vec<std::sync::Arc<dyn tool::Tool>>;
/// Convenience alias for a message transcript.
pub type Messages = Vec<model::Message>;
