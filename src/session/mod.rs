//! Session driver: the turn-loop state machine over an agent.
//!
//! A session consumes user inputs and yields ordered output records,
//! dispatching on each generation's status: complete, interrupted (wait for
//! a human decision), or handoff (switch agents with a bounded, resumable
//! stack). Between turns it can drain background tasks and checkpoint
//! progress.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::agent::turn::{ApprovalDecision, InterruptDescriptor};
use crate::agent::{Agent, AgentError, GenerateOptions, GenerateOutcome, ResumeDecision};
use crate::checkpoint::{Checkpoint, CheckpointError, Checkpointer};
use crate::hooks::{HookContext, HookEvent, HookInput};
use crate::model::{Message, ModelRequest, ModelResponse};

mod tasks;

pub use tasks::{BackgroundTask, BackgroundTaskManager, TaskError, TaskStatus};

/// Default bound on the handoff stack.
pub const DEFAULT_MAX_HANDOFF_DEPTH: usize = 5;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

/// Driver states. `idle → running → {waiting_for_input,
/// generation_complete, error, handoff}`; `waiting_for_input → running` on
/// send or resume; `handoff → running` on agent switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    WaitingForInput,
    GenerationComplete,
    Handoff,
    Error,
}

/// Ordered output records emitted by the driver.
#[derive(Clone, Debug)]
pub enum SessionOutput {
    GenerationComplete {
        agent: String,
        result: ModelResponse,
    },
    Interrupt {
        interrupt: InterruptDescriptor,
    },
    AgentHandoff {
        from: String,
        to: Option<String>,
        context: Value,
    },
    TaskCompleted {
        task: BackgroundTask,
    },
    WaitingForInput,
    Error {
        message: String,
    },
}

struct HandoffFrame {
    agent: Arc<Agent>,
}

/// A session over one (or, through handoffs, several) agents.
pub struct Session {
    thread_id: String,
    current: Arc<Agent>,
    stack: Vec<HandoffFrame>,
    status: SessionStatus,
    max_handoff_depth: usize,
    auto_drain: bool,
    messages: Vec<Message>,
    step: u64,
    pending_interrupt: Option<InterruptDescriptor>,
    /// The current frame arrived via a non-resumable handoff; it must not
    /// be pushed onto the stack by a subsequent handoff.
    current_is_nonresumable_handoff: bool,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    started: bool,
}

impl Session {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self {
            thread_id: Uuid::new_v4().to_string(),
            current: agent,
            stack: Vec::new(),
            status: SessionStatus::Idle,
            max_handoff_depth: DEFAULT_MAX_HANDOFF_DEPTH,
            auto_drain: false,
            messages: Vec::new(),
            step: 0,
            pending_interrupt: None,
            current_is_nonresumable_handoff: false,
            checkpointer: None,
            started: false,
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = thread_id.into();
        self
    }

    pub fn with_max_handoff_depth(mut self, depth: usize) -> Self {
        self.max_handoff_depth = depth;
        self
    }

    /// Drain background tasks after each completed generation, emitting
    /// completions as regular outputs.
    pub fn with_auto_drain(mut self) -> Self {
        self.auto_drain = true;
        self
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn current_agent(&self) -> &Arc<Agent> {
        &self.current
    }

    pub fn pending_interrupt(&self) -> Option<&InterruptDescriptor> {
        self.pending_interrupt.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn handoff_depth(&self) -> usize {
        self.stack.len()
    }

    async fn dispatch_session_hook(&self, event: HookEvent) {
        let input = HookInput::new(
            event,
            self.current.config().session_id.clone(),
            self.current.config().cwd.clone(),
        );
        let ctx = HookContext::new().with_state(Arc::clone(self.current.state()));
        self.current.engine().dispatch(&input, &ctx).await;
    }

    async fn save_checkpoint(&self) -> Result<(), CheckpointError> {
        let saver = match self
            .checkpointer
            .as_ref()
            .or_else(|| self.current.checkpointer())
        {
            Some(saver) => Arc::clone(saver),
            None => return Ok(()),
        };
        let state = self.current.state().lock().await.to_snapshot();
        let checkpoint = Checkpoint::new(self.thread_id.clone(), self.step)
            .with_messages(self.messages.clone())
            .with_state(state)
            .with_interrupt(self.pending_interrupt.clone());
        saver.save(&checkpoint).await
    }

    /// Restore transcript, step, state, and any pending interrupt from the
    /// configured checkpointer. Returns whether a checkpoint was found.
    pub async fn restore(&mut self) -> Result<bool, SessionError> {
        let saver = match self
            .checkpointer
            .as_ref()
            .or_else(|| self.current.checkpointer())
        {
            Some(saver) => Arc::clone(saver),
            None => return Ok(false),
        };
        let Some(checkpoint) = saver.load(&self.thread_id).await? else {
            return Ok(false);
        };
        self.messages = checkpoint.messages;
        self.step = checkpoint.step;
        self.pending_interrupt = checkpoint.interrupt;
        // In-place restore keeps the backend's alias of the file map valid.
        self.current
            .state()
            .lock()
            .await
            .restore_snapshot(checkpoint.state);
        self.status = if self.pending_interrupt.is_some() {
            SessionStatus::WaitingForInput
        } else {
            SessionStatus::Idle
        };
        Ok(true)
    }

    /// Feed a user message and run until the driver needs input again (or
    /// errors). Returns the outputs produced, in order.
    pub async fn send_message(
        &mut self,
        text: impl Into<String>,
    ) -> Result<Vec<SessionOutput>, SessionError> {
        if self.status == SessionStatus::Error {
            return Err(SessionError::InvalidState(
                "session has terminated with an error".to_string(),
            ));
        }
        if !self.started {
            self.started = true;
            self.dispatch_session_hook(HookEvent::SessionStart).await;
        }
        self.messages.push(Message::user(text));
        self.run_loop(None).await
    }

    /// Resume a suspended tool call with the human decision. The same tool
    /// call is reinvoked with the step unchanged.
    pub async fn resume_interrupt(
        &mut self,
        decision: ApprovalDecision,
    ) -> Result<Vec<SessionOutput>, SessionError> {
        let interrupt = self.pending_interrupt.take().ok_or_else(|| {
            SessionError::InvalidState("no pending interrupt to resume".to_string())
        })?;
        self.run_loop(Some(ResumeDecision {
            tool_call_id: interrupt.tool_call_id,
            decision,
        }))
        .await
    }

    async fn run_loop(
        &mut self,
        mut resume: Option<ResumeDecision>,
    ) -> Result<Vec<SessionOutput>, SessionError> {
        let mut outputs = Vec::new();
        self.status = SessionStatus::Running;
        let mut handoffs_this_turn = 0usize;

        loop {
            let mut options = GenerateOptions::messages(self.messages.clone())
                .with_thread_id(self.thread_id.clone())
                .with_step(self.step);
            if let Some(resume) = resume.take() {
                options = options.with_resume(resume);
            }

            let outcome = match self.current.generate(options).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    self.status = SessionStatus::Error;
                    return Err(error.into());
                }
            };

            match outcome {
                GenerateOutcome::Complete(result) => {
                    self.step += 1;
                    if !result.text.is_empty() {
                        self.messages.push(Message::assistant(result.text.clone()));
                    }
                    self.status = SessionStatus::GenerationComplete;
                    outputs.push(SessionOutput::GenerationComplete {
                        agent: self.current.name().to_string(),
                        result,
                    });
                    // The handoff stack pops only on an explicit handback.
                    self.save_checkpoint().await?;
                    if self.auto_drain {
                        self.drain_tasks(&mut outputs).await;
                    }
                    self.status = SessionStatus::WaitingForInput;
                    outputs.push(SessionOutput::WaitingForInput);
                    return Ok(outputs);
                }
                GenerateOutcome::Interrupted { interrupt, .. } => {
                    self.pending_interrupt = Some(interrupt.clone());
                    outputs.push(SessionOutput::Interrupt { interrupt });
                    self.save_checkpoint().await?;
                    self.status = SessionStatus::WaitingForInput;
                    return Ok(outputs);
                }
                GenerateOutcome::Handoff {
                    target,
                    context,
                    resumable,
                    is_handback,
                    ..
                } => {
                    self.status = SessionStatus::Handoff;
                    handoffs_this_turn += 1;
                    if handoffs_this_turn > self.max_handoff_depth {
                        return Ok(self.fail(
                            outputs,
                            format!(
                                "Maximum handoff depth ({}) exceeded",
                                self.max_handoff_depth
                            ),
                        ));
                    }

                    if is_handback {
                        let from = self.current.name().to_string();
                        match self.stack.pop() {
                            Some(frame) => {
                                outputs.push(SessionOutput::AgentHandoff {
                                    from,
                                    to: Some(frame.agent.name().to_string()),
                                    context,
                                });
                                self.current = frame.agent;
                                self.current_is_nonresumable_handoff = false;
                            }
                            None => match target {
                                Some(target) => {
                                    outputs.push(SessionOutput::AgentHandoff {
                                        from,
                                        to: Some(target.name().to_string()),
                                        context,
                                    });
                                    self.current = target;
                                    self.current_is_nonresumable_handoff = false;
                                }
                                None => {
                                    return Ok(self.fail(
                                        outputs,
                                        "Handoff target agent is null".to_string(),
                                    ));
                                }
                            },
                        }
                        continue;
                    }

                    let Some(target) = target else {
                        return Ok(
                            self.fail(outputs, "Handoff target agent is null".to_string())
                        );
                    };
                    if resumable && !self.current_is_nonresumable_handoff {
                        if self.stack.len() >= self.max_handoff_depth {
                            return Ok(self.fail(
                                outputs,
                                format!(
                                    "Maximum handoff depth ({}) exceeded",
                                    self.max_handoff_depth
                                ),
                            ));
                        }
                        self.stack.push(HandoffFrame {
                            agent: Arc::clone(&self.current),
                        });
                    }
                    self.current_is_nonresumable_handoff = !resumable;
                    outputs.push(SessionOutput::AgentHandoff {
                        from: self.current.name().to_string(),
                        to: Some(target.name().to_string()),
                        context: context.clone(),
                    });
                    // A string context becomes the next agent's prompt;
                    // otherwise the transcript carries over unchanged.
                    if let Some(text) = context.as_str() {
                        self.messages.push(Message::user(text));
                    }
                    self.current = target;
                    continue;
                }
            }
        }
    }

    fn fail(&mut self, mut outputs: Vec<SessionOutput>, message: String) -> Vec<SessionOutput> {
        log::warn!("session {} terminated: {message}", self.thread_id);
        self.status = SessionStatus::Error;
        outputs.push(SessionOutput::Error { message });
        outputs
    }

    async fn drain_tasks(&self, outputs: &mut Vec<SessionOutput>) {
        let tasks = self.current.tasks();
        while !tasks.list().is_empty() {
            match tasks.wait_for_next_completion().await {
                Some(task) => {
                    let _ = tasks.remove(&task.id);
                    outputs.push(SessionOutput::TaskCompleted { task });
                }
                None => break,
            }
        }
    }

    /// Compact the transcript: PreCompact hooks, a model-written summary,
    /// PostCompact hooks. The transcript is replaced with one summary
    /// message.
    pub async fn compact(&mut self) -> Result<(), SessionError> {
        if self.messages.is_empty() {
            return Ok(());
        }
        self.dispatch_session_hook(HookEvent::PreCompact).await;

        let transcript = self
            .messages
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = ModelRequest {
            messages: vec![Message::user(transcript)],
            system: Some(
                "Summarize the conversation so far, preserving decisions, \
                 open questions, and any file paths mentioned."
                    .to_string(),
            ),
            ..Default::default()
        };
        let summary = self
            .current
            .model()
            .generate(request)
            .await
            .map_err(AgentError::Model)?;
        self.messages = vec![Message::assistant(summary.text)];

        self.dispatch_session_hook(HookEvent::PostCompact).await;
        Ok(())
    }

    /// End the session, firing `SessionEnd`.
    pub async fn end(&mut self) -> Result<(), SessionError> {
        if self.started {
            self.dispatch_session_hook(HookEvent::SessionEnd).await;
        }
        self.status = SessionStatus::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::model::{LanguageModel, ModelError};
    use async_trait::async_trait;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
            Ok(ModelResponse::from_text(format!(
                "echo: {}",
                request
                    .messages
                    .last()
                    .map(|m| m.content.as_str())
                    .unwrap_or("")
            )))
        }
    }

    #[tokio::test]
    async fn test_send_message_completes_and_waits() {
        let agent = Agent::builder("main", Arc::new(EchoModel)).build().await.unwrap();
        let mut session = Session::new(agent);
        let outputs = session.send_message("hello").await.unwrap();
        assert!(matches!(
            outputs.first(),
            Some(SessionOutput::GenerationComplete { .. })
        ));
        assert!(matches!(
            outputs.last(),
            Some(SessionOutput::WaitingForInput)
        ));
        assert_eq!(session.status(), SessionStatus::WaitingForInput);
        // Transcript: user + assistant.
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_resume_without_interrupt_is_invalid() {
        let agent = Agent::builder("main", Arc::new(EchoModel)).build().await.unwrap();
        let mut session = Session::new(agent);
        assert!(matches!(
            session.resume_interrupt(ApprovalDecision::Allow).await,
            Err(SessionError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_checkpoint_on_completion_and_restore() {
        let saver = Arc::new(crate::checkpoint::MemoryCheckpointer::new());
        let agent = Agent::builder("main", Arc::new(EchoModel)).build().await.unwrap();
        agent.backend().write("/notes.txt", "kept").await.unwrap();
        let mut session = Session::new(Arc::clone(&agent))
            .with_thread_id("t-1")
            .with_checkpointer(saver.clone());
        session.send_message("hello").await.unwrap();

        let stored = saver.load("t-1").await.unwrap().unwrap();
        assert_eq!(stored.step, 1);
        assert_eq!(stored.messages.len(), 2);
        assert!(stored.state.files.contains_key("/notes.txt"));

        let agent2 = Agent::builder("main", Arc::new(EchoModel)).build().await.unwrap();
        let mut restored = Session::new(Arc::clone(&agent2))
            .with_thread_id("t-1")
            .with_checkpointer(saver);
        assert!(restored.restore().await.unwrap());
        assert_eq!(restored.messages().len(), 2);
        assert_eq!(restored.step, 1);
        // Restored files are visible through the agent's backend alias.
        let raw = agent2.backend().read_raw("/notes.txt").await.unwrap();
        assert_eq!(raw.content.join("\n"), "kept");
    }

    #[tokio::test]
    async fn test_auto_drain_emits_task_completions() {
        let agent = Agent::builder("main", Arc::new(EchoModel)).build().await.unwrap();
        agent
            .tasks()
            .spawn("bg", "quick job", None, async { Ok(serde_json::json!("done")) });
        let mut session = Session::new(agent).with_auto_drain();
        let outputs = session.send_message("hi").await.unwrap();
        assert!(outputs
            .iter()
            .any(|o| matches!(o, SessionOutput::TaskCompleted { .. })));
    }

    #[tokio::test]
    async fn test_compact_replaces_transcript() {
        let agent = Agent::builder("main", Arc::new(EchoModel)).build().await.unwrap();
        let mut session = Session::new(agent);
        session.send_message("first").await.unwrap();
        session.send_message("second").await.unwrap();
        assert!(session.messages().len() > 1);
        session.compact().await.unwrap();
        assert_eq!(session.messages().len(), 1);
    }
}
