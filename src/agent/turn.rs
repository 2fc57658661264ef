//! Per-call turn state: the channel between wrapped tools and the agent
//! core for interrupts and handoffs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::Agent;

/// A suspended tool call awaiting a human decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterruptDescriptor {
    pub id: String,
    pub thread_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    /// The tool input the human is asked to approve.
    pub request: Value,
    pub step: u64,
    pub created_at: DateTime<Utc>,
}

/// The human's verdict on a suspended tool call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Allow,
    Deny,
}

/// A tool-requested transfer of turn control.
#[derive(Clone)]
pub struct HandoffRequest {
    pub target: Option<Arc<Agent>>,
    pub context: Value,
    pub resumable: bool,
    pub is_handback: bool,
}

impl std::fmt::Debug for HandoffRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandoffRequest")
            .field("target", &self.target.as_ref().map(|a| a.name().to_string()))
            .field("resumable", &self.resumable)
            .field("is_handback", &self.is_handback)
            .finish()
    }
}

/// Shared mutable state of one `generate`/`stream` call. Wrapped tools
/// write interrupt and handoff requests here; the agent core reads them
/// after the model call settles. First request wins in both slots.
pub struct TurnState {
    pub thread_id: String,
    pub step: u64,
    interrupt: Mutex<Option<InterruptDescriptor>>,
    handoff: Mutex<Option<HandoffRequest>>,
    resume_decisions: Mutex<HashMap<String, ApprovalDecision>>,
}

impl TurnState {
    pub fn new(
        thread_id: impl Into<String>,
        step: u64,
        resume_decisions: HashMap<String, ApprovalDecision>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            step,
            interrupt: Mutex::new(None),
            handoff: Mutex::new(None),
            resume_decisions: Mutex::new(resume_decisions),
        }
    }

    /// Record a pending approval. Keeps the first interrupt of the turn.
    pub fn raise_interrupt(
        &self,
        tool_name: &str,
        request: Value,
        tool_call_id: &str,
    ) -> InterruptDescriptor {
        let descriptor = InterruptDescriptor {
            id: Uuid::new_v4().to_string(),
            thread_id: self.thread_id.clone(),
            tool_call_id: tool_call_id.to_string(),
            tool_name: tool_name.to_string(),
            request,
            step: self.step,
            created_at: Utc::now(),
        };
        let mut slot = self.interrupt.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(descriptor.clone());
        }
        descriptor
    }

    pub fn take_interrupt(&self) -> Option<InterruptDescriptor> {
        self.interrupt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Record a handoff request. Keeps the first request of the turn.
    pub fn request_handoff(&self, request: HandoffRequest) {
        let mut slot = self.handoff.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(request);
        }
    }

    pub fn take_handoff(&self) -> Option<HandoffRequest> {
        self.handoff
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Consume the human decision for a resumed tool call, if any.
    pub fn take_resume_decision(&self, tool_call_id: &str) -> Option<ApprovalDecision> {
        self.resume_decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(tool_call_id)
    }
}
