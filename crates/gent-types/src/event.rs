// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Branch, Message, PermissionDecision, ToolResultOutput,
};

/// Token usage reported by a provider for one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One question presented to the user by the questions handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    /// Suggested answers; free-form input is always allowed.
    #[serde(default)]
    pub options: Vec<String>,
}

/// Everything externally visible that happens in the core.  The event log is
/// the authoritative audit trail; all other tables are materialised views.
///
/// Discriminators are stable; new variants are appended, never renamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    SessionStarted {
        session_id: String,
        branch_id: String,
    },
    SessionNameUpdated {
        session_id: String,
        name: String,
    },
    MessageReceived {
        session_id: String,
        branch_id: String,
        message: Message,
    },
    StreamStarted {
        session_id: String,
        branch_id: String,
        model: String,
    },
    StreamChunk {
        session_id: String,
        branch_id: String,
        delta: String,
    },
    StreamEnded {
        session_id: String,
        branch_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        interrupted: bool,
    },
    TurnCompleted {
        session_id: String,
        branch_id: String,
        duration_ms: u64,
    },
    ToolCallStarted {
        session_id: String,
        branch_id: String,
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolCallCompleted {
        session_id: String,
        branch_id: String,
        tool_call_id: String,
        tool_name: String,
        is_error: bool,
        /// First-line-or-100-char digest for list UIs.
        summary: String,
        output: ToolResultOutput,
    },
    PermissionRequested {
        session_id: String,
        branch_id: String,
        request_id: String,
        tool_name: String,
        input: Value,
    },
    PermissionDecided {
        session_id: String,
        branch_id: String,
        request_id: String,
        decision: PermissionDecision,
        persist: bool,
    },
    PlanPresented {
        session_id: String,
        branch_id: String,
        request_id: String,
        plan_path: String,
    },
    PlanConfirmed {
        session_id: String,
        branch_id: String,
        request_id: String,
    },
    PlanRejected {
        session_id: String,
        branch_id: String,
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    QuestionsAsked {
        session_id: String,
        branch_id: String,
        request_id: String,
        questions: Vec<Question>,
    },
    QuestionsAnswered {
        session_id: String,
        branch_id: String,
        request_id: String,
        answers: Vec<Vec<String>>,
    },
    CompactionStarted {
        session_id: String,
        branch_id: String,
    },
    CompactionCompleted {
        session_id: String,
        branch_id: String,
        checkpoint_id: String,
        tokens_before: usize,
        tokens_after: usize,
    },
    BranchCreated {
        session_id: String,
        branch: Branch,
    },
    BranchSwitched {
        session_id: String,
        branch_id: String,
    },
    BranchSummarized {
        session_id: String,
        branch_id: String,
        summary: String,
    },
    ModelChanged {
        session_id: String,
        branch_id: String,
        model: String,
    },
    ModeChanged {
        session_id: String,
        branch_id: String,
        mode: crate::SessionMode,
    },
    AgentSwitched {
        session_id: String,
        branch_id: String,
        agent: String,
    },
    SubagentSpawned {
        session_id: String,
        child_session_id: String,
        agent_name: String,
        prompt: String,
    },
    SubagentCompleted {
        session_id: String,
        child_session_id: String,
        agent_name: String,
        success: bool,
    },
    ErrorOccurred {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch_id: Option<String>,
        message: String,
    },
    /// State-machine telemetry consumed by the wide-event aggregator.
    MachineInspected {
        session_id: String,
        branch_id: String,
        state: String,
    },
    MachineTaskSucceeded {
        session_id: String,
        branch_id: String,
        task: String,
    },
    MachineTaskFailed {
        session_id: String,
        branch_id: String,
        task: String,
        error: String,
    },
}

impl AgentEvent {
    /// Session the event belongs to.  For subagent lifecycle events this is
    /// the parent session (the child's own events carry the child id).
    pub fn session_id(&self) -> &str {
        use AgentEvent::*;
        match self {
            SessionStarted { session_id, .. }
            | SessionNameUpdated { session_id, .. }
            | MessageReceived { session_id, .. }
            | StreamStarted { session_id, .. }
            | StreamChunk { session_id, .. }
            | StreamEnded { session_id, .. }
            | TurnCompleted { session_id, .. }
            | ToolCallStarted { session_id, .. }
            | ToolCallCompleted { session_id, .. }
            | PermissionRequested { session_id, .. }
            | PermissionDecided { session_id, .. }
            | PlanPresented { session_id, .. }
            | PlanConfirmed { session_id, .. }
            | PlanRejected { session_id, .. }
            | QuestionsAsked { session_id, .. }
            | QuestionsAnswered { session_id, .. }
            | CompactionStarted { session_id, .. }
            | CompactionCompleted { session_id, .. }
            | BranchCreated { session_id, .. }
            | BranchSwitched { session_id, .. }
            | BranchSummarized { session_id, .. }
            | ModelChanged { session_id, .. }
            | ModeChanged { session_id, .. }
            | AgentSwitched { session_id, .. }
            | SubagentSpawned { session_id, .. }
            | SubagentCompleted { session_id, .. }
            | ErrorOccurred { session_id, .. }
            | MachineInspected { session_id, .. }
            | MachineTaskSucceeded { session_id, .. }
            | MachineTaskFailed { session_id, .. } => session_id,
        }
    }

    /// Branch scope, when the event has one.  Events without a branch field
    /// are session-scoped and visible to every branch subscription.
    pub fn branch_id(&self) -> Option<&str> {
        use AgentEvent::*;
        match self {
            SessionStarted { branch_id, .. }
            | MessageReceived { branch_id, .. }
            | StreamStarted { branch_id, .. }
            | StreamChunk { branch_id, .. }
            | StreamEnded { branch_id, .. }
            | TurnCompleted { branch_id, .. }
            | ToolCallStarted { branch_id, .. }
            | ToolCallCompleted { branch_id, .. }
            | PermissionRequested { branch_id, .. }
            | PermissionDecided { branch_id, .. }
            | PlanPresented { branch_id, .. }
            | PlanConfirmed { branch_id, .. }
            | PlanRejected { branch_id, .. }
            | QuestionsAsked { branch_id, .. }
            | QuestionsAnswered { branch_id, .. }
            | CompactionStarted { branch_id, .. }
            | CompactionCompleted { branch_id, .. }
            | BranchSwitched { branch_id, .. }
            | BranchSummarized { branch_id, .. }
            | ModelChanged { branch_id, .. }
            | ModeChanged { branch_id, .. }
            | AgentSwitched { branch_id, .. }
            | MachineInspected { branch_id, .. }
            | MachineTaskSucceeded { branch_id, .. }
            | MachineTaskFailed { branch_id, .. } => Some(branch_id),
            ErrorOccurred { branch_id, .. } => branch_id.as_deref(),
            SessionNameUpdated { .. }
            | BranchCreated { .. }
            | SubagentSpawned { .. }
            | SubagentCompleted { .. } => None,
        }
    }
}

/// An event plus its assigned id and timestamp.  Ids are a strictly
/// increasing integer sequence global to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: u64,
    pub event: AgentEvent,
    pub created_at: DateTime<Utc>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminator_is_snake_case_type_field() {
        let ev = AgentEvent::TurnCompleted {
            session_id: "s".into(),
            branch_id: "b".into(),
            duration_ms: 12,
        };
        let s = serde_json::to_string(&ev).unwrap();
        assert!(s.contains(r#""type":"turn_completed""#), "{s}");
    }

    #[test]
    fn session_scoped_events_have_no_branch() {
        let ev = AgentEvent::SessionNameUpdated {
            session_id: "s".into(),
            name: "fix the parser".into(),
        };
        assert_eq!(ev.session_id(), "s");
        assert!(ev.branch_id().is_none());
    }

    #[test]
    fn branch_scoped_events_expose_branch() {
        let ev = AgentEvent::StreamChunk {
            session_id: "s".into(),
            branch_id: "b".into(),
            delta: "hi".into(),
        };
        assert_eq!(ev.branch_id(), Some("b"));
    }

    #[test]
    fn envelope_round_trips() {
        let env = EventEnvelope {
            id: 7,
            event: AgentEvent::SessionStarted {
                session_id: "s".into(),
                branch_id: "b".into(),
            },
            created_at: chrono::Utc::now(),
        };
        let json = serde_json::to_string(&env).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 7);
        assert_eq!(back.event.session_id(), "s");
    }
}
