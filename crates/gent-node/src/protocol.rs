// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Wire protocol between UI clients and the core.
//!
//! Requests and responses are JSON over a long-lived duplex channel; the
//! transport (stdio, socket, WebSocket) is the embedder's concern.  Event
//! subscriptions are a separate streaming call
//! ([`crate::AgentService::subscribe_events`]) rather than a request
//! variant, since they outlive any single request/response exchange.
//!
//! # Typical session flow
//!
//! ```text
//! UI                                Core
//!  │── createSession ──────────────►│  {sessionId, branchId, ...}
//!  │── subscribeEvents ────────────►│  stream of envelopes
//!  │── sendMessage ────────────────►│  (effects arrive as events)
//!  │◄─ streamStarted / streamChunk ─│
//!  │◄─ permissionRequested ─────────│  (tool needs approval)
//!  │── respondPermission ──────────►│
//!  │◄─ toolCallCompleted ───────────│
//!  │◄─ turnCompleted ───────────────│
//! ```

use serde::{Deserialize, Serialize};

use gent_types::{
    Branch, Message, PermissionDecision, PlanDecision, Session, SessionMode, Steer,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum RpcRequest {
    CreateSession {
        name: Option<String>,
        first_message: Option<String>,
        cwd: Option<String>,
        bypass: Option<bool>,
    },
    ListSessions {
        cwd: Option<String>,
    },
    GetSession {
        session_id: String,
    },
    ListBranches {
        session_id: String,
    },
    CreateBranch {
        session_id: String,
        name: Option<String>,
    },
    ForkBranch {
        session_id: String,
        branch_id: String,
        message_id: String,
        name: Option<String>,
    },
    SwitchBranch {
        session_id: String,
        branch_id: String,
    },
    GetBranchTree {
        session_id: String,
    },
    SendMessage {
        session_id: String,
        branch_id: String,
        content: String,
        mode: Option<SessionMode>,
        model: Option<String>,
    },
    ListMessages {
        branch_id: String,
    },
    GetSessionState {
        session_id: String,
    },
    Steer {
        session_id: String,
        branch_id: String,
        steer: Steer,
    },
    RespondPermission {
        request_id: String,
        decision: PermissionDecision,
        persist: Option<bool>,
        pattern: Option<String>,
    },
    RespondPlan {
        request_id: String,
        decision: PlanDecision,
        reason: Option<String>,
    },
    RespondQuestions {
        request_id: String,
        answers: Vec<Vec<String>>,
    },
    UpdateSessionBypass {
        session_id: String,
        bypass: bool,
    },
    CompactBranch {
        session_id: String,
        branch_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum RpcResponse {
    SessionCreated {
        session_id: String,
        branch_id: String,
        name: Option<String>,
        bypass: bool,
    },
    Sessions {
        sessions: Vec<Session>,
    },
    Session {
        session: Session,
    },
    Branches {
        branches: Vec<Branch>,
    },
    Branch {
        branch: Branch,
    },
    BranchTree {
        roots: Vec<BranchNode>,
    },
    Messages {
        messages: Vec<Message>,
    },
    SessionState {
        session: Session,
        branches: Vec<Branch>,
        messages: Vec<Message>,
    },
    Bypass {
        bypass: bool,
    },
    Ok,
    Error {
        message: String,
    },
}

/// One node of the branch forest returned by `getBranchTree`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchNode {
    pub branch: Branch,
    pub children: Vec<BranchNode>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_use_camel_case_method_names() {
        let req = RpcRequest::CreateSession {
            name: None,
            first_message: Some("hello".into()),
            cwd: None,
            bypass: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""method":"createSession""#), "{json}");
        assert!(json.contains(r#""firstMessage":"hello""#), "{json}");
    }

    #[test]
    fn steer_request_round_trips() {
        let req = RpcRequest::Steer {
            session_id: "s".into(),
            branch_id: "b".into(),
            steer: Steer::SwitchMode {
                mode: SessionMode::Plan,
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: RpcRequest = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            RpcRequest::Steer {
                steer: Steer::SwitchMode { .. },
                ..
            }
        ));
    }

    #[test]
    fn respond_permission_parses_from_wire_json() {
        let json = r#"{
            "method": "respondPermission",
            "params": {"requestId": "r1", "decision": "allow", "persist": true}
        }"#;
        let req: RpcRequest = serde_json::from_str(json).unwrap();
        match req {
            RpcRequest::RespondPermission {
                request_id,
                decision,
                persist,
                pattern,
            } => {
                assert_eq!(request_id, "r1");
                assert_eq!(decision, PermissionDecision::Allow);
                assert_eq!(persist, Some(true));
                assert!(pattern.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn error_response_serializes_with_type_tag() {
        let resp = RpcResponse::Error {
            message: "session not found".into(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""type":"error""#), "{json}");
    }
}
