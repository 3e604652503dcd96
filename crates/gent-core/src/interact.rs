// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Interaction handlers: permission, plan, question.
//!
//! All three follow the same pattern: `request` mints an id, parks a oneshot
//! sender in a pending table, publishes the corresponding `*Requested` /
//! `*Presented` / `*Asked` event, and awaits the reply.  `respond` looks the
//! entry up — a missing id is a no-op (idempotent) and publishes nothing.
//! When the requesting turn is cancelled, the awaiting future is dropped and
//! a guard removes the table entry, so a late reply resolves to nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use gent_storage::EventStore;
use gent_types::{
    AgentEvent, EventStoreError, PermissionDecision, PlanDecision, Question,
};

// ─── Pending table ────────────────────────────────────────────────────────────

struct PendingEntry<T> {
    tx: oneshot::Sender<T>,
    session_id: String,
    branch_id: String,
    /// Request-specific payload carried to the responder (the plan path for
    /// plan requests; empty otherwise).
    meta: String,
}

struct PendingTable<T> {
    inner: Mutex<HashMap<String, PendingEntry<T>>>,
}

impl<T> PendingTable<T> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn insert(
        &self,
        id: &str,
        session_id: &str,
        branch_id: &str,
        meta: &str,
    ) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().insert(
            id.to_string(),
            PendingEntry {
                tx,
                session_id: session_id.to_string(),
                branch_id: branch_id.to_string(),
                meta: meta.to_string(),
            },
        );
        rx
    }

    fn take(&self, id: &str) -> Option<PendingEntry<T>> {
        self.inner.lock().unwrap().remove(id)
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// Removes the pending entry when the awaiting future is dropped mid-wait.
struct DropGuard<'a, T> {
    table: &'a PendingTable<T>,
    id: String,
}

impl<T> Drop for DropGuard<'_, T> {
    fn drop(&mut self) {
        let _ = self.table.take(&self.id);
    }
}

// ─── Permission ───────────────────────────────────────────────────────────────

/// Reply to an interactive permission request.
#[derive(Debug, Clone)]
pub struct PermissionReply {
    pub decision: PermissionDecision,
    /// When allowing, persist an allow rule so the question is not asked
    /// again for this tool.
    pub persist: bool,
    /// Optional input pattern for the persisted rule; whole-tool otherwise.
    pub pattern: Option<String>,
}

pub struct PermissionHandler {
    events: Arc<EventStore>,
    pending: PendingTable<PermissionReply>,
}

impl PermissionHandler {
    pub fn new(events: Arc<EventStore>) -> Self {
        Self {
            events,
            pending: PendingTable::new(),
        }
    }

    /// Emit `PermissionRequested` and block until the UI answers.  Returns
    /// `None` when the handler was torn down before a reply arrived.
    pub async fn request(
        &self,
        session_id: &str,
        branch_id: &str,
        tool_name: &str,
        input: &Value,
    ) -> Result<Option<PermissionReply>, EventStoreError> {
        let request_id = Uuid::new_v4().to_string();
        let rx = self.pending.insert(&request_id, session_id, branch_id, "");
        let _guard = DropGuard {
            table: &self.pending,
            id: request_id.clone(),
        };

        self.events
            .publish(AgentEvent::PermissionRequested {
                session_id: session_id.to_string(),
                branch_id: branch_id.to_string(),
                request_id: request_id.clone(),
                tool_name: tool_name.to_string(),
                input: input.clone(),
            })
            .await?;

        Ok(rx.await.ok())
    }

    /// Resolve a pending request.  Returns `false` (and publishes nothing)
    /// when the id is unknown — already answered or cancelled.
    pub async fn respond(
        &self,
        request_id: &str,
        reply: PermissionReply,
    ) -> Result<bool, EventStoreError> {
        let Some(entry) = self.pending.take(request_id) else {
            return Ok(false);
        };
        self.events
            .publish(AgentEvent::PermissionDecided {
                session_id: entry.session_id.clone(),
                branch_id: entry.branch_id.clone(),
                request_id: request_id.to_string(),
                decision: reply.decision,
                persist: reply.persist,
            })
            .await?;
        // The requester may be gone (cancelled between take and send);
        // that is fine, the entry is consumed either way.
        let _ = entry.tx.send(reply);
        Ok(true)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// ─── Plan ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PlanReply {
    pub decision: PlanDecision,
    pub reason: Option<String>,
}

pub struct PlanHandler {
    events: Arc<EventStore>,
    pending: PendingTable<PlanReply>,
}

impl PlanHandler {
    pub fn new(events: Arc<EventStore>) -> Self {
        Self {
            events,
            pending: PendingTable::new(),
        }
    }

    /// Present a plan file for approval and await the verdict.
    pub async fn request(
        &self,
        session_id: &str,
        branch_id: &str,
        plan_path: &str,
    ) -> Result<Option<PlanReply>, EventStoreError> {
        let request_id = Uuid::new_v4().to_string();
        let rx = self
            .pending
            .insert(&request_id, session_id, branch_id, plan_path);
        let _guard = DropGuard {
            table: &self.pending,
            id: request_id.clone(),
        };

        self.events
            .publish(AgentEvent::PlanPresented {
                session_id: session_id.to_string(),
                branch_id: branch_id.to_string(),
                request_id: request_id.clone(),
                plan_path: plan_path.to_string(),
            })
            .await?;

        Ok(rx.await.ok())
    }

    /// Resolve a pending plan request.  Returns the resolved request's
    /// context so callers can act on a confirmation (create the plan
    /// checkpoint); `None` for an unknown id.
    pub async fn respond(
        &self,
        request_id: &str,
        reply: PlanReply,
    ) -> Result<Option<PlanResolution>, EventStoreError> {
        let Some(entry) = self.pending.take(request_id) else {
            return Ok(None);
        };
        let event = match reply.decision {
            PlanDecision::Confirm => AgentEvent::PlanConfirmed {
                session_id: entry.session_id.clone(),
                branch_id: entry.branch_id.clone(),
                request_id: request_id.to_string(),
            },
            PlanDecision::Reject => AgentEvent::PlanRejected {
                session_id: entry.session_id.clone(),
                branch_id: entry.branch_id.clone(),
                request_id: request_id.to_string(),
                reason: reply.reason.clone(),
            },
        };
        self.events.publish(event).await?;
        let resolution = PlanResolution {
            session_id: entry.session_id.clone(),
            branch_id: entry.branch_id.clone(),
            plan_path: entry.meta.clone(),
            decision: reply.decision,
        };
        let _ = entry.tx.send(reply);
        Ok(Some(resolution))
    }
}

/// Context of a resolved plan request, for follow-up actions.
#[derive(Debug, Clone)]
pub struct PlanResolution {
    pub session_id: String,
    pub branch_id: String,
    pub plan_path: String,
    pub decision: PlanDecision,
}

// ─── Questions ────────────────────────────────────────────────────────────────

pub struct QuestionHandler {
    events: Arc<EventStore>,
    pending: PendingTable<Vec<Vec<String>>>,
}

impl QuestionHandler {
    pub fn new(events: Arc<EventStore>) -> Self {
        Self {
            events,
            pending: PendingTable::new(),
        }
    }

    /// Ask the user one or more questions; the answer slot `answers[i]`
    /// holds the selections for `questions[i]`.
    pub async fn request(
        &self,
        session_id: &str,
        branch_id: &str,
        questions: Vec<Question>,
    ) -> Result<Option<Vec<Vec<String>>>, EventStoreError> {
        let request_id = Uuid::new_v4().to_string();
        let rx = self.pending.insert(&request_id, session_id, branch_id, "");
        let _guard = DropGuard {
            table: &self.pending,
            id: request_id.clone(),
        };

        self.events
            .publish(AgentEvent::QuestionsAsked {
                session_id: session_id.to_string(),
                branch_id: branch_id.to_string(),
                request_id: request_id.clone(),
                questions,
            })
            .await?;

        Ok(rx.await.ok())
    }

    pub async fn respond(
        &self,
        request_id: &str,
        answers: Vec<Vec<String>>,
    ) -> Result<bool, EventStoreError> {
        let Some(entry) = self.pending.take(request_id) else {
            return Ok(false);
        };
        self.events
            .publish(AgentEvent::QuestionsAnswered {
                session_id: entry.session_id.clone(),
                branch_id: entry.branch_id.clone(),
                request_id: request_id.to_string(),
                answers: answers.clone(),
            })
            .await?;
        let _ = entry.tx.send(answers);
        Ok(true)
    }
}

/// The three handlers bundled for dependency wiring.
pub struct Handlers {
    pub permission: Arc<PermissionHandler>,
    pub plan: Arc<PlanHandler>,
    pub questions: Arc<QuestionHandler>,
}

impl Handlers {
    pub fn new(events: Arc<EventStore>) -> Self {
        Self {
            permission: Arc::new(PermissionHandler::new(events.clone())),
            plan: Arc::new(PlanHandler::new(events.clone())),
            questions: Arc::new(QuestionHandler::new(events)),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
