// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gent_types::{
    AgentEvent, Branch, Checkpoint, EventEnvelope, Message, Session, StorageError,
};

use crate::storage::{event_matches, Storage};

/// In-memory reference implementation of [`Storage`].
///
/// Used by every core test and usable as-is for ephemeral sessions.  The
/// whole state sits behind one mutex; none of the methods await while
/// holding it.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, Session>,
    branches: HashMap<String, Branch>,
    /// Messages per branch, in creation order (single writer per branch).
    messages: HashMap<String, Vec<Message>>,
    /// Checkpoints per branch, append-only; "latest" is the tail.
    checkpoints: HashMap<String, Vec<Checkpoint>>,
    events: Vec<EventEnvelope>,
    next_event_id: u64,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_session(&self, session: Session) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.sessions.contains_key(&session.id) {
            return Err(StorageError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        inner.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Session, StorageError> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("session", id))
    }

    async fn update_session(&self, session: Session) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sessions.contains_key(&session.id) {
            return Err(StorageError::not_found("session", &session.id));
        }
        inner.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    async fn list_sessions(&self, cwd: Option<&str>) -> Result<Vec<Session>, StorageError> {
        let inner = self.inner.lock().unwrap();
        let mut sessions: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| cwd.is_none() || s.cwd.as_deref() == cwd)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    async fn create_branch(&self, branch: Branch) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.sessions.contains_key(&branch.session_id) {
            return Err(StorageError::not_found("session", &branch.session_id));
        }
        inner.branches.insert(branch.id.clone(), branch);
        Ok(())
    }

    async fn get_branch(&self, id: &str) -> Result<Branch, StorageError> {
        self.inner
            .lock()
            .unwrap()
            .branches
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found("branch", id))
    }

    async fn list_branches(&self, session_id: &str) -> Result<Vec<Branch>, StorageError> {
        let inner = self.inner.lock().unwrap();
        let mut branches: Vec<Branch> = inner
            .branches
            .values()
            .filter(|b| b.session_id == session_id)
            .cloned()
            .collect();
        branches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(branches)
    }

    async fn get_latest_branch(&self, session_id: &str) -> Result<Branch, StorageError> {
        self.list_branches(session_id)
            .await?
            .into_iter()
            .last()
            .ok_or_else(|| StorageError::not_found("branch", session_id))
    }

    async fn create_message(&self, message: Message) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.branches.contains_key(&message.branch_id) {
            return Err(StorageError::not_found("branch", &message.branch_id));
        }
        inner
            .messages
            .entry(message.branch_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn list_messages(&self, branch_id: &str) -> Result<Vec<Message>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.messages.get(branch_id).cloned().unwrap_or_default())
    }

    async fn list_messages_after(
        &self,
        branch_id: &str,
        after_message_id: &str,
    ) -> Result<Vec<Message>, StorageError> {
        let inner = self.inner.lock().unwrap();
        let messages = inner.messages.get(branch_id).cloned().unwrap_or_default();
        let pos = messages
            .iter()
            .position(|m| m.id == after_message_id)
            .ok_or_else(|| StorageError::not_found("message", after_message_id))?;
        Ok(messages[pos + 1..].to_vec())
    }

    async fn list_messages_since(
        &self,
        branch_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .get(branch_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| m.created_at > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .checkpoints
            .entry(checkpoint.branch_id().to_string())
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn get_latest_checkpoint(
        &self,
        branch_id: &str,
    ) -> Result<Option<Checkpoint>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .checkpoints
            .get(branch_id)
            .and_then(|cps| cps.last().cloned()))
    }

    async fn append_event(&self, event: AgentEvent) -> Result<EventEnvelope, StorageError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_event_id += 1;
        let envelope = EventEnvelope {
            id: inner.next_event_id,
            event,
            created_at: Utc::now(),
        };
        inner.events.push(envelope.clone());
        Ok(envelope)
    }

    async fn list_events(
        &self,
        session_id: &str,
        branch_id: Option<&str>,
        after_id: u64,
    ) -> Result<Vec<EventEnvelope>, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .iter()
            .filter(|env| env.id > after_id && event_matches(&env.event, session_id, branch_id))
            .cloned()
            .collect())
    }

    async fn get_latest_event_id(
        &self,
        session_id: &str,
        branch_id: Option<&str>,
    ) -> Result<u64, StorageError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .events
            .iter()
            .rev()
            .find(|env| event_matches(&env.event, session_id, branch_id))
            .map(|env| env.id)
            .unwrap_or(0))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
