// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gent_types::{
    AgentEvent, Branch, Checkpoint, EventEnvelope, Message, Session, StorageError,
};

/// Durable persistence consumed by the core.  The reference implementation
/// is [`crate::MemoryStorage`]; a SQLite or file-backed engine lives outside
/// the core and only has to honour this contract.
///
/// Ordering contract: `append_event` assigns ids from a strictly increasing
/// sequence global to the store, and `list_events` returns envelopes in id
/// order.  Messages within a branch are returned in creation order.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn create_session(&self, session: Session) -> Result<(), StorageError>;
    async fn get_session(&self, id: &str) -> Result<Session, StorageError>;
    async fn update_session(&self, session: Session) -> Result<(), StorageError>;
    async fn list_sessions(&self, cwd: Option<&str>) -> Result<Vec<Session>, StorageError>;

    async fn create_branch(&self, branch: Branch) -> Result<(), StorageError>;
    async fn get_branch(&self, id: &str) -> Result<Branch, StorageError>;
    async fn list_branches(&self, session_id: &str) -> Result<Vec<Branch>, StorageError>;
    async fn get_latest_branch(&self, session_id: &str) -> Result<Branch, StorageError>;

    async fn create_message(&self, message: Message) -> Result<(), StorageError>;
    async fn list_messages(&self, branch_id: &str) -> Result<Vec<Message>, StorageError>;
    /// Messages strictly after the given message on the branch.
    async fn list_messages_after(
        &self,
        branch_id: &str,
        after_message_id: &str,
    ) -> Result<Vec<Message>, StorageError>;
    /// Messages with `created_at > since`.
    async fn list_messages_since(
        &self,
        branch_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, StorageError>;

    async fn create_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), StorageError>;
    async fn get_latest_checkpoint(
        &self,
        branch_id: &str,
    ) -> Result<Option<Checkpoint>, StorageError>;

    /// Assigns the next id, persists, and returns the envelope.
    async fn append_event(&self, event: AgentEvent) -> Result<EventEnvelope, StorageError>;
    /// Envelopes matching the filter with `id > after_id`, in id order.
    async fn list_events(
        &self,
        session_id: &str,
        branch_id: Option<&str>,
        after_id: u64,
    ) -> Result<Vec<EventEnvelope>, StorageError>;
    /// Highest id matching the filter, or 0 when none exist.
    async fn get_latest_event_id(
        &self,
        session_id: &str,
        branch_id: Option<&str>,
    ) -> Result<u64, StorageError>;
}

/// The subscription filter shared by `list_events` and live fan-out:
/// the event's session must match, and when a branch is given the event
/// must carry that branch or be session-scoped (no branch field).
pub fn event_matches(event: &AgentEvent, session_id: &str, branch_id: Option<&str>) -> bool {
    if event.session_id() != session_id {
        return false;
    }
    match (branch_id, event.branch_id()) {
        (None, _) => true,
        (Some(_), None) => true,
        (Some(want), Some(got)) => want == got,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_rejects_other_sessions() {
        let ev = AgentEvent::SessionStarted {
            session_id: "s1".into(),
            branch_id: "b1".into(),
        };
        assert!(event_matches(&ev, "s1", None));
        assert!(!event_matches(&ev, "s2", None));
    }

    #[test]
    fn branch_filter_admits_session_scoped_events() {
        let ev = AgentEvent::SessionNameUpdated {
            session_id: "s1".into(),
            name: "n".into(),
        };
        assert!(event_matches(&ev, "s1", Some("b1")));
    }

    #[test]
    fn branch_filter_rejects_other_branches() {
        let ev = AgentEvent::StreamChunk {
            session_id: "s1".into(),
            branch_id: "b2".into(),
            delta: "x".into(),
        };
        assert!(!event_matches(&ev, "s1", Some("b1")));
        assert!(event_matches(&ev, "s1", Some("b2")));
    }
}
