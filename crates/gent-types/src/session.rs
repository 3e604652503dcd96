// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A top-level conversation container.  Owns a forest of branches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// `true` flips the permission default from "ask" to "allow" for
    /// non-read tools.  Explicit deny rules still apply.
    pub bypass: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(name: Option<String>, cwd: Option<String>, bypass: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            cwd,
            bypass,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A linear conversation within a session.  Branches fork from a message of
/// a parent branch, copying history up to `parent_message_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_branch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Per-branch model override; `None` falls back to config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    pub fn root(session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            parent_branch_id: None,
            parent_message_id: None,
            name: None,
            model: None,
            summary: None,
            created_at: Utc::now(),
        }
    }

    pub fn fork(
        parent: &Branch,
        parent_message_id: impl Into<String>,
        name: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: parent.session_id.clone(),
            parent_branch_id: Some(parent.id.clone()),
            parent_message_id: Some(parent_message_id.into()),
            name,
            model: parent.model.clone(),
            summary: None,
            created_at: Utc::now(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_get_unique_ids() {
        let a = Session::new(None, None, false);
        let b = Session::new(None, None, false);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn fork_records_parent_linkage() {
        let root = Branch::root("s1");
        let fork = Branch::fork(&root, "m42", Some("alt".into()));
        assert_eq!(fork.session_id, "s1");
        assert_eq!(fork.parent_branch_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(fork.parent_message_id.as_deref(), Some("m42"));
        assert_eq!(fork.name.as_deref(), Some("alt"));
    }
}
