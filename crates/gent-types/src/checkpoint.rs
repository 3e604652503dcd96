// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A marker on a branch that changes how prior context is loaded for the
/// next provider call.  Append-only per branch; "latest" is the tail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Checkpoint {
    /// Everything before `first_kept_message_id` is replaced by `summary`.
    Compaction {
        id: String,
        branch_id: String,
        summary: String,
        /// Empty string when the whole branch was summarised away
        /// (empty-head sentinel).
        first_kept_message_id: String,
        message_count: usize,
        token_count: usize,
        created_at: DateTime<Utc>,
    },
    /// Everything before this checkpoint is superseded; the only carry-over
    /// is the file at `plan_path`.
    Plan {
        id: String,
        branch_id: String,
        plan_path: String,
        message_count: usize,
        token_count: usize,
        created_at: DateTime<Utc>,
    },
}

impl Checkpoint {
    pub fn compaction(
        branch_id: impl Into<String>,
        summary: impl Into<String>,
        first_kept_message_id: impl Into<String>,
        message_count: usize,
        token_count: usize,
    ) -> Self {
        Self::Compaction {
            id: Uuid::new_v4().to_string(),
            branch_id: branch_id.into(),
            summary: summary.into(),
            first_kept_message_id: first_kept_message_id.into(),
            message_count,
            token_count,
            created_at: Utc::now(),
        }
    }

    pub fn plan(
        branch_id: impl Into<String>,
        plan_path: impl Into<String>,
        message_count: usize,
        token_count: usize,
    ) -> Self {
        Self::Plan {
            id: Uuid::new_v4().to_string(),
            branch_id: branch_id.into(),
            plan_path: plan_path.into(),
            message_count,
            token_count,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Compaction { id, .. } | Self::Plan { id, .. } => id,
        }
    }

    pub fn branch_id(&self) -> &str {
        match self {
            Self::Compaction { branch_id, .. } | Self::Plan { branch_id, .. } => branch_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Compaction { created_at, .. } | Self::Plan { created_at, .. } => *created_at,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
