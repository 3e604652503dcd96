// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Failures surfaced by a `Storage` implementation.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Failures of the event store.  `SlowConsumer` is terminal for one
/// subscription only; `Storage` failures poison the publish that hit them.
#[derive(Debug, Clone, Error)]
pub enum EventStoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("subscriber fell behind and was dropped ({skipped} events skipped)")]
    SlowConsumer { skipped: u64 },
    #[error("event store closed")]
    Closed,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
