// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use thiserror::Error;

/// Provider failures, classified for the loop's retry decision.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("provider overloaded")]
    Overloaded,
    #[error("server error (status {status})")]
    Server { status: u16 },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("stream error: {0}")]
    Stream(String),
}

impl ProviderError {
    /// Whether the actor should retry stream initiation with backoff.
    /// Auth failures and malformed requests never recover by retrying.
    pub fn retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Overloaded | Self::Network(_) => true,
            Self::Server { status } => *status >= 500,
            Self::Auth(_) | Self::InvalidRequest(_) | Self::Stream(_) => false,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
