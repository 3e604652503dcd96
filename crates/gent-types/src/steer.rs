// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Session operating mode.  Plan mode restricts the effective tool set to
/// read-only tools and may remap the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Build,
    Plan,
}

impl Default for SessionMode {
    fn default() -> Self {
        Self::Build
    }
}

/// Out-of-band commands delivered to a running actor.  Delivery is
/// best-effort immediate: the loop polls between stream chunks and between
/// tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Steer {
    /// Abort the in-flight turn; partial output is committed.
    Cancel,
    /// Same abort semantics as `Cancel`; kept distinct so UIs can bind the
    /// two to different gestures.
    Interrupt,
    /// Queue an extra user message for the start of the next turn.
    Interject { message: String },
    /// Takes effect on the next turn; the current stream is not disturbed.
    SwitchModel { model: String },
    SwitchMode { mode: SessionMode },
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
