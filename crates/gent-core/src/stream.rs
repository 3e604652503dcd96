// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use gent_model::{FinishReason, StreamChunk, Usage};
use gent_types::MessagePart;

use crate::runner::ToolCallRequest;

/// Accumulates one provider stream into assistant message parts.
///
/// Tool-call chunks are keyed by the provider's parallel-call index; id,
/// name and argument fragments accumulate per index and are flushed in
/// index order when the stream finishes.  Used by the actor and the
/// subagent driver alike.
#[derive(Default)]
pub(crate) struct TurnAccumulator {
    text: String,
    reasoning: String,
    parts: Vec<MessagePart>,
    pending: HashMap<u32, PendingToolCall>,
    finish: Option<(FinishReason, Option<Usage>)>,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

pub(crate) struct TurnOutput {
    pub parts: Vec<MessagePart>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

impl TurnOutput {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::Text { text } => {
                // A reasoning block ends when visible text starts.
                if !self.reasoning.is_empty() && self.text.is_empty() {
                    self.flush_reasoning();
                }
                self.text.push_str(&text);
            }
            StreamChunk::Reasoning { text } => {
                self.reasoning.push_str(&text);
            }
            StreamChunk::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let pending = self.pending.entry(index).or_default();
                if !id.is_empty() {
                    pending.id = id;
                }
                if !name.is_empty() {
                    pending.name = name;
                }
                pending.args_buf.push_str(&arguments);
            }
            StreamChunk::Finish { reason, usage } => {
                self.finish = Some((reason, usage));
            }
        }
    }

    fn flush_reasoning(&mut self) {
        if !self.reasoning.is_empty() {
            self.parts.push(MessagePart::Reasoning {
                text: std::mem::take(&mut self.reasoning),
            });
        }
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.parts.push(MessagePart::Text {
                text: std::mem::take(&mut self.text),
            });
        }
    }

    /// Close all open buffers and produce the assembled turn.
    pub fn finish(mut self) -> TurnOutput {
        self.flush_reasoning();
        self.flush_text();

        let mut pending: Vec<(u32, PendingToolCall)> = self.pending.drain().collect();
        pending.sort_by_key(|(index, _)| *index);

        let mut tool_calls = Vec::new();
        for (i, (_, ptc)) in pending.into_iter().enumerate() {
            // An empty name cannot be dispatched; storing it would corrupt
            // the history sent back on the next turn.
            if ptc.name.is_empty() {
                warn!(tool_call_id = %ptc.id, "dropping tool call with empty name from model");
                continue;
            }
            let id = if ptc.id.is_empty() {
                warn!(tool_name = %ptc.name, "tool call had empty id; generating synthetic id");
                format!("tc_synthetic_{i}")
            } else {
                ptc.id
            };
            let input = parse_arguments(&ptc.name, &id, &ptc.args_buf);
            self.parts.push(MessagePart::ToolCall {
                tool_call_id: id.clone(),
                tool_name: ptc.name.clone(),
                input: input.clone(),
            });
            tool_calls.push(ToolCallRequest {
                tool_call_id: id,
                tool_name: ptc.name,
                input,
            });
        }

        let (finish_reason, usage) = match self.finish {
            Some((reason, usage)) => (Some(reason), usage),
            None => (None, None),
        };
        TurnOutput {
            parts: self.parts,
            tool_calls,
            finish_reason,
            usage,
        }
    }
}

/// Model argument buffers must resolve to a JSON object; empty or invalid
/// JSON degrades to `{}` so the turn can still complete.
fn parse_arguments(tool_name: &str, tool_call_id: &str, args_buf: &str) -> Value {
    if args_buf.is_empty() {
        warn!(tool_name, tool_call_id, "tool call with empty arguments; substituting {{}}");
        return Value::Object(Default::default());
    }
    match serde_json::from_str(args_buf) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                tool_name,
                tool_call_id,
                error = %e,
                "tool call with invalid JSON arguments; substituting {{}}"
            );
            Value::Object(Default::default())
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
