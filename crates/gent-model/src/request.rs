// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

use gent_types::{Message, Usage};

/// Tool advertisement sent with a completion request.  The provider
/// translates the JSON Schema into its vendor's wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Request for one streaming completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    MaxTokens,
}

/// One streamed element of a completion.
///
/// Tool-call arguments may arrive fragmented across several chunks sharing
/// the same `index`; consumers accumulate `id`/`name`/`arguments` per index
/// and flush in index order when the stream finishes.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        index: u32,
        /// May be empty on continuation fragments.
        id: String,
        /// May be empty on continuation fragments.
        name: String,
        /// JSON fragment appended to the accumulated argument buffer.
        arguments: String,
    },
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
}

impl StreamChunk {
    /// Convenience for mocks and tests: a complete tool call in one chunk.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        input: &Value,
    ) -> Self {
        Self::ToolCall {
            index: 0,
            id: id.into(),
            name: name.into(),
            arguments: input.to_string(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tool_call_helper_serializes_input() {
        let c = StreamChunk::tool_call("t1", "read", &json!({"path": "/a"}));
        match c {
            StreamChunk::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                assert_eq!(index, 0);
                assert_eq!(id, "t1");
                assert_eq!(name, "read");
                assert_eq!(
                    serde_json::from_str::<Value>(&arguments).unwrap(),
                    json!({"path": "/a"})
                );
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn tool_schema_round_trips() {
        let ts = ToolSchema {
            name: "grep".into(),
            description: "search".into(),
            input_schema: json!({"type": "object"}),
        };
        let json = serde_json::to_string(&ts).unwrap();
        let back: ToolSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "grep");
    }
}
