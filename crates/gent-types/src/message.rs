// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// One element of a message body.
///
/// The discriminator values are part of the persisted format and must stay
/// stable across versions; new variants are added by appending only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    /// Model-internal reasoning.  Persisted, but excluded from token
    /// estimation and never streamed to UIs verbatim.
    Reasoning {
        text: String,
    },
    Image {
        /// Base64 payload or URL; the provider decides what it accepts.
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    /// Only valid inside assistant messages.
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    /// Only valid inside tool messages.
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        output: ToolResultOutput,
    },
}

/// Result payload of a tool call: either a JSON value or a JSON-shaped error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum ToolResultOutput {
    Json(Value),
    ErrorJson(Value),
}

impl ToolResultOutput {
    pub fn error(message: impl Into<String>) -> Self {
        Self::ErrorJson(serde_json::json!({ "error": message.into() }))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::ErrorJson(_))
    }

    pub fn value(&self) -> &Value {
        match self {
            Self::Json(v) | Self::ErrorJson(v) => v,
        }
    }
}

/// A persisted conversation message.  Immutable once stored; totally ordered
/// within a branch by `created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub branch_id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_duration_ms: Option<u64>,
}

impl Message {
    pub fn new(
        session_id: impl Into<String>,
        branch_id: impl Into<String>,
        role: Role,
        parts: Vec<MessagePart>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            branch_id: branch_id.into(),
            role,
            parts,
            created_at: Utc::now(),
            turn_duration_ms: None,
        }
    }

    pub fn user(
        session_id: impl Into<String>,
        branch_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            session_id,
            branch_id,
            Role::User,
            vec![MessagePart::Text { text: text.into() }],
        )
    }

    pub fn assistant(
        session_id: impl Into<String>,
        branch_id: impl Into<String>,
        parts: Vec<MessagePart>,
    ) -> Self {
        Self::new(session_id, branch_id, Role::Assistant, parts)
    }

    /// Synthetic system message used for checkpoint context injection.
    /// Never persisted; exists only in the context window sent upstream.
    pub fn system(
        session_id: impl Into<String>,
        branch_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(
            session_id,
            branch_id,
            Role::System,
            vec![MessagePart::Text { text: text.into() }],
        )
    }

    pub fn tool_results(
        session_id: impl Into<String>,
        branch_id: impl Into<String>,
        parts: Vec<MessagePart>,
    ) -> Self {
        Self::new(session_id, branch_id, Role::Tool, parts)
    }

    /// Concatenated text parts, for display and summarisation.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &MessagePart> {
        self.parts
            .iter()
            .filter(|p| matches!(p, MessagePart::ToolCall { .. }))
    }

    /// Estimated token footprint: ceil(chars/4) over text, tool-call input
    /// and tool-result output.  Reasoning is model-private and excluded.
    pub fn estimated_tokens(&self) -> usize {
        self.parts.iter().map(part_tokens).sum()
    }
}

pub(crate) fn part_tokens(part: &MessagePart) -> usize {
    let chars = match part {
        MessagePart::Text { text } => text.len(),
        MessagePart::Reasoning { .. } | MessagePart::Image { .. } => 0,
        MessagePart::ToolCall { input, .. } => input.to_string().len(),
        MessagePart::ToolResult { output, .. } => output.value().to_string().len(),
    };
    chars.div_ceil(4)
}

/// `estimate_tokens` over a whole slice of messages.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(Message::estimated_tokens).sum()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn user_message_has_text_part() {
        let m = Message::user("s1", "b1", "hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.text(), "hello");
    }

    #[test]
    fn part_discriminators_are_stable() {
        let p = MessagePart::ToolCall {
            tool_call_id: "t1".into(),
            tool_name: "read".into(),
            input: json!({"path": "/a"}),
        };
        let s = serde_json::to_string(&p).unwrap();
        assert!(s.contains(r#""type":"tool-call""#), "{s}");

        let p = MessagePart::ToolResult {
            tool_call_id: "t1".into(),
            tool_name: "read".into(),
            output: ToolResultOutput::error("boom"),
        };
        let s = serde_json::to_string(&p).unwrap();
        assert!(s.contains(r#""type":"tool-result""#), "{s}");
        assert!(s.contains(r#""type":"error-json""#), "{s}");
    }

    #[test]
    fn part_encoding_round_trips_byte_identical() {
        let parts = vec![
            MessagePart::Text { text: "hi".into() },
            MessagePart::Reasoning { text: "hmm".into() },
            MessagePart::Image {
                image: "AAAA".into(),
                media_type: Some("image/png".into()),
            },
            MessagePart::ToolCall {
                tool_call_id: "t1".into(),
                tool_name: "read".into(),
                input: json!({"path": "/a"}),
            },
            MessagePart::ToolResult {
                tool_call_id: "t1".into(),
                tool_name: "read".into(),
                output: ToolResultOutput::Json(json!({"content": "X"})),
            },
        ];
        for p in parts {
            let first = serde_json::to_string(&p).unwrap();
            let decoded: MessagePart = serde_json::from_str(&first).unwrap();
            let second = serde_json::to_string(&decoded).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn estimate_counts_text_rounded_up() {
        // 5 chars -> ceil(5/4) = 2 tokens
        let m = Message::user("s", "b", "12345");
        assert_eq!(m.estimated_tokens(), 2);
    }

    #[test]
    fn estimate_excludes_reasoning() {
        let m = Message::assistant(
            "s",
            "b",
            vec![MessagePart::Reasoning {
                text: "x".repeat(400),
            }],
        );
        assert_eq!(m.estimated_tokens(), 0);
    }

    #[test]
    fn estimate_includes_tool_call_input_and_result_output() {
        let call = Message::assistant(
            "s",
            "b",
            vec![MessagePart::ToolCall {
                tool_call_id: "t".into(),
                tool_name: "read".into(),
                input: json!({"path": "/abc"}),
            }],
        );
        assert!(call.estimated_tokens() > 0);

        let result = Message::tool_results(
            "s",
            "b",
            vec![MessagePart::ToolResult {
                tool_call_id: "t".into(),
                tool_name: "read".into(),
                output: ToolResultOutput::Json(json!({"content": "xxxxxxxx"})),
            }],
        );
        assert!(result.estimated_tokens() > 0);
    }

    #[test]
    fn error_output_shape() {
        let o = ToolResultOutput::error("denied by policy");
        assert!(o.is_error());
        assert_eq!(o.value()["error"], "denied by policy");
    }
}
