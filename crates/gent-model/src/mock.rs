// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use gent_types::Role;

use crate::{
    ChunkStream, CompletionRequest, FinishReason, Provider, ProviderError, StreamChunk, Usage,
};

/// Deterministic mock provider for tests.  Echoes the last user message back
/// as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream(&self, req: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_else(|| "[no input]".to_string());

        let chunks: Vec<Result<StreamChunk, ProviderError>> = vec![
            Ok(StreamChunk::Text {
                text: format!("MOCK: {reply}"),
            }),
            Ok(StreamChunk::Finish {
                reason: FinishReason::Stop,
                usage: Some(Usage {
                    input_tokens: 10,
                    output_tokens: 10,
                }),
            }),
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// A pre-scripted provider.  Each `stream` call pops the next script from
/// the front of the queue; a script is either a chunk sequence or an error
/// returned at stream initiation (for retry tests).  All requests are
/// recorded so tests can inspect exactly what was sent.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Result<Vec<StreamChunk>, ProviderError>>>,
    generate_replies: Mutex<VecDeque<String>>,
    /// Every request passed to `stream`, in call order.
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
    /// Every request passed to `generate`, in call order.
    pub generate_requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Result<Vec<StreamChunk>, ProviderError>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            generate_replies: Mutex::new(VecDeque::new()),
            requests: Arc::new(Mutex::new(Vec::new())),
            generate_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Provider that answers every call with a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Ok(vec![
            StreamChunk::Text { text: reply.into() },
            StreamChunk::Finish {
                reason: FinishReason::Stop,
                usage: Some(Usage {
                    input_tokens: 5,
                    output_tokens: 5,
                }),
            },
        ])])
    }

    /// Provider that emits one tool call, then a text reply on the next call.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Ok(vec![
                StreamChunk::tool_call(tool_id, tool_name, &input),
                StreamChunk::Finish {
                    reason: FinishReason::ToolCalls,
                    usage: None,
                },
            ]),
            Ok(vec![
                StreamChunk::Text {
                    text: final_text.into(),
                },
                StreamChunk::Finish {
                    reason: FinishReason::Stop,
                    usage: None,
                },
            ]),
        ])
    }

    /// Queue a canned `generate` reply (summaries, session titles).
    pub fn with_generate_reply(self, reply: impl Into<String>) -> Self {
        self.generate_replies.lock().unwrap().push_back(reply.into());
        self
    }

    pub fn push_script(&self, script: Result<Vec<StreamChunk>, ProviderError>) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn stream(&self, req: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        self.requests.lock().unwrap().push(req);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Ok(chunks)) => {
                let wrapped: Vec<Result<StreamChunk, ProviderError>> =
                    chunks.into_iter().map(Ok).collect();
                Ok(Box::pin(stream::iter(wrapped)))
            }
            Some(Err(e)) => Err(e),
            // Default fallback when all scripts are consumed.
            None => Ok(Box::pin(stream::iter(vec![
                Ok(StreamChunk::Text {
                    text: "[no more scripts]".into(),
                }),
                Ok(StreamChunk::Finish {
                    reason: FinishReason::Stop,
                    usage: None,
                }),
            ]))),
        }
    }

    async fn generate(&self, req: CompletionRequest) -> Result<String, ProviderError> {
        self.generate_requests.lock().unwrap().push(req);
        let reply = self.generate_replies.lock().unwrap().pop_front();
        Ok(reply.unwrap_or_else(|| "(scripted reply)".to_string()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use gent_types::Message;
    use serde_json::json;

    use super::*;

    fn req_with_user(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user("s", "b", text)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn mock_echoes_last_user_message() {
        let mut stream = MockProvider.stream(req_with_user("hi")).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        match first {
            StreamChunk::Text { text } => assert!(text.contains("MOCK: hi")),
            other => panic!("unexpected first chunk: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_pops_scripts_in_order() {
        let p = ScriptedProvider::tool_then_text("t1", "read", json!({"path": "/a"}), "done");

        let mut s1 = p.stream(req_with_user("go")).await.unwrap();
        let mut saw_tool = false;
        while let Some(c) = s1.next().await {
            if matches!(c.unwrap(), StreamChunk::ToolCall { .. }) {
                saw_tool = true;
            }
        }
        assert!(saw_tool);

        let mut s2 = p.stream(req_with_user("go")).await.unwrap();
        let mut text = String::new();
        while let Some(c) = s2.next().await {
            if let StreamChunk::Text { text: t } = c.unwrap() {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "done");
    }

    #[tokio::test]
    async fn scripted_error_surfaces_at_initiation() {
        let p = ScriptedProvider::new(vec![Err(ProviderError::Overloaded)]);
        let err = p.stream(req_with_user("x")).await.err().unwrap();
        assert!(matches!(err, ProviderError::Overloaded));
    }

    #[tokio::test]
    async fn scripted_records_requests() {
        let p = ScriptedProvider::always_text("ok");
        let _ = p.stream(req_with_user("inspect me")).await.unwrap();
        let req = p.last_request().unwrap();
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].text(), "inspect me");
    }

    #[tokio::test]
    async fn scripted_generate_pops_canned_reply() {
        let p = ScriptedProvider::new(vec![]).with_generate_reply("a title");
        let out = p.generate(CompletionRequest::default()).await.unwrap();
        assert_eq!(out, "a title");
        let out2 = p.generate(CompletionRequest::default()).await.unwrap();
        assert_eq!(out2, "(scripted reply)");
    }
}
