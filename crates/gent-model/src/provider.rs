// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::{CompletionRequest, ProviderError, StreamChunk};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// The model capability consumed by the core.  Implementations own HTTP,
/// auth and wire translation; the core only sees chunks.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name for status display and logs.
    fn name(&self) -> &str;

    /// Send a completion request and stream the response.
    async fn stream(&self, req: CompletionRequest) -> Result<ChunkStream, ProviderError>;

    /// Non-streaming completion, used by the summariser and session titling.
    ///
    /// The default implementation drains `stream` and concatenates text
    /// chunks; override when the vendor has a cheaper non-streaming call.
    async fn generate(&self, req: CompletionRequest) -> Result<String, ProviderError> {
        let mut stream = self.stream(req).await?;
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            if let StreamChunk::Text { text } = chunk? {
                out.push_str(&text);
            }
        }
        Ok(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
