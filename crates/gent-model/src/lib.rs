// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod error;
pub mod mock;
mod provider;
mod request;

pub use error::ProviderError;
pub use mock::{MockProvider, ScriptedProvider};
pub use provider::{ChunkStream, Provider};
pub use request::{CompletionRequest, FinishReason, StreamChunk, ToolSchema};

pub use gent_types::Usage;
