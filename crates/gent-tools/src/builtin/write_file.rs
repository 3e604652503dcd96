// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::resolve_path;
use crate::tool::{Concurrency, Tool, ToolCtx};

#[derive(Deserialize)]
struct Params {
    path: String,
    content: String,
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes content to a file, creating it (and parent directories) if \
         needed and replacing it entirely if it exists. For small targeted \
         changes prefer reading the file first and writing back the full \
         edited content."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path, or relative to the session working directory"
                },
                "content": {
                    "type": "string",
                    "description": "Full new file content"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn concurrency(&self) -> Concurrency {
        Concurrency::Serial
    }

    async fn execute(&self, input: Value, ctx: &ToolCtx) -> anyhow::Result<Value> {
        let params: Params = serde_json::from_value(input)?;
        let path = resolve_path(&params.path, ctx);
        debug!(path = %path.display(), bytes = params.content.len(), "write_file tool");

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create dir error: {}", parent.display()))?;
        }
        tokio::fs::write(&path, &params.content)
            .await
            .with_context(|| format!("write error: {}", path.display()))?;

        Ok(json!({
            "path": path.display().to_string(),
            "bytes_written": params.content.len()
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
