// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::builtin::resolve_path;
use crate::tool::{Tool, ToolCtx};

#[derive(Deserialize)]
struct Params {
    #[serde(default)]
    path: Option<String>,
}

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "Lists the entries of a directory, directories suffixed with '/'. \
         Defaults to the session working directory."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: session working directory)"
                }
            },
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolCtx) -> anyhow::Result<Value> {
        let params: Params = serde_json::from_value(input)?;
        let path = resolve_path(params.path.as_deref().unwrap_or("."), ctx);

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .with_context(|| format!("list error: {}", path.display()))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{name}/") } else { name });
        }
        entries.sort();

        Ok(json!({ "path": path.display().to_string(), "entries": entries }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
