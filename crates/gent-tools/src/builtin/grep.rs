// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::builtin::resolve_path;
use crate::tool::{Tool, ToolCtx};

const DEFAULT_MAX_MATCHES: usize = 100;
/// Files larger than this are skipped; grepping generated blobs wastes the
/// model's context.
const MAX_FILE_BYTES: u64 = 1_000_000;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    root: Option<String>,
    #[serde(default)]
    max_matches: Option<usize>,
}

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression, recursively under a \
         root directory. Returns 'path:line:content' matches, capped at \
         max_matches (default 100). Binary files, .git, node_modules and \
         target directories are skipped."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Rust-flavoured regular expression"
                },
                "root": {
                    "type": "string",
                    "description": "Directory to search from (default: session working directory)"
                },
                "max_matches": {
                    "type": "integer",
                    "description": "Maximum number of matches returned (default 100)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolCtx) -> anyhow::Result<Value> {
        let params: Params = serde_json::from_value(input)?;
        let re = Regex::new(&params.pattern)
            .map_err(|e| anyhow::anyhow!("invalid pattern: {e}"))?;
        let root = resolve_path(params.root.as_deref().unwrap_or("."), ctx);
        let max = params.max_matches.unwrap_or(DEFAULT_MAX_MATCHES);
        debug!(pattern = %params.pattern, root = %root.display(), "grep tool");

        let (matches, truncated) = tokio::task::spawn_blocking(move || {
            let mut out: Vec<String> = Vec::new();
            let mut truncated = false;
            'files: for entry in WalkDir::new(&root)
                .into_iter()
                .filter_entry(|e| {
                    let name = e.file_name().to_string_lossy();
                    name != ".git" && name != "node_modules" && name != "target"
                })
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
            {
                if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                    continue;
                }
                let Ok(bytes) = std::fs::read(entry.path()) else {
                    continue;
                };
                // Null byte means binary; skip.
                if bytes.contains(&0) {
                    continue;
                }
                let text = String::from_utf8_lossy(&bytes);
                for (i, line) in text.lines().enumerate() {
                    if re.is_match(line) {
                        if out.len() >= max {
                            truncated = true;
                            break 'files;
                        }
                        out.push(format!("{}:{}:{}", entry.path().display(), i + 1, line));
                    }
                }
            }
            (out, truncated)
        })
        .await?;

        Ok(json!({ "matches": matches, "truncated": truncated }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
