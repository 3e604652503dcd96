// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::resolve_path;
use crate::tool::{Tool, ToolCtx};

/// Default number of lines returned when the caller does not specify a
/// limit.  Kept small to avoid flooding the model context on a first read;
/// the agent paginates with offset + limit to get more.
const DEFAULT_LINE_LIMIT: usize = 200;

/// Hard byte ceiling applied in addition to the line limit.  Whichever
/// constraint is hit first determines where the output is cut.
const MAX_BYTES: usize = 20_000;

#[derive(Deserialize)]
struct Params {
    path: String,
    /// 1-indexed line to start reading from.
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a text file. Default: 200 lines / 20 KB, whichever comes first.\n\
         Lines are formatted as L{n}:content (1-indexed). When more lines exist,\n\
         a pagination notice shows the next offset. Use grep first to find the\n\
         relevant region, then read only those lines with offset+limit."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute path, or relative to the session working directory"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 200)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, ctx: &ToolCtx) -> anyhow::Result<Value> {
        let params: Params = serde_json::from_value(input)?;
        let offset = params.offset.unwrap_or(1).max(1);
        let limit = params.limit.unwrap_or(DEFAULT_LINE_LIMIT);
        let path = resolve_path(&params.path, ctx);
        debug!(path = %path.display(), offset, limit, "read_file tool");

        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("read error: {}", path.display()))?;

        let start = offset - 1;
        let all_lines: Vec<&str> = text.lines().collect();
        let total = all_lines.len();

        let mut selected: Vec<String> = Vec::new();
        let mut byte_count = 0usize;
        let mut truncated_by_bytes = false;
        for (i, line) in all_lines.iter().enumerate().skip(start).take(limit) {
            let line_bytes = line.len() + 1;
            if byte_count + line_bytes > MAX_BYTES {
                truncated_by_bytes = true;
                break;
            }
            selected.push(format!("L{}:{}", i + 1, line));
            byte_count += line_bytes;
        }

        let last_shown = start + selected.len();
        let mut content = selected.join("\n");
        if last_shown < total {
            let reason = if truncated_by_bytes {
                format!("byte limit ({MAX_BYTES} B) reached")
            } else {
                format!("{} more lines", total - last_shown)
            };
            content.push_str(&format!(
                "\n...[{reason} — showing L{}-L{} of {}; use offset={} to continue]",
                offset,
                offset + selected.len().saturating_sub(1),
                total,
                last_shown + 1
            ));
        }

        Ok(json!({ "content": content, "total_lines": total }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn tmp_file(content: &str) -> tempfile::NamedTempFile {
        let f = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(f.path(), content).unwrap();
        f
    }

    fn ctx() -> ToolCtx {
        ToolCtx::detached("s", "b", "t")
    }

    #[tokio::test]
    async fn reads_file_with_line_numbers() {
        let f = tmp_file("alpha\nbeta\ngamma\n");
        let out = ReadFileTool
            .execute(json!({"path": f.path()}), &ctx())
            .await
            .unwrap();
        let content = out["content"].as_str().unwrap();
        assert!(content.contains("L1:alpha"));
        assert!(content.contains("L3:gamma"));
        assert_eq!(out["total_lines"], 3);
    }

    #[tokio::test]
    async fn offset_and_limit_select_a_window() {
        let f = tmp_file("one\ntwo\nthree\nfour\nfive\n");
        let out = ReadFileTool
            .execute(json!({"path": f.path(), "offset": 2, "limit": 2}), &ctx())
            .await
            .unwrap();
        let content = out["content"].as_str().unwrap();
        assert!(content.contains("L2:two"));
        assert!(content.contains("L3:three"));
        assert!(!content.contains("L1:"));
        assert!(!content.contains("L4:"));
    }

    #[tokio::test]
    async fn pagination_notice_suggests_next_offset() {
        let f = tmp_file("a\nb\nc\nd\ne\n");
        let out = ReadFileTool
            .execute(json!({"path": f.path(), "limit": 2}), &ctx())
            .await
            .unwrap();
        assert!(out["content"].as_str().unwrap().contains("offset=3"));
    }

    #[tokio::test]
    async fn byte_cap_truncates_before_line_limit() {
        let line = "x".repeat(99);
        let content: String = (0..500).map(|_| format!("{line}\n")).collect();
        let f = tmp_file(&content);
        let out = ReadFileTool
            .execute(json!({"path": f.path(), "limit": 500}), &ctx())
            .await
            .unwrap();
        assert!(out["content"].as_str().unwrap().contains("byte limit"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = ReadFileTool
            .execute(json!({"path": "/no/such/file_xyz"}), &ctx())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("read error"));
    }

    #[tokio::test]
    async fn relative_path_resolves_against_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note.txt"), "hi\n").unwrap();
        let mut ctx = ctx();
        ctx.cwd = Some(dir.path().to_string_lossy().into_owned());
        let out = ReadFileTool
            .execute(json!({"path": "note.txt"}), &ctx)
            .await
            .unwrap();
        assert!(out["content"].as_str().unwrap().contains("L1:hi"));
    }
}
