// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::SystemTime;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::builtin::resolve_path;
use crate::tool::{Tool, ToolCtx};

const DEFAULT_MAX_RESULTS: usize = 200;

#[derive(Deserialize)]
struct Params {
    pattern: String,
    #[serde(default)]
    root: Option<String>,
    #[serde(default)]
    max_results: Option<usize>,
}

pub struct GlobTool;

/// Keep only the filename component of the pattern; the recursive walk
/// handles path prefixes like `src/**/`.
fn filename_pattern(pattern: &str) -> &str {
    match pattern.rfind('/') {
        Some(pos) => &pattern[pos + 1..],
        None => pattern,
    }
}

/// Convert a filename glob (`*`, `?`) to an anchored regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Search for files whose name matches a glob pattern, recursively under \
         a root directory. Results are sorted by modification time, newest \
         first. Path prefixes like '**/' are stripped automatically; supply a \
         single pattern, not a comma-separated list."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Filename glob, e.g. '*.rs' or 'Cargo.toml'"
                },
                "root": {
                    "type": "string",
                    "description": "Directory to search from (default: session working directory)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of paths returned (default 200)"
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
        let root = resolve_path(params.root.as_deref().unwrap_or("."), ctx);
        let max = params.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        let name_glob = filename_pattern(&params.pattern).to_string();
        let re = glob_to_regex(&name_glob)
            .ok_or_else(|| anyhow::anyhow!("invalid glob pattern: {name_glob}"))?;
        debug!(pattern = %name_glob, root = %root.display(), "glob tool");

        // The walk is synchronous; run it off the async executor.
        let matches = tokio::task::spawn_blocking(move || {
            let mut found: Vec<(std::path::PathBuf, SystemTime)> = WalkDir::new(&root)
                .into_iter()
                .filter_entry(|e| {
                    let name = e.file_name().to_string_lossy();
                    name != ".git" && name != "node_modules" && name != "target"
                })
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .filter(|e| re.is_match(&e.file_name().to_string_lossy()))
                .map(|e| {
                    let mtime = e
                        .metadata()
                        .ok()
                        .and_then(|m| m.modified().ok())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    (e.into_path(), mtime)
                })
                .collect();
            found.sort_by(|a, b| b.1.cmp(&a.1));
            found
        })
        .await?;

        let truncated = matches.len() > max;
        let paths: Vec<String> = matches
            .into_iter()
            .take(max)
            .map(|(p, _)| p.display().to_string())
            .collect();

        Ok(json!({ "matches": paths, "truncated": truncated }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
