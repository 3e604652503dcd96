// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::builtin::resolve_path;
use crate::tool::{Concurrency, Tool, ToolCtx};

const OUTPUT_LIMIT: usize = 100_000;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    workdir: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Executes a command through `sh -c`, bounded by a wall-clock timeout and
/// the owning turn's cancellation signal.
pub struct ShellTool {
    pub timeout_secs: u64,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Executes a shell command and returns stdout/stderr with the exit \
         code. Use for builds, tests, git and other terminal operations; use \
         the dedicated file tools for reading, writing and searching files. \
         Default timeout 120 s; set timeout_secs for slow builds. Quote paths \
         containing spaces. Avoid persistent servers or watchers; prefer \
         one-shot commands."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (default: session working directory)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn concurrency(&self) -> Concurrency {
        Concurrency::Serial
    }

    async fn execute(&self, input: Value, ctx: &ToolCtx) -> anyhow::Result<Value> {
        let params: Params = serde_json::from_value(input)?;
        let timeout = params.timeout_secs.unwrap_or(self.timeout_secs);
        debug!(cmd = %params.command, timeout, "shell tool");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&params.command);
        cmd.kill_on_drop(true);
        match params.workdir.as_deref() {
            Some(wd) => {
                cmd.current_dir(resolve_path(wd, ctx));
            }
            None => {
                if let Some(cwd) = &ctx.cwd {
                    cmd.current_dir(cwd);
                }
            }
        }

        let run = cmd.output();
        let output = tokio::select! {
            result = tokio::time::timeout(std::time::Duration::from_secs(timeout), run) => {
                match result {
                    Ok(out) => out.map_err(|e| anyhow::anyhow!("spawn error: {e}"))?,
                    Err(_) => anyhow::bail!("timeout after {timeout}s"),
                }
            }
            _ = ctx.wait_cancelled() => {
                anyhow::bail!("cancelled");
            }
        };

        let stdout = truncate(&String::from_utf8_lossy(&output.stdout));
        let stderr = truncate(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code().unwrap_or(-1);

        if output.status.success() {
            Ok(json!({ "stdout": stdout, "stderr": stderr, "exit_code": exit_code }))
        } else {
            anyhow::bail!(
                "[exit {exit_code}]\n{}{}",
                stdout,
                if stderr.is_empty() {
                    String::new()
                } else {
                    format!("\n[stderr]\n{stderr}")
                }
            )
        }
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT {
        s.to_string()
    } else {
        let mut end = OUTPUT_LIMIT;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...[truncated {} bytes]", &s[..end], s.len() - end)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
