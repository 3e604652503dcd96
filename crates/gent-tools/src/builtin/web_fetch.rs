// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolCtx};

/// Response body ceiling; pages larger than this are cut, not rejected.
const MAX_BODY_BYTES: usize = 200_000;

#[derive(Deserialize)]
struct Params {
    url: String,
}

pub struct WebFetchTool;

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetches a URL over HTTP(S) and returns its content as text. HTML is \
         converted to plain text; other content types are returned as-is. \
         Bodies are capped at 200 KB."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "http:// or https:// URL to fetch"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    fn read_only(&self) -> bool {
        true
    }

    async fn execute(&self, input: Value, _ctx: &ToolCtx) -> anyhow::Result<Value> {
        let params: Params = serde_json::from_value(input)?;
        if !params.url.starts_with("http://") && !params.url.starts_with("https://") {
            anyhow::bail!("only http(s) URLs are supported: {}", params.url);
        }
        debug!(url = %params.url, "web_fetch tool");

        let response = reqwest::get(&params.url)
            .await
            .map_err(|e| anyhow::anyhow!("fetch error: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("fetch failed with status {status}");
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(false);

        let body = response
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("body read error: {e}"))?;

        let text = if is_html {
            html2text::from_read(body.as_bytes(), 100)
        } else {
            body
        };

        let truncated = text.len() > MAX_BODY_BYTES;
        let mut content = text;
        if truncated {
            let mut end = MAX_BODY_BYTES;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            content.truncate(end);
        }

        Ok(json!({
            "url": params.url,
            "content": content,
            "truncated": truncated
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
