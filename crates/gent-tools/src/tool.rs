// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

/// Per-tool concurrency discipline.  Serial tools share one global permit;
/// parallel tools share a bounded semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Concurrency {
    Serial,
    #[default]
    Parallel,
}

/// Execution context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    pub session_id: String,
    pub branch_id: String,
    pub tool_call_id: String,
    pub agent_name: Option<String>,
    /// Session working directory; relative tool paths resolve against it.
    pub cwd: Option<String>,
    /// Delegation depth of the conversation issuing this call: 0 for a
    /// top-level session, incremented once per nested subagent.  Scoped to
    /// the call chain, so concurrent unrelated chains never see each
    /// other's depth.
    pub depth: usize,
    /// Flips to `true` when the owning turn is cancelled.  Long-running
    /// tools must honour it when it is safe to stop.
    pub cancel: watch::Receiver<bool>,
}

impl ToolCtx {
    pub fn new(
        session_id: impl Into<String>,
        branch_id: impl Into<String>,
        tool_call_id: impl Into<String>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            branch_id: branch_id.into(),
            tool_call_id: tool_call_id.into(),
            agent_name: None,
            cwd: None,
            depth: 0,
            cancel,
        }
    }

    /// Context with a cancellation channel that never fires.  For tests and
    /// fire-and-forget invocations.
    pub fn detached(
        session_id: impl Into<String>,
        branch_id: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Self {
        let (_tx, rx) = watch::channel(false);
        Self::new(session_id, branch_id, tool_call_id, rx)
    }

    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves when the owning turn is cancelled; pends forever when the
    /// cancel channel is closed without firing.
    pub async fn wait_cancelled(&self) {
        let mut rx = self.cancel.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Trait every builtin and embedder-defined tool implements.
///
/// Errors returned from `execute` are delivered to the model as error-json
/// tool results; they are never fatal to the loop.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the input object.
    fn input_schema(&self) -> Value;
    fn concurrency(&self) -> Concurrency {
        Concurrency::Parallel
    }
    /// Read-only tools run without asking even when the session is not in
    /// bypass, and remain available in plan mode.
    fn read_only(&self) -> bool {
        false
    }
    async fn execute(&self, input: Value, ctx: &ToolCtx) -> anyhow::Result<Value>;
}

/// Check `input` against a tool's declared JSON Schema: the input must be an
/// object, declared `required` members must be present, and members whose
/// schema declares a primitive `type` must match it.  Nested schemas are not
/// descended into; tools do their own fine-grained parsing.
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !input.is_object() {
        return Err(format!("expected an object, got: {input}"));
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if input.get(field).is_none() {
                return Err(format!("missing required parameter '{field}'"));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(Value::as_object) {
        for (field, prop) in props {
            let Some(value) = input.get(field) else {
                continue;
            };
            let Some(expected) = prop.get("type").and_then(Value::as_str) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                return Err(format!(
                    "parameter '{field}' must be of type {expected}, got: {value}"
                ));
            }
        }
    }

    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["path"]
        })
    }

    #[test]
    fn valid_input_passes() {
        assert!(validate_input(&schema(), &json!({"path": "/a", "limit": 3})).is_ok());
    }

    #[test]
    fn missing_required_field_fails() {
        let err = validate_input(&schema(), &json!({"limit": 3})).unwrap_err();
        assert!(err.contains("missing required parameter 'path'"), "{err}");
    }

    #[test]
    fn wrong_type_fails() {
        let err = validate_input(&schema(), &json!({"path": 42})).unwrap_err();
        assert!(err.contains("must be of type string"), "{err}");
    }

    #[test]
    fn non_object_input_fails() {
        assert!(validate_input(&schema(), &json!("just a string")).is_err());
    }

    #[test]
    fn extra_fields_are_tolerated() {
        assert!(validate_input(&schema(), &json!({"path": "/a", "extra": true})).is_ok());
    }

    #[test]
    fn detached_ctx_is_never_cancelled() {
        let ctx = ToolCtx::detached("s", "b", "t");
        assert!(!ctx.cancelled());
    }
}
