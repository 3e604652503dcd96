// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};

use gent_config::ToolRunnerConfig;
use gent_storage::EventStore;
use gent_tools::{validate_input, Concurrency, PermissionPolicy, ToolCtx, ToolRegistry};
use gent_types::{
    AgentEvent, EventStoreError, MessagePart, PermissionAction, PermissionDecision,
    ToolResultOutput,
};

use crate::interact::PermissionHandler;

/// One tool invocation as requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: Value,
}

/// Single entry point for every tool invocation: resolve, decode, gate on
/// policy (asking the user when required), execute under the per-tool
/// concurrency discipline, and normalise the outcome into a tool-result
/// part.
///
/// Tool failures are never fatal; they are delivered to the model as
/// error-json results so it can recover.  The only error this returns is an
/// event-store failure, which the actor treats as a storage failure.
pub struct ToolRunner {
    registry: Arc<RwLock<ToolRegistry>>,
    policy: Arc<PermissionPolicy>,
    permissions: Arc<PermissionHandler>,
    events: Arc<EventStore>,
    /// Single global permit shared by all `serial` tools.
    serial_gate: Mutex<()>,
    /// Bounded permits shared by all `parallel` tools.
    parallel_gate: Semaphore,
}

impl ToolRunner {
    pub fn new(
        registry: Arc<RwLock<ToolRegistry>>,
        policy: Arc<PermissionPolicy>,
        permissions: Arc<PermissionHandler>,
        events: Arc<EventStore>,
        config: &ToolRunnerConfig,
    ) -> Self {
        Self {
            registry,
            policy,
            permissions,
            events,
            serial_gate: Mutex::new(()),
            parallel_gate: Semaphore::new(config.parallel_permits.max(1)),
        }
    }

    pub async fn run(
        &self,
        call: &ToolCallRequest,
        ctx: &ToolCtx,
        bypass: bool,
    ) -> Result<MessagePart, EventStoreError> {
        let tool = self.registry.read().unwrap().get(&call.tool_name);
        let Some(tool) = tool else {
            return self
                .finish(
                    call,
                    ctx,
                    ToolResultOutput::error(format!("unknown tool: {}", call.tool_name)),
                )
                .await;
        };

        if let Err(message) = validate_input(&tool.input_schema(), &call.input) {
            return self
                .finish(call, ctx, ToolResultOutput::error(message))
                .await;
        }

        match self
            .policy
            .check(&call.tool_name, &call.input, tool.read_only(), bypass)
        {
            PermissionAction::Allow => {}
            PermissionAction::Deny => {
                return self
                    .finish(call, ctx, ToolResultOutput::error("denied by policy"))
                    .await;
            }
            PermissionAction::Ask => {
                // A cancelled turn rejects the pending request; the drop
                // guard inside the handler clears the table entry.
                let reply = tokio::select! {
                    reply = self.permissions.request(
                        &ctx.session_id,
                        &ctx.branch_id,
                        &call.tool_name,
                        &call.input,
                    ) => reply?,
                    _ = ctx.wait_cancelled() => {
                        return self
                            .finish(call, ctx, ToolResultOutput::error("interrupted"))
                            .await;
                    }
                };
                match reply {
                    Some(reply) if reply.decision == PermissionDecision::Allow => {
                        if reply.persist {
                            if let Err(e) =
                                self.policy.append_allow(&call.tool_name, reply.pattern)
                            {
                                warn!(tool = %call.tool_name, "failed to persist allow rule: {e}");
                            }
                        }
                    }
                    Some(_) => {
                        return self
                            .finish(call, ctx, ToolResultOutput::error("denied by user"))
                            .await;
                    }
                    None => {
                        return self
                            .finish(call, ctx, ToolResultOutput::error("permission request cancelled"))
                            .await;
                    }
                }
            }
        }

        self.events
            .publish(AgentEvent::ToolCallStarted {
                session_id: ctx.session_id.clone(),
                branch_id: ctx.branch_id.clone(),
                tool_call_id: call.tool_call_id.clone(),
                tool_name: call.tool_name.clone(),
                input: call.input.clone(),
            })
            .await?;

        // A slow serial tool must not block parallel tools and vice versa,
        // so the two gates are independent.
        let output = match tool.concurrency() {
            Concurrency::Serial => {
                let _permit = self.serial_gate.lock().await;
                self.execute_isolated(tool, call, ctx).await
            }
            Concurrency::Parallel => {
                // The semaphore is never closed, so acquire cannot fail.
                let _permit = self.parallel_gate.acquire().await.expect("gate closed");
                self.execute_isolated(tool, call, ctx).await
            }
        };

        self.finish(call, ctx, output).await
    }

    /// Run the tool on its own task so a panic is contained as an error
    /// result rather than unwinding the actor.
    async fn execute_isolated(
        &self,
        tool: Arc<dyn gent_tools::Tool>,
        call: &ToolCallRequest,
        ctx: &ToolCtx,
    ) -> ToolResultOutput {
        let input = call.input.clone();
        let ctx = ctx.clone();
        let name = call.tool_name.clone();
        debug!(tool = %name, tool_call_id = %call.tool_call_id, "executing tool");
        match tokio::spawn(async move { tool.execute(input, &ctx).await }).await {
            Ok(Ok(value)) => ToolResultOutput::Json(value),
            Ok(Err(e)) => ToolResultOutput::error(format!("{e:#}")),
            Err(e) => ToolResultOutput::error(format!("tool panicked: {e}")),
        }
    }

    async fn finish(
        &self,
        call: &ToolCallRequest,
        ctx: &ToolCtx,
        output: ToolResultOutput,
    ) -> Result<MessagePart, EventStoreError> {
        self.events
            .publish(AgentEvent::ToolCallCompleted {
                session_id: ctx.session_id.clone(),
                branch_id: ctx.branch_id.clone(),
                tool_call_id: call.tool_call_id.clone(),
                tool_name: call.tool_name.clone(),
                is_error: output.is_error(),
                summary: digest(output.value()),
                output: output.clone(),
            })
            .await?;

        Ok(MessagePart::ToolResult {
            tool_call_id: call.tool_call_id.clone(),
            tool_name: call.tool_name.clone(),
            output,
        })
    }
}

/// First-line-or-100-char digest of a tool output for list UIs.
fn digest(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let first_line = text.lines().next().unwrap_or("");
    let mut end = first_line.len().min(100);
    while !first_line.is_char_boundary(end) {
        end -= 1;
    }
    first_line[..end].to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
