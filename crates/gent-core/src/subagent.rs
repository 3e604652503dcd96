// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use gent_model::{CompletionRequest, ProviderError, StreamChunk, ToolSchema};
use gent_storage::Storage;
use gent_tools::{Tool, ToolCtx};
use gent_types::{AgentEvent, Branch, Message, Session, SessionMode, Usage};

use crate::agents::AgentSpec;
use crate::context::CoreDeps;
use crate::stream::TurnAccumulator;

/// Delegation tool: spawns a named subagent on a fresh child session and
/// returns its final text to the parent as a tool result.
///
/// The nesting bound is enforced on the delegation depth carried by the
/// calling context: each chain counts its own depth, so concurrent chains
/// in other sessions cannot push this one over the limit.
pub struct TaskTool {
    deps: Weak<CoreDeps>,
}

#[derive(Deserialize)]
struct Params {
    agent: String,
    task: String,
}

impl TaskTool {
    pub fn new(deps: Weak<CoreDeps>) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Delegate a focused task to a named subagent and return its final \
         text output. The subagent works on its own session with its own \
         (possibly restricted) tool set and cannot ask the user questions. \
         Useful for isolated exploration or design work."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Name of the subagent to run (e.g. 'explore')"
                },
                "task": {
                    "type": "string",
                    "description": "The task description for the subagent"
                }
            },
            "required": ["agent", "task"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolCtx) -> anyhow::Result<Value> {
        let params: Params = serde_json::from_value(input)?;
        let deps = self
            .deps
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("core is shutting down"))?;

        let parent_agent = ctx
            .agent_name
            .clone()
            .unwrap_or_else(|| deps.agents.default_spec().name);
        if !deps.agents.may_delegate(&parent_agent, &params.agent) {
            anyhow::bail!(
                "agent '{parent_agent}' may not delegate to '{}'",
                params.agent
            );
        }

        let max_depth = deps.config.subagent.max_depth;
        if ctx.depth >= max_depth {
            anyhow::bail!("maximum subagent depth ({max_depth}) reached");
        }

        debug!(agent = %params.agent, depth = ctx.depth + 1, "spawning subagent");
        SubagentRunner::run(
            &deps,
            &ctx.session_id,
            &params.agent,
            &params.task,
            ctx.depth + 1,
        )
        .await
    }
}

/// Runs a bounded inner conversation for a named subagent: no user
/// interaction, transient provider failures retried with exponential
/// backoff, the whole task bounded by a wall clock.  `depth` is the
/// delegation depth of the spawned conversation; it flows into the child's
/// tool contexts so a nested `task` call sees its own chain's depth.
pub struct SubagentRunner;

impl SubagentRunner {
    pub async fn run(
        deps: &Arc<CoreDeps>,
        parent_session_id: &str,
        agent_name: &str,
        prompt: &str,
        depth: usize,
    ) -> anyhow::Result<Value> {
        let spec = deps
            .agents
            .get(agent_name)
            .ok_or_else(|| anyhow::anyhow!("unknown agent: {agent_name}"))?;
        let parent = deps.storage.get_session(parent_session_id).await?;

        let mut title = format!("{agent_name}: {prompt}");
        title.truncate(80);
        let child = Session::new(Some(title), parent.cwd.clone(), parent.bypass);
        deps.storage.create_session(child.clone()).await?;
        let branch = Branch::root(&child.id);
        deps.storage.create_branch(branch.clone()).await?;

        deps.events
            .publish(AgentEvent::SubagentSpawned {
                session_id: parent_session_id.to_string(),
                child_session_id: child.id.clone(),
                agent_name: agent_name.to_string(),
                prompt: prompt.to_string(),
            })
            .await?;
        deps.events
            .publish(AgentEvent::SessionStarted {
                session_id: child.id.clone(),
                branch_id: branch.id.clone(),
            })
            .await?;

        let budget = Duration::from_millis(deps.config.subagent.timeout_ms);
        let outcome = tokio::time::timeout(
            budget,
            Self::drive_with_retry(deps, &spec, &child, &branch, prompt, depth),
        )
        .await;
        let result = match outcome {
            Ok(inner) => inner,
            Err(_) => Err(anyhow::anyhow!(
                "subagent timed out after {} ms",
                deps.config.subagent.timeout_ms
            )),
        };

        deps.events
            .publish(AgentEvent::SubagentCompleted {
                session_id: parent_session_id.to_string(),
                child_session_id: child.id.clone(),
                agent_name: agent_name.to_string(),
                success: result.is_ok(),
            })
            .await?;

        let (text, usage) = result?;
        Ok(json!({
            "output": text,
            "session_id": child.id,
            "agent_name": agent_name,
            "usage": usage.map(|u| serde_json::to_value(u).expect("usage serialises")),
        }))
    }

    async fn drive_with_retry(
        deps: &Arc<CoreDeps>,
        spec: &AgentSpec,
        session: &Session,
        branch: &Branch,
        prompt: &str,
        depth: usize,
    ) -> anyhow::Result<(String, Option<Usage>)> {
        let attempts = deps.config.subagent.max_attempts.max(1);
        let retry = &deps.config.retry;
        let mut attempt: u32 = 0;
        loop {
            match Self::drive_once(deps, spec, session, branch, prompt, depth, attempt == 0).await
            {
                Ok(result) => return Ok(result),
                Err(e) if attempt + 1 < attempts && is_transient(&e) => {
                    let delay = retry
                        .initial_delay_ms
                        .saturating_mul(1u64 << attempt.min(32))
                        .min(retry.max_delay_ms);
                    warn!(attempt, delay_ms = delay, "subagent transient failure, retrying: {e:#}");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One bounded Preparing → Streaming → Dispatching chain with no user
    /// interaction.
    async fn drive_once(
        deps: &Arc<CoreDeps>,
        spec: &AgentSpec,
        session: &Session,
        branch: &Branch,
        prompt: &str,
        depth: usize,
        first_attempt: bool,
    ) -> anyhow::Result<(String, Option<Usage>)> {
        if first_attempt {
            let message = Message::user(&session.id, &branch.id, prompt);
            deps.storage.create_message(message.clone()).await?;
            deps.events
                .publish(AgentEvent::MessageReceived {
                    session_id: session.id.clone(),
                    branch_id: branch.id.clone(),
                    message,
                })
                .await?;
        }

        let model = spec
            .model
            .clone()
            .unwrap_or_else(|| deps.config.models.default_model.clone());
        let tools: Vec<ToolSchema> = deps
            .registry
            .read()
            .unwrap()
            .specs_for(SessionMode::Build, spec.tools.as_deref())
            .into_iter()
            // Subagents never delegate further through their own task tool
            // unless the whitelist says so; the gate lives in TaskTool.
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                input_schema: s.input_schema,
            })
            .collect();

        let max_rounds = deps.config.agent_loop.max_rounds;
        let mut last_text = String::new();
        let mut last_usage: Option<Usage> = None;

        for _round in 0..max_rounds {
            let context = deps.checkpoints.load_context(&branch.id).await?;
            let context = deps.checkpoints.prune(context);

            deps.events
                .publish(AgentEvent::StreamStarted {
                    session_id: session.id.clone(),
                    branch_id: branch.id.clone(),
                    model: model.clone(),
                })
                .await?;

            let mut stream = deps
                .provider
                .stream(CompletionRequest {
                    model: model.clone(),
                    messages: context,
                    tools: tools.clone(),
                    system_prompt: spec.prompt_addendum.clone(),
                    max_tokens: None,
                    temperature: None,
                })
                .await?;

            let mut acc = TurnAccumulator::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                if let StreamChunk::Text { text } = &chunk {
                    deps.events
                        .publish(AgentEvent::StreamChunk {
                            session_id: session.id.clone(),
                            branch_id: branch.id.clone(),
                            delta: text.clone(),
                        })
                        .await?;
                }
                let finished = matches!(chunk, StreamChunk::Finish { .. });
                acc.push(chunk);
                if finished {
                    break;
                }
            }
            let output = acc.finish();

            deps.events
                .publish(AgentEvent::StreamEnded {
                    session_id: session.id.clone(),
                    branch_id: branch.id.clone(),
                    usage: output.usage,
                    interrupted: false,
                })
                .await?;
            if output.usage.is_some() {
                last_usage = output.usage;
            }

            if !output.parts.is_empty() {
                let message =
                    Message::assistant(&session.id, &branch.id, output.parts.clone());
                deps.storage.create_message(message.clone()).await?;
                deps.events
                    .publish(AgentEvent::MessageReceived {
                        session_id: session.id.clone(),
                        branch_id: branch.id.clone(),
                        message: message.clone(),
                    })
                    .await?;
                let text = message.text();
                if !text.is_empty() {
                    last_text = text;
                }
            }

            if !output.has_tool_calls() {
                return Ok((last_text, last_usage));
            }

            // Dispatch sequentially; subagents have no steering to react to.
            let mut parts = Vec::with_capacity(output.tool_calls.len());
            for call in &output.tool_calls {
                let mut ctx = ToolCtx::detached(&session.id, &branch.id, &call.tool_call_id);
                ctx.agent_name = Some(spec.name.clone());
                ctx.cwd = session.cwd.clone();
                ctx.depth = depth;
                parts.push(deps.runner.run(call, &ctx, session.bypass).await?);
            }
            let message = Message::tool_results(&session.id, &branch.id, parts);
            deps.storage.create_message(message.clone()).await?;
            deps.events
                .publish(AgentEvent::MessageReceived {
                    session_id: session.id.clone(),
                    branch_id: branch.id.clone(),
                    message,
                })
                .await?;
        }

        anyhow::bail!("subagent exceeded the round budget ({max_rounds})")
    }
}

fn is_transient(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ProviderError>()
        .map(ProviderError::retryable)
        .unwrap_or(false)
}
