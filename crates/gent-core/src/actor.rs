// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-branch supervisor: one actor per `(session, branch)` pair, driving
//! one turn at a time.
//!
//! ```text
//! Idle ──send──► Preparing ──► Streaming ──► Dispatching ──┐
//!                                  ▲                       │
//!                                  └────── Resuming ◄──────┘
//! Idle ◄── finish (no tool calls) ── Streaming
//! Idle ◄── interrupted / cancelled ── (any active state)
//! ```
//!
//! The mailbox accepts steering commands independently of sends; the loop
//! polls it between stream chunks and between tool calls.  `Cancel` and
//! `Interrupt` abort the in-flight stream, committing whatever was built;
//! `SwitchModel` / `SwitchMode` take effect on the next round; `Interject`
//! is buffered and lands as an extra user message before the next provider
//! round.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use gent_model::{ChunkStream, CompletionRequest, ProviderError, StreamChunk, ToolSchema};
use gent_storage::Storage;
use gent_tools::{Concurrency, ToolCtx};
use gent_types::{
    AgentEvent, Branch, Message, MessagePart, SessionMode, Steer, ToolResultOutput, Usage,
};

use crate::context::CoreDeps;
use crate::runner::ToolCallRequest;
use crate::stream::{TurnAccumulator, TurnOutput};

/// A user message plus optional per-send overrides.
#[derive(Debug, Clone)]
pub struct SendArgs {
    pub content: String,
    pub mode: Option<SessionMode>,
    pub model: Option<String>,
}

impl SendArgs {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            mode: None,
            model: None,
        }
    }
}

#[derive(Debug)]
pub enum ActorCommand {
    Send(SendArgs),
    Steer(Steer),
}

/// Cheap-to-clone handle to a running actor.
#[derive(Clone)]
pub struct ActorHandle {
    tx: mpsc::Sender<ActorCommand>,
}

impl ActorHandle {
    pub async fn send_message(&self, args: SendArgs) -> anyhow::Result<()> {
        self.tx
            .send(ActorCommand::Send(args))
            .await
            .map_err(|_| anyhow::anyhow!("agent actor has shut down"))
    }

    pub async fn steer(&self, steer: Steer) -> anyhow::Result<()> {
        self.tx
            .send(ActorCommand::Steer(steer))
            .await
            .map_err(|_| anyhow::anyhow!("agent actor has shut down"))
    }
}

enum StreamOutcome {
    Finished(TurnOutput),
    Interrupted(TurnOutput),
    Failed { output: TurnOutput, error: String },
}

pub struct AgentActor {
    deps: Arc<CoreDeps>,
    session_id: String,
    branch_id: String,
    rx: mpsc::Receiver<ActorCommand>,
    agent: crate::agents::AgentSpec,
    mode: SessionMode,
    model_override: Option<String>,
    /// Interjections buffered mid-turn; flushed as user messages before the
    /// next provider round.
    interjections: Vec<String>,
    /// Sends that arrived while a turn was running.
    queued_sends: VecDeque<SendArgs>,
}

impl AgentActor {
    pub fn spawn(
        deps: Arc<CoreDeps>,
        session_id: impl Into<String>,
        branch_id: impl Into<String>,
    ) -> ActorHandle {
        let (tx, rx) = mpsc::channel(deps.config.agent_loop.mailbox_capacity.max(1));
        let actor = Self {
            agent: deps.agents.default_spec(),
            deps,
            session_id: session_id.into(),
            branch_id: branch_id.into(),
            rx,
            mode: SessionMode::Build,
            model_override: None,
            interjections: Vec::new(),
            queued_sends: VecDeque::new(),
        };
        tokio::spawn(actor.run());
        ActorHandle { tx }
    }

    async fn run(mut self) {
        info!(session_id = %self.session_id, branch_id = %self.branch_id, "agent actor started");
        loop {
            let command = match self.queued_sends.pop_front() {
                Some(args) => ActorCommand::Send(args),
                None => match self.rx.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };
            match command {
                ActorCommand::Send(args) => {
                    if let Err(e) = self.handle_send(args).await {
                        // Storage or event-store failure mid-turn: the
                        // branch may hold a partial turn; the next user
                        // message starts fresh from Idle.
                        warn!(branch_id = %self.branch_id, "turn failed: {e:#}");
                        self.publish_best_effort(AgentEvent::ErrorOccurred {
                            session_id: self.session_id.clone(),
                            branch_id: Some(self.branch_id.clone()),
                            message: format!("{e:#}"),
                        })
                        .await;
                        self.inspect("idle").await;
                    }
                }
                ActorCommand::Steer(steer) => self.apply_steer(steer).await,
            }
        }
        info!(session_id = %self.session_id, branch_id = %self.branch_id, "agent actor stopped");
    }

    /// Steering outside a turn.  `Cancel`/`Interrupt` are no-ops when
    /// nothing is in flight.
    async fn apply_steer(&mut self, steer: Steer) {
        match steer {
            Steer::Cancel | Steer::Interrupt => {}
            Steer::Interject { message } => self.interjections.push(message),
            Steer::SwitchModel { model } => {
                self.model_override = Some(model.clone());
                self.publish_best_effort(AgentEvent::ModelChanged {
                    session_id: self.session_id.clone(),
                    branch_id: self.branch_id.clone(),
                    model,
                })
                .await;
            }
            Steer::SwitchMode { mode } => {
                self.mode = mode;
                self.publish_best_effort(AgentEvent::ModeChanged {
                    session_id: self.session_id.clone(),
                    branch_id: self.branch_id.clone(),
                    mode,
                })
                .await;
            }
        }
    }

    async fn handle_send(&mut self, args: SendArgs) -> anyhow::Result<()> {
        let turn_start = Instant::now();
        if let Some(mode) = args.mode {
            self.mode = mode;
        }
        if let Some(model) = args.model {
            self.model_override = Some(model);
        }

        self.inspect("preparing").await;
        let session = self.deps.storage.get_session(&self.session_id).await?;
        let branch = self.deps.storage.get_branch(&self.branch_id).await?;

        // Buffered interjections precede the newly sent message.
        self.flush_interjections().await?;
        self.persist_user(args.content).await?;

        let mut rounds: u32 = 0;
        let mut wrap_up = false;
        loop {
            rounds += 1;
            if rounds > self.deps.config.agent_loop.max_rounds && !wrap_up {
                // Out of tool budget: one final tool-free round so the model
                // can summarise instead of stopping abruptly.
                wrap_up = true;
                self.persist_user(format!(
                    "You have reached the maximum tool-call budget ({} rounds). \
                     Do not call any more tools. Summarise what has been \
                     completed, what remains, and how to continue.",
                    self.deps.config.agent_loop.max_rounds
                ))
                .await?;
            }

            // Compaction side trip, consulted between rounds only.  A
            // checkpoint failure is logged and skipped, never fatal.
            match self.deps.checkpoints.should_compact(&self.branch_id).await {
                Ok(true) => {
                    if let Err(e) = self
                        .deps
                        .checkpoints
                        .compact(&self.session_id, &self.branch_id)
                        .await
                    {
                        warn!(branch_id = %self.branch_id, "compaction failed, continuing: {e:#}");
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(branch_id = %self.branch_id, "compaction check failed: {e}"),
            }

            // Mid-chain interjections land before the next provider round.
            self.flush_interjections().await?;

            let context = self.deps.checkpoints.load_context(&self.branch_id).await?;
            let context = self.deps.checkpoints.prune(context);
            let model = self.resolve_model(&branch);

            self.deps
                .events
                .publish(AgentEvent::StreamStarted {
                    session_id: self.session_id.clone(),
                    branch_id: self.branch_id.clone(),
                    model: model.clone(),
                })
                .await?;
            self.inspect("streaming").await;

            match self.stream_turn(context, &model, !wrap_up).await? {
                StreamOutcome::Interrupted(output) => {
                    self.end_stream(output.usage, true).await?;
                    if !output.parts.is_empty() {
                        self.commit_assistant(output.parts, None).await?;
                    }
                    // Committed tool calls that will never run still need
                    // their results so call/result pairing holds.
                    self.synthesize_results(&output.tool_calls, "interrupted")
                        .await?;
                    self.inspect("idle").await;
                    return Ok(());
                }
                StreamOutcome::Failed { output, error } => {
                    self.end_stream(output.usage, true).await?;
                    if !output.parts.is_empty() {
                        self.commit_assistant(output.parts, None).await?;
                    }
                    self.synthesize_results(&output.tool_calls, "stream failed")
                        .await?;
                    self.deps
                        .events
                        .publish(AgentEvent::ErrorOccurred {
                            session_id: self.session_id.clone(),
                            branch_id: Some(self.branch_id.clone()),
                            message: error.clone(),
                        })
                        .await?;
                    self.publish_best_effort(AgentEvent::MachineTaskFailed {
                        session_id: self.session_id.clone(),
                        branch_id: self.branch_id.clone(),
                        task: "stream".into(),
                        error,
                    })
                    .await;
                    self.inspect("idle").await;
                    return Ok(());
                }
                StreamOutcome::Finished(output) => {
                    self.end_stream(output.usage, false).await?;
                    debug!(finish_reason = ?output.finish_reason, rounds, "stream finished");
                    // Dispatch whenever tool calls are present; this keeps
                    // the call/result pairing intact even for providers
                    // that finish a tool-call turn with reason "stop".
                    let dispatching = output.has_tool_calls() && !wrap_up;
                    let duration = (!dispatching).then(|| turn_start.elapsed().as_millis() as u64);
                    if !output.parts.is_empty() {
                        self.commit_assistant(output.parts, duration).await?;
                    }

                    if dispatching {
                        self.inspect("dispatching").await;
                        let cancelled = self
                            .dispatch(&output.tool_calls, session.bypass, session.cwd.clone())
                            .await?;
                        if cancelled {
                            self.inspect("idle").await;
                            return Ok(());
                        }
                        self.inspect("resuming").await;
                        continue;
                    }

                    // A wrap-up round advertises no tools, but a misbehaving
                    // provider may emit tool calls anyway; those parts were
                    // just committed, so pair them with error results to keep
                    // the history valid.
                    self.synthesize_results(&output.tool_calls, "tool budget exhausted")
                        .await?;

                    self.deps
                        .events
                        .publish(AgentEvent::TurnCompleted {
                            session_id: self.session_id.clone(),
                            branch_id: self.branch_id.clone(),
                            duration_ms: turn_start.elapsed().as_millis() as u64,
                        })
                        .await?;
                    self.publish_best_effort(AgentEvent::MachineTaskSucceeded {
                        session_id: self.session_id.clone(),
                        branch_id: self.branch_id.clone(),
                        task: "turn".into(),
                    })
                    .await;
                    self.inspect("idle").await;
                    return Ok(());
                }
            }
        }
    }

    /// One provider stream, consumed chunk-by-chunk with the mailbox polled
    /// in between.  Initiation failures retry with exponential backoff while
    /// the error is transient.
    async fn stream_turn(
        &mut self,
        context: Vec<Message>,
        model: &str,
        with_tools: bool,
    ) -> anyhow::Result<StreamOutcome> {
        let tools: Vec<ToolSchema> = if with_tools {
            self.deps
                .registry
                .read()
                .unwrap()
                .specs_for(self.mode, self.agent.tools.as_deref())
                .into_iter()
                .map(|s| ToolSchema {
                    name: s.name,
                    description: s.description,
                    input_schema: s.input_schema,
                })
                .collect()
        } else {
            Vec::new()
        };

        let request = CompletionRequest {
            model: model.to_string(),
            messages: context,
            tools,
            system_prompt: self.agent.prompt_addendum.clone(),
            max_tokens: None,
            temperature: None,
        };

        let mut stream = match self.open_stream(request).await {
            Ok(stream) => stream,
            Err(e) => {
                return Ok(StreamOutcome::Failed {
                    output: TurnAccumulator::new().finish(),
                    error: format!("model call failed: {e}"),
                })
            }
        };

        let mut acc = TurnAccumulator::new();
        loop {
            tokio::select! {
                biased;
                command = self.rx.recv() => match command {
                    None => return Ok(StreamOutcome::Interrupted(acc.finish())),
                    Some(ActorCommand::Send(args)) => self.queued_sends.push_back(args),
                    Some(ActorCommand::Steer(steer)) => match steer {
                        Steer::Cancel | Steer::Interrupt => {
                            drop(stream);
                            return Ok(StreamOutcome::Interrupted(acc.finish()));
                        }
                        // Model/mode switches do not disturb the current
                        // stream; they apply from the next round.
                        other => self.apply_steer(other).await,
                    },
                },
                chunk = stream.next() => match chunk {
                    None => return Ok(StreamOutcome::Finished(acc.finish())),
                    Some(Ok(chunk)) => {
                        if let StreamChunk::Text { text } = &chunk {
                            self.deps
                                .events
                                .publish(AgentEvent::StreamChunk {
                                    session_id: self.session_id.clone(),
                                    branch_id: self.branch_id.clone(),
                                    delta: text.clone(),
                                })
                                .await?;
                        }
                        let finished = matches!(chunk, StreamChunk::Finish { .. });
                        acc.push(chunk);
                        if finished {
                            return Ok(StreamOutcome::Finished(acc.finish()));
                        }
                    }
                    Some(Err(e)) => {
                        return Ok(StreamOutcome::Failed {
                            output: acc.finish(),
                            error: format!("stream error: {e}"),
                        });
                    }
                },
            }
        }
    }

    async fn open_stream(&self, request: CompletionRequest) -> Result<ChunkStream, ProviderError> {
        let retry = &self.deps.config.retry;
        let mut attempt: u32 = 0;
        loop {
            match self.deps.provider.stream(request.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(e) if e.retryable() && attempt + 1 < retry.max_attempts.max(1) => {
                    let delay = retry
                        .initial_delay_ms
                        .saturating_mul(1u64 << attempt.min(32))
                        .min(retry.max_delay_ms);
                    warn!(attempt, delay_ms = delay, "provider transient failure, retrying: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Execute a round's tool calls: serial calls sequentially in
    /// declaration order, parallel calls concurrently, results re-assembled
    /// in declaration order into a single tool-role message.  Returns `true`
    /// when the round was cancelled mid-dispatch.
    async fn dispatch(
        &mut self,
        calls: &[ToolCallRequest],
        bypass: bool,
        cwd: Option<String>,
    ) -> anyhow::Result<bool> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut results: Vec<Option<MessagePart>> = calls.iter().map(|_| None).collect();
        let mut state = DispatchState {
            cancelled: false,
            mailbox_open: true,
        };

        // Parallel calls start immediately; the runner's semaphore bounds
        // their actual overlap.
        let mut handles = Vec::new();
        for (i, call) in calls.iter().enumerate() {
            if self.concurrency_of(call) == Concurrency::Parallel {
                let runner = self.deps.runner.clone();
                let call = call.clone();
                let ctx = self.tool_ctx(&call, cancel_rx.clone(), cwd.clone());
                handles.push((
                    i,
                    tokio::spawn(async move { runner.run(&call, &ctx, bypass).await }),
                ));
            }
        }

        // Serial calls one at a time, in declaration order.  Each runs on
        // its own task so the mailbox stays responsive while it executes.
        for (i, call) in calls.iter().enumerate() {
            if self.concurrency_of(call) != Concurrency::Serial {
                continue;
            }
            if state.cancelled {
                results[i] = Some(interrupted_result(call));
                continue;
            }
            let runner = self.deps.runner.clone();
            let owned = call.clone();
            let ctx = self.tool_ctx(call, cancel_rx.clone(), cwd.clone());
            let handle = tokio::spawn(async move { runner.run(&owned, &ctx, bypass).await });
            results[i] = Some(
                self.await_tool(handle, call, &cancel_tx, &mut state)
                    .await?,
            );
        }

        for (i, handle) in handles {
            results[i] = Some(
                self.await_tool(handle, &calls[i], &cancel_tx, &mut state)
                    .await?,
            );
        }

        let parts: Vec<MessagePart> = results
            .into_iter()
            .map(|r| r.expect("every call produced a result"))
            .collect();
        let message = Message::tool_results(&self.session_id, &self.branch_id, parts);
        self.deps.storage.create_message(message.clone()).await?;
        self.deps
            .events
            .publish(AgentEvent::MessageReceived {
                session_id: self.session_id.clone(),
                branch_id: self.branch_id.clone(),
                message,
            })
            .await?;
        Ok(state.cancelled)
    }

    /// Await one tool task while keeping the mailbox live.  Cancel and
    /// interrupt flip the shared watch channel so in-flight tools can bail
    /// out; the task itself is always awaited so its result slot fills.
    async fn await_tool(
        &mut self,
        mut handle: tokio::task::JoinHandle<Result<MessagePart, gent_types::EventStoreError>>,
        call: &ToolCallRequest,
        cancel_tx: &watch::Sender<bool>,
        state: &mut DispatchState,
    ) -> anyhow::Result<MessagePart> {
        loop {
            if !state.mailbox_open {
                return unwrap_joined(handle.await, call);
            }
            tokio::select! {
                biased;
                command = self.rx.recv() => match command {
                    None => {
                        // Mailbox gone: treat as cancellation, then just
                        // await the remaining tools.
                        state.mailbox_open = false;
                        state.cancelled = true;
                        let _ = cancel_tx.send(true);
                    }
                    Some(ActorCommand::Send(args)) => self.queued_sends.push_back(args),
                    Some(ActorCommand::Steer(Steer::Cancel | Steer::Interrupt)) => {
                        state.cancelled = true;
                        let _ = cancel_tx.send(true);
                    }
                    Some(ActorCommand::Steer(other)) => self.apply_steer(other).await,
                },
                joined = &mut handle => return unwrap_joined(joined, call),
            }
        }
    }

    fn concurrency_of(&self, call: &ToolCallRequest) -> Concurrency {
        self.deps
            .registry
            .read()
            .unwrap()
            .get(&call.tool_name)
            .map(|t| t.concurrency())
            .unwrap_or_default()
    }

    fn tool_ctx(
        &self,
        call: &ToolCallRequest,
        cancel: watch::Receiver<bool>,
        cwd: Option<String>,
    ) -> ToolCtx {
        let mut ctx = ToolCtx::new(&self.session_id, &self.branch_id, &call.tool_call_id, cancel);
        ctx.agent_name = Some(self.agent.name.clone());
        ctx.cwd = cwd;
        ctx
    }

    fn resolve_model(&self, branch: &Branch) -> String {
        if let Some(model) = &self.model_override {
            return model.clone();
        }
        if let Some(model) = &branch.model {
            return model.clone();
        }
        if let Some(model) = &self.agent.model {
            return model.clone();
        }
        if self.mode == SessionMode::Plan {
            if let Some(model) = &self.deps.config.models.plan_model {
                return model.clone();
            }
        }
        self.deps.config.models.default_model.clone()
    }

    async fn flush_interjections(&mut self) -> anyhow::Result<()> {
        for text in std::mem::take(&mut self.interjections) {
            self.persist_user(text).await?;
        }
        Ok(())
    }

    async fn persist_user(&self, content: String) -> anyhow::Result<()> {
        let message = Message::user(&self.session_id, &self.branch_id, content);
        self.deps.storage.create_message(message.clone()).await?;
        self.deps
            .events
            .publish(AgentEvent::MessageReceived {
                session_id: self.session_id.clone(),
                branch_id: self.branch_id.clone(),
                message,
            })
            .await?;
        Ok(())
    }

    async fn commit_assistant(
        &self,
        parts: Vec<MessagePart>,
        turn_duration_ms: Option<u64>,
    ) -> anyhow::Result<()> {
        let mut message = Message::assistant(&self.session_id, &self.branch_id, parts);
        message.turn_duration_ms = turn_duration_ms;
        self.deps.storage.create_message(message.clone()).await?;
        self.deps
            .events
            .publish(AgentEvent::MessageReceived {
                session_id: self.session_id.clone(),
                branch_id: self.branch_id.clone(),
                message,
            })
            .await?;
        Ok(())
    }

    /// Persist error results for tool calls that were committed but will
    /// never execute, keeping the call/result pairing intact.
    async fn synthesize_results(
        &self,
        calls: &[ToolCallRequest],
        reason: &str,
    ) -> anyhow::Result<()> {
        if calls.is_empty() {
            return Ok(());
        }
        let parts: Vec<MessagePart> = calls
            .iter()
            .map(|call| MessagePart::ToolResult {
                tool_call_id: call.tool_call_id.clone(),
                tool_name: call.tool_name.clone(),
                output: ToolResultOutput::error(reason),
            })
            .collect();
        let message = Message::tool_results(&self.session_id, &self.branch_id, parts);
        self.deps.storage.create_message(message.clone()).await?;
        self.deps
            .events
            .publish(AgentEvent::MessageReceived {
                session_id: self.session_id.clone(),
                branch_id: self.branch_id.clone(),
                message,
            })
            .await?;
        Ok(())
    }

    async fn end_stream(&self, usage: Option<Usage>, interrupted: bool) -> anyhow::Result<()> {
        self.deps
            .events
            .publish(AgentEvent::StreamEnded {
                session_id: self.session_id.clone(),
                branch_id: self.branch_id.clone(),
                usage,
                interrupted,
            })
            .await?;
        Ok(())
    }

    /// State-machine telemetry; best-effort by design, a telemetry publish
    /// failure must not wedge a healthy turn.
    async fn inspect(&self, state: &str) {
        self.publish_best_effort(AgentEvent::MachineInspected {
            session_id: self.session_id.clone(),
            branch_id: self.branch_id.clone(),
            state: state.to_string(),
        })
        .await;
    }

    async fn publish_best_effort(&self, event: AgentEvent) {
        if let Err(e) = self.deps.events.publish(event).await {
            warn!("telemetry publish failed: {e}");
        }
    }
}

struct DispatchState {
    cancelled: bool,
    mailbox_open: bool,
}

fn interrupted_result(call: &ToolCallRequest) -> MessagePart {
    MessagePart::ToolResult {
        tool_call_id: call.tool_call_id.clone(),
        tool_name: call.tool_name.clone(),
        output: ToolResultOutput::error("interrupted"),
    }
}

fn unwrap_joined(
    joined: Result<Result<MessagePart, gent_types::EventStoreError>, tokio::task::JoinError>,
    call: &ToolCallRequest,
) -> anyhow::Result<MessagePart> {
    match joined {
        Ok(result) => Ok(result?),
        Err(e) => {
            debug!("tool task aborted: {e}");
            Ok(interrupted_result(call))
        }
    }
}
