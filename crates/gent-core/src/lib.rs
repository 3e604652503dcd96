// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod actor;
mod agents;
mod checkpoint;
mod context;
mod interact;
mod runner;
mod stream;
mod subagent;
mod wide;

pub use actor::{ActorCommand, ActorHandle, AgentActor, SendArgs};
pub use agents::{AgentRegistry, AgentSpec};
pub use checkpoint::CheckpointService;
pub use context::CoreDeps;
pub use interact::{
    Handlers, PermissionHandler, PermissionReply, PlanHandler, PlanReply, PlanResolution,
    QuestionHandler,
};
pub use runner::{ToolCallRequest, ToolRunner};
pub use subagent::{SubagentRunner, TaskTool};
pub use wide::{WideEvent, WideEventAggregator};
