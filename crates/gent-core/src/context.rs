// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, RwLock};

use gent_config::CoreConfig;
use gent_model::Provider;
use gent_storage::{EventStore, Storage};
use gent_tools::{
    GlobTool, GrepTool, ListDirTool, PermissionPolicy, ReadFileTool, ShellTool, ToolRegistry,
    WebFetchTool, WriteFileTool,
};
use gent_types::PermissionRule;

use crate::{
    agents::AgentRegistry, checkpoint::CheckpointService, interact::Handlers, runner::ToolRunner,
    subagent::TaskTool,
};

/// Everything the loop, the tool pipeline and the RPC surface share.
///
/// Constructed once at startup and passed by `Arc`; there are no singletons
/// at file scope, so tests freely build isolated instances on in-memory
/// storage with scripted providers.
pub struct CoreDeps {
    pub config: CoreConfig,
    pub storage: Arc<dyn Storage>,
    pub events: Arc<EventStore>,
    pub provider: Arc<dyn Provider>,
    /// Separate (usually smaller) model used for compaction summaries and
    /// session titles.
    pub summarizer: Arc<dyn Provider>,
    pub registry: Arc<RwLock<ToolRegistry>>,
    pub policy: Arc<PermissionPolicy>,
    pub handlers: Arc<Handlers>,
    pub runner: Arc<ToolRunner>,
    pub checkpoints: Arc<CheckpointService>,
    pub agents: Arc<AgentRegistry>,
}

impl CoreDeps {
    /// Wire the core with the builtin tool set and agent roles.
    pub fn new(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn Provider>,
        summarizer: Arc<dyn Provider>,
        config: CoreConfig,
        rules: Vec<PermissionRule>,
    ) -> anyhow::Result<Arc<Self>> {
        let events = Arc::new(EventStore::new(storage.clone(), &config.events));

        let mut registry = ToolRegistry::new();
        registry.register(ReadFileTool);
        registry.register(WriteFileTool);
        registry.register(ListDirTool);
        registry.register(GlobTool);
        registry.register(GrepTool);
        registry.register(ShellTool {
            timeout_secs: config.tools.shell_timeout_secs,
        });
        registry.register(WebFetchTool);
        let registry = Arc::new(RwLock::new(registry));

        let policy = Arc::new(PermissionPolicy::new(rules)?);
        let handlers = Arc::new(Handlers::new(events.clone()));
        let runner = Arc::new(ToolRunner::new(
            registry.clone(),
            policy.clone(),
            handlers.permission.clone(),
            events.clone(),
            &config.tools,
        ));
        let checkpoints = Arc::new(CheckpointService::new(
            storage.clone(),
            events.clone(),
            summarizer.clone(),
            config.models.summarizer_model.clone(),
            config.checkpoint.clone(),
        ));

        let deps = Arc::new(Self {
            config,
            storage,
            events,
            provider,
            summarizer,
            registry,
            policy,
            handlers,
            runner,
            checkpoints,
            agents: Arc::new(AgentRegistry::builtin()),
        });

        // The task tool needs the deps to spawn subagents; a weak reference
        // breaks the cycle deps → registry → task tool → deps.
        deps.registry
            .write()
            .unwrap()
            .register(TaskTool::new(Arc::downgrade(&deps)));

        Ok(deps)
    }
}
