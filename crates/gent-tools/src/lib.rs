// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod builtin;
mod policy;
mod registry;
mod tool;

pub use policy::PermissionPolicy;
pub use registry::{ToolRegistry, ToolSpec};
pub use tool::{validate_input, Concurrency, Tool, ToolCtx};

pub use builtin::{
    GlobTool, GrepTool, ListDirTool, ReadFileTool, ShellTool, WebFetchTool, WriteFileTool,
};
