// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod glob;
mod grep;
mod list_dir;
mod read_file;
mod shell;
mod web_fetch;
mod write_file;

pub use glob::GlobTool;
pub use grep::GrepTool;
pub use list_dir::ListDirTool;
pub use read_file::ReadFileTool;
pub use shell::ShellTool;
pub use web_fetch::WebFetchTool;
pub use write_file::WriteFileTool;

use std::path::{Path, PathBuf};

use crate::tool::ToolCtx;

/// Resolve a tool-supplied path against the session working directory.
pub(crate) fn resolve_path(path: &str, ctx: &ToolCtx) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    match &ctx.cwd {
        Some(cwd) => Path::new(cwd).join(p),
        None => p.to_path_buf(),
    }
}
