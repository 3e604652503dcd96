// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod protocol;
mod service;

pub use protocol::{BranchNode, RpcRequest, RpcResponse};
pub use service::AgentService;
