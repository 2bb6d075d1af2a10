// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod workflow_engine;
pub mod context;

pub use agent::{AgentBehavior, AgentContext, AgentError, AgentHost, AgentRegistry, ManagedAgent};
pub use context::CoordinationContext;
pub use workflow_engine::WorkflowEngine;
