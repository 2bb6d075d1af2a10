// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Concord Core
//!
//! Coordination substrate for autonomous agents: message bus, agent
//! lifecycle, workflow approval gates and a bounded LRU/TTL cache.
//!
//! # Architecture
//!
//! - **domain:** value objects and aggregates (messages, agents, workflows, conflicts, config)
//! - **application:** services driving them (agent host/registry, workflow engine, context)
//! - **infrastructure:** mechanisms (message bus, cache, monitor, in-memory collaborators)

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod error;

pub use domain::*;
pub use error::{CoreError, ErrorKind};
