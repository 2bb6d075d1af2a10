// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `concord-swarm` - Conflict Arbitration and Coordination Agents
//!
//! Decision authority for disagreements between agents, plus the concrete
//! agents that put it and other capabilities on the message bus.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `PriorityTable`, `StrategyTable`, `ArbitrationError` |
//! | [`application`] | Application | `Arbitrator`, `ArbitrationAgent`, `ContentAgent` |
//!
//! ## Key Concepts
//!
//! - **Priority table**: agent id → integer; agents never assigned one use the
//!   configured default (5).
//! - **Strategy table**: conflict type → resolution strategy; unmapped types
//!   use the configured default (`priority_based`).
//! - **Finality**: a report is resolved once. Re-litigation means reporting a
//!   new conflict.

pub mod application;
pub mod domain;

pub use domain::*;
