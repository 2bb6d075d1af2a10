// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Arbitration Application Layer
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`arbitrator`] | `Arbitrator`, `ResolutionPolicy` and the built-in policies |
//! | [`agents`] | `ArbitrationAgent`, `ContentAgent` |

pub mod agents;
pub mod arbitrator;

pub use agents::{ArbitrationAgent, ContentAgent};
pub use arbitrator::{Arbitrator, ResolutionPolicy};
