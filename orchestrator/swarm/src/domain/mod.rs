// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Arbitration Domain Layer
//!
//! Pure lookup tables and errors for conflict arbitration. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`arbitration`] | `PriorityTable`, `StrategyTable`, `ArbitrationError` |

pub mod arbitration;

pub use arbitration::*;
