// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod message_bus;
pub mod delivery;
pub mod cache;
pub mod monitor;
pub mod collaborators;

pub use cache::{BoundedCache, CacheStats};
pub use message_bus::{BusError, BusStats, MessageBus, MessageHandler};
pub use monitor::InMemoryMonitor;
