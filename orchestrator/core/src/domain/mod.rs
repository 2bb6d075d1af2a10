// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod message;
pub mod workflow;
pub mod conflict;
pub mod config;
pub mod collaborators;
