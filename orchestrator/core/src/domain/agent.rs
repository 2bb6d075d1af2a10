// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Domain Model
//!
//! Identity, lifecycle states and the append-only operation log shared by
//! every coordination participant.
//!
//! Two independent state dimensions are tracked per agent:
//!
//! | Dimension | Values | Driven by |
//! |-----------|--------|-----------|
//! | [`LifecycleState`] | UNINITIALIZED → INITIALIZED → RUNNING → STOPPED | `initialize`/`start`/`stop` |
//! | [`WorkState`] | IDLE / BUSY / ERROR | task execution |
//!
//! Capabilities are plain string tags fixed at construction and only used for
//! discovery and routing.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Stable identifier of a coordination participant (e.g. `"planner"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state machine every agent goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LifecycleState::Uninitialized => "UNINITIALIZED",
            LifecycleState::Initialized => "INITIALIZED",
            LifecycleState::Running => "RUNNING",
            LifecycleState::Stopped => "STOPPED",
        };
        f.write_str(label)
    }
}

/// Work state surfaced by status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkState {
    Idle,
    Busy,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Failure,
}

/// One entry of an agent's append-only operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationLogEntry {
    pub agent_id: AgentId,
    pub operation: String,
    pub status: OperationStatus,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Filter over operation log entries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct OperationQuery {
    pub operation: Option<String>,
    pub status: Option<OperationStatus>,
    pub agent_id: Option<AgentId>,
}

impl OperationQuery {
    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn status(mut self, status: OperationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn agent(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn matches(&self, entry: &OperationLogEntry) -> bool {
        self.operation.as_deref().map_or(true, |op| op == entry.operation)
            && self.status.map_or(true, |status| status == entry.status)
            && self.agent_id.as_ref().map_or(true, |id| id == &entry.agent_id)
    }
}

/// Append-only operation log owned by one agent.
///
/// Cloning yields another handle to the same log, so a primitive embedded in
/// an agent (e.g. an arbitrator) can append entries attributed to its host.
#[derive(Debug, Clone)]
pub struct OperationLog {
    agent_id: AgentId,
    entries: Arc<RwLock<Vec<OperationLogEntry>>>,
}

impl OperationLog {
    pub fn new(agent_id: impl Into<AgentId>) -> Self {
        Self {
            agent_id: agent_id.into(),
            entries: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Append an entry timed from `started`.
    pub fn record(
        &self,
        operation: impl Into<String>,
        started: Instant,
        outcome: Result<(), String>,
    ) -> OperationLogEntry {
        let (status, error) = match outcome {
            Ok(()) => (OperationStatus::Success, None),
            Err(e) => (OperationStatus::Failure, Some(e)),
        };
        let entry = OperationLogEntry {
            agent_id: self.agent_id.clone(),
            operation: operation.into(),
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            error,
        };
        self.entries.write().push(entry.clone());
        entry
    }

    pub fn entries(&self) -> Vec<OperationLogEntry> {
        self.entries.read().clone()
    }

    pub fn query(&self, query: &OperationQuery) -> Vec<OperationLogEntry> {
        self.entries
            .read()
            .iter()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Mutable record owned by an agent host.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: AgentId,
    pub agent_type: String,
    capabilities: Vec<String>,
    pub lifecycle: LifecycleState,
    pub work_state: WorkState,
    pub last_update: DateTime<Utc>,
    pub last_error: Option<String>,
    pub operation_log: OperationLog,
}

impl AgentRecord {
    /// Capabilities are deduplicated preserving declaration order.
    pub fn new(id: AgentId, agent_type: impl Into<String>, capabilities: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(capabilities.len());
        for capability in capabilities {
            if !unique.contains(&capability) {
                unique.push(capability);
            }
        }
        Self {
            operation_log: OperationLog::new(id.clone()),
            id,
            agent_type: agent_type.into(),
            capabilities: unique,
            lifecycle: LifecycleState::Uninitialized,
            work_state: WorkState::Idle,
            last_update: Utc::now(),
            last_error: None,
        }
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn set_lifecycle(&mut self, state: LifecycleState) {
        self.lifecycle = state;
        self.last_update = Utc::now();
    }

    pub fn set_work_state(&mut self, state: WorkState) {
        self.work_state = state;
        self.last_update = Utc::now();
    }

    /// Read-only projection handed to status queries.
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            id: self.id.clone(),
            agent_type: self.agent_type.clone(),
            capabilities: self.capabilities.clone(),
            lifecycle: self.lifecycle,
            work_state: self.work_state,
            last_update: self.last_update,
            last_error: self.last_error.clone(),
            operation_count: self.operation_log.len(),
        }
    }
}

/// Serializable snapshot of an [`AgentRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: AgentId,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub lifecycle: LifecycleState,
    pub work_state: WorkState,
    pub last_update: DateTime<Utc>,
    pub last_error: Option<String>,
    pub operation_count: usize,
}
