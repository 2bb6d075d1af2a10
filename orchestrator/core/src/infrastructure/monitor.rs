// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process observability sink: named health probes plus a bounded
//! buffer of agent operation entries.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::domain::agent::{AgentId, OperationLogEntry, OperationStatus};
use crate::domain::collaborators::{
    CollaboratorError, HealthCheckResult, HealthCheckType, HealthProbe, HealthReport, HealthState,
    ObservabilitySink,
};

const DEFAULT_OPERATION_CAPACITY: usize = 10_000;

struct RegisteredCheck {
    name: String,
    check_type: HealthCheckType,
    probe: HealthProbe,
}

pub struct InMemoryMonitor {
    checks: RwLock<Vec<RegisteredCheck>>,
    operations: Mutex<VecDeque<OperationLogEntry>>,
    capacity: usize,
}

impl InMemoryMonitor {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OPERATION_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            checks: RwLock::new(Vec::new()),
            operations: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn operations(&self) -> Vec<OperationLogEntry> {
        self.operations.lock().iter().cloned().collect()
    }

    pub fn operations_for(&self, agent_id: &AgentId) -> Vec<OperationLogEntry> {
        self.operations
            .lock()
            .iter()
            .filter(|entry| &entry.agent_id == agent_id)
            .cloned()
            .collect()
    }

    pub fn failure_count(&self) -> usize {
        self.operations
            .lock()
            .iter()
            .filter(|entry| entry.status == OperationStatus::Failure)
            .count()
    }
}

impl Default for InMemoryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObservabilitySink for InMemoryMonitor {
    /// Re-registering a name replaces the previous probe.
    fn register_health_check(&self, name: &str, check_type: HealthCheckType, probe: HealthProbe) {
        let mut checks = self.checks.write();
        checks.retain(|check| check.name != name);
        checks.push(RegisteredCheck {
            name: name.to_string(),
            check_type,
            probe,
        });
        debug!(check = %name, ?check_type, "Health check registered");
    }

    async fn check_all_health(&self) -> HealthReport {
        let pending: Vec<_> = self
            .checks
            .read()
            .iter()
            .map(|check| (check.name.clone(), check.check_type, (check.probe)()))
            .collect();

        let results = futures::future::join_all(pending.into_iter().map(
            |(name, check_type, probe)| async move {
                let (state, message) = match probe.await {
                    Ok(()) => (HealthState::Healthy, None),
                    Err(reason) => {
                        warn!(check = %name, reason = %reason, "Health check failed");
                        (HealthState::Unhealthy, Some(reason))
                    }
                };
                HealthCheckResult {
                    name,
                    check_type,
                    state,
                    message,
                    checked_at: Utc::now(),
                }
            },
        ))
        .await;

        HealthReport {
            healthy: results.iter().all(|r| r.state == HealthState::Healthy),
            checks: results,
        }
    }

    async fn log_operation(&self, entry: &OperationLogEntry) -> Result<(), CollaboratorError> {
        let mut operations = self.operations.lock();
        if operations.len() >= self.capacity {
            operations.pop_front();
        }
        operations.push_back(entry.clone());
        Ok(())
    }
}
