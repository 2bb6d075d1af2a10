//! Workflow Domain Model
//!
//! This module defines the core domain entities and value objects for the Workflow Engine.
//! A workflow drives one instance through its pre-gate stages, pauses at a single
//! approval gate and completes once an approve/reject decision arrives.
//!
//! # Instance State Machine
//!
//! ```text
//! CREATED --(pre-gate stages)--> PAUSED --(approve | reject)--> COMPLETED
//! ```
//!
//! # Design Principles
//!
//! 1. **Immutability:** Workflow definitions are immutable once registered
//! 2. **Overwrite-only context:** keys may be replaced, never removed
//! 3. **Terminal completion:** COMPLETED instances never change again

use crate::domain::agent::AgentId;
use crate::domain::message::Content;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Value Objects: Identifiers
// ============================================================================

/// Unique identifier for a Workflow definition (e.g. `"code-review"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unique identifier for a running Workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Value Objects: Status & Decision
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Created,
    Paused,
    Completed,
}

/// External decision taken at the approval gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    /// Value written to `context["outcome"]` on completion
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Approved => "completed",
            Decision::Rejected => "rejected",
        }
    }
}

// ============================================================================
// Value Objects: Context
// ============================================================================

/// Overwrite-only key/value context accumulated by stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowContext(Content);

impl WorkflowContext {
    pub fn new(initial: Content) -> Self {
        Self(initial)
    }

    /// Insert or overwrite a key.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    /// Overwrite every key present in `values`.
    pub fn merge(&mut self, values: Content) {
        for (key, value) in values {
            self.0.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Content {
        &self.0
    }
}

// ============================================================================
// Stages
// ============================================================================

/// A pre-gate step run by `start_instance`.
#[async_trait]
pub trait WorkflowStage: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, context: &mut WorkflowContext) -> anyhow::Result<()>;
}

/// Step run once the gate decision is known, before the outcome marker is written.
#[async_trait]
pub trait FinalizeStage: Send + Sync {
    async fn finalize(&self, decision: Decision, context: &mut WorkflowContext) -> anyhow::Result<()>;
}

/// Adapter turning a synchronous closure into a [`WorkflowStage`].
pub struct FnStage<F> {
    name: String,
    func: F,
}

#[async_trait]
impl<F> WorkflowStage for FnStage<F>
where
    F: Fn(&mut WorkflowContext) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, context: &mut WorkflowContext) -> anyhow::Result<()> {
        (self.func)(context)
    }
}

pub fn stage_fn<F>(name: impl Into<String>, func: F) -> Arc<dyn WorkflowStage>
where
    F: Fn(&mut WorkflowContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnStage {
        name: name.into(),
        func,
    })
}

// ============================================================================
// Aggregate Root: WorkflowDefinition
// ============================================================================

/// Immutable workflow definition registered once with an engine.
#[derive(Clone)]
pub struct WorkflowDefinition {
    id: WorkflowId,
    name: String,
    description: Option<String>,
    stages: Vec<Arc<dyn WorkflowStage>>,
    finalizer: Option<Arc<dyn FinalizeStage>>,
}

impl WorkflowDefinition {
    pub fn builder(id: impl Into<WorkflowId>, name: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder {
            id: id.into(),
            name: name.into(),
            description: None,
            stages: Vec::new(),
            finalizer: None,
        }
    }

    pub fn id(&self) -> &WorkflowId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn stages(&self) -> &[Arc<dyn WorkflowStage>] {
        &self.stages
    }

    pub fn finalizer(&self) -> Option<&Arc<dyn FinalizeStage>> {
        self.finalizer.as_ref()
    }

    /// Serializable summary (id, name, description, stage names)
    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            stages: self.stages.iter().map(|s| s.name().to_string()).collect(),
        }
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("stages", &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("has_finalizer", &self.finalizer.is_some())
            .finish()
    }
}

pub struct WorkflowDefinitionBuilder {
    id: WorkflowId,
    name: String,
    description: Option<String>,
    stages: Vec<Arc<dyn WorkflowStage>>,
    finalizer: Option<Arc<dyn FinalizeStage>>,
}

impl WorkflowDefinitionBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn stage(mut self, stage: Arc<dyn WorkflowStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn on_finalize(mut self, finalizer: Arc<dyn FinalizeStage>) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition, WorkflowError> {
        if self.id.as_str().is_empty() {
            return Err(WorkflowError::InvalidDefinition("workflow id cannot be empty".to_string()));
        }
        if self.name.is_empty() {
            return Err(WorkflowError::InvalidDefinition("workflow name cannot be empty".to_string()));
        }
        Ok(WorkflowDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            stages: self.stages,
            finalizer: self.finalizer,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub stages: Vec<String>,
}

// ============================================================================
// Aggregate Root: WorkflowInstance
// ============================================================================

/// A single run of a workflow definition.
///
/// # Invariants
/// - status only moves CREATED → PAUSED → COMPLETED
/// - `completed_at` and `decision` are set iff status is COMPLETED
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub workflow_id: WorkflowId,
    status: InstanceStatus,
    pub context: WorkflowContext,
    pub created_at: DateTime<Utc>,
    paused_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    decision: Option<Decision>,
    pub initiated_by: Option<AgentId>,
}

impl WorkflowInstance {
    pub fn new(workflow_id: WorkflowId, initial_context: Content) -> Self {
        Self {
            id: InstanceId::new(),
            workflow_id,
            status: InstanceStatus::Created,
            context: WorkflowContext::new(initial_context),
            created_at: Utc::now(),
            paused_at: None,
            completed_at: None,
            decision: None,
            initiated_by: None,
        }
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn paused_at(&self) -> Option<DateTime<Utc>> {
        self.paused_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn decision(&self) -> Option<Decision> {
        self.decision
    }

    pub fn is_completed(&self) -> bool {
        self.status == InstanceStatus::Completed
    }

    /// CREATED → PAUSED
    pub fn pause(&mut self) -> Result<(), WorkflowError> {
        if self.status != InstanceStatus::Created {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                to: InstanceStatus::Paused,
            });
        }
        self.status = InstanceStatus::Paused;
        self.paused_at = Some(Utc::now());
        Ok(())
    }

    /// PAUSED → COMPLETED, writing the outcome marker.
    pub fn complete(&mut self, decision: Decision) -> Result<(), WorkflowError> {
        if self.status != InstanceStatus::Paused {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                to: InstanceStatus::Completed,
            });
        }
        self.context.set("outcome", serde_json::Value::String(decision.outcome().to_string()));
        self.status = InstanceStatus::Completed;
        self.decision = Some(decision);
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// Counts by status, derived from stored instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatistics {
    pub total: usize,
    pub created: usize,
    pub paused: usize,
    pub completed: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl WorkflowStatistics {
    pub fn from_instances<'a>(instances: impl IntoIterator<Item = &'a WorkflowInstance>) -> Self {
        instances.into_iter().fold(Self::default(), |mut stats, instance| {
            stats.total += 1;
            match instance.status() {
                InstanceStatus::Created => stats.created += 1,
                InstanceStatus::Paused => stats.paused += 1,
                InstanceStatus::Completed => stats.completed += 1,
            }
            match instance.decision() {
                Some(Decision::Approved) => stats.approved += 1,
                Some(Decision::Rejected) => stats.rejected += 1,
                None => {}
            }
            stats
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow '{0}' is already registered")]
    DuplicateWorkflow(WorkflowId),

    #[error("Workflow '{0}' is not registered")]
    UnknownWorkflow(WorkflowId),

    #[error("Workflow instance '{0}' not found")]
    InstanceNotFound(InstanceId),

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid instance transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: InstanceStatus,
        to: InstanceStatus,
    },
}
