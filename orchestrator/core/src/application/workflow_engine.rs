// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow Engine Application Service
//!
//! Drives workflow instances through their single approval gate.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Run pre-gate stages, hold instances at the gate, apply decisions
//! - **Dependencies:** Domain (Workflow, Agent), Infrastructure (MessageBus)
//!
//! # Instance Flow
//!
//! ```text
//! start_instance
//!     CREATED  -> run stages in order (first failure skips the rest)
//!     PAUSED   -> wait for approve / reject (direct call or bus decision)
//! approve | reject
//!     finalize stage -> context["outcome"] -> COMPLETED
//! ```
//!
//! Lifecycle notifications are published as EVENT messages on
//! `workflow.<workflow_id>`; decisions can arrive on
//! `workflow.<workflow_id>.decisions` once [`WorkflowEngine::listen_for_decisions`]
//! is active.

use crate::domain::agent::{AgentId, OperationLog};
use crate::domain::message::{content, Content, Message};
use crate::domain::workflow::{
    Decision, InstanceId, InstanceStatus, WorkflowDefinition, WorkflowError, WorkflowId,
    WorkflowInstance, WorkflowStatistics, WorkflowSummary,
};
use crate::infrastructure::message_bus::{direct_topic, handler_fn, BusError, MessageBus, SubscriptionId};

use futures::FutureExt;
use serde_json::json;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub fn notification_topic(workflow_id: &WorkflowId) -> String {
    format!("workflow.{}", workflow_id)
}

pub fn decision_topic(workflow_id: &WorkflowId) -> String {
    format!("workflow.{}.decisions", workflow_id)
}

// ============================================================================
// Application Service: WorkflowEngine
// ============================================================================

/// Workflow Engine (Application Service)
pub struct WorkflowEngine {
    /// Agent the engine's messages and log entries are attributed to
    owner: AgentId,

    bus: MessageBus,

    log: OperationLog,

    /// Registered definitions (workflow_id -> definition)
    definitions: RwLock<HashMap<WorkflowId, Arc<WorkflowDefinition>>>,

    /// Instances (instance_id -> instance). Each instance has its own lock so
    /// decisions on one instance serialise without blocking the others.
    instances: RwLock<HashMap<InstanceId, Arc<Mutex<WorkflowInstance>>>>,
}

impl WorkflowEngine {
    pub fn new(owner: impl Into<AgentId>, bus: MessageBus) -> Self {
        let owner = owner.into();
        Self {
            log: OperationLog::new(owner.clone()),
            owner,
            bus,
            definitions: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    pub fn operation_log(&self) -> &OperationLog {
        &self.log
    }

    // ========================================================================
    // Workflow Management
    // ========================================================================

    /// Register a workflow definition. Ids are unique per engine.
    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> Result<WorkflowId, WorkflowError> {
        let started = Instant::now();
        let workflow_id = definition.id().clone();
        let mut definitions = self.definitions.write().await;
        if definitions.contains_key(&workflow_id) {
            drop(definitions);
            let err = WorkflowError::DuplicateWorkflow(workflow_id);
            self.log.record("register_workflow", started, Err(err.to_string()));
            return Err(err);
        }

        info!(
            workflow_id = %workflow_id,
            workflow_name = %definition.name(),
            stages = definition.stages().len(),
            "Registering workflow"
        );
        definitions.insert(workflow_id.clone(), Arc::new(definition));
        drop(definitions);
        self.log.record("register_workflow", started, Ok(()));
        Ok(workflow_id)
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowSummary> {
        let mut summaries: Vec<WorkflowSummary> = self
            .definitions
            .read()
            .await
            .values()
            .map(|d| d.summary())
            .collect();
        summaries.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        summaries
    }

    async fn definition(&self, workflow_id: &WorkflowId) -> Result<Arc<WorkflowDefinition>, WorkflowError> {
        self.definitions
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_id.clone()))
    }

    // ========================================================================
    // Instance Execution
    // ========================================================================

    /// Start an instance and run it up to the approval gate.
    pub async fn start_instance(
        &self,
        workflow_id: &WorkflowId,
        initial_context: Content,
    ) -> Result<WorkflowInstance, WorkflowError> {
        self.start_instance_as(None, workflow_id, initial_context).await
    }

    /// Like [`start_instance`](Self::start_instance), attributing the instance to `initiator`.
    pub async fn start_instance_as(
        &self,
        initiator: Option<AgentId>,
        workflow_id: &WorkflowId,
        initial_context: Content,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let started = Instant::now();
        let definition = match self.definition(workflow_id).await {
            Ok(definition) => definition,
            Err(err) => {
                self.log.record("start_instance", started, Err(err.to_string()));
                return Err(err);
            }
        };

        let mut instance = WorkflowInstance::new(workflow_id.clone(), initial_context);
        instance.initiated_by = initiator;
        let instance_id = instance.id;
        let handle = Arc::new(Mutex::new(instance));
        // Locked before it becomes visible so readers never see a half-run instance.
        let mut instance = handle.clone().lock_owned().await;
        self.instances.write().await.insert(instance_id, handle);

        info!(instance_id = %instance_id, workflow_id = %workflow_id, "Starting workflow instance");
        self.notify(workflow_id, "instance_started", &instance);

        for stage in definition.stages() {
            let outcome = AssertUnwindSafe(stage.run(&mut instance.context))
                .catch_unwind()
                .await;
            let error = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(_) => "stage panicked".to_string(),
            };
            warn!(
                instance_id = %instance_id,
                stage = %stage.name(),
                error = %error,
                "Workflow stage failed; skipping to approval gate"
            );
            instance.context.set("stage_error", json!(error));
            instance.context.set("failed_stage", json!(stage.name()));
            break;
        }

        instance.pause()?;
        metrics::counter!("concord_workflow_transitions_total", "to" => "paused").increment(1);
        info!(instance_id = %instance_id, workflow_id = %workflow_id, "Workflow instance paused at gate");
        self.notify(workflow_id, "instance_paused", &instance);
        self.log.record("start_instance", started, Ok(()));
        Ok(instance.clone())
    }

    /// Approve a PAUSED instance. Returns `Ok(false)` for any other state.
    pub async fn approve(&self, instance_id: InstanceId, extra: Option<Content>) -> Result<bool, WorkflowError> {
        self.decide(instance_id, Decision::Approved, extra).await
    }

    /// Reject a PAUSED instance. Returns `Ok(false)` for any other state.
    pub async fn reject(&self, instance_id: InstanceId, extra: Option<Content>) -> Result<bool, WorkflowError> {
        self.decide(instance_id, Decision::Rejected, extra).await
    }

    async fn decide(
        &self,
        instance_id: InstanceId,
        decision: Decision,
        extra: Option<Content>,
    ) -> Result<bool, WorkflowError> {
        let started = Instant::now();
        let operation = match decision {
            Decision::Approved => "approve",
            Decision::Rejected => "reject",
        };
        let handle = match self.instance_handle(instance_id).await {
            Ok(handle) => handle,
            Err(err) => {
                self.log.record(operation, started, Err(err.to_string()));
                return Err(err);
            }
        };

        let mut instance = handle.lock().await;
        if instance.status() != InstanceStatus::Paused {
            warn!(
                instance_id = %instance_id,
                status = ?instance.status(),
                decision = operation,
                "Decision ignored: instance is not paused"
            );
            self.log.record(
                operation,
                started,
                Err(format!("instance is {:?}, not PAUSED", instance.status())),
            );
            return Ok(false);
        }

        if let Some(extra) = extra {
            instance.context.merge(extra);
        }

        let finalizer = self
            .definition(&instance.workflow_id)
            .await
            .ok()
            .and_then(|d| d.finalizer().cloned());
        if let Some(finalizer) = finalizer {
            let outcome = AssertUnwindSafe(finalizer.finalize(decision, &mut instance.context))
                .catch_unwind()
                .await;
            let error = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(_) => Some("finalize stage panicked".to_string()),
            };
            if let Some(error) = error {
                warn!(instance_id = %instance_id, error = %error, "Finalize stage failed");
                instance.context.set("finalize_error", json!(error));
            }
        }

        instance.complete(decision)?;
        metrics::counter!("concord_workflow_transitions_total", "to" => "completed").increment(1);
        info!(
            instance_id = %instance_id,
            workflow_id = %instance.workflow_id,
            outcome = decision.outcome(),
            "Workflow instance completed"
        );
        let workflow_id = instance.workflow_id.clone();
        self.notify(&workflow_id, "instance_completed", &instance);
        self.log.record(operation, started, Ok(()));
        Ok(true)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    async fn instance_handle(&self, instance_id: InstanceId) -> Result<Arc<Mutex<WorkflowInstance>>, WorkflowError> {
        self.instances
            .read()
            .await
            .get(&instance_id)
            .cloned()
            .ok_or(WorkflowError::InstanceNotFound(instance_id))
    }

    pub async fn get_instance(&self, instance_id: InstanceId) -> Result<WorkflowInstance, WorkflowError> {
        let handle = self.instance_handle(instance_id).await?;
        let instance = handle.lock().await;
        Ok(instance.clone())
    }

    /// Snapshot of instances, oldest first, optionally filtered.
    pub async fn list_instances(
        &self,
        workflow_id: Option<&WorkflowId>,
        status: Option<InstanceStatus>,
    ) -> Vec<WorkflowInstance> {
        let handles: Vec<Arc<Mutex<WorkflowInstance>>> = self.instances.read().await.values().cloned().collect();
        let mut instances = Vec::with_capacity(handles.len());
        for handle in handles {
            let instance = handle.lock().await;
            if workflow_id.map_or(true, |id| &instance.workflow_id == id)
                && status.map_or(true, |s| instance.status() == s)
            {
                instances.push(instance.clone());
            }
        }
        instances.sort_by_key(|i| i.created_at);
        instances
    }

    /// Counts by status and decision, derived from the stored instances.
    pub async fn get_statistics(&self, workflow_id: Option<&WorkflowId>) -> WorkflowStatistics {
        let instances = self.list_instances(workflow_id, None).await;
        WorkflowStatistics::from_instances(&instances)
    }

    // ========================================================================
    // Bus Integration
    // ========================================================================

    /// Subscribe the engine to `workflow.<workflow_id>.decisions`.
    ///
    /// Content `{instance_id, decision: "approve"|"reject", extra?}` drives the
    /// gate of an instance of that workflow.
    pub fn listen_for_decisions(self: &Arc<Self>, workflow_id: &WorkflowId) -> Result<SubscriptionId, BusError> {
        let subscription = self.subscribe_decisions(decision_topic(workflow_id), Some(workflow_id.clone()))?;
        debug!(workflow_id = %workflow_id, subscription_id = %subscription, "Listening for workflow decisions");
        Ok(subscription)
    }

    /// Serve decisions sent to the owner's direct channel, for any workflow.
    /// A REQUEST is answered with `{accepted: bool}`; a malformed decision or
    /// unknown instance is answered with a failure response instead.
    pub fn accept_decision_requests(self: &Arc<Self>) -> Result<SubscriptionId, BusError> {
        let subscription = self.subscribe_decisions(direct_topic(&self.owner), None)?;
        debug!(owner = %self.owner, subscription_id = %subscription, "Accepting decision requests");
        Ok(subscription)
    }

    fn subscribe_decisions(
        self: &Arc<Self>,
        topic: String,
        expected: Option<WorkflowId>,
    ) -> Result<SubscriptionId, BusError> {
        // Weak: the bus must not keep the engine alive.
        let engine: Weak<Self> = Arc::downgrade(self);
        let handler = handler_fn(move |message: Arc<Message>| {
            let engine = engine.clone();
            let expected = expected.clone();
            async move {
                let Some(engine) = engine.upgrade() else {
                    return Ok(());
                };
                let outcome = engine.apply_decision_message(expected.as_ref(), &message).await;
                if let Some(correlation_id) = message.correlation_id().filter(|_| message.expects_response()) {
                    match &outcome {
                        Ok(accepted) => engine
                            .bus
                            .send_response(correlation_id, content(json!({"accepted": accepted})))?,
                        Err(e) => engine.bus.send_failure(correlation_id, format!("{:#}", e))?,
                    };
                }
                outcome.map(|_| ())
            }
        });
        self.bus.subscribe(self.owner.clone(), topic, handler, None)
    }

    async fn apply_decision_message(&self, expected: Option<&WorkflowId>, message: &Message) -> anyhow::Result<bool> {
        let instance_id = message
            .get("instance_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("decision message has no instance_id"))?;
        let instance_id = InstanceId::parse(instance_id)?;
        let extra = message.get("extra").and_then(|v| v.as_object()).cloned();

        let instance = self.get_instance(instance_id).await?;
        if let Some(workflow_id) = expected {
            if &instance.workflow_id != workflow_id {
                anyhow::bail!("instance {} does not belong to workflow '{}'", instance_id, workflow_id);
            }
        }

        let accepted = match message.get("decision").and_then(|v| v.as_str()) {
            Some("approve") => self.approve(instance_id, extra).await?,
            Some("reject") => self.reject(instance_id, extra).await?,
            other => anyhow::bail!("unknown decision {:?}", other),
        };
        Ok(accepted)
    }

    fn notify(&self, workflow_id: &WorkflowId, event: &str, instance: &WorkflowInstance) {
        let payload = content(json!({
            "event": event,
            "workflow_id": workflow_id,
            "instance_id": instance.id.to_string(),
            "status": instance.status(),
        }));
        match self
            .bus
            .publish(&notification_topic(workflow_id), Message::event(self.owner.clone(), payload))
        {
            Ok(_) => {}
            Err(e) => debug!(workflow_id = %workflow_id, event, error = %e, "Workflow notification not published"),
        }
    }
}
