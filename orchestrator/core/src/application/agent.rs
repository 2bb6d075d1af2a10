// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Agent Lifecycle Service
//!
//! Drives the UNINITIALIZED → INITIALIZED → RUNNING → STOPPED state machine
//! for an [`AgentBehavior`], wires it onto the [`MessageBus`] and keeps its
//! operation log. The [`AgentRegistry`] is the shared, read-mostly view used
//! for status queries and capability routing.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::domain::agent::{
    AgentId, AgentRecord, AgentStatus, LifecycleState, OperationLog, OperationLogEntry,
    OperationQuery, WorkState,
};
use crate::domain::collaborators::ObservabilitySink;
use crate::domain::message::{Content, Message, Response};
use crate::infrastructure::delivery::InFlightTracker;
use crate::infrastructure::message_bus::{direct_topic, BusError, MessageBus, MessageHandler};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    #[error("Agent '{agent_id}' cannot {operation} while {state}")]
    InvalidState {
        agent_id: AgentId,
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("Agent '{0}' is already registered")]
    DuplicateAgent(AgentId),

    #[error("Agent '{0}' is not registered")]
    UnknownAgent(AgentId),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Agent '{agent_id}' failed: {message}")]
    Handler { agent_id: AgentId, message: String },

    #[error("Agent '{0}' is already stopping")]
    StopInProgress(AgentId),
}

tokio::task_local! {
    /// Agent whose handler is running on the current task.
    static HANDLING_AGENT: AgentId;
}

/// Handle given to behaviors for talking to the rest of the system.
#[derive(Clone)]
pub struct AgentContext {
    agent_id: AgentId,
    bus: MessageBus,
    log: OperationLog,
}

impl AgentContext {
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn operation_log(&self) -> &OperationLog {
        &self.log
    }

    pub fn publish(&self, topic: &str, content: Content) -> Result<usize, BusError> {
        self.bus.publish(topic, Message::event(self.agent_id.clone(), content))
    }

    pub fn send_direct(&self, target: &AgentId, content: Content) -> Result<bool, BusError> {
        self.bus
            .send_direct(target, Message::command(self.agent_id.clone(), content))
    }

    pub async fn request(
        &self,
        target: &AgentId,
        content: Content,
        timeout: Option<Duration>,
    ) -> Result<Response, BusError> {
        self.bus
            .request_response(target, Message::command(self.agent_id.clone(), content), timeout)
            .await
    }
}

/// What a concrete agent does; the host supplies the lifecycle.
#[async_trait]
pub trait AgentBehavior: Send + Sync + 'static {
    fn agent_type(&self) -> &str;

    /// Read once when the host is built.
    fn capabilities(&self) -> Vec<String>;

    /// Topics subscribed on start, in addition to the agent's direct channel.
    fn topics(&self) -> Vec<String> {
        Vec::new()
    }

    async fn on_initialize(&self, _ctx: &AgentContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle one delivered message. `Some(content)` answers a REQUEST.
    async fn handle(&self, ctx: &AgentContext, message: Arc<Message>) -> anyhow::Result<Option<Content>>;
}

/// Object-safe view of a hosted agent, used by the registry.
#[async_trait]
pub trait ManagedAgent: Send + Sync {
    fn id(&self) -> &AgentId;
    fn status(&self) -> AgentStatus;
    fn has_capability(&self, capability: &str) -> bool;
    fn operation_log(&self) -> OperationLog;
    async fn initialize(&self) -> Result<(), AgentError>;
    async fn start(&self) -> Result<(), AgentError>;
    async fn stop(&self) -> Result<(), AgentError>;
}

// ============================================================================
// AgentHost
// ============================================================================

struct HostShared<B> {
    behavior: Arc<B>,
    context: AgentContext,
    record: RwLock<AgentRecord>,
    in_flight: Arc<InFlightTracker>,
    /// Handlers currently executing; work state is BUSY while non-zero.
    working: AtomicUsize,
    accepting: AtomicBool,
    sink: RwLock<Option<Arc<dyn ObservabilitySink>>>,
}

impl<B: AgentBehavior> HostShared<B> {
    async fn record_operation(&self, operation: String, started: Instant, outcome: Result<(), String>) {
        let entry = self.context.log.record(operation, started, outcome);
        let sink = self.sink.read().clone();
        if let Some(sink) = sink {
            if let Err(e) = sink.log_operation(&entry).await {
                warn!(agent_id = %entry.agent_id, error = %e, "Observability sink rejected operation entry");
            }
        }
    }

    fn invalid_state(&self, operation: &'static str, state: LifecycleState) -> AgentError {
        AgentError::InvalidState {
            agent_id: self.context.agent_id.clone(),
            operation,
            state,
        }
    }
}

/// Runs one [`AgentBehavior`] through its lifecycle.
pub struct AgentHost<B> {
    shared: Arc<HostShared<B>>,
}

impl<B> Clone for AgentHost<B> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<B: AgentBehavior> AgentHost<B> {
    pub fn new(agent_id: impl Into<AgentId>, behavior: B, bus: MessageBus) -> Self {
        Self::with_operation_log(behavior, bus, OperationLog::new(agent_id))
    }

    /// Host appending to an existing `log`, so a primitive embedded in the
    /// behavior shares it. The agent id is the log's.
    pub fn with_operation_log(behavior: B, bus: MessageBus, log: OperationLog) -> Self {
        let agent_id = log.agent_id().clone();
        let mut record = AgentRecord::new(agent_id.clone(), behavior.agent_type(), behavior.capabilities());
        record.operation_log = log;
        let context = AgentContext {
            agent_id,
            bus,
            log: record.operation_log.clone(),
        };
        Self {
            shared: Arc::new(HostShared {
                behavior: Arc::new(behavior),
                context,
                record: RwLock::new(record),
                in_flight: InFlightTracker::new(),
                working: AtomicUsize::new(0),
                accepting: AtomicBool::new(false),
                sink: RwLock::new(None),
            }),
        }
    }

    /// Push every subsequent operation entry to `sink` as well.
    pub fn attach_sink(&self, sink: Arc<dyn ObservabilitySink>) {
        *self.shared.sink.write() = Some(sink);
    }

    pub fn behavior(&self) -> &B {
        &self.shared.behavior
    }

    pub fn context(&self) -> &AgentContext {
        &self.shared.context
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.shared.record.read().lifecycle
    }

    pub fn work_state(&self) -> WorkState {
        self.shared.record.read().work_state
    }

    pub fn operations(&self, query: &OperationQuery) -> Vec<OperationLogEntry> {
        self.shared.context.log.query(query)
    }

    /// UNINITIALIZED → INITIALIZED, running the behavior's initialization hook.
    pub async fn initialize(&self) -> Result<(), AgentError> {
        let started = Instant::now();
        let state = self.lifecycle();
        if state != LifecycleState::Uninitialized {
            let err = self.shared.invalid_state("initialize", state);
            self.shared
                .record_operation("initialize".into(), started, Err(err.to_string()))
                .await;
            return Err(err);
        }

        let outcome = self.shared.behavior.on_initialize(&self.shared.context).await;
        match outcome {
            Ok(()) => {
                self.shared.record.write().set_lifecycle(LifecycleState::Initialized);
                self.shared.record_operation("initialize".into(), started, Ok(())).await;
                info!(agent_id = %self.shared.context.agent_id, "Agent initialized");
                Ok(())
            }
            Err(e) => {
                let message = format!("{:#}", e);
                {
                    let mut record = self.shared.record.write();
                    record.set_work_state(WorkState::Error);
                    record.last_error = Some(message.clone());
                }
                self.shared
                    .record_operation("initialize".into(), started, Err(message.clone()))
                    .await;
                Err(AgentError::Handler {
                    agent_id: self.shared.context.agent_id.clone(),
                    message,
                })
            }
        }
    }

    /// INITIALIZED → RUNNING. Subscribes the direct channel and every behavior topic.
    pub async fn start(&self) -> Result<(), AgentError> {
        let started = Instant::now();
        let outcome = self.subscribe_all();
        let logged = outcome.as_ref().map(|_| ()).map_err(ToString::to_string);
        self.shared.record_operation("start".into(), started, logged).await;
        let subscriptions = outcome?;
        info!(agent_id = %self.shared.context.agent_id, subscriptions, "Agent started");
        Ok(())
    }

    fn subscribe_all(&self) -> Result<usize, AgentError> {
        let shared = &self.shared;
        let agent_id = &shared.context.agent_id;
        let bus = &shared.context.bus;

        // Held for the whole transition so concurrent starts serialise.
        let mut record = shared.record.write();
        if record.lifecycle != LifecycleState::Initialized {
            return Err(shared.invalid_state("start", record.lifecycle));
        }

        let handler: Arc<dyn MessageHandler> = Arc::new(HostedHandler {
            shared: self.shared.clone(),
        });
        let mut topics = vec![direct_topic(agent_id)];
        topics.extend(shared.behavior.topics());

        shared.accepting.store(true, Ordering::SeqCst);
        for topic in &topics {
            if let Err(e) = bus.subscribe(agent_id.clone(), topic.clone(), handler.clone(), None) {
                shared.accepting.store(false, Ordering::SeqCst);
                let _ = bus.unsubscribe_all(agent_id);
                return Err(e.into());
            }
        }
        record.set_lifecycle(LifecycleState::Running);
        Ok(topics.len())
    }

    /// RUNNING → STOPPED. Unsubscribes everything and waits for handlers in flight.
    ///
    /// May be called from inside one of this agent's own handlers; that
    /// handler is not waited for and finishes after `stop` returns.
    pub async fn stop(&self) -> Result<(), AgentError> {
        let started = Instant::now();
        let shared = &self.shared;
        let agent_id = &shared.context.agent_id;

        let state = self.lifecycle();
        if state != LifecycleState::Running {
            let err = shared.invalid_state("stop", state);
            shared.record_operation("stop".into(), started, Err(err.to_string())).await;
            return Err(err);
        }

        if !shared.accepting.swap(false, Ordering::SeqCst) {
            let err = AgentError::StopInProgress(agent_id.clone());
            shared.record_operation("stop".into(), started, Err(err.to_string())).await;
            return Err(err);
        }
        // A stopped bus has already dropped every subscription.
        let removed = shared.context.bus.unsubscribe_all(agent_id).unwrap_or(0);
        let own_handler = HANDLING_AGENT.try_with(|id| id == agent_id).unwrap_or(false);
        shared.in_flight.wait_until(usize::from(own_handler)).await;

        {
            let mut record = shared.record.write();
            record.set_lifecycle(LifecycleState::Stopped);
            if record.work_state == WorkState::Busy && shared.working.load(Ordering::SeqCst) == 0 {
                record.set_work_state(WorkState::Idle);
            }
        }
        shared.record_operation("stop".into(), started, Ok(())).await;
        info!(agent_id = %agent_id, removed_subscriptions = removed, "Agent stopped");
        Ok(())
    }

    pub fn status(&self) -> AgentStatus {
        self.shared.record.read().status()
    }
}

#[async_trait]
impl<B: AgentBehavior> ManagedAgent for AgentHost<B> {
    fn id(&self) -> &AgentId {
        &self.shared.context.agent_id
    }

    fn status(&self) -> AgentStatus {
        AgentHost::status(self)
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.shared.record.read().has_capability(capability)
    }

    fn operation_log(&self) -> OperationLog {
        self.shared.context.log.clone()
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        AgentHost::initialize(self).await
    }

    async fn start(&self) -> Result<(), AgentError> {
        AgentHost::start(self).await
    }

    async fn stop(&self) -> Result<(), AgentError> {
        AgentHost::stop(self).await
    }
}

/// Bus-facing adapter: one per host, shared by all of its subscriptions.
struct HostedHandler<B> {
    shared: Arc<HostShared<B>>,
}

#[async_trait]
impl<B: AgentBehavior> MessageHandler for HostedHandler<B> {
    async fn handle(&self, message: Arc<Message>) -> anyhow::Result<()> {
        let shared = &self.shared;
        let _guard = shared.in_flight.begin();
        if !shared.accepting.load(Ordering::SeqCst) {
            debug!(agent_id = %shared.context.agent_id, message_id = %message.id(), "Dropping message delivered after stop");
            return Ok(());
        }

        let started = Instant::now();
        {
            let mut record = shared.record.write();
            shared.working.fetch_add(1, Ordering::SeqCst);
            record.set_work_state(WorkState::Busy);
        }

        let handling = AssertUnwindSafe(shared.behavior.handle(&shared.context, message.clone())).catch_unwind();
        let outcome = HANDLING_AGENT
            .scope(shared.context.agent_id.clone(), handling)
            .await;
        let result = match outcome {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(_) => Err("agent handler panicked".to_string()),
        };

        {
            let mut record = shared.record.write();
            let still_working = shared.working.fetch_sub(1, Ordering::SeqCst) - 1;
            match &result {
                Ok(_) if still_working == 0 => record.set_work_state(WorkState::Idle),
                Ok(_) => {}
                Err(e) => {
                    record.set_work_state(WorkState::Error);
                    record.last_error = Some(e.clone());
                }
            }
        }

        if let Some(correlation_id) = message.correlation_id().filter(|_| message.expects_response()) {
            let answered = match &result {
                Ok(reply) => shared
                    .context
                    .bus
                    .send_response(correlation_id, reply.clone().unwrap_or_default()),
                Err(e) => shared.context.bus.send_failure(correlation_id, e.clone()),
            };
            if let Err(e) = answered {
                debug!(correlation_id = %correlation_id, error = %e, "Could not answer request");
            }
        }

        let operation = format!("handle:{}", message.topic());
        let logged = result.as_ref().map(|_| ()).map_err(Clone::clone);
        shared.record_operation(operation, started, logged).await;

        result.map(|_| ()).map_err(|e| anyhow::anyhow!(e))
    }
}

// ============================================================================
// AgentRegistry
// ============================================================================

/// Shared registry of hosted agents, in registration order.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<Vec<Arc<dyn ManagedAgent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, agent: Arc<dyn ManagedAgent>) -> Result<(), AgentError> {
        let mut agents = self.agents.write();
        if agents.iter().any(|a| a.id() == agent.id()) {
            return Err(AgentError::DuplicateAgent(agent.id().clone()));
        }
        debug!(agent_id = %agent.id(), "Agent registered");
        agents.push(agent);
        Ok(())
    }

    pub fn deregister(&self, agent_id: &AgentId) -> Result<Arc<dyn ManagedAgent>, AgentError> {
        let mut agents = self.agents.write();
        let index = agents
            .iter()
            .position(|a| a.id() == agent_id)
            .ok_or_else(|| AgentError::UnknownAgent(agent_id.clone()))?;
        Ok(agents.remove(index))
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<Arc<dyn ManagedAgent>> {
        self.agents.read().iter().find(|a| a.id() == agent_id).cloned()
    }

    pub fn status(&self, agent_id: &AgentId) -> Result<AgentStatus, AgentError> {
        self.get(agent_id)
            .map(|a| a.status())
            .ok_or_else(|| AgentError::UnknownAgent(agent_id.clone()))
    }

    pub fn list(&self) -> Vec<AgentStatus> {
        self.snapshot().iter().map(|a| a.status()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// First RUNNING agent, in registration order, declaring `capability`.
    pub fn route(&self, capability: &str) -> Option<AgentId> {
        self.snapshot()
            .iter()
            .find(|a| a.has_capability(capability) && a.status().lifecycle == LifecycleState::Running)
            .map(|a| a.id().clone())
    }

    /// Every registered agent declaring `capability`, regardless of state.
    pub fn find_by_capability(&self, capability: &str) -> Vec<AgentId> {
        self.snapshot()
            .iter()
            .filter(|a| a.has_capability(capability))
            .map(|a| a.id().clone())
            .collect()
    }

    /// Matching entries across every agent, oldest first.
    pub fn query_operations(&self, query: &OperationQuery) -> Vec<OperationLogEntry> {
        let mut entries: Vec<OperationLogEntry> = self
            .snapshot()
            .iter()
            .filter(|a| query.agent_id.as_ref().map_or(true, |id| id == a.id()))
            .flat_map(|a| a.operation_log().query(query))
            .collect();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    pub async fn initialize_all(&self) -> Result<(), AgentError> {
        for agent in self.snapshot() {
            agent.initialize().await?;
        }
        Ok(())
    }

    pub async fn start_all(&self) -> Result<(), AgentError> {
        for agent in self.snapshot() {
            agent.start().await?;
        }
        Ok(())
    }

    /// Stops running agents in reverse registration order; returns how many stopped.
    pub async fn stop_all(&self) -> usize {
        let mut stopped = 0;
        for agent in self.snapshot().into_iter().rev() {
            if agent.status().lifecycle != LifecycleState::Running {
                continue;
            }
            match agent.stop().await {
                Ok(()) => stopped += 1,
                Err(e) => warn!(agent_id = %agent.id(), error = %e, "Failed to stop agent"),
            }
        }
        stopped
    }

    fn snapshot(&self) -> Vec<Arc<dyn ManagedAgent>> {
        self.agents.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::OperationStatus;
    use crate::domain::config::BusConfig;
    use crate::domain::message::content;
    use crate::infrastructure::monitor::InMemoryMonitor;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl AgentBehavior for Echo {
        fn agent_type(&self) -> &str {
            "echo"
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["echo".into()]
        }

        fn topics(&self) -> Vec<String> {
            vec!["chatter".into()]
        }

        async fn handle(&self, _ctx: &AgentContext, message: Arc<Message>) -> anyhow::Result<Option<Content>> {
            if message.get("fail").is_some() {
                anyhow::bail!("asked to fail");
            }
            Ok(Some(message.content().clone()))
        }
    }

    fn bus() -> MessageBus {
        MessageBus::started(BusConfig::default())
    }

    #[tokio::test]
    async fn test_lifecycle_order_enforced() {
        let host = AgentHost::new("echo-1", Echo, bus());
        assert!(matches!(
            host.start().await,
            Err(AgentError::InvalidState { operation: "start", .. })
        ));
        assert!(matches!(
            host.stop().await,
            Err(AgentError::InvalidState { operation: "stop", .. })
        ));

        host.initialize().await.unwrap();
        assert_eq!(host.lifecycle(), LifecycleState::Initialized);
        assert!(host.initialize().await.is_err());

        host.start().await.unwrap();
        assert_eq!(host.lifecycle(), LifecycleState::Running);
        host.stop().await.unwrap();
        assert_eq!(host.lifecycle(), LifecycleState::Stopped);
        assert!(host.start().await.is_err());

        let failures = host.operations(&OperationQuery::default().status(OperationStatus::Failure));
        assert_eq!(failures.len(), 4);
    }

    #[tokio::test]
    async fn test_start_subscribes_and_stop_unsubscribes() {
        let bus = bus();
        let host = AgentHost::new("echo-1", Echo, bus.clone());
        host.initialize().await.unwrap();
        host.start().await.unwrap();
        assert_eq!(bus.get_subscribers("direct.echo-1").len(), 1);
        assert_eq!(bus.get_subscribers("chatter").len(), 1);

        host.stop().await.unwrap();
        assert!(!bus.has_subscribers("chatter"));
        assert_eq!(bus.publish("chatter", Message::event("x", Content::new())).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_requests_are_answered_and_logged() {
        let bus = bus();
        let host = AgentHost::new("echo-1", Echo, bus.clone());
        host.initialize().await.unwrap();
        host.start().await.unwrap();

        let response = bus
            .request_response(
                &AgentId::new("echo-1"),
                Message::command("caller", content(json!({"ping": 1}))),
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.payload.get("ping"), Some(&json!(1)));

        bus.wait_idle().await;
        let handled = host.operations(&OperationQuery::default().operation("handle:direct.echo-1"));
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].status, OperationStatus::Success);
        assert_eq!(host.work_state(), WorkState::Idle);
    }

    #[tokio::test]
    async fn test_handler_failure_sets_error_state_and_reaches_sink() {
        let bus = bus();
        let monitor = Arc::new(InMemoryMonitor::new());
        let host = AgentHost::new("echo-1", Echo, bus.clone());
        host.attach_sink(monitor.clone());
        host.initialize().await.unwrap();
        host.start().await.unwrap();

        bus.publish("chatter", Message::event("x", content(json!({"fail": true})))).unwrap();
        bus.wait_idle().await;

        let status = host.status();
        assert_eq!(status.work_state, WorkState::Error);
        assert!(status.last_error.unwrap().contains("asked to fail"));
        assert_eq!(monitor.failure_count(), 1);
        assert_eq!(bus.get_failures(None).len(), 1);
    }

    #[tokio::test]
    async fn test_registry_routing_and_queries() {
        let bus = bus();
        let registry = AgentRegistry::new();
        let first = Arc::new(AgentHost::new("echo-1", Echo, bus.clone()));
        let second = Arc::new(AgentHost::new("echo-2", Echo, bus.clone()));
        registry.register(first.clone()).unwrap();
        registry.register(second.clone()).unwrap();
        assert!(matches!(
            registry.register(Arc::new(AgentHost::new("echo-1", Echo, bus.clone()))),
            Err(AgentError::DuplicateAgent(_))
        ));

        assert_eq!(registry.route("echo"), None);
        second.initialize().await.unwrap();
        second.start().await.unwrap();
        assert_eq!(registry.route("echo"), Some(AgentId::new("echo-2")));
        assert_eq!(registry.find_by_capability("echo").len(), 2);
        assert_eq!(registry.route("planning"), None);

        let starts = registry.query_operations(&OperationQuery::default().operation("start"));
        assert_eq!(starts.len(), 1);
        assert_eq!(starts[0].agent_id, AgentId::new("echo-2"));

        assert_eq!(registry.stop_all().await, 1);
        assert!(registry.status(&AgentId::new("ghost")).is_err());
        registry.deregister(&AgentId::new("echo-1")).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_request_is_answered_with_failure() {
        let bus = bus();
        let host = AgentHost::new("echo-1", Echo, bus.clone());
        host.initialize().await.unwrap();
        host.start().await.unwrap();

        let response = bus
            .request_response(
                &AgentId::new("echo-1"),
                Message::command("caller", content(json!({"fail": true}))),
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        assert!(!response.success);
        assert!(!response.timed_out);
        assert!(response.error.unwrap().contains("asked to fail"));
        assert!(response.payload.is_empty());
    }

    /// Blocks on `gate` for topic "slow", returns at once for anything else.
    struct Gated {
        entered: Arc<tokio::sync::Notify>,
        gate: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl AgentBehavior for Gated {
        fn agent_type(&self) -> &str {
            "gated"
        }

        fn capabilities(&self) -> Vec<String> {
            Vec::new()
        }

        fn topics(&self) -> Vec<String> {
            vec!["slow".into(), "fast".into()]
        }

        async fn handle(&self, _ctx: &AgentContext, message: Arc<Message>) -> anyhow::Result<Option<Content>> {
            if message.topic() == "slow" {
                self.entered.notify_one();
                self.gate.notified().await;
            }
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_work_state_stays_busy_while_any_handler_runs() {
        let bus = bus();
        let entered = Arc::new(tokio::sync::Notify::new());
        let gate = Arc::new(tokio::sync::Notify::new());
        let host = AgentHost::new(
            "gated-1",
            Gated {
                entered: entered.clone(),
                gate: gate.clone(),
            },
            bus.clone(),
        );
        host.initialize().await.unwrap();
        host.start().await.unwrap();

        bus.publish("slow", Message::event("x", Content::new())).unwrap();
        entered.notified().await;

        let report = bus.publish_and_wait("fast", Message::event("x", Content::new())).await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(host.work_state(), WorkState::Busy);

        gate.notify_one();
        bus.wait_idle().await;
        assert_eq!(host.work_state(), WorkState::Idle);
    }

    /// Stops its own agent through the registry when asked to.
    struct SelfStopping {
        registry: Arc<AgentRegistry>,
    }

    #[async_trait]
    impl AgentBehavior for SelfStopping {
        fn agent_type(&self) -> &str {
            "self-stopping"
        }

        fn capabilities(&self) -> Vec<String> {
            Vec::new()
        }

        async fn handle(&self, ctx: &AgentContext, _message: Arc<Message>) -> anyhow::Result<Option<Content>> {
            let me = self
                .registry
                .get(ctx.agent_id())
                .ok_or_else(|| anyhow::anyhow!("not registered"))?;
            me.stop().await?;
            Ok(Some(content(json!({"stopped": true}))))
        }
    }

    #[tokio::test]
    async fn test_handler_can_stop_its_own_agent() {
        let bus = bus();
        let registry = Arc::new(AgentRegistry::new());
        let host = Arc::new(AgentHost::new(
            "quitter",
            SelfStopping {
                registry: registry.clone(),
            },
            bus.clone(),
        ));
        registry.register(host.clone()).unwrap();
        host.initialize().await.unwrap();
        host.start().await.unwrap();

        let response = tokio::time::timeout(
            Duration::from_secs(2),
            bus.request_response(
                &AgentId::new("quitter"),
                Message::command("caller", Content::new()),
                Some(Duration::from_secs(1)),
            ),
        )
        .await
        .expect("self-stop must not hang")
        .unwrap();
        assert!(response.success);
        assert_eq!(response.payload.get("stopped"), Some(&json!(true)));

        bus.wait_idle().await;
        assert_eq!(host.lifecycle(), LifecycleState::Stopped);
        assert!(!bus.has_subscribers("direct.quitter"));
        assert_eq!(host.work_state(), WorkState::Idle);
    }
}
