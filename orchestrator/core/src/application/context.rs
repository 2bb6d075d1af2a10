// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Coordination Context
//!
//! Composition object built once from a [`CoordinatorConfigManifest`] and
//! passed to everything that needs the bus, the registry, the workflow engine
//! or the monitor. There are no process-wide defaults: two contexts are two
//! fully independent coordinators.

use std::hash::Hash;
use std::sync::Arc;

use futures::FutureExt;
use tracing::info;

use crate::application::agent::{AgentBehavior, AgentError, AgentHost, AgentRegistry};
use crate::application::workflow_engine::WorkflowEngine;
use crate::domain::agent::{AgentId, OperationLog};
use crate::domain::collaborators::{HealthCheckType, ObservabilitySink};
use crate::domain::config::CoordinatorConfigManifest;
use crate::infrastructure::cache::BoundedCache;
use crate::infrastructure::message_bus::MessageBus;
use crate::infrastructure::monitor::InMemoryMonitor;

/// Agent id the workflow engine publishes under.
pub const WORKFLOW_ENGINE_ID: &str = "workflow-engine";

pub struct CoordinationContext {
    config: CoordinatorConfigManifest,
    bus: MessageBus,
    registry: Arc<AgentRegistry>,
    monitor: Arc<InMemoryMonitor>,
    workflows: Arc<WorkflowEngine>,
}

impl CoordinationContext {
    /// Build every component from `config`. The bus starts stopped.
    pub fn new(config: CoordinatorConfigManifest) -> Self {
        let bus = MessageBus::new(config.spec.bus.clone());
        let workflows = Arc::new(WorkflowEngine::new(WORKFLOW_ENGINE_ID, bus.clone()));
        Self {
            config,
            bus,
            registry: Arc::new(AgentRegistry::new()),
            monitor: Arc::new(InMemoryMonitor::new()),
            workflows,
        }
    }

    pub fn config(&self) -> &CoordinatorConfigManifest {
        &self.config
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn monitor(&self) -> &Arc<InMemoryMonitor> {
        &self.monitor
    }

    pub fn workflows(&self) -> &Arc<WorkflowEngine> {
        &self.workflows
    }

    /// A fresh cache sized from the `cache` section of the configuration.
    pub fn new_cache<K, V>(&self) -> BoundedCache<K, V>
    where
        K: Hash + Eq + Clone,
        V: Clone,
    {
        BoundedCache::from_config(&self.config.spec.cache)
    }

    /// Start the bus and register the built-in health checks.
    pub fn start(&self) {
        self.bus.start();
        let bus = self.bus.clone();
        self.monitor.register_health_check(
            "message_bus",
            HealthCheckType::Liveness,
            Arc::new(move || {
                let running = bus.is_running();
                async move {
                    if running {
                        Ok(())
                    } else {
                        Err("message bus is stopped".to_string())
                    }
                }
                .boxed()
            }),
        );
        info!(coordinator = %self.config.metadata.name, "Coordination context started");
    }

    /// Wrap `behavior` in a host wired to this context's bus and monitor, and register it.
    pub fn host<B: AgentBehavior>(
        &self,
        agent_id: impl Into<AgentId>,
        behavior: B,
    ) -> Result<Arc<AgentHost<B>>, AgentError> {
        self.host_with_log(behavior, OperationLog::new(agent_id))
    }

    /// Like [`CoordinationContext::host`], appending to an existing operation log.
    pub fn host_with_log<B: AgentBehavior>(
        &self,
        behavior: B,
        log: OperationLog,
    ) -> Result<Arc<AgentHost<B>>, AgentError> {
        let host = Arc::new(AgentHost::with_operation_log(behavior, self.bus.clone(), log));
        host.attach_sink(self.monitor.clone());
        self.registry.register(host.clone())?;
        Ok(host)
    }

    /// Stop every running agent, then the bus.
    pub async fn shutdown(&self) {
        let stopped = self.registry.stop_all().await;
        self.bus.stop();
        info!(coordinator = %self.config.metadata.name, stopped_agents = stopped, "Coordination context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::agent::AgentContext;
    use crate::domain::agent::LifecycleState;
    use crate::domain::message::{Content, Message};
    use async_trait::async_trait;

    struct Quiet;

    #[async_trait]
    impl AgentBehavior for Quiet {
        fn agent_type(&self) -> &str {
            "quiet"
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["silence".into()]
        }

        async fn handle(&self, _ctx: &AgentContext, _message: Arc<Message>) -> anyhow::Result<Option<Content>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_context_lifecycle_and_health() {
        let mut config = CoordinatorConfigManifest::default();
        config.spec.cache.max_size = 2;
        let ctx = CoordinationContext::new(config);
        assert!(!ctx.bus().is_running());

        ctx.start();
        assert!(ctx.monitor().check_all_health().await.healthy);

        let host = ctx.host("q1", Quiet).unwrap();
        assert!(ctx.host("q1", Quiet).is_err());
        host.initialize().await.unwrap();
        host.start().await.unwrap();
        assert_eq!(ctx.registry().route("silence"), Some(AgentId::new("q1")));

        let cache: BoundedCache<String, u8> = ctx.new_cache();
        assert_eq!(cache.max_size(), 2);

        ctx.shutdown().await;
        assert_eq!(host.lifecycle(), LifecycleState::Stopped);
        assert!(!ctx.monitor().check_all_health().await.healthy);
        assert!(!ctx.monitor().operations_for(&AgentId::new("q1")).is_empty());
    }
}
