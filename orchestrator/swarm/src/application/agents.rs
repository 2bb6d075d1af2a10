// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Coordination Agents
//!
//! Concrete [`AgentBehavior`] variants selected by capability:
//!
//! | Agent | Capability | Listens on | Publishes |
//! |-------|------------|------------|-----------|
//! | [`ArbitrationAgent`] | `conflict_resolution` | `conflicts.report` | `conflicts.resolved` |
//! | [`ContentAgent`] | `content_generation` | `content.requests` | `content.generated` |
//!
//! Both also answer REQUEST messages on their direct channel with the same
//! payload they publish.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use concord_core::agent::{AgentId, OperationLog};
use concord_core::application::{AgentBehavior, AgentContext, AgentError, AgentHost, CoordinationContext};
use concord_core::collaborators::{Completion, TextGenerator};
use concord_core::conflict::ConflictReport;
use concord_core::infrastructure::cache::BoundedCache;
use concord_core::message::{content, Content, Message};

use crate::application::arbitrator::Arbitrator;

pub const CONFLICT_REPORT_TOPIC: &str = "conflicts.report";
pub const CONFLICT_RESOLVED_TOPIC: &str = "conflicts.resolved";
pub const CONTENT_REQUEST_TOPIC: &str = "content.requests";
pub const CONTENT_GENERATED_TOPIC: &str = "content.generated";

pub const CONFLICT_RESOLUTION_CAPABILITY: &str = "conflict_resolution";
pub const CONTENT_GENERATION_CAPABILITY: &str = "content_generation";

// ============================================================================
// ArbitrationAgent
// ============================================================================

/// Message body accepted on `conflicts.report`. The sender is the reporter.
#[derive(Debug, Deserialize)]
struct ConflictSubmission {
    conflict_type: String,
    #[serde(default)]
    involved_agents: Vec<String>,
    #[serde(default)]
    details: Content,
}

/// Puts an [`Arbitrator`] on the bus.
pub struct ArbitrationAgent {
    arbitrator: Arc<Arbitrator>,
}

impl ArbitrationAgent {
    pub fn new(arbitrator: Arc<Arbitrator>) -> Self {
        Self { arbitrator }
    }

    pub fn arbitrator(&self) -> &Arc<Arbitrator> {
        &self.arbitrator
    }

    /// Build an arbitrator from the context's configuration and host it as
    /// `agent_id`, sharing one operation log between the two.
    pub fn register(
        ctx: &CoordinationContext,
        agent_id: impl Into<AgentId>,
    ) -> Result<Arc<AgentHost<ArbitrationAgent>>, AgentError> {
        let log = OperationLog::new(agent_id);
        let arbitrator = Arc::new(Arbitrator::new(log.clone(), &ctx.config().spec.arbitration));
        ctx.host_with_log(Self::new(arbitrator), log)
    }
}

fn resolution_summary(report: &ConflictReport) -> Content {
    let resolution = report.resolution();
    content(json!({
        "conflict_id": report.id().to_string(),
        "conflict_type": report.conflict_type().as_str(),
        "reporter": report.reporter(),
        "strategy": report.resolution_strategy().map(ToString::to_string),
        "winner": resolution.and_then(|r| r.winner()),
        "resolution": resolution.map(|r| Value::Object(r.as_map().clone())),
    }))
}

#[async_trait]
impl AgentBehavior for ArbitrationAgent {
    fn agent_type(&self) -> &str {
        "arbitrator"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![CONFLICT_RESOLUTION_CAPABILITY.to_string()]
    }

    fn topics(&self) -> Vec<String> {
        vec![CONFLICT_REPORT_TOPIC.to_string()]
    }

    async fn handle(&self, ctx: &AgentContext, message: Arc<Message>) -> anyhow::Result<Option<Content>> {
        let submission: ConflictSubmission = serde_json::from_value(Value::Object(message.content().clone()))
            .context("malformed conflict report")?;

        let report = self.arbitrator.report_conflict(
            message.source().clone(),
            submission.conflict_type.as_str(),
            submission.involved_agents.into_iter().map(AgentId::from),
            submission.details,
        );
        let resolved = self.arbitrator.resolve_by_id(report.id())?;

        let summary = resolution_summary(&resolved);
        let delivered = ctx.publish(CONFLICT_RESOLVED_TOPIC, summary.clone())?;
        debug!(conflict_id = %resolved.id(), delivered, "Resolution announced");
        Ok(Some(summary))
    }
}

// ============================================================================
// ContentAgent
// ============================================================================

/// Prompt and serialized context.
pub type CompletionKey = (String, String);

/// Turns `{prompt, context?}` requests into completions from a [`TextGenerator`].
pub struct ContentAgent {
    generator: Arc<dyn TextGenerator>,
    cache: Option<BoundedCache<CompletionKey, Completion>>,
}

impl ContentAgent {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator, cache: None }
    }

    /// Reuse completions for identical prompt and context.
    pub fn with_cache(mut self, cache: BoundedCache<CompletionKey, Completion>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&BoundedCache<CompletionKey, Completion>> {
        self.cache.as_ref()
    }

    async fn complete(&self, prompt: &str, context: &Content) -> anyhow::Result<Completion> {
        let key = (prompt.to_string(), Value::Object(context.clone()).to_string());
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&key)) {
            return Ok(hit);
        }
        let completion = self.generator.complete(prompt, context).await?;
        if let Some(cache) = &self.cache {
            cache.set(key, completion.clone(), None);
        }
        Ok(completion)
    }
}

#[async_trait]
impl AgentBehavior for ContentAgent {
    fn agent_type(&self) -> &str {
        "content"
    }

    fn capabilities(&self) -> Vec<String> {
        vec![CONTENT_GENERATION_CAPABILITY.to_string()]
    }

    fn topics(&self) -> Vec<String> {
        vec![CONTENT_REQUEST_TOPIC.to_string()]
    }

    async fn handle(&self, ctx: &AgentContext, message: Arc<Message>) -> anyhow::Result<Option<Content>> {
        let prompt = message
            .get("prompt")
            .and_then(Value::as_str)
            .context("content request is missing 'prompt'")?;
        let context = message
            .get("context")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let completion = self.complete(prompt, &context).await?;
        let reply = content(json!({
            "prompt": prompt,
            "text": completion.text,
            "confidence": completion.confidence,
            "requested_by": message.source(),
        }));
        ctx.publish(CONTENT_GENERATED_TOPIC, reply.clone())?;
        Ok(Some(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::agent::OperationQuery;
    use concord_core::config::CoordinatorConfigManifest;
    use concord_core::infrastructure::collaborators::ScriptedTextGenerator;
    use concord_core::infrastructure::message_bus::handler_fn;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn context_with_priorities() -> CoordinationContext {
        let mut config = CoordinatorConfigManifest::default();
        config.spec.arbitration.priorities.insert("a".into(), 3);
        config.spec.arbitration.priorities.insert("b".into(), 9);
        config.spec.arbitration.priorities.insert("c".into(), 1);
        let ctx = CoordinationContext::new(config);
        ctx.start();
        ctx
    }

    #[tokio::test]
    async fn test_reported_conflict_is_resolved_and_announced() {
        let ctx = context_with_priorities();
        let host = ArbitrationAgent::register(&ctx, "arbiter").unwrap();
        host.initialize().await.unwrap();
        host.start().await.unwrap();

        let announced = Arc::new(Mutex::new(Vec::new()));
        let sink = announced.clone();
        ctx.bus()
            .subscribe(
                "observer",
                CONFLICT_RESOLVED_TOPIC,
                handler_fn(move |message: Arc<Message>| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().push(message);
                        Ok(())
                    }
                }),
                None,
            )
            .unwrap();

        let report = content(json!({
            "conflict_type": "resource_contention",
            "involved_agents": ["a", "b", "c"],
        }));
        ctx.bus().publish(CONFLICT_REPORT_TOPIC, Message::event("a", report)).unwrap();
        ctx.bus().wait_idle().await;

        let announced = announced.lock();
        assert_eq!(announced.len(), 1);
        assert_eq!(announced[0].get("winner"), Some(&json!("b")));
        assert_eq!(announced[0].get("strategy"), Some(&json!("priority_based")));
        assert_eq!(announced[0].source(), &AgentId::new("arbiter"));

        let arbitrator = host.behavior().arbitrator();
        assert_eq!(arbitrator.get_conflicts(Some(true)).len(), 1);
        let logged = ctx
            .registry()
            .query_operations(&OperationQuery::default().operation("conflict_resolution"));
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].agent_id, AgentId::new("arbiter"));
    }

    #[tokio::test]
    async fn test_conflict_request_is_answered_with_resolution() {
        let ctx = context_with_priorities();
        let host = ArbitrationAgent::register(&ctx, "arbiter").unwrap();
        host.initialize().await.unwrap();
        host.start().await.unwrap();
        assert_eq!(
            ctx.registry().route(CONFLICT_RESOLUTION_CAPABILITY),
            Some(AgentId::new("arbiter"))
        );

        let body = content(json!({"conflict_type": "task_overlap", "involved_agents": ["c", "a"]}));
        let response = ctx
            .bus()
            .request_response(&AgentId::new("arbiter"), Message::command("c", body), Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.payload.get("winner"), Some(&json!("a")));

        let malformed = ctx
            .bus()
            .request_response(
                &AgentId::new("arbiter"),
                Message::command("c", content(json!({"involved_agents": ["a"]}))),
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        assert!(!malformed.success);
        assert!(!malformed.timed_out);
        assert!(malformed.error.unwrap().contains("conflict_type"));
        assert_eq!(host.behavior().arbitrator().get_conflicts(None).len(), 1);
    }

    #[tokio::test]
    async fn test_content_agent_generates_and_caches() {
        let ctx = CoordinationContext::new(CoordinatorConfigManifest::default());
        ctx.start();
        let generator = Arc::new(ScriptedTextGenerator::with_replies(["A release note"]));
        let agent = ContentAgent::new(generator.clone()).with_cache(ctx.new_cache());
        let host = ctx.host("writer", agent).unwrap();
        host.initialize().await.unwrap();
        host.start().await.unwrap();

        let ask = || {
            Message::command(
                "planner",
                content(json!({"prompt": "Summarise v2", "context": {"audience": "users"}})),
            )
        };
        let writer = AgentId::new("writer");
        let first = ctx.bus().request_response(&writer, ask(), None).await.unwrap();
        let second = ctx.bus().request_response(&writer, ask(), None).await.unwrap();

        assert_eq!(first.payload.get("text"), Some(&json!("A release note")));
        assert_eq!(second.payload, first.payload);
        assert_eq!(generator.prompts(), vec!["Summarise v2".to_string()]);
        let stats = host.behavior().cache().unwrap().stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));

        let missing = ctx
            .bus()
            .request_response(&writer, Message::command("planner", Content::new()), None)
            .await
            .unwrap();
        assert!(!missing.success);
        assert!(missing.error.unwrap().contains("prompt"));
    }
}
