// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Demonstration coordination round
//!
//! Builds one [`CoordinationContext`] and drives a full round through it:
//!
//! 1. An arbitrator and a content writer are hosted and started
//! 2. A `publish` workflow drafts content by asking the writer over the bus,
//!    then pauses at its gate
//! 3. Writer and editor disagree; the arbitrator settles it
//! 4. The verdict is sent to the workflow engine as an approve/reject request
//! 5. Agent, bus, workflow and health status is printed

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use concord_core::agent::AgentId;
use concord_core::application::context::WORKFLOW_ENGINE_ID;
use concord_core::application::CoordinationContext;
use concord_core::collaborators::ObservabilitySink;
use concord_core::config::CoordinatorConfigManifest;
use concord_core::infrastructure::collaborators::ScriptedTextGenerator;
use concord_core::infrastructure::message_bus::MessageBus;
use concord_core::message::{content, Content, Message};
use concord_core::workflow::{InstanceId, WorkflowContext, WorkflowDefinition, WorkflowId, WorkflowStage};
use concord_swarm::application::agents::{
    ArbitrationAgent, ContentAgent, CONFLICT_RESOLUTION_CAPABILITY, CONTENT_GENERATION_CAPABILITY,
};
use concord_swarm::application::Arbitrator;

pub const ARBITER_ID: &str = "arbiter";
pub const WRITER_ID: &str = "writer";
pub const EDITOR_ID: &str = "editor";
pub const PUBLISH_WORKFLOW_ID: &str = "publish";

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Subject the writer drafts
    #[arg(long, default_value = "release notes for v2")]
    pub topic: String,

    /// Print the final status as JSON
    #[arg(long)]
    pub json: bool,
}

/// Outcome of one round.
#[derive(Debug, Clone)]
pub struct RoundSummary {
    pub instance_id: InstanceId,
    pub draft: Option<String>,
    pub winner: String,
    pub strategy: String,
    pub decision: &'static str,
    pub outcome: Option<String>,
}

/// Pre-gate stage that asks whichever agent offers content generation for a draft.
struct DraftStage {
    bus: MessageBus,
    writer: AgentId,
    requester: AgentId,
}

#[async_trait]
impl WorkflowStage for DraftStage {
    fn name(&self) -> &str {
        "draft"
    }

    async fn run(&self, context: &mut WorkflowContext) -> Result<()> {
        let topic = context.get_str("topic").unwrap_or("an update").to_string();
        let request = Message::command(
            self.requester.clone(),
            content(json!({"prompt": format!("Draft {}", topic)})),
        );
        let payload = self
            .bus
            .request_response(&self.writer, request, None)
            .await?
            .into_result()?;
        context.set("draft", payload.get("text").cloned().unwrap_or(Value::Null));
        context.set("drafted_by", json!(self.writer.as_str()));
        Ok(())
    }
}

pub async fn handle_command(args: RunArgs, config_override: Option<PathBuf>) -> Result<()> {
    let config = CoordinatorConfigManifest::load_or_default(config_override).context("Failed to load configuration")?;

    let ctx = CoordinationContext::new(config);
    ctx.start();

    let outcome = async {
        let arbitrator = start_agents(&ctx).await?;
        let summary = drive_round(&ctx, &args.topic).await?;
        if args.json {
            print_json(&ctx, &arbitrator, &summary).await?;
        } else {
            print_status(&ctx, &arbitrator, &summary).await;
        }
        Ok::<_, anyhow::Error>(())
    }
    .await;

    ctx.shutdown().await;
    outcome
}

/// Host the arbitrator and the writer, then start every registered agent.
pub async fn start_agents(ctx: &CoordinationContext) -> Result<Arc<Arbitrator>> {
    let arbiter = ArbitrationAgent::register(ctx, ARBITER_ID).context("Failed to host arbitrator")?;

    let generator = Arc::new(ScriptedTextGenerator::with_replies([
        "Version 2 ships a faster message bus and bounded caching.",
    ]));
    let writer = ContentAgent::new(generator).with_cache(ctx.new_cache());
    ctx.host(WRITER_ID, writer).context("Failed to host writer")?;

    ctx.registry().initialize_all().await.context("Agent initialization failed")?;
    ctx.registry().start_all().await.context("Agent start failed")?;
    ctx.workflows()
        .accept_decision_requests()
        .context("Workflow engine could not accept decisions")?;

    info!(agents = ctx.registry().len(), "Agents running");
    Ok(arbiter.behavior().arbitrator().clone())
}

/// Run one workflow instance from draft to decision.
pub async fn drive_round(ctx: &CoordinationContext, topic: &str) -> Result<RoundSummary> {
    let writer = ctx
        .registry()
        .route(CONTENT_GENERATION_CAPABILITY)
        .context("No running agent offers content generation")?;
    let arbiter = ctx
        .registry()
        .route(CONFLICT_RESOLUTION_CAPABILITY)
        .context("No running agent offers conflict resolution")?;

    let workflow_id = WorkflowId::new(PUBLISH_WORKFLOW_ID);
    if !ctx.workflows().list_workflows().await.iter().any(|w| w.id == workflow_id) {
        let definition = WorkflowDefinition::builder(workflow_id.clone(), "Publish content")
            .description("Draft with the writer, then wait for an approve/reject decision")
            .stage(Arc::new(DraftStage {
                bus: ctx.bus().clone(),
                writer: writer.clone(),
                requester: AgentId::new(WORKFLOW_ENGINE_ID),
            }))
            .build()?;
        ctx.workflows().register_workflow(definition).await?;
    }

    let instance = ctx
        .workflows()
        .start_instance_as(Some(AgentId::new(EDITOR_ID)), &workflow_id, content(json!({"topic": topic})))
        .await?;
    let draft = instance.context.get_str("draft").map(str::to_string);
    if let Some(error) = instance.context.get_str("stage_error") {
        println!("{}", format!("⚠ Draft stage failed: {}", error).yellow());
    }

    let mut details = Content::new();
    details.insert("instance_id".into(), json!(instance.id.to_string()));
    details.insert(
        "votes".into(),
        json!({ writer.as_str(): "ship", EDITOR_ID: "revise" }),
    );
    let conflict = Message::command(
        EDITOR_ID,
        content(json!({
            "conflict_type": "decision_disagreement",
            "involved_agents": [writer.as_str(), EDITOR_ID],
            "details": details,
        })),
    );
    let verdict = ctx
        .bus()
        .request_response(&arbiter, conflict, None)
        .await?
        .into_result()
        .context("Arbitration failed")?;
    let winner = verdict
        .get("winner")
        .and_then(Value::as_str)
        .context("Arbitration produced no winner")?
        .to_string();
    let strategy = verdict
        .get("strategy")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let decision = if winner == writer.as_str() { "approve" } else { "reject" };
    let request = Message::command(
        arbiter.clone(),
        content(json!({
            "instance_id": instance.id.to_string(),
            "decision": decision,
            "extra": {"decided_by": arbiter.as_str(), "winner": winner},
        })),
    );
    let answer = ctx
        .bus()
        .request_response(&AgentId::new(WORKFLOW_ENGINE_ID), request, None)
        .await?
        .into_result()
        .context("Workflow engine did not answer")?;
    if answer.get("accepted") != Some(&json!(true)) {
        anyhow::bail!("Workflow instance {} was no longer awaiting a decision", instance.id);
    }

    let completed = ctx.workflows().get_instance(instance.id).await?;
    Ok(RoundSummary {
        instance_id: instance.id,
        draft,
        winner,
        strategy,
        decision,
        outcome: completed.context.get_str("outcome").map(str::to_string),
    })
}

async fn print_status(ctx: &CoordinationContext, arbitrator: &Arbitrator, summary: &RoundSummary) {
    println!("{}", "Coordination round".bold());
    println!("  Instance: {}", summary.instance_id);
    match &summary.draft {
        Some(draft) => println!("  Draft: {}", draft),
        None => println!("  Draft: {}", "(none)".dimmed()),
    }
    println!(
        "  Verdict: {} wins ({}), decision {}",
        summary.winner.bold(),
        summary.strategy,
        summary.decision
    );
    match summary.outcome.as_deref() {
        Some("completed") => println!("  Outcome: {}", "completed".green()),
        Some(other) => println!("  Outcome: {}", other.yellow()),
        None => println!("  Outcome: {}", "(pending)".dimmed()),
    }
    println!();

    println!("{}", "Agents:".bold());
    for status in ctx.registry().list() {
        println!(
            "  {} ({}) {} {:?} operations={}",
            status.id.as_str().bold(),
            status.agent_type,
            status.lifecycle,
            status.work_state,
            status.operation_count
        );
    }
    println!();

    let bus = ctx.bus().get_stats();
    println!("{}", "Message Bus:".bold());
    println!("  Published: {}  Delivered: {}", bus.published, bus.delivered);
    println!(
        "  Requests: {}  Responses: {}  Timeouts: {}",
        bus.requests, bus.responses, bus.timeouts
    );
    println!("  Handler failures: {}", bus.handler_failures);
    println!(
        "  Subscriptions: {} across {} topics",
        bus.active_subscriptions, bus.topic_count
    );
    println!();

    let workflows = ctx.workflows().get_statistics(None).await;
    println!("{}", "Workflows:".bold());
    println!(
        "  Total: {}  Paused: {}  Completed: {} (approved {}, rejected {})",
        workflows.total, workflows.paused, workflows.completed, workflows.approved, workflows.rejected
    );
    println!();

    println!("{}", "Conflicts:".bold());
    for report in arbitrator.get_conflicts(None) {
        let winner = report
            .resolution()
            .and_then(|r| r.winner())
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {} {} → {}", report.id(), report.conflict_type(), winner);
    }
    println!();

    let health = ctx.monitor().check_all_health().await;
    let label = if health.healthy {
        "healthy".green()
    } else {
        "unhealthy".red()
    };
    println!("{} {}", "Health:".bold(), label);
}

async fn print_json(ctx: &CoordinationContext, arbitrator: &Arbitrator, summary: &RoundSummary) -> Result<()> {
    let status = json!({
        "round": {
            "instance_id": summary.instance_id.to_string(),
            "draft": summary.draft,
            "winner": summary.winner,
            "strategy": summary.strategy,
            "decision": summary.decision,
            "outcome": summary.outcome,
        },
        "agents": ctx.registry().list(),
        "bus": ctx.bus().get_stats(),
        "workflows": ctx.workflows().get_statistics(None).await,
        "conflicts": arbitrator.get_conflicts(None),
        "health": ctx.monitor().check_all_health().await,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::workflow::InstanceStatus;

    #[tokio::test]
    async fn test_round_with_default_priorities_approves() {
        let ctx = CoordinationContext::new(CoordinatorConfigManifest::default());
        ctx.start();
        start_agents(&ctx).await.unwrap();

        let summary = drive_round(&ctx, "the changelog").await.unwrap();
        assert_eq!(summary.winner, WRITER_ID);
        assert_eq!(summary.decision, "approve");
        assert_eq!(summary.outcome.as_deref(), Some("completed"));
        assert!(summary.draft.is_some());

        let instance = ctx.workflows().get_instance(summary.instance_id).await.unwrap();
        assert_eq!(instance.status(), InstanceStatus::Completed);
        assert_eq!(instance.context.get_str("drafted_by"), Some(WRITER_ID));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_round_with_senior_editor_rejects() {
        let mut config = CoordinatorConfigManifest::default();
        config.spec.arbitration.priorities.insert(EDITOR_ID.into(), 8);
        let ctx = CoordinationContext::new(config);
        ctx.start();
        start_agents(&ctx).await.unwrap();

        let first = drive_round(&ctx, "the changelog").await.unwrap();
        assert_eq!(first.winner, EDITOR_ID);
        assert_eq!(first.outcome.as_deref(), Some("rejected"));

        let second = drive_round(&ctx, "the roadmap").await.unwrap();
        assert_ne!(first.instance_id, second.instance_id);
        let stats = ctx.workflows().get_statistics(None).await;
        assert_eq!((stats.total, stats.completed, stats.rejected), (2, 2, 2));
        ctx.shutdown().await;
    }
}
