// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Arbitrator
//!
//! Deterministic decision authority for conflicts between agents.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Resolve [`ConflictReport`]s from a shared priority table and
//!   a per-type strategy table
//!
//! Each strategy is a [`ResolutionPolicy`]: a pure function of the report and
//! a snapshot of the priority table. Built-in policies cover
//! `priority_based`, `consensus` and `first_reporter`; further policies are
//! registered by name and selected with [`ResolutionStrategy::Custom`].
//!
//! A report is resolved at most once. There is no override path: a second
//! attempt fails with [`ArbitrationError::AlreadyResolved`] and re-litigation
//! needs a new report.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use concord_core::agent::{AgentId, OperationLog};
use concord_core::config::ArbitrationConfig;
use concord_core::conflict::{ConflictId, ConflictReport, ConflictType, Resolution, ResolutionStrategy};
use concord_core::message::Content;

use crate::domain::{ArbitrationError, PriorityTable, StrategyTable};

/// Operation-log tag for every resolution attempt.
pub const CONFLICT_RESOLUTION_OPERATION: &str = "conflict_resolution";

/// A resolution strategy.
///
/// Implementations must be deterministic in `report` and `priorities`.
pub trait ResolutionPolicy: Send + Sync {
    fn resolve(&self, report: &ConflictReport, priorities: &PriorityTable) -> Result<Resolution, ArbitrationError>;
}

// ============================================================================
// Built-in policies
// ============================================================================

/// Highest priority among the involved agents wins.
pub struct PriorityBasedPolicy;

impl ResolutionPolicy for PriorityBasedPolicy {
    fn resolve(&self, report: &ConflictReport, priorities: &PriorityTable) -> Result<Resolution, ArbitrationError> {
        let (winner, priority) = priorities
            .highest(report.involved_agents())
            .ok_or(ArbitrationError::NoInvolvedAgents(report.id()))?;
        let mut resolution = Resolution::with_winner(winner);
        resolution.insert("priority", json!(priority));
        Ok(resolution)
    }
}

/// Majority vote over `details["votes"]` (agent id → proposal).
///
/// Only involved agents' votes count. Ties go to the proposal whose supporters
/// have the higher summed priority, then to the one voted for first in
/// involved order. Without any counted vote this falls back to
/// [`PriorityBasedPolicy`].
pub struct ConsensusPolicy;

struct Tally<'a> {
    proposal: &'a Value,
    first_supporter: &'a AgentId,
    supporters: Vec<&'a AgentId>,
    weight: i64,
}

impl ResolutionPolicy for ConsensusPolicy {
    fn resolve(&self, report: &ConflictReport, priorities: &PriorityTable) -> Result<Resolution, ArbitrationError> {
        let mut tallies: Vec<Tally<'_>> = Vec::new();
        if let Some(votes) = report.details().get("votes").and_then(Value::as_object) {
            for agent in report.involved_agents() {
                let Some(proposal) = votes.get(agent.as_str()) else {
                    continue;
                };
                let weight = i64::from(priorities.priority_of(agent));
                match tallies.iter_mut().find(|t| t.proposal == proposal) {
                    Some(tally) => {
                        tally.supporters.push(agent);
                        tally.weight += weight;
                    }
                    None => tallies.push(Tally {
                        proposal,
                        first_supporter: agent,
                        supporters: vec![agent],
                        weight,
                    }),
                }
            }
        }

        let Some((first, rest)) = tallies.split_first() else {
            let mut resolution = PriorityBasedPolicy.resolve(report, priorities)?;
            resolution.insert("fallback", json!("priority_based"));
            return Ok(resolution);
        };

        let mut best = first;
        for tally in rest {
            if (tally.supporters.len(), tally.weight) > (best.supporters.len(), best.weight) {
                best = tally;
            }
        }

        let mut resolution = Resolution::with_winner(best.first_supporter);
        resolution
            .insert("proposal", best.proposal.clone())
            .insert("votes", json!(best.supporters.len()))
            .insert(
                "supporters",
                Value::Array(best.supporters.iter().map(|a| json!(a.as_str())).collect()),
            );
        Ok(resolution)
    }
}

/// The reporting agent wins.
pub struct FirstReporterPolicy;

impl ResolutionPolicy for FirstReporterPolicy {
    fn resolve(&self, report: &ConflictReport, _priorities: &PriorityTable) -> Result<Resolution, ArbitrationError> {
        Ok(Resolution::with_winner(report.reporter()))
    }
}

// ============================================================================
// Arbitrator
// ============================================================================

pub struct Arbitrator {
    log: OperationLog,
    priorities: RwLock<PriorityTable>,
    strategies: RwLock<StrategyTable>,
    policies: RwLock<HashMap<String, Arc<dyn ResolutionPolicy>>>,
    conflicts: RwLock<Vec<ConflictReport>>,
}

impl Arbitrator {
    /// Resolution attempts are appended to `log`, normally the hosting agent's.
    pub fn new(log: OperationLog, config: &ArbitrationConfig) -> Self {
        Self {
            log,
            priorities: RwLock::new(PriorityTable::from_config(config)),
            strategies: RwLock::new(StrategyTable::from_config(config)),
            policies: RwLock::new(HashMap::new()),
            conflicts: RwLock::new(Vec::new()),
        }
    }

    pub fn owner(&self) -> &AgentId {
        self.log.agent_id()
    }

    pub fn operation_log(&self) -> &OperationLog {
        &self.log
    }

    pub fn set_agent_priority(&self, agent_id: impl Into<AgentId>, priority: i32) {
        let agent_id = agent_id.into();
        debug!(agent_id = %agent_id, priority, "Agent priority set");
        self.priorities.write().set(agent_id, priority);
    }

    pub fn agent_priority(&self, agent_id: &AgentId) -> i32 {
        self.priorities.read().priority_of(agent_id)
    }

    pub fn set_resolution_strategy(&self, conflict_type: impl Into<ConflictType>, strategy: ResolutionStrategy) {
        let conflict_type = conflict_type.into();
        debug!(conflict_type = %conflict_type, strategy = %strategy, "Resolution strategy set");
        self.strategies.write().set(conflict_type, strategy);
    }

    pub fn resolution_strategy(&self, conflict_type: &ConflictType) -> ResolutionStrategy {
        self.strategies.read().strategy_for(conflict_type)
    }

    /// Register a policy selectable as `ResolutionStrategy::Custom(name)`.
    /// A policy already registered under `name` is replaced.
    pub fn register_policy(&self, name: impl Into<String>, policy: Arc<dyn ResolutionPolicy>) {
        let name = name.into();
        info!(policy = %name, "Custom resolution policy registered");
        self.policies.write().insert(name, policy);
    }

    /// Record a new, unresolved conflict.
    pub fn report_conflict(
        &self,
        reporter: impl Into<AgentId>,
        conflict_type: impl Into<ConflictType>,
        involved_agents: impl IntoIterator<Item = AgentId>,
        details: Content,
    ) -> ConflictReport {
        let report = ConflictReport::new(reporter, conflict_type, involved_agents, details);
        info!(
            conflict_id = %report.id(),
            conflict_type = %report.conflict_type(),
            reporter = %report.reporter(),
            involved = report.involved_agents().len(),
            "Conflict reported"
        );
        self.conflicts.write().push(report.clone());
        report
    }

    /// Resolve `report` in place and return its resolution.
    ///
    /// Reports not created by [`Arbitrator::report_conflict`] are remembered
    /// from here on. On failure the report is left unresolved.
    pub fn resolve_conflict(&self, report: &mut ConflictReport) -> Result<Resolution, ArbitrationError> {
        let started = Instant::now();
        let outcome = self.decide(report);

        let logged = outcome.as_ref().map(|_| ()).map_err(|e| e.to_string());
        self.log.record(CONFLICT_RESOLUTION_OPERATION, started, logged);

        match outcome {
            Ok((strategy, resolution)) => {
                metrics::counter!("concord_conflicts_resolved_total", "strategy" => strategy.to_string())
                    .increment(1);
                info!(
                    conflict_id = %report.id(),
                    strategy = %strategy,
                    winner = ?resolution.winner().map(|w| w.to_string()),
                    "Conflict resolved"
                );
                Ok(resolution)
            }
            Err(e) => {
                warn!(conflict_id = %report.id(), error = %e, "Conflict resolution refused");
                Err(e)
            }
        }
    }

    /// Resolve a stored report by id and return the resolved copy.
    pub fn resolve_by_id(&self, conflict_id: ConflictId) -> Result<ConflictReport, ArbitrationError> {
        let mut report = self
            .get_conflict(conflict_id)
            .ok_or(ArbitrationError::UnknownConflict(conflict_id))?;
        self.resolve_conflict(&mut report)?;
        Ok(report)
    }

    pub fn get_conflict(&self, conflict_id: ConflictId) -> Option<ConflictReport> {
        self.conflicts
            .read()
            .iter()
            .find(|r| r.id() == conflict_id)
            .cloned()
    }

    /// All reports seen, in report order, optionally filtered by resolution state.
    pub fn get_conflicts(&self, resolved: Option<bool>) -> Vec<ConflictReport> {
        self.conflicts
            .read()
            .iter()
            .filter(|r| resolved.is_none_or(|wanted| r.is_resolved() == wanted))
            .cloned()
            .collect()
    }

    /// Decide with no lock held, then record under the conflicts write lock,
    /// re-checking finality so a report is resolved at most once even when
    /// callers race on copies of it. Policies may call back into the arbitrator.
    fn decide(&self, report: &mut ConflictReport) -> Result<(ResolutionStrategy, Resolution), ArbitrationError> {
        self.ensure_unresolved(report, &self.conflicts.read())?;

        let strategy = self.strategies.read().strategy_for(report.conflict_type());
        let policy = self.policy_for(&strategy)?;
        let priorities = self.priorities.read().clone();
        let resolution = policy.resolve(report, &priorities)?;

        let mut conflicts = self.conflicts.write();
        self.ensure_unresolved(report, &conflicts)?;
        report.apply_resolution(strategy.clone(), resolution.clone());
        match conflicts.iter().position(|r| r.id() == report.id()) {
            Some(i) => conflicts[i] = report.clone(),
            None => conflicts.push(report.clone()),
        }
        Ok((strategy, resolution))
    }

    fn ensure_unresolved(&self, report: &ConflictReport, conflicts: &[ConflictReport]) -> Result<(), ArbitrationError> {
        let stored_resolved = conflicts
            .iter()
            .any(|r| r.id() == report.id() && r.is_resolved());
        if report.is_resolved() || stored_resolved {
            return Err(ArbitrationError::AlreadyResolved(report.id()));
        }
        Ok(())
    }

    fn policy_for(&self, strategy: &ResolutionStrategy) -> Result<Arc<dyn ResolutionPolicy>, ArbitrationError> {
        match strategy {
            ResolutionStrategy::PriorityBased => Ok(Arc::new(PriorityBasedPolicy)),
            ResolutionStrategy::Consensus => Ok(Arc::new(ConsensusPolicy)),
            ResolutionStrategy::FirstReporter => Ok(Arc::new(FirstReporterPolicy)),
            ResolutionStrategy::Custom(name) => self
                .policies
                .read()
                .get(name)
                .cloned()
                .ok_or_else(|| ArbitrationError::UnknownStrategy(name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::agent::{OperationQuery, OperationStatus};
    use std::sync::Weak;
    use concord_core::message::content;

    fn arbitrator() -> Arbitrator {
        Arbitrator::new(OperationLog::new("arbiter"), &ArbitrationConfig::default())
    }

    fn agents(names: &[&str]) -> Vec<AgentId> {
        names.iter().copied().map(AgentId::from).collect()
    }

    #[test]
    fn test_priority_based_picks_highest() {
        let arbiter = arbitrator();
        arbiter.set_agent_priority("a", 3);
        arbiter.set_agent_priority("b", 9);
        arbiter.set_agent_priority("c", 1);

        let mut report = arbiter.report_conflict("a", "resource_contention", agents(&["a", "b", "c"]), Content::new());
        let resolution = arbiter.resolve_conflict(&mut report).unwrap();

        assert_eq!(resolution.winner(), Some(AgentId::new("b")));
        assert_eq!(resolution.get("priority"), Some(&json!(9)));
        assert!(report.is_resolved());
        assert_eq!(report.resolution_strategy(), Some(&ResolutionStrategy::PriorityBased));
        assert_eq!(report.resolution(), Some(&resolution));
        assert!(report.resolved_at().is_some());
    }

    #[test]
    fn test_second_resolution_is_refused() {
        let arbiter = arbitrator();
        let report = arbiter.report_conflict("a", "task_overlap", agents(&["a", "b"]), Content::new());
        let mut first = report.clone();
        let mut stale = report;
        let resolution = arbiter.resolve_conflict(&mut first).unwrap();

        assert_eq!(
            arbiter.resolve_conflict(&mut first),
            Err(ArbitrationError::AlreadyResolved(first.id()))
        );
        assert_eq!(
            arbiter.resolve_conflict(&mut stale),
            Err(ArbitrationError::AlreadyResolved(stale.id()))
        );
        assert!(!stale.is_resolved());
        assert_eq!(arbiter.get_conflict(first.id()).unwrap().resolution(), Some(&resolution));

        let failures = arbiter
            .operation_log()
            .query(&OperationQuery::default().operation(CONFLICT_RESOLUTION_OPERATION).status(OperationStatus::Failure));
        assert_eq!(failures.len(), 2);
    }

    #[test]
    fn test_first_reporter_strategy() {
        let arbiter = arbitrator();
        arbiter.set_agent_priority("loud", 10);
        arbiter.set_resolution_strategy("data_inconsistency", ResolutionStrategy::FirstReporter);

        let mut report = arbiter.report_conflict("quiet", "data_inconsistency", agents(&["loud", "quiet"]), Content::new());
        let resolution = arbiter.resolve_conflict(&mut report).unwrap();
        assert_eq!(resolution.winner(), Some(AgentId::new("quiet")));
    }

    #[test]
    fn test_consensus_majority_and_tie_break() {
        let arbiter = arbitrator();
        arbiter.set_resolution_strategy("decision_disagreement", ResolutionStrategy::Consensus);
        arbiter.set_agent_priority("c", 9);

        let votes = content(json!({
            "votes": {"a": "plan-x", "b": "plan-y", "c": "plan-y", "outsider": "plan-x"}
        }));
        let mut majority = arbiter.report_conflict("a", "decision_disagreement", agents(&["a", "b", "c"]), votes);
        let resolution = arbiter.resolve_conflict(&mut majority).unwrap();
        assert_eq!(resolution.winner(), Some(AgentId::new("b")));
        assert_eq!(resolution.get("proposal"), Some(&json!("plan-y")));
        assert_eq!(resolution.get("votes"), Some(&json!(2)));

        let tied = content(json!({"votes": {"a": "left", "c": "right"}}));
        let mut report = arbiter.report_conflict("a", "decision_disagreement", agents(&["a", "c"]), tied);
        let resolution = arbiter.resolve_conflict(&mut report).unwrap();
        assert_eq!(resolution.winner(), Some(AgentId::new("c")));
        assert_eq!(resolution.get("proposal"), Some(&json!("right")));
    }

    #[test]
    fn test_consensus_without_votes_falls_back_to_priority() {
        let arbiter = arbitrator();
        arbiter.set_resolution_strategy("decision_disagreement", ResolutionStrategy::Consensus);
        arbiter.set_agent_priority("b", 6);

        let mut report = arbiter.report_conflict("a", "decision_disagreement", agents(&["a", "b"]), Content::new());
        let resolution = arbiter.resolve_conflict(&mut report).unwrap();
        assert_eq!(resolution.winner(), Some(AgentId::new("b")));
        assert_eq!(resolution.get("fallback"), Some(&json!("priority_based")));
    }

    struct LastInvolved;

    impl ResolutionPolicy for LastInvolved {
        fn resolve(&self, report: &ConflictReport, _priorities: &PriorityTable) -> Result<Resolution, ArbitrationError> {
            report
                .involved_agents()
                .last()
                .map(Resolution::with_winner)
                .ok_or(ArbitrationError::NoInvolvedAgents(report.id()))
        }
    }

    #[test]
    fn test_custom_policy_and_unknown_strategy() {
        let arbiter = arbitrator();
        arbiter.set_resolution_strategy("task_overlap", ResolutionStrategy::Custom("last".into()));

        let mut report = arbiter.report_conflict("a", "task_overlap", agents(&["a", "b"]), Content::new());
        assert_eq!(
            arbiter.resolve_conflict(&mut report),
            Err(ArbitrationError::UnknownStrategy("last".into()))
        );
        assert!(!report.is_resolved());
        assert_eq!(arbiter.get_conflicts(Some(false)).len(), 1);

        arbiter.register_policy("last", Arc::new(LastInvolved));
        let resolution = arbiter.resolve_conflict(&mut report).unwrap();
        assert_eq!(resolution.winner(), Some(AgentId::new("b")));
        assert_eq!(
            report.resolution_strategy(),
            Some(&ResolutionStrategy::Custom("last".into()))
        );
    }

    /// Rotates the win through the involved agents by counting past resolutions.
    struct Rotation {
        arbiter: Weak<Arbitrator>,
    }

    impl ResolutionPolicy for Rotation {
        fn resolve(&self, report: &ConflictReport, _priorities: &PriorityTable) -> Result<Resolution, ArbitrationError> {
            let involved = report.involved_agents();
            if involved.is_empty() {
                return Err(ArbitrationError::NoInvolvedAgents(report.id()));
            }
            let decided = self
                .arbiter
                .upgrade()
                .map_or(0, |arbiter| arbiter.get_conflicts(Some(true)).len());
            Ok(Resolution::with_winner(&involved[decided % involved.len()]))
        }
    }

    #[test]
    fn test_custom_policy_may_query_the_arbitrator() {
        let arbiter = Arc::new(arbitrator());
        arbiter.register_policy(
            "rotation",
            Arc::new(Rotation {
                arbiter: Arc::downgrade(&arbiter),
            }),
        );
        arbiter.set_resolution_strategy("task_overlap", ResolutionStrategy::Custom("rotation".into()));

        let winners: Vec<AgentId> = (0..3)
            .map(|_| {
                let mut report = arbiter.report_conflict("a", "task_overlap", agents(&["a", "b"]), Content::new());
                arbiter.resolve_conflict(&mut report).unwrap().winner().unwrap()
            })
            .collect();
        assert_eq!(winners, agents(&["a", "b", "a"]));
    }

    /// Settles the conflict itself under another strategy before answering.
    struct Interloper {
        arbiter: Weak<Arbitrator>,
    }

    impl ResolutionPolicy for Interloper {
        fn resolve(&self, report: &ConflictReport, _priorities: &PriorityTable) -> Result<Resolution, ArbitrationError> {
            if let Some(arbiter) = self.arbiter.upgrade() {
                arbiter.set_resolution_strategy(report.conflict_type().as_str(), ResolutionStrategy::FirstReporter);
                arbiter.resolve_by_id(report.id())?;
            }
            report
                .involved_agents()
                .last()
                .map(Resolution::with_winner)
                .ok_or(ArbitrationError::NoInvolvedAgents(report.id()))
        }
    }

    #[test]
    fn test_resolution_recorded_while_policy_ran_is_final() {
        let arbiter = Arc::new(arbitrator());
        arbiter.register_policy(
            "interloper",
            Arc::new(Interloper {
                arbiter: Arc::downgrade(&arbiter),
            }),
        );
        arbiter.set_resolution_strategy("task_overlap", ResolutionStrategy::Custom("interloper".into()));

        let mut report = arbiter.report_conflict("a", "task_overlap", agents(&["a", "b"]), Content::new());
        assert_eq!(
            arbiter.resolve_conflict(&mut report),
            Err(ArbitrationError::AlreadyResolved(report.id()))
        );
        assert!(!report.is_resolved());

        let stored = arbiter.get_conflict(report.id()).unwrap();
        assert_eq!(stored.resolution_strategy(), Some(&ResolutionStrategy::FirstReporter));
        assert_eq!(stored.resolution().and_then(|r| r.winner()), Some(AgentId::new("a")));
    }

    #[test]
    fn test_resolve_by_id_and_filters() {
        let arbiter = arbitrator();
        let open = arbiter.report_conflict("a", "task_overlap", agents(&["a"]), Content::new());
        let closed = arbiter.report_conflict("b", "task_overlap", agents(&["b"]), Content::new());

        let resolved = arbiter.resolve_by_id(closed.id()).unwrap();
        assert!(resolved.is_resolved());
        let missing = ConflictId::new();
        assert_eq!(
            arbiter.resolve_by_id(missing).unwrap_err(),
            ArbitrationError::UnknownConflict(missing)
        );

        assert_eq!(arbiter.get_conflicts(None).len(), 2);
        let unresolved: Vec<ConflictId> = arbiter.get_conflicts(Some(false)).iter().map(|r| r.id()).collect();
        assert_eq!(unresolved, vec![open.id()]);
        let done: Vec<ConflictId> = arbiter.get_conflicts(Some(true)).iter().map(|r| r.id()).collect();
        assert_eq!(done, vec![closed.id()]);
    }

    #[test]
    fn test_empty_involved_is_refused_and_logged() {
        let arbiter = arbitrator();
        let mut report = arbiter.report_conflict("a", "task_overlap", Vec::new(), Content::new());
        assert_eq!(
            arbiter.resolve_conflict(&mut report),
            Err(ArbitrationError::NoInvolvedAgents(report.id()))
        );
        let entries = arbiter.operation_log().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, CONFLICT_RESOLUTION_OPERATION);
        assert_eq!(entries[0].status, OperationStatus::Failure);
        assert_eq!(entries[0].agent_id, AgentId::new("arbiter"));
    }
}
