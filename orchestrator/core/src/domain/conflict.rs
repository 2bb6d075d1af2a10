// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Conflict Domain Types
//!
//! Structured records of disagreements between agents, submitted to an
//! arbitrator (see `concord-swarm`). A [`ConflictReport`] is created on
//! report, mutated exactly once when it is resolved, and never deleted.

use crate::domain::agent::AgentId;
use crate::domain::message::Content;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(pub Uuid);

impl ConflictId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConflictId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of a conflict, used to pick a resolution strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictType(String);

impl ConflictType {
    pub const RESOURCE_CONTENTION: &'static str = "resource_contention";
    pub const DECISION_DISAGREEMENT: &'static str = "decision_disagreement";
    pub const DATA_INCONSISTENCY: &'static str = "data_inconsistency";
    pub const TASK_OVERLAP: &'static str = "task_overlap";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConflictType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    #[default]
    PriorityBased,
    Consensus,
    FirstReporter,
    /// A policy registered by name with the arbitrator.
    Custom(String),
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionStrategy::PriorityBased => f.write_str("priority_based"),
            ResolutionStrategy::Consensus => f.write_str("consensus"),
            ResolutionStrategy::FirstReporter => f.write_str("first_reporter"),
            ResolutionStrategy::Custom(name) => write!(f, "custom:{}", name),
        }
    }
}

/// Resolution mapping. Winner-producing strategies store the winner under `"winner"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resolution(Content);

impl Resolution {
    pub fn new() -> Self {
        Self(Content::new())
    }

    pub fn with_winner(winner: &AgentId) -> Self {
        let mut resolution = Self::new();
        resolution.insert("winner", serde_json::Value::String(winner.to_string()));
        resolution
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) -> &mut Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn winner(&self) -> Option<AgentId> {
        self.0.get("winner").and_then(|v| v.as_str()).map(AgentId::new)
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Content {
        &self.0
    }

    pub fn into_content(self) -> Content {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    id: ConflictId,
    conflict_type: ConflictType,
    reporter: AgentId,
    involved_agents: Vec<AgentId>,
    details: Content,
    reported_at: DateTime<Utc>,
    resolved: bool,
    resolution_strategy: Option<ResolutionStrategy>,
    resolution: Option<Resolution>,
    resolved_at: Option<DateTime<Utc>>,
}

impl ConflictReport {
    /// Involved agents are deduplicated keeping first occurrence order.
    pub fn new(
        reporter: impl Into<AgentId>,
        conflict_type: impl Into<ConflictType>,
        involved_agents: impl IntoIterator<Item = AgentId>,
        details: Content,
    ) -> Self {
        let mut involved: Vec<AgentId> = Vec::new();
        for agent in involved_agents {
            if !involved.contains(&agent) {
                involved.push(agent);
            }
        }
        Self {
            id: ConflictId::new(),
            conflict_type: conflict_type.into(),
            reporter: reporter.into(),
            involved_agents: involved,
            details,
            reported_at: Utc::now(),
            resolved: false,
            resolution_strategy: None,
            resolution: None,
            resolved_at: None,
        }
    }

    pub fn id(&self) -> ConflictId {
        self.id
    }

    pub fn conflict_type(&self) -> &ConflictType {
        &self.conflict_type
    }

    pub fn reporter(&self) -> &AgentId {
        &self.reporter
    }

    pub fn involved_agents(&self) -> &[AgentId] {
        &self.involved_agents
    }

    pub fn details(&self) -> &Content {
        &self.details
    }

    pub fn reported_at(&self) -> DateTime<Utc> {
        self.reported_at
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn resolution_strategy(&self) -> Option<&ResolutionStrategy> {
        self.resolution_strategy.as_ref()
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Record the final resolution. Returns `false` (and changes nothing) when
    /// the report was already resolved.
    pub fn apply_resolution(&mut self, strategy: ResolutionStrategy, resolution: Resolution) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolution_strategy = Some(strategy);
        self.resolution = Some(resolution);
        self.resolved_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_involved_agents_unique_and_ordered() {
        let report = ConflictReport::new(
            "monitor",
            ConflictType::RESOURCE_CONTENTION,
            ["b", "a", "b", "c", "a"].into_iter().map(AgentId::from),
            Content::new(),
        );
        let ids: Vec<&str> = report.involved_agents().iter().map(AgentId::as_str).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert!(!report.is_resolved());
        assert!(report.resolution().is_none());
    }

    #[test]
    fn test_resolution_applied_once() {
        let mut report = ConflictReport::new("m", "task_overlap", vec![AgentId::new("a")], Content::new());
        assert!(report.apply_resolution(
            ResolutionStrategy::FirstReporter,
            Resolution::with_winner(&AgentId::new("m"))
        ));
        assert!(!report.apply_resolution(
            ResolutionStrategy::PriorityBased,
            Resolution::with_winner(&AgentId::new("a"))
        ));
        assert_eq!(report.resolution_strategy(), Some(&ResolutionStrategy::FirstReporter));
        assert_eq!(report.resolution().and_then(Resolution::winner), Some(AgentId::new("m")));
    }

    #[test]
    fn test_strategy_serde_names() {
        let yaml = serde_yaml::to_string(&ResolutionStrategy::PriorityBased).unwrap();
        assert_eq!(yaml.trim(), "priority_based");
        let parsed: ResolutionStrategy = serde_yaml::from_str("first_reporter").unwrap();
        assert_eq!(parsed, ResolutionStrategy::FirstReporter);
    }
}
