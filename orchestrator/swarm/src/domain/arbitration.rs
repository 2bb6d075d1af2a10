// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Arbitration Tables
//!
//! Shared lookup tables consulted by the arbitrator:
//!
//! - [`PriorityTable`] - agent id → integer priority, with a default for
//!   agents never assigned one.
//! - [`StrategyTable`] - conflict type → [`ResolutionStrategy`], with a
//!   default strategy for unmapped types.

use std::collections::HashMap;

use concord_core::agent::AgentId;
use concord_core::config::ArbitrationConfig;
use concord_core::conflict::{ConflictId, ConflictType, ResolutionStrategy};
use concord_core::ErrorKind;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArbitrationError {
    #[error("Conflict {0} is already resolved")]
    AlreadyResolved(ConflictId),

    #[error("Conflict {0} not found")]
    UnknownConflict(ConflictId),

    #[error("No resolution policy registered under '{0}'")]
    UnknownStrategy(String),

    #[error("Conflict {0} names no involved agents")]
    NoInvolvedAgents(ConflictId),
}

impl ArbitrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArbitrationError::AlreadyResolved(_) => ErrorKind::State,
            ArbitrationError::UnknownConflict(_) => ErrorKind::NotFound,
            ArbitrationError::UnknownStrategy(_) | ArbitrationError::NoInvolvedAgents(_) => {
                ErrorKind::Configuration
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorityTable {
    default_priority: i32,
    priorities: HashMap<AgentId, i32>,
}

impl PriorityTable {
    pub fn new(default_priority: i32) -> Self {
        Self {
            default_priority,
            priorities: HashMap::new(),
        }
    }

    pub fn from_config(config: &ArbitrationConfig) -> Self {
        let mut table = Self::new(config.default_priority);
        for (agent_id, priority) in &config.priorities {
            table.set(AgentId::new(agent_id.as_str()), *priority);
        }
        table
    }

    pub fn default_priority(&self) -> i32 {
        self.default_priority
    }

    pub fn set(&mut self, agent_id: AgentId, priority: i32) {
        self.priorities.insert(agent_id, priority);
    }

    pub fn priority_of(&self, agent_id: &AgentId) -> i32 {
        self.priorities
            .get(agent_id)
            .copied()
            .unwrap_or(self.default_priority)
    }

    /// Agent with the strictly highest priority; ties go to the earliest in `agents`.
    pub fn highest<'a>(&self, agents: &'a [AgentId]) -> Option<(&'a AgentId, i32)> {
        let mut best: Option<(&AgentId, i32)> = None;
        for agent in agents {
            let priority = self.priority_of(agent);
            match best {
                Some((_, current)) if priority <= current => {}
                _ => best = Some((agent, priority)),
            }
        }
        best
    }
}

impl Default for PriorityTable {
    fn default() -> Self {
        Self::from_config(&ArbitrationConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyTable {
    default_strategy: ResolutionStrategy,
    strategies: HashMap<ConflictType, ResolutionStrategy>,
}

impl StrategyTable {
    pub fn new(default_strategy: ResolutionStrategy) -> Self {
        Self {
            default_strategy,
            strategies: HashMap::new(),
        }
    }

    pub fn from_config(config: &ArbitrationConfig) -> Self {
        let mut table = Self::new(config.default_strategy.clone());
        for (conflict_type, strategy) in &config.strategies {
            table.set(ConflictType::new(conflict_type.as_str()), strategy.clone());
        }
        table
    }

    pub fn default_strategy(&self) -> &ResolutionStrategy {
        &self.default_strategy
    }

    pub fn set(&mut self, conflict_type: ConflictType, strategy: ResolutionStrategy) {
        self.strategies.insert(conflict_type, strategy);
    }

    pub fn strategy_for(&self, conflict_type: &ConflictType) -> ResolutionStrategy {
        self.strategies
            .get(conflict_type)
            .cloned()
            .unwrap_or_else(|| self.default_strategy.clone())
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::from_config(&ArbitrationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<AgentId> {
        names.iter().copied().map(AgentId::from).collect()
    }

    #[test]
    fn test_highest_is_strict_maximum() {
        let mut table = PriorityTable::new(5);
        table.set("a".into(), 3);
        table.set("b".into(), 9);
        table.set("c".into(), 1);
        let agents = ids(&["a", "b", "c"]);
        assert_eq!(table.highest(&agents), Some((&agents[1], 9)));
    }

    #[test]
    fn test_highest_tie_goes_to_first_occurrence() {
        let mut table = PriorityTable::new(5);
        table.set("x".into(), 7);
        table.set("y".into(), 7);
        let agents = ids(&["y", "x"]);
        assert_eq!(table.highest(&agents).map(|(id, _)| id.as_str()), Some("y"));
        assert_eq!(table.highest(&[]), None);
    }

    #[test]
    fn test_unknown_agents_use_default_priority() {
        let mut table = PriorityTable::default();
        assert_eq!(table.default_priority(), 5);
        table.set("low".into(), 4);
        let agents = ids(&["low", "stranger"]);
        assert_eq!(table.highest(&agents), Some((&agents[1], 5)));
    }

    #[test]
    fn test_tables_seeded_from_config() {
        let mut config = ArbitrationConfig::default();
        config.priorities.insert("planner".into(), 8);
        config
            .strategies
            .insert("resource_contention".into(), ResolutionStrategy::FirstReporter);

        let priorities = PriorityTable::from_config(&config);
        assert_eq!(priorities.priority_of(&"planner".into()), 8);

        let strategies = StrategyTable::from_config(&config);
        assert_eq!(
            strategies.strategy_for(&ConflictType::new(ConflictType::RESOURCE_CONTENTION)),
            ResolutionStrategy::FirstReporter
        );
        assert_eq!(
            strategies.strategy_for(&ConflictType::new(ConflictType::TASK_OVERLAP)),
            ResolutionStrategy::PriorityBased
        );
    }

    #[test]
    fn test_error_kinds() {
        let id = ConflictId::new();
        assert_eq!(ArbitrationError::AlreadyResolved(id).kind(), ErrorKind::State);
        assert_eq!(ArbitrationError::UnknownConflict(id).kind(), ErrorKind::NotFound);
        assert_eq!(
            ArbitrationError::UnknownStrategy("vote".into()).kind(),
            ErrorKind::Configuration
        );
    }
}
