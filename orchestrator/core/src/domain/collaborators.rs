// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Collaborators
//!
//! Narrow outbound interfaces to services living outside the coordination
//! core (Anti-Corruption Layer). Every trait here is substitutable with an
//! in-memory fake in tests; see `crate::infrastructure::collaborators`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::domain::agent::OperationLogEntry;
use crate::domain::message::Content;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already archived: {0}")]
    AlreadyArchived(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Text generation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub confidence: f64,
}

/// Text-generation service used by content-producing agents.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str, context: &Content) -> Result<Completion, CollaboratorError>;
}

// ============================================================================
// Tag matching
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagMatch {
    pub id: String,
    /// Fraction of query tags present on the candidate (1.0 = full overlap).
    pub score: f64,
    pub matched_tags: Vec<String>,
}

/// Tag/vector similarity lookup.
///
/// Results are ordered by descending score, ties broken by insertion order.
#[async_trait]
pub trait TagMatcher: Send + Sync {
    async fn match_tags(
        &self,
        query_tags: &[String],
        item_type: Option<&str>,
    ) -> Result<Vec<TagMatch>, CollaboratorError>;
}

// ============================================================================
// Persistence
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub state: ProjectState,
    pub files: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub files_archived: usize,
}

/// Durable project storage.
///
/// Archiving a missing or already-archived project must fail explicitly.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create_project(
        &self,
        name: &str,
        files: BTreeMap<String, String>,
    ) -> Result<Project, CollaboratorError>;

    async fn list_projects(&self) -> Result<Vec<Project>, CollaboratorError>;

    async fn archive(&self, project_id: &str) -> ArchiveOutcome;
}

// ============================================================================
// Observability
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckType {
    Liveness,
    Readiness,
    Dependency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub check_type: HealthCheckType,
    pub state: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub checks: Vec<HealthCheckResult>,
}

/// Async probe: `Ok(())` is healthy, `Err(reason)` unhealthy.
pub type HealthProbe = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Sink the core pushes health and operation events into.
///
/// The core keeps working when a sink is absent or returns errors.
#[async_trait]
pub trait ObservabilitySink: Send + Sync {
    fn register_health_check(&self, name: &str, check_type: HealthCheckType, probe: HealthProbe);

    async fn check_all_health(&self) -> HealthReport;

    async fn log_operation(&self, entry: &OperationLogEntry) -> Result<(), CollaboratorError>;
}
