// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Crate-wide error taxonomy.
//!
//! Each component reports its own error enum; [`CoreError`] unifies them so
//! callers one level up (an HTTP facade, the CLI) can classify a failure with
//! [`CoreError::kind`] instead of matching strings.

use serde::{Deserialize, Serialize};

use crate::application::agent::AgentError;
use crate::domain::collaborators::CollaboratorError;
use crate::domain::message::{Content, Response};
use crate::domain::workflow::WorkflowError;
use crate::infrastructure::message_bus::BusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Duplicate registration, unknown ids, invalid definitions
    Configuration,
    /// Operation attempted from the wrong lifecycle or workflow state
    State,
    /// A deadline was exceeded
    Timeout,
    /// Unknown subscription, correlation id, conflict or project
    NotFound,
    /// A subscriber callback failed
    Handler,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Bus(BusError::NotRunning) => ErrorKind::State,
            CoreError::Agent(e) => match e {
                AgentError::InvalidState { .. } | AgentError::StopInProgress(_) => ErrorKind::State,
                AgentError::DuplicateAgent(_) | AgentError::UnknownAgent(_) => ErrorKind::Configuration,
                AgentError::Bus(BusError::NotRunning) => ErrorKind::State,
                AgentError::Handler { .. } => ErrorKind::Handler,
            },
            CoreError::Workflow(e) => match e {
                WorkflowError::DuplicateWorkflow(_)
                | WorkflowError::UnknownWorkflow(_)
                | WorkflowError::InvalidDefinition(_) => ErrorKind::Configuration,
                WorkflowError::InstanceNotFound(_) => ErrorKind::NotFound,
                WorkflowError::InvalidTransition { .. } => ErrorKind::State,
            },
            CoreError::Collaborator(e) => match e {
                CollaboratorError::NotFound(_) => ErrorKind::NotFound,
                CollaboratorError::AlreadyArchived(_) => ErrorKind::State,
                CollaboratorError::InvalidInput(_) => ErrorKind::Configuration,
                CollaboratorError::Unavailable(_) => ErrorKind::Handler,
            },
            CoreError::Timeout(_) => ErrorKind::Timeout,
            CoreError::Rejected(_) => ErrorKind::Handler,
            CoreError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

impl Response {
    /// Payload of a successful round trip; timeouts and unanswered requests
    /// become [`CoreError::Timeout`] and [`CoreError::NotFound`].
    pub fn into_result(self) -> Result<Content, CoreError> {
        if self.success {
            return Ok(self.payload);
        }
        match (self.timed_out, self.answered) {
            (true, _) => Err(CoreError::Timeout(
                self.error.unwrap_or_else(|| self.correlation_id.to_string()),
            )),
            (false, true) => Err(CoreError::Rejected(
                self.error.unwrap_or_else(|| "request".to_string()),
            )),
            (false, false) => Err(CoreError::NotFound(
                self.error.unwrap_or_else(|| "responder".to_string()),
            )),
        }
    }
}
