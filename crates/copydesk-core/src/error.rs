//! Error types for Copydesk.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::collaborator::PipelineStep;
use crate::{ClientId, ScheduleId};

#[derive(Debug, Error)]
pub enum Error {
    /// The client has no active schedule, so automation may not run.
    #[error("NO_SCHEDULE_SET: client {0} has no active schedule")]
    PolicyMissing(ClientId),

    /// The client has active schedules but none of them is due yet.
    #[error("not due: next run at {next_run_at}")]
    NotDue { next_run_at: DateTime<Utc> },

    #[error("{step} step failed: {message}")]
    StepFailure { step: PipelineStep, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("schedule {schedule_id} execution failed: {message}")]
    ScheduleExecution {
        schedule_id: ScheduleId,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn step(step: PipelineStep, message: impl Into<String>) -> Self {
        Error::StepFailure {
            step,
            message: message.into(),
        }
    }

    /// Stable machine-readable code, surfaced to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Error::PolicyMissing(_) => "NO_SCHEDULE_SET",
            Error::NotDue { .. } => "NOT_DUE",
            Error::StepFailure { .. } => "STEP_FAILURE",
            Error::Timeout(_) => "TIMEOUT",
            Error::ScheduleExecution { .. } => "SCHEDULE_EXECUTION_FAILURE",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Conflict(_) => "CONFLICT",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_missing_carries_named_code() {
        let err = Error::PolicyMissing(ClientId::new());
        assert_eq!(err.code(), "NO_SCHEDULE_SET");
        assert!(err.to_string().starts_with("NO_SCHEDULE_SET"));
    }

    #[test]
    fn test_step_failure_names_the_step() {
        let err = Error::step(PipelineStep::Article, "upstream returned 502");
        assert_eq!(err.to_string(), "article step failed: upstream returned 502");
    }
}
