//! Scheduler and broker error types.

use copydesk_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job {id} is {state}, expected {expected}")]
    InvalidState {
        id: String,
        state: String,
        expected: String,
    },

    #[error("invalid stored job: {0}")]
    InvalidData(String),

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Core(#[from] copydesk_core::Error),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl SchedulerError {
    /// Stable machine-readable code for API callers.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Core(e) => e.code(),
            SchedulerError::Db(DbError::NotFound(_)) => "NOT_FOUND",
            SchedulerError::Broker(BrokerError::NotFound(_)) => "NOT_FOUND",
            SchedulerError::Broker(BrokerError::InvalidState { .. }) => "CONFLICT",
            SchedulerError::Db(_) | SchedulerError::Broker(_) => "INTERNAL",
        }
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
