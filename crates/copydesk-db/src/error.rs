//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid stored value: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<copydesk_core::Error> for DbError {
    fn from(err: copydesk_core::Error) -> Self {
        DbError::InvalidData(err.to_string())
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
