//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use copydesk_db::DbError;
use copydesk_scheduler::{BrokerError, SchedulerError};
use serde_json::json;

/// API error type. Rendered as `{"error": ..., "code": ...}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict { code: &'static str, message: String },
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict {
            code: "CONFLICT",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg),
            ApiError::Conflict { code, message } => (StatusCode::CONFLICT, code, message),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", msg),
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<copydesk_core::Error> for ApiError {
    fn from(err: copydesk_core::Error) -> Self {
        use copydesk_core::Error;
        match err {
            Error::PolicyMissing(_) | Error::NotDue { .. } => ApiError::Conflict {
                code: err.code(),
                message: err.to_string(),
            },
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Conflict(msg) => ApiError::conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => ApiError::NotFound(msg),
            DbError::Duplicate(msg) => ApiError::conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::NotFound(id) => ApiError::NotFound(format!("job {}", id)),
            BrokerError::InvalidState { .. } => ApiError::conflict(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Core(e) => e.into(),
            SchedulerError::Db(e) => e.into(),
            SchedulerError::Broker(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copydesk_core::ClientId;

    #[test]
    fn test_policy_missing_is_conflict_with_named_code() {
        let response = ApiError::from(copydesk_core::Error::PolicyMissing(ClientId::new()))
            .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::from(copydesk_core::Error::InvalidInput("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(DbError::NotFound("schedule".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(BrokerError::NotFound("job-1".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(copydesk_core::Error::Internal("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
