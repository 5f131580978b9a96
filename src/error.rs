use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{match_record::RecordError, state_machine::InvalidTransition},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend failed; transient, the caller may retry.
    #[error("match store unavailable")]
    StoreUnavailable(#[source] StorageError),
    /// A watch subscription dropped; the controller re-reads and re-subscribes.
    #[error("match store watch disconnected: {0}")]
    Disconnected(String),
    /// Application is running in degraded mode without storage.
    #[error("match store unavailable (degraded mode)")]
    Degraded,
    /// The match id (join code) does not resolve to a match.
    #[error("match `{0}` not found")]
    MatchNotFound(String),
    /// Another player already took the joiner seat.
    #[error("match `{0}` already has an opponent")]
    MatchFull(String),
    /// A guarded write lost the race: its preconditions no longer hold.
    #[error("match changed before the write could apply")]
    WriteConflict,
    /// Caller did not identify itself or is not part of the match.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current match state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Stored snapshot failed validation and was quarantined.
    #[error("match `{match_id}` is corrupted")]
    Corrupted {
        match_id: String,
        #[source]
        source: RecordError,
    },
}

impl ServiceError {
    /// Failures worth a retry, as opposed to answers about the match itself.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::StoreUnavailable(_) | ServiceError::Disconnected(_) | ServiceError::Degraded
        )
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Disconnected { message } => ServiceError::Disconnected(message),
            other => ServiceError::StoreUnavailable(other),
        }
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::StoreUnavailable(source) => {
                AppError::ServiceUnavailable(format!("{message}: {source}"))
            }
            ServiceError::Disconnected(_) | ServiceError::Degraded => {
                AppError::ServiceUnavailable(message)
            }
            ServiceError::MatchNotFound(_) => AppError::NotFound(message),
            ServiceError::MatchFull(_)
            | ServiceError::WriteConflict
            | ServiceError::InvalidState(_) => AppError::Conflict(message),
            ServiceError::Unauthorized(reason) => AppError::Unauthorized(reason),
            ServiceError::InvalidInput(reason) => AppError::BadRequest(reason),
            ServiceError::Corrupted { source, .. } => {
                AppError::Internal(format!("{message}: {source}"))
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_disconnects_stay_distinct_from_outages() {
        let err: ServiceError = StorageError::disconnected("feed closed").into();
        assert!(matches!(err, ServiceError::Disconnected(_)));
        assert!(err.is_transient());
        assert!(!ServiceError::MatchFull("m1".into()).is_transient());
    }

    #[test]
    fn match_errors_map_to_http_statuses() {
        let status = |err: ServiceError| AppError::from(err).into_response().status();
        assert_eq!(status(ServiceError::MatchNotFound("m".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(ServiceError::MatchFull("m".into())), StatusCode::CONFLICT);
        assert_eq!(status(ServiceError::WriteConflict), StatusCode::CONFLICT);
        assert_eq!(status(ServiceError::Degraded), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(ServiceError::InvalidInput("bad".into())),
            StatusCode::BAD_REQUEST
        );
    }
}
