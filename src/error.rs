use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::{identity::IdentityError, storage::StorageError},
    state::{feed_machine::InvalidFeedTransition, session_machine::InvalidSessionTransition},
};

/// Errors raised by the room synchronization core.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Input was rejected before reaching the store (empty name, blank message, bad code).
    #[error("invalid input: {0}")]
    Validation(String),
    /// Requested room or code does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Caller is not allowed to perform the mutation under the configured host policy.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Store or identity provider failed; the caller may retry.
    #[error("upstream unavailable: {0}")]
    Upstream(#[source] StorageError),
    /// Join-code generation kept colliding with active rooms.
    #[error("could not allocate a unique room code after {attempts} attempts")]
    CodeSpaceExhausted {
        /// Number of candidate codes tried.
        attempts: u32,
    },
    /// Operation cannot be performed in the current session phase.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { relation, id } => {
                ServiceError::NotFound(format!("{relation} `{id}` not found"))
            }
            other => ServiceError::Upstream(other),
        }
    }
}

impl From<IdentityError> for ServiceError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Storage(source) => source.into(),
            IdentityError::InvalidInput(message) => ServiceError::Validation(message),
            err @ IdentityError::UsernameTaken(_) => ServiceError::Validation(err.to_string()),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

impl From<InvalidSessionTransition> for ServiceError {
    fn from(err: InvalidSessionTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<InvalidFeedTransition> for ServiceError {
    fn from(err: InvalidFeedTransition) -> Self {
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
    /// A third-party upstream (music catalog) failed.
    #[error("bad gateway: {0}")]
    BadGateway(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::Upstream(source) => AppError::ServiceUnavailable(source.to_string()),
            err @ ServiceError::CodeSpaceExhausted { .. } => AppError::Internal(err.to_string()),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        ServiceError::from(err).into()
    }
}

#[cfg(feature = "music-proxy")]
impl From<crate::services::music_service::MusicError> for AppError {
    fn from(err: crate::services::music_service::MusicError) -> Self {
        use crate::services::music_service::MusicError;
        match err {
            err @ MusicError::NotConfigured => AppError::ServiceUnavailable(err.to_string()),
            MusicError::InvalidQuery(message) => AppError::BadRequest(message),
            other => AppError::BadGateway(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            error: self.to_string(),
        });

        (status, payload).into_response()
    }
}
