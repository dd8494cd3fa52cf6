use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::error::{JoinError, LobbyError, StoreError, TickError};

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// JSON error response: `{code, message}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        let message = err.to_string();
        match err {
            JoinError::GameNotFound(_) => Self::not_found(message),
            JoinError::AlreadyStarted(_) => Self::new(StatusCode::CONFLICT, "already_started", message),
            JoinError::AlreadyJoined { .. } => {
                Self::new(StatusCode::CONFLICT, "already_joined", message)
            }
            JoinError::GameFull(_) => Self::new(StatusCode::CONFLICT, "game_full", message),
            JoinError::Contention(_) => Self::new(StatusCode::CONFLICT, "contention", message),
            JoinError::Store(err) => err.into(),
        }
    }
}

impl From<LobbyError> for ApiError {
    fn from(err: LobbyError) -> Self {
        match err {
            LobbyError::Store(err) => err.into(),
            other => Self::bad_request(other.to_string()),
        }
    }
}

impl From<TickError> for ApiError {
    fn from(err: TickError) -> Self {
        let message = err.to_string();
        match err {
            TickError::GameVanished(_) => Self::not_found(message),
            TickError::NotStarted(_) => Self::new(StatusCode::CONFLICT, "not_started", message),
            TickError::Conflict { .. } => Self::new(StatusCode::CONFLICT, "tick_conflict", message),
            TickError::Store(err) => err.into(),
            TickError::System { .. } | TickError::Poisoned => Self::internal(message),
        }
    }
}
