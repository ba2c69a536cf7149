//! API Error Types
//!
//! Maps view, backend and registry failures onto HTTP statuses and the
//! `{error: {code, message}, request_id}` envelope.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;
use crate::sync::RegistryError;
use crate::views::ViewError;

/// Message shown to the user when an action costs more than the balance
pub const INSUFFICIENT_COINS_MESSAGE: &str = "Not enough coins!";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Balance too low; nothing was written
    #[error("{}", INSUFFICIENT_COINS_MESSAGE)]
    InsufficientCoins { balance: i64, price: i64 },

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Room(#[from] RegistryError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<ViewError> for ApiError {
    fn from(err: ViewError) -> Self {
        match err {
            ViewError::Validation(msg) => ApiError::Validation(msg),
            ViewError::TaskNotFound(id) => ApiError::NotFound(format!("Task {} not found", id)),
            ViewError::InsufficientCoins { balance, price } => {
                ApiError::InsufficientCoins { balance, price }
            }
            ViewError::Backend(e) => ApiError::Backend(e),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::InsufficientCoins { .. } => (StatusCode::CONFLICT, "INSUFFICIENT_COINS"),
            ApiError::Backend(BackendError::Unavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_UNAVAILABLE")
            }
            ApiError::Backend(BackendError::Timeout) => {
                (StatusCode::GATEWAY_TIMEOUT, "BACKEND_TIMEOUT")
            }
            ApiError::Backend(_) => (StatusCode::BAD_GATEWAY, "BACKEND_ERROR"),
            ApiError::Room(RegistryError::InvalidRoom(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_ROOM")
            }
            ApiError::Room(RegistryError::TooManyRooms(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "ROOM_LIMIT")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(request_id = %request_id, error_code = %code, error_message = %self, "API error occurred");
        } else {
            tracing::info!(request_id = %request_id, error_code = %code, error_message = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_coins_maps_to_conflict() {
        let err = ApiError::from(ViewError::InsufficientCoins {
            balance: 1,
            price: 5,
        });
        assert_eq!(err.to_string(), "Not enough coins!");
        assert_eq!(
            err.status_and_code(),
            (StatusCode::CONFLICT, "INSUFFICIENT_COINS")
        );
    }

    #[test]
    fn test_backend_errors_map_to_gateway_statuses() {
        assert_eq!(
            ApiError::Backend(BackendError::Unavailable).status_and_code().0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Backend(BackendError::Decode("bad".into()))
                .status_and_code()
                .0,
            StatusCode::BAD_GATEWAY
        );
    }
}
