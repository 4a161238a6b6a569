//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use ccp_core::controller::ControllerError;
use ccp_core::decision::DecisionError;

use crate::http::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    Controller(ControllerError),
    /// Malformed request.
    Validation(String),
}

impl From<ControllerError> for AppError {
    fn from(e: ControllerError) -> Self {
        AppError::Controller(e)
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Controller(e) => match e {
                ControllerError::UnknownTransferType(_)
                | ControllerError::UnknownWatchedDir(_)
                | ControllerError::MissingChain(_)
                | ControllerError::UnknownChoice(_)
                | ControllerError::Decision(DecisionError::UnavailableChoice(_)) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
                }
                ControllerError::DecisionNotFound => (StatusCode::NOT_FOUND, "DECISION_NOT_FOUND"),
                ControllerError::NotAwaiting => (StatusCode::NOT_FOUND, "NOT_AWAITING"),
                ControllerError::Decision(DecisionError::AlreadyResolved) => {
                    (StatusCode::CONFLICT, "ALREADY_RESOLVED")
                }
                ControllerError::Closed => (StatusCode::SERVICE_UNAVAILABLE, "CLOSED"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Controller(e) => e.to_string(),
            AppError::Validation(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        }

        let body = ApiResponse::error(code, message);
        (status, Json(body)).into_response()
    }
}
