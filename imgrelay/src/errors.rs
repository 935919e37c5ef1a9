use crate::api::models::relay::RelayFailureResponse;
use crate::relay::RelayError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data
    #[error("{message}")]
    BadRequest { message: String },

    /// No route matches the request path
    #[error("No route for {path}")]
    NotFound { path: String },

    /// The route exists but not for this method
    #[error("Method {method} not allowed")]
    MethodNotAllowed { method: String },

    /// A pipeline step could not talk to the source host or the image-editing API
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The remote job ended without producing output
    #[error("{message}")]
    JobFailed { message: String, data: Value },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Error::Relay(_) | Error::JobFailed { .. } => StatusCode::BAD_GATEWAY,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } | Error::JobFailed { message, .. } => message.clone(),
            Error::NotFound { .. } | Error::MethodNotAllowed { .. } | Error::Relay(_) => self.to_string(),
            Error::Internal { .. } => "Internal server error".to_string(),
        }
    }

    /// Raw diagnostic data passed back to the caller. Upstream failures always carry a `data`
    /// field, even when the upstream sent nothing.
    pub fn diagnostics(&self) -> Option<Value> {
        match self {
            Error::JobFailed { data, .. } => Some(data.clone()),
            Error::Relay(e) => Some(e.diagnostics().cloned().unwrap_or(Value::Null)),
            _ => None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Relay(_) | Error::JobFailed { .. } => {
                tracing::warn!("Relay error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::MethodNotAllowed { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = RelayFailureResponse {
            success: false,
            error: self.user_message(),
            data: self.diagnostics(),
        };
        (status, Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
