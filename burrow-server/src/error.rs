//! Server error types

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use burrow_core::{TunnelError, ValidationError, ValidationErrors};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while running the burrow server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the specified address
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

/// Body of every non-validation error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of a 400 response for a rejected tunnel config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub errors: Vec<ValidationError>,
}

/// A [`TunnelError`] on its way out of a handler
#[derive(Debug)]
pub struct ApiError(pub TunnelError);

impl From<TunnelError> for ApiError {
    fn from(err: TunnelError) -> Self {
        Self(err)
    }
}

/// An unreadable request body is reported like any other rejected field
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let error = ValidationError::new("body", rejection.body_text());
        Self(TunnelError::Validation(ValidationErrors(vec![error])))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            TunnelError::Validation(_) => StatusCode::BAD_REQUEST,
            TunnelError::UnknownProvider(_) | TunnelError::NotFound(_) => StatusCode::NOT_FOUND,
            TunnelError::StaleState { .. } | TunnelError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            TunnelError::Provider(_) => StatusCode::BAD_GATEWAY,
            TunnelError::Closed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self.0 {
            TunnelError::Validation(errors) => (
                status,
                Json(ValidationResponse {
                    errors: errors.0,
                }),
            )
                .into_response(),
            other => {
                if status.is_server_error() {
                    tracing::error!("Request failed: {}", other);
                }
                (
                    status,
                    Json(ErrorResponse {
                        error: other.to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}
