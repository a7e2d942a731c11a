//! HTTP error handling and response mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hub_engine::HubError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ServerError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            ServerError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found_error"),
            ServerError::Hub(err) => match err {
                HubError::ModelNotFound(_) | HubError::SessionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found_error")
                }
                HubError::ContextAlreadyExists(_) | HubError::SessionBusy(_) => {
                    (StatusCode::CONFLICT, "conflict_error")
                }
                HubError::MaxInstancesReached { .. } => {
                    (StatusCode::TOO_MANY_REQUESTS, "capacity_error")
                }
                HubError::Tokenization(_) | HubError::StateSizeMismatch { .. } => {
                    (StatusCode::BAD_REQUEST, "invalid_request_error")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
            },
        }
    }

    /// JSON body shared by error responses and SSE error events.
    pub fn body(&self) -> serde_json::Value {
        let (_, error_type) = self.parts();
        json!({
            "error": {
                "message": self.to_string(),
                "type": error_type,
            }
        })
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, _) = self.parts();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}
