use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chat_core::error::ChatError;
use serde_json::json;

/// Error returned by route handlers, rendered as
/// `{"error": {"kind": ..., "message": ...}}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Chat(ChatError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Chat(err) => match err {
                ChatError::NotFound(_) => StatusCode::NOT_FOUND,
                ChatError::Connection { .. } | ChatError::Provider(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::Chat(err) => err.kind(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        ApiError::Chat(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Chat(err) => err.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "Request failed: {}", message);
        } else {
            tracing::debug!(kind = self.kind(), "Request rejected: {}", message);
        }
        let body = json!({"error": {"kind": self.kind(), "message": message}});
        (status, Json(body)).into_response()
    }
}
