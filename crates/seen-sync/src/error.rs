//! Request-level failures and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::store::StoreError;

/// Every way a seen-list request can end without a success response.
#[derive(Debug, thiserror::Error)]
pub enum SeenError {
    #[error("no such resource")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("missing or incorrect pin")]
    InvalidPin,

    #[error("body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("body is valid JSON but not an array")]
    NotAnArray,

    #[error("failed to read body: {0}")]
    UnreadableBody(#[source] axum::Error),

    #[error("body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("store failure")]
    Store(#[from] StoreError),

    #[error("failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),
}

/// `{"error": "..."}` body shared by all JSON error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
}

impl SeenError {
    pub fn status(&self) -> StatusCode {
        match self {
            SeenError::NotFound => StatusCode::NOT_FOUND,
            SeenError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            SeenError::InvalidPin => StatusCode::FORBIDDEN,
            SeenError::UnreadableBody(_) | SeenError::InvalidJson(_) | SeenError::NotAnArray => {
                StatusCode::BAD_REQUEST
            }
            SeenError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SeenError::Store(_) | SeenError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SeenError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            SeenError::NotFound => return (status, "Not found").into_response(),
            SeenError::MethodNotAllowed => return (status, "Method not allowed").into_response(),
            SeenError::InvalidPin => "Invalid PIN",
            // Parse failures and wrong-shape bodies share one client contract.
            SeenError::UnreadableBody(_) | SeenError::InvalidJson(_) | SeenError::NotAnArray => {
                "Body must be a JSON array"
            }
            SeenError::BodyTooLarge { .. } => "Body too large",
            SeenError::Store(_) | SeenError::Encode(_) => "Storage failure",
        };
        (status, axum::Json(ErrorBody { error: message })).into_response()
    }
}
