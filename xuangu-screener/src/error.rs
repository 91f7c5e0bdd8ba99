//! HTTP-facing error type for the screening service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::store::StoreError;

/// Errors returned by route handlers and middleware.
///
/// Rendered as `{"code": <status>, "error": <message>}`.
#[derive(Debug, thiserror::Error)]
pub enum ScreenerError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl ScreenerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ScreenerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ScreenerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ScreenerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ScreenerError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ScreenerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "code": status.as_u16(),
            "error": self.to_string(),
        });
        (status, axum::Json(body)).into_response()
    }
}
