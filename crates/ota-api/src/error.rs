use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, message: msg.into() }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ApiError { status: StatusCode::GATEWAY_TIMEOUT, message: msg.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<ota_auth::AuthError> for ApiError {
    fn from(e: ota_auth::AuthError) -> Self {
        match e {
            ota_auth::AuthError::Timeout => ApiError::timeout(e.to_string()),
            _ => ApiError::internal(e.to_string()),
        }
    }
}
