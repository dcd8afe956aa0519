use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing json")]
    MissingJson,
    #[error("bad lat/lon")]
    BadCoordinates,
    #[error("not found")]
    NotFound,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingJson | ApiError::BadCoordinates => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Clients match on these exact bodies; an unknown device gets an
    /// empty object rather than an error envelope.
    fn body(&self) -> Value {
        match self {
            ApiError::NotFound => json!({}),
            other => json!({ "error": other.to_string() }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}
