//! Error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::logic::pipeline::SubmitError;
use crate::logic::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    // Request errors
    BadRequest(String),
    NotFound(String),

    // Lifecycle errors
    IllegalTransition(String),

    // Backpressure
    Overloaded,

    // Generic errors
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::IllegalTransition(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Overloaded => (
                StatusCode::TOO_MANY_REQUESTS,
                "pipeline overloaded, retry with backoff".to_string(),
            ),
            AppError::InternalError(msg) => {
                tracing::error!("internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => AppError::NotFound(format!("incident {} not found", id)),
            StoreError::IllegalTransition { .. } => AppError::IllegalTransition(err.to_string()),
            StoreError::WriteFailure(msg) => AppError::InternalError(msg),
        }
    }
}

impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Overloaded => AppError::Overloaded,
            SubmitError::Closed => AppError::InternalError("pipeline closed".to_string()),
        }
    }
}
