use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::ThesiaError;

/// Failure of an API call, rendered as `{"detail": ...}`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    UnprocessableEntity(String),

    #[error("{0}")]
    Internal(String),
}

impl From<ThesiaError> for ApiError {
    #[inline]
    fn from(err: ThesiaError) -> Self {
        match err {
            ThesiaError::InvalidQuestion(message) => Self::BadRequest(message),
            other => {
                error!("Query failed: {}", other);
                Self::Internal(other.to_string())
            }
        }
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    #[inline]
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            Self::UnprocessableEntity(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            Self::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail),
        };

        (status, Json(ErrorResponse { detail })).into_response()
    }
}
