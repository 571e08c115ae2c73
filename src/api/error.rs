use crate::media::MediaError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing fields, rejected files, malformed multipart bodies.
    #[error("{0}")]
    Validation(String),

    #[error("File not found")]
    NotFound,

    #[error("Invalid range")]
    RangeNotSatisfiable,

    /// Tool details stay in the logs, never in the response body.
    #[error("Video processing failed")]
    Processing(#[from] MediaError),

    #[error("Internal server error")]
    Internal(#[from] std::io::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            ApiError::Processing(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(source) = &self {
            error!(?source, "Request failed with internal error");
        }

        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_errors_are_generic() {
        let err = ApiError::from(MediaError::Failed {
            status: "exit status: 1".into(),
            stderr: "/secret/path/font.ttf: No such file".into(),
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "Video processing failed");
    }

    #[test]
    fn validation_is_bad_request() {
        let err = ApiError::validation("Missing required field(s): address");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "Missing required field(s): address");
    }
}
