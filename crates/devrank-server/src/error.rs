//! HTTP-facing error type

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::response::ErrorResponse;
use crate::db::DbError;
use crate::harvest::QueueError;
use crate::ranking::RankingError;
use devrank_common::DevrankError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Validation(String),

    /// Request is valid but the subject does not qualify (e.g. too few followers)
    #[error("{0}")]
    Unprocessable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Unprocessable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INELIGIBLE"),
            AppError::Database(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                "A database error occurred".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

impl From<DbError> for AppError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => AppError::NotFound(msg),
            DbError::Sqlx(e) => AppError::Database(e),
            DbError::Migrate(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Database(e) => AppError::Database(e),
            QueueError::NotActive(_) => AppError::BadRequest(err.to_string()),
            QueueError::Corrupt(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<RankingError> for AppError {
    fn from(err: RankingError) -> Self {
        match err {
            RankingError::NotFound(msg) => AppError::NotFound(msg),
            RankingError::Ineligible { .. } => AppError::Unprocessable(err.to_string()),
            RankingError::Database(e) => AppError::from(e),
            RankingError::Gazetteer(_) => AppError::Internal(err.to_string()),
        }
    }
}

/// Shared parse failures are caller mistakes
impl From<DevrankError> for AppError {
    fn from(err: DevrankError) -> Self {
        match err {
            DevrankError::InvalidSubjectKey { .. } | DevrankError::InvalidJobKind(_) | DevrankError::Parse(_) => {
                AppError::Validation(err.to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, AppError>;
