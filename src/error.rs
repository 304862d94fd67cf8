//! Error kinds and propagation (spec.md §7 "Error handling design").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Empty text, invalid aspect ratio, etc. 400, no job created.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A word or every phrase variant is absent. Handled internally by the
    /// planner (emits a placeholder); never expected to cross the HTTP
    /// boundary, but kept as a variant so internal callers can match on it.
    #[error("catalog miss for {0:?}")]
    CatalogMiss(String),

    /// Network / 5xx / rate-limit on a fetch attempt. Retried with backoff;
    /// surfaces only after retries are exhausted, and even then is
    /// swallowed into a placeholder substitution by the orchestrator.
    #[error("transient fetch failure: {0}")]
    FetchTransient(String),

    /// 404 / 410 / 403 / region-lock. Not retried.
    #[error("permanent fetch failure: {0}")]
    FetchPermanent(String),

    /// Encoder error transcoding a single pick.
    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    /// Encoder error joining intermediates. Always fatal to the job.
    #[error("concat failed: {0}")]
    ConcatFailed(String),

    /// Remote enhancement job errored or timed out. Never fatal.
    #[error("enhancement failed: {0}")]
    EnhanceFailed(String),

    /// Job cancelled by its caller.
    #[error("cancelled")]
    Cancelled,

    /// A requested generated file is missing or its name escapes the
    /// output directory (spec.md §6 `GET /videos/{filename}`).
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoder error: {0}")]
    Encoder(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Cancelled => StatusCode::from_u16(499).unwrap(),
            AppError::CatalogMiss(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::FetchTransient(_)
            | AppError::FetchPermanent(_)
            | AppError::TranscodeFailed(_)
            | AppError::EnhanceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConcatFailed(_)
            | AppError::Database(_)
            | AppError::Io(_)
            | AppError::Encoder(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
