//! Crate-wide error taxonomy, mapped onto the public HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Convenience alias for fallible pipeline/handler operations.
pub type AppResult<T> = Result<T, AppError>;

/// The six error kinds observable at the public surface, plus the internal
/// failures that get folded into `ServiceUnavailable` once logged.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// The token bucket rejected the request. Never cached.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Suggested wait before retrying, in seconds.
        retry_after_secs: u64,
    },

    /// The identifier is persistently known to be unavailable.
    #[error("not found")]
    NotFound,

    /// Upstream returned 401/403; a reauth cycle has been scheduled.
    #[error("unauthorized, retry later")]
    Unauthorized,

    /// The archive body did not start with the ZIP local-file-header magic.
    #[error("unprocessable archive")]
    Unprocessable,

    /// The upstream session is disabled because no credentials are configured.
    #[error("upstream disabled")]
    Locked,

    /// Unclassified upstream failure, or an internal I/O/DB error that was
    /// logged and downgraded rather than propagated verbatim.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<crate::upstream::UpstreamError> for AppError {
    fn from(err: crate::upstream::UpstreamError) -> Self {
        tracing::error!(error = %err, "upstream session error");
        AppError::ServiceUnavailable("upstream session error".to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "database error");
        AppError::ServiceUnavailable("database error".to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        tracing::error!(error = %err, "upstream request error");
        AppError::ServiceUnavailable("upstream request error".to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        tracing::error!(error = %err, "io error");
        AppError::ServiceUnavailable("io error".to_string())
    }
}

impl AppError {
    /// The status code this error kind maps to, per the documented error
    /// taxonomy.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Unprocessable => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Locked => StatusCode::LOCKED,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
