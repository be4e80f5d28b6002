use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::services::generation_cache::CacheAsideError;
use crate::services::generation_client::GenerationError;
use crate::storage::StoreError;

static EXPOSE_DETAILS: AtomicBool = AtomicBool::new(true);

/// Controls whether error responses carry internal detail. Set once at startup
/// from the configured environment.
pub fn set_expose_details(expose: bool) {
    EXPOSE_DETAILS.store(expose, Ordering::Relaxed);
}

fn expose_details() -> bool {
    EXPOSE_DETAILS.load(Ordering::Relaxed)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    RateConflict {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{message}")]
    Upstream {
        message: String,
        detail: Option<String>,
    },

    #[error("{message}")]
    Store {
        message: String,
        detail: Option<String>,
    },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn rate_conflict(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        ApiError::RateConflict {
            message: message.into(),
            retry_after,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn upstream(message: impl Into<String>, detail: impl ToString) -> Self {
        ApiError::Upstream {
            message: message.into(),
            detail: Some(detail.to_string()),
        }
    }

    pub fn store(message: impl Into<String>, detail: impl ToString) -> Self {
        ApiError::Store {
            message: message.into(),
            detail: Some(detail.to_string()),
        }
    }

    /// Stable machine-readable kind carried in every error body.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::RateConflict { .. } => "rate_conflict",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Upstream { .. } => "upstream_failure",
            ApiError::Store { .. } => "store_failure",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateConflict { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Upstream { .. } | ApiError::Store { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Upstream { detail, .. } | ApiError::Store { detail, .. } => detail.as_deref(),
            _ => None,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => ApiError::rate_conflict(message, None),
            other => ApiError::store("Storage operation failed", other),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(err: GenerationError) -> Self {
        ApiError::upstream("Content generation failed", err)
    }
}

impl From<CacheAsideError> for ApiError {
    fn from(err: CacheAsideError) -> Self {
        match err {
            CacheAsideError::Generation(e) => e.into(),
            CacheAsideError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(kind = self.kind(), detail = ?self.detail(), "{}", self);
        }

        let mut body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });
        if expose_details() {
            if let Some(detail) = self.detail() {
                body["detail"] = serde_json::Value::String(detail.to_string());
            }
        }

        let mut response = (status, Json(body)).into_response();
        if let ApiError::RateConflict {
            retry_after: Some(wait),
            ..
        } = &self
        {
            let seconds = wait.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_documented_statuses() {
        let cases = [
            (ApiError::validation("bad"), StatusCode::BAD_REQUEST, "validation_error"),
            (ApiError::not_found("gone"), StatusCode::NOT_FOUND, "not_found"),
            (
                ApiError::rate_conflict("slow down", None),
                StatusCode::TOO_MANY_REQUESTS,
                "rate_conflict",
            ),
            (
                ApiError::upstream("provider", "boom"),
                StatusCode::INTERNAL_SERVER_ERROR,
                "upstream_failure",
            ),
            (
                ApiError::store("db", "down"),
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_failure",
            ),
        ];

        for (err, status, kind) in cases {
            assert_eq!(err.status(), status);
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn store_conflict_becomes_rate_conflict() {
        let err: ApiError = StoreError::Conflict("cooldown".into()).into();
        assert_eq!(err.kind(), "rate_conflict");
    }

    #[test]
    fn rate_conflict_sets_retry_after() {
        let response =
            ApiError::rate_conflict("Too many requests", Some(Duration::from_secs(42)))
                .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }
}
