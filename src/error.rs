//! Error types for the cache and quota subsystem
//!
//! Provides unified error handling using thiserror. Most of these never reach
//! application code: storage and corruption failures are recovered into
//! misses inside the cache, and only [`QuotaExceeded`] is meant to be acted on.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::ratelimit::QuotaScope;

// == Storage Error ==
/// Failure reported by a [`PersistentStore`](crate::storage::PersistentStore) backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing file or record could not be parsed
    #[error("Malformed storage data: {0}")]
    Format(String),

    /// Backend refused the operation
    #[error("Storage offline: {0}")]
    Offline(String),
}

// == Quota Exceeded ==
/// Typed rejection from the rate limiter.
///
/// Carries enough information for the caller to schedule a retry.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Quota exceeded for '{op_type}' ({scope}), retry after {retry_after_ms}ms")]
pub struct QuotaExceeded {
    /// Operation type that was rejected
    pub op_type: String,
    /// Which bucket rejected the call
    pub scope: QuotaScope,
    /// Milliseconds until the rejecting bucket can admit calls again
    pub retry_after_ms: u64,
}

// == Cache Error Enum ==
/// Unified error type for the subsystem.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Durable tier read or write failed
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    /// Stored bytes could not be decoded or decrypted
    #[error("Corrupt entry: {0}")]
    CorruptEntry(String),

    /// Call rejected by the rate limiter
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    /// A maintenance sweep over one namespace failed
    #[error("Maintenance sweep failed for '{namespace}': {reason}")]
    MaintenanceSweepFailure { namespace: String, reason: String },

    /// Namespace is not configured
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    /// Key not present (admin surface only)
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) | CacheError::UnknownNamespace(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            CacheError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::CorruptEntry(_)
            | CacheError::MaintenanceSweepFailure { .. }
            | CacheError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = match &self {
            CacheError::QuotaExceeded(q) => json!({
                "error": self.to_string(),
                "scope": q.scope,
                "retry_after_ms": q.retry_after_ms,
            }),
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the subsystem.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_status() {
        let err = CacheError::from(QuotaExceeded {
            op_type: "send-message".to_string(),
            scope: QuotaScope::Global,
            retry_after_ms: 1500,
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_storage_error_converts() {
        let err: CacheError = StorageError::Offline("disk full".to_string()).into();
        assert!(matches!(err, CacheError::StorageUnavailable(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_not_found_status() {
        let response = CacheError::NotFound("k".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
