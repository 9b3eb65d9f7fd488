//! API Handlers
//!
//! HTTP request handlers for the admin endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::debug;

use crate::cache::{CacheManager, Lookup, MissReason};
use crate::error::{CacheError, Result};
use crate::models::{
    ClearResponse, GetResponse, HealthResponse, KeysResponse, NamespaceStats, QuotaResponse,
    ResetResponse, SetRequest, StatsResponse, SweepQuery, SweepResponse, WriteResponse,
};
use crate::ratelimit::{Decision, RateLimiter};
use crate::tasks::{CycleReport, MaintenanceWorker};

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub caches: Arc<CacheManager>,
    pub limiter: Arc<RateLimiter>,
    pub maintenance: Arc<MaintenanceWorker>,
    /// Batch size for admin-triggered sweeps
    pub sweep_batch_size: usize,
}

impl AppState {
    pub fn new(
        caches: Arc<CacheManager>,
        limiter: Arc<RateLimiter>,
        maintenance: Arc<MaintenanceWorker>,
        sweep_batch_size: usize,
    ) -> Self {
        Self {
            caches,
            limiter,
            maintenance,
            sweep_batch_size,
        }
    }
}

// == Cache Handlers ==

/// Handler for PUT /cache/:namespace/:key
pub async fn set_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
    Json(req): Json<SetRequest>,
) -> Result<Json<WriteResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let cache = state.caches.namespace(&namespace)?;
    let bytes = serde_json::to_vec(&req.value)
        .map_err(|e| CacheError::InvalidRequest(format!("value not serializable: {e}")))?;
    let outcome = match req.version {
        Some(version) => cache.set_versioned(&key, bytes, req.ttl_ms, version).await?,
        None => cache.set(&key, bytes, req.ttl_ms).await?,
    };

    Ok(Json(WriteResponse::new(namespace, key, outcome)))
}

/// Handler for GET /cache/:namespace/:key
///
/// Every miss maps to 404; the reason is carried in the error message.
pub async fn get_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
) -> Result<Json<GetResponse>> {
    let cache = state.caches.namespace(&namespace)?;
    match cache.get(&key).await {
        Lookup::Hit(raw) => Ok(Json(GetResponse::new(namespace, key, &raw))),
        Lookup::Miss(reason) => {
            debug!(namespace = %namespace, key = %key, ?reason, "Admin read missed");
            Err(CacheError::NotFound(format!(
                "{}:{} ({})",
                namespace,
                key,
                miss_label(reason)
            )))
        }
    }
}

/// Handler for DELETE /cache/:namespace/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path((namespace, key)): Path<(String, String)>,
) -> Result<Json<WriteResponse>> {
    let cache = state.caches.namespace(&namespace)?;
    let outcome = cache.delete(&key).await;
    Ok(Json(WriteResponse::new(namespace, key, outcome)))
}

/// Handler for GET /cache/:namespace
pub async fn keys_handler(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<KeysResponse>> {
    let cache = state.caches.namespace(&namespace)?;
    let keys = cache.keys().await;
    Ok(Json(KeysResponse::new(namespace, keys)))
}

/// Handler for DELETE /cache/:namespace
pub async fn clear_handler(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<ClearResponse>> {
    let cache = state.caches.namespace(&namespace)?;
    cache.clear().await;
    Ok(Json(ClearResponse::new(namespace)))
}

/// Handler for POST /sweep/:namespace
pub async fn sweep_handler(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(query): Query<SweepQuery>,
) -> Result<Json<SweepResponse>> {
    let cache = state.caches.namespace(&namespace)?;
    let batch_size = query.batch_size.unwrap_or(state.sweep_batch_size);
    if batch_size == 0 {
        return Err(CacheError::InvalidRequest(
            "batch_size must be positive".to_string(),
        ));
    }
    let report = cache.sweep(batch_size).await?;
    Ok(Json(SweepResponse::from(report)))
}

/// Handler for POST /sweep
///
/// Forces a sweep of every namespace; failures are reported, not raised.
pub async fn sweep_all_handler(State(state): State<AppState>) -> Json<CycleReport> {
    Json(state.maintenance.sweep_all().await)
}

// == Quota Handlers ==

/// Handler for POST /quota/:op_type/:actor
///
/// Counts one call. A rejection is answered with 429 and the retry delay.
pub async fn check_quota_handler(
    State(state): State<AppState>,
    Path((op_type, actor)): Path<(String, String)>,
) -> Result<Json<QuotaResponse>> {
    match state.limiter.check(&actor, &op_type) {
        Decision::Allowed { remaining } => Ok(Json(QuotaResponse {
            state: state.limiter.state(&actor, &op_type),
            actor,
            op_type,
            allowed: true,
            remaining,
        })),
        Decision::Denied(rejection) => Err(rejection.into()),
    }
}

/// Handler for GET /quota/:op_type/:actor
///
/// Read-only; never counts a call.
pub async fn quota_handler(
    State(state): State<AppState>,
    Path((op_type, actor)): Path<(String, String)>,
) -> Json<QuotaResponse> {
    let remaining = state.limiter.remaining(&actor, &op_type);
    let bucket_state = state.limiter.state(&actor, &op_type);
    Json(QuotaResponse {
        allowed: remaining > 0,
        actor,
        op_type,
        remaining,
        state: bucket_state,
    })
}

/// Handler for DELETE /quota/:actor
pub async fn reset_quota_handler(
    State(state): State<AppState>,
    Path(actor): Path<String>,
) -> Json<ResetResponse> {
    let buckets_cleared = state.limiter.reset(&actor);
    Json(ResetResponse {
        actor,
        buckets_cleared,
    })
}

// == Service Handlers ==

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let namespaces = state
        .caches
        .caches()
        .iter()
        .map(|cache| NamespaceStats::new(cache.stats(), cache.last_sweep_ms()))
        .collect();

    Json(StatsResponse {
        namespaces,
        maintenance_cycles: state.maintenance.cycles(),
        maintenance_running: state.maintenance.is_running(),
    })
}

/// Handler for GET /health
pub async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse::healthy()))
}

fn miss_label(reason: MissReason) -> &'static str {
    match reason {
        MissReason::Absent => "absent",
        MissReason::Expired => "expired",
        MissReason::Corrupt => "corrupt",
        MissReason::StorageUnavailable => "storage unavailable",
    }
}
