//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use serde_json::Value;

use crate::cache::{StatsSnapshot, SweepReport, WriteOutcome};
use crate::ratelimit::BucketState;

/// Response body for `GET /cache/:namespace/:key`
///
/// Values that are not JSON (written through a bytes codec) are returned
/// base64-encoded in `value_base64` instead of `value`.
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub namespace: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_base64: Option<String>,
}

impl GetResponse {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, raw: &[u8]) -> Self {
        let (value, value_base64) = match serde_json::from_slice(raw) {
            Ok(value) => (Some(value), None),
            Err(_) => (None, Some(STANDARD.encode(raw))),
        };
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value,
            value_base64,
        }
    }
}

/// Response body for set and delete
#[derive(Debug, Clone, Serialize)]
pub struct WriteResponse {
    pub namespace: String,
    pub key: String,
    pub outcome: WriteOutcome,
}

impl WriteResponse {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, outcome: WriteOutcome) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            outcome,
        }
    }
}

/// Response body for `GET /cache/:namespace`
#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub namespace: String,
    pub count: usize,
    pub keys: Vec<String>,
}

impl KeysResponse {
    pub fn new(namespace: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            namespace: namespace.into(),
            count: keys.len(),
            keys,
        }
    }
}

/// Response body for `DELETE /cache/:namespace`
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub namespace: String,
}

impl ClearResponse {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            message: format!("Namespace '{}' cleared", namespace),
            namespace,
        }
    }
}

/// Response body for quota check and inspection
#[derive(Debug, Clone, Serialize)]
pub struct QuotaResponse {
    pub actor: String,
    pub op_type: String,
    pub allowed: bool,
    pub remaining: u64,
    pub state: BucketState,
}

/// Response body for `DELETE /quota/:actor`
#[derive(Debug, Clone, Serialize)]
pub struct ResetResponse {
    pub actor: String,
    pub buckets_cleared: usize,
}

/// Response body for the stats endpoint (`GET /stats`)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub namespaces: Vec<NamespaceStats>,
    pub maintenance_cycles: u64,
    pub maintenance_running: bool,
}

/// One namespace in [`StatsResponse`]
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceStats {
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    pub last_sweep_ms: u64,
}

impl NamespaceStats {
    pub fn new(stats: StatsSnapshot, last_sweep_ms: u64) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            stats,
            last_sweep_ms,
        }
    }
}

/// Response body for `POST /sweep/:namespace`
#[derive(Debug, Clone, Serialize)]
pub struct SweepResponse {
    #[serde(flatten)]
    pub report: SweepReport,
    pub removed: usize,
}

impl From<SweepReport> for SweepResponse {
    fn from(report: SweepReport) -> Self {
        Self {
            removed: report.removed(),
            report,
        }
    }
}

/// Response body for the health endpoint (`GET /health`)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
