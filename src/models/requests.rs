//! Request DTOs for the admin API
//!
//! Defines the structure of incoming HTTP request bodies.

use serde::Deserialize;
use serde_json::Value;

/// Request body for `PUT /cache/:namespace/:key`
///
/// # Fields
/// - `value`: Any JSON document; stored as its serialized bytes
/// - `ttl_ms`: Optional TTL in milliseconds (namespace default if absent)
/// - `version`: Optional monotonic version; older or equal versions are discarded
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    pub value: Value,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub version: Option<u64>,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.ttl_ms == Some(0) {
            return Some("TTL must be positive".to_string());
        }
        None
    }
}

/// Query for `POST /sweep/:namespace`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SweepQuery {
    /// Overrides the configured batch size
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_request_deserialize() {
        let json = r#"{"value": {"title": "bike"}}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.value["title"], "bike");
        assert!(req.ttl_ms.is_none());
        assert!(req.version.is_none());
    }

    #[test]
    fn test_set_request_with_ttl_and_version() {
        let json = r#"{"value": 3, "ttl_ms": 60000, "version": 7}"#;
        let req: SetRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.ttl_ms, Some(60_000));
        assert_eq!(req.version, Some(7));
        assert!(req.validate().is_none());
    }

    #[test]
    fn test_validate_zero_ttl() {
        let req = SetRequest {
            value: Value::Null,
            ttl_ms: Some(0),
            version: None,
        };
        assert!(req.validate().is_some());
    }
}
