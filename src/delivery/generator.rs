//! Report generator abstraction.
//!
//! Content computation is an external collaborator: the host application
//! plugs in its own generator. The pipeline only requires that generation is
//! idempotent for identical parameters within one evaluation window, which
//! is what change detection relies on.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::error::AppResult;

/// Generated report content plus the named metrics that distribution
/// conditions evaluate against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPayload {
    pub data: JsonValue,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

impl ReportPayload {
    pub fn new(data: JsonValue) -> Self {
        Self {
            data,
            metrics: HashMap::new(),
        }
    }

    /// Stable SHA-256 fingerprint of the payload content.
    ///
    /// serde_json maps are ordered, so logically equal payloads produce
    /// identical fingerprints across process restarts.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(&self.data).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Produces report payloads on demand.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Generates the payload for a report type with the given parameters.
    ///
    /// A hard failure here is treated as a permanent delivery error: it is
    /// recorded once and never retried.
    async fn generate(&self, report_type: &str, parameters: &JsonValue) -> AppResult<ReportPayload>;
}

/// Placeholder generator used when the host application has not wired a
/// real one. Echoes the request so the pipeline stays exercisable
/// end to end.
#[derive(Debug, Default)]
pub struct StubReportGenerator;

#[async_trait]
impl ReportGenerator for StubReportGenerator {
    async fn generate(&self, report_type: &str, parameters: &JsonValue) -> AppResult<ReportPayload> {
        Ok(ReportPayload::new(serde_json::json!({
            "report_type": report_type,
            "parameters": parameters,
            "records": [],
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = ReportPayload::new(json!({ "rows": [1] }));
        let b = ReportPayload::new(json!({ "rows": [2] }));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let payload = ReportPayload::new(json!({}));
        let fingerprint = payload.fingerprint();
        assert_eq!(fingerprint.len(), 64);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_stub_generator_is_deterministic() {
        let generator = StubReportGenerator;
        let params = json!({ "window": "last_month" });
        let a = generator.generate("credentialing", &params).await.unwrap();
        let b = generator.generate("credentialing", &params).await.unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
