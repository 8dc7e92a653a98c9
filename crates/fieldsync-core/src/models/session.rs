//! Checkout session metadata persisted alongside a local dataset.

use serde::{Deserialize, Serialize};

/// Lease granted by the server when a dataset is checked out.
///
/// Persisted in the dataset sidecar so the upload flow can present the
/// edit token and expected base version later. The token authorizes
/// uploads for this checkout only and is redacted from debug output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    /// Server-side dataset identity.
    pub dataset_id: i64,
    /// Opaque lease token presented on upload.
    pub edit_token: String,
    /// Dataset version the snapshot was taken at.
    pub base_version: i64,
    /// Content hash of the snapshot, for cache validation.
    pub snapshot_hash: String,
    /// Number of features in the snapshot at checkout time.
    pub feature_count: u64,
    /// RFC 3339 expiry of the lease.
    pub expires_at: String,
    /// Validator (`ETag`) for conditional snapshot re-download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_validator: Option<String>,
    /// RFC 3339 timestamp of the local materialization.
    pub downloaded_at: String,
}

impl std::fmt::Debug for CheckoutSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutSession")
            .field("dataset_id", &self.dataset_id)
            .field("edit_token", &"[REDACTED]")
            .field("base_version", &self.base_version)
            .field("snapshot_hash", &self.snapshot_hash)
            .field("feature_count", &self.feature_count)
            .field("expires_at", &self.expires_at)
            .field("cache_validator", &self.cache_validator)
            .field("downloaded_at", &self.downloaded_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CheckoutSession {
        CheckoutSession {
            dataset_id: 42,
            edit_token: "tok-abc123".to_string(),
            base_version: 17,
            snapshot_hash: "sha256:deadbeef".to_string(),
            feature_count: 250,
            expires_at: "2026-09-01T00:00:00Z".to_string(),
            cache_validator: Some("\"v17\"".to_string()),
            downloaded_at: "2026-08-25T12:00:00Z".to_string(),
        }
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["datasetId"], 42);
        assert_eq!(json["editToken"], "tok-abc123");
        assert_eq!(json["baseVersion"], 17);
        assert_eq!(json["cacheValidator"], "\"v17\"");
    }

    #[test]
    fn debug_redacts_token() {
        let rendered = format!("{:?}", sample());
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("tok-abc123"));
    }

    #[test]
    fn missing_validator_deserializes_as_none() {
        let session: CheckoutSession = serde_json::from_str(
            r#"{
                "datasetId": 1,
                "editToken": "t",
                "baseVersion": 1,
                "snapshotHash": "h",
                "featureCount": 0,
                "expiresAt": "2026-09-01T00:00:00Z",
                "downloadedAt": "2026-08-25T12:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(session.cache_validator, None);
    }
}
