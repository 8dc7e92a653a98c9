//! Storage-agnostic container interface and snapshot parsing.
//!
//! Flows talk to local geometry containers through [`GeometryStore`]
//! so that the transfer logic never depends on a concrete file format.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::Map;

use crate::error::{Error, Result};
use crate::models::{FeatureRecord, FieldSpec, FieldType, SyncStatus};

/// Sync bookkeeping columns appended to every materialized container.
pub const SYNC_FIELDS: [FieldSpec; 5] = [
    FieldSpec::new("original_fid", FieldType::Integer),
    FieldSpec::new("sync_status", FieldType::Text),
    FieldSpec::new("sync_timestamp", FieldType::Text),
    FieldSpec::new("dataset_id", FieldType::Integer),
    FieldSpec::new("edit_token", FieldType::Text),
];

/// Subset of sync columns carried in upload payloads.
///
/// Timestamps, dataset ids and tokens are client bookkeeping and are
/// stripped before anything leaves the machine.
pub const UPLOAD_FIELDS: [FieldSpec; 2] = [
    FieldSpec::new("original_fid", FieldType::Integer),
    FieldSpec::new("sync_status", FieldType::Text),
];

/// Count of rows per sync status plus the container total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub by_status: BTreeMap<SyncStatus, u64>,
    pub untagged: u64,
    pub total: u64,
}

impl StatusCounts {
    #[must_use]
    pub fn pending(&self) -> u64 {
        self.count(SyncStatus::Modified) + self.count(SyncStatus::New)
    }

    #[must_use]
    pub fn count(&self, status: SyncStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// A local feature container.
///
/// Implementations are plain synchronous storage; flows drive them
/// from async code between network awaits.
pub trait GeometryStore {
    /// Field names currently present, in declaration order.
    fn fields(&self) -> Result<Vec<String>>;

    /// Append columns that are not present yet. Existing columns with
    /// the same name are left untouched.
    fn append_fields(&mut self, fields: &[FieldSpec]) -> Result<()>;

    /// Insert one feature, returning its assigned fid.
    fn append_feature(&mut self, record: &FeatureRecord) -> Result<i64>;

    /// All features, in fid order.
    fn features(&self) -> Result<Vec<FeatureRecord>>;

    /// Update sync bookkeeping for one row.
    fn set_sync_state(
        &mut self,
        fid: i64,
        status: SyncStatus,
        timestamp: &str,
    ) -> Result<()>;

    /// Count rows by sync status.
    ///
    /// Containers without sync columns report every row as untagged
    /// rather than failing.
    fn count_by_status(&self) -> Result<StatusCounts>;

    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// One feature as it appears on the snapshot wire.
///
/// The snapshot body is JSON lines, one feature per line, with the
/// geometry blob base64-encoded.
#[derive(Debug, Deserialize)]
struct WireFeature {
    fid: i64,
    geometry: String,
    #[serde(default)]
    properties: Map<String, serde_json::Value>,
}

/// Parsed snapshot feature, ready for materialization.
#[derive(Debug, Clone)]
pub struct SourceFeature {
    pub server_id: i64,
    pub geometry: Vec<u8>,
    pub properties: Map<String, serde_json::Value>,
}

/// Parse a snapshot body into source features.
///
/// Blank lines are skipped; any malformed line aborts the parse.
pub fn parse_snapshot(body: &[u8]) -> Result<Vec<SourceFeature>> {
    let text = std::str::from_utf8(body)
        .map_err(|_| Error::Format("snapshot is not valid UTF-8".to_string()))?;
    let mut features = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let wire: WireFeature = serde_json::from_str(line).map_err(|err| {
            Error::Format(format!("snapshot line {}: {err}", idx + 1))
        })?;
        let geometry = base64::engine::general_purpose::STANDARD
            .decode(&wire.geometry)
            .map_err(|err| {
                Error::Format(format!("snapshot line {}: bad geometry: {err}", idx + 1))
            })?;
        features.push(SourceFeature {
            server_id: wire.fid,
            geometry,
            properties: wire.properties,
        });
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_lines_snapshot() {
        let body = concat!(
            r#"{"fid": 7, "geometry": "AQID", "properties": {"crop": "maize"}}"#,
            "\n\n",
            r#"{"fid": 9, "geometry": ""}"#,
            "\n",
        );
        let features = parse_snapshot(body.as_bytes()).unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0].server_id, 7);
        assert_eq!(features[0].geometry, vec![1, 2, 3]);
        assert_eq!(features[0].properties["crop"], "maize");
        assert!(features[1].geometry.is_empty());
    }

    #[test]
    fn malformed_line_is_a_format_error() {
        let err = parse_snapshot(b"{\"fid\": 1, \"geometry\": \"AQID\"}\nnot json\n")
            .unwrap_err();
        assert!(matches!(err, Error::Format(msg) if msg.contains("line 2")));
    }

    #[test]
    fn bad_base64_is_a_format_error() {
        let err = parse_snapshot(br#"{"fid": 1, "geometry": "!!"}"#).unwrap_err();
        assert!(matches!(err, Error::Format(msg) if msg.contains("geometry")));
    }

    #[test]
    fn status_counts_pending_sums_local_work() {
        let mut counts = StatusCounts::default();
        counts.by_status.insert(SyncStatus::Modified, 2);
        counts.by_status.insert(SyncStatus::New, 1);
        counts.by_status.insert(SyncStatus::Uploaded, 5);
        assert_eq!(counts.pending(), 3);
        assert_eq!(counts.count(SyncStatus::Downloaded), 0);
    }
}
