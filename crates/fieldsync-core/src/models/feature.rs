//! Feature rows and field descriptors for the local container.

use serde_json::Map;

use crate::models::SyncStatus;

/// Storage type of a container field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Integer,
    Real,
    Text,
}

impl FieldType {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

/// Field name and type, used when appending columns to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
}

impl FieldSpec {
    #[must_use]
    pub const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self { name, field_type }
    }
}

/// One feature row as stored locally.
///
/// Geometry is kept as an opaque binary blob; this crate moves
/// geometries between server and container without interpreting them.
#[derive(Clone)]
pub struct FeatureRecord {
    /// Local row id, assigned by the container.
    pub fid: i64,
    /// Server-side feature id; `None` for locally created rows.
    pub original_id: Option<i64>,
    /// Opaque geometry bytes.
    pub geometry: Vec<u8>,
    /// Attribute values keyed by field name.
    pub properties: Map<String, serde_json::Value>,
    /// Sync lifecycle state; `None` when sync columns are absent.
    pub sync_status: Option<SyncStatus>,
    /// RFC 3339 timestamp of the last sync state change.
    pub sync_timestamp: Option<String>,
    /// Dataset the row was checked out from.
    pub dataset_id: Option<i64>,
    /// Lease token captured at materialization time.
    pub edit_token: Option<String>,
}

impl std::fmt::Debug for FeatureRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureRecord")
            .field("fid", &self.fid)
            .field("original_id", &self.original_id)
            .field("geometry_len", &self.geometry.len())
            .field("properties", &self.properties)
            .field("sync_status", &self.sync_status)
            .field("sync_timestamp", &self.sync_timestamp)
            .field("dataset_id", &self.dataset_id)
            .field(
                "edit_token",
                &self.edit_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_token_and_geometry_bytes() {
        let record = FeatureRecord {
            fid: 3,
            original_id: Some(101),
            geometry: vec![1, 2, 3],
            properties: Map::new(),
            sync_status: Some(SyncStatus::Downloaded),
            sync_timestamp: None,
            dataset_id: Some(42),
            edit_token: Some("tok-secret".to_string()),
        };
        let rendered = format!("{record:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("tok-secret"));
        assert!(rendered.contains("geometry_len"));
    }
}
