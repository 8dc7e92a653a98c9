//! SQLite-backed geometry container.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OpenFlags};

use crate::error::{Error, Result};
use crate::models::{FeatureRecord, FieldSpec, SyncStatus};
use crate::store::geometry::{GeometryStore, StatusCounts};

const BASE_COLUMNS: [&str; 3] = ["fid", "geometry", "properties"];

const CREATE_FEATURES: &str = "\
CREATE TABLE IF NOT EXISTS features (
    fid INTEGER PRIMARY KEY AUTOINCREMENT,
    geometry BLOB NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}'
)";

/// Feature container stored as a single SQLite file.
///
/// Attribute values live in a JSON `properties` column; sync
/// bookkeeping columns are appended to the table on demand so that
/// containers created before tagging keep working.
pub struct SqliteContainer {
    conn: Connection,
}

impl SqliteContainer {
    /// Create a new container file, initializing the schema.
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(CREATE_FEATURES)?;
        Ok(Self { conn })
    }

    /// Open an existing container for reading and writing.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)?;
        Ok(Self { conn })
    }

    /// Open an existing container read-only.
    pub fn open_readonly(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    /// In-memory container, used by tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_FEATURES)?;
        Ok(Self { conn })
    }

    fn column_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(features)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn has_column(&self, name: &str) -> Result<bool> {
        Ok(self.column_names()?.iter().any(|c| c == name))
    }
}

impl GeometryStore for SqliteContainer {
    fn fields(&self) -> Result<Vec<String>> {
        Ok(self
            .column_names()?
            .into_iter()
            .filter(|name| !BASE_COLUMNS.contains(&name.as_str()))
            .collect())
    }

    fn append_fields(&mut self, fields: &[FieldSpec]) -> Result<()> {
        let existing = self.column_names()?;
        for field in fields {
            if existing.iter().any(|c| c == field.name) {
                continue;
            }
            let sql = format!(
                "ALTER TABLE features ADD COLUMN {} {}",
                field.name,
                field.field_type.as_sql()
            );
            self.conn.execute_batch(&sql)?;
        }
        Ok(())
    }

    fn append_feature(&mut self, record: &FeatureRecord) -> Result<i64> {
        let extra = self.fields()?;
        let mut columns = vec!["geometry", "properties"];
        let mut values: Vec<SqlValue> = vec![
            SqlValue::Blob(record.geometry.clone()),
            SqlValue::Text(serde_json::to_string(&record.properties)?),
        ];
        for name in &extra {
            let value = match name.as_str() {
                "original_fid" => record.original_id.map_or(SqlValue::Null, SqlValue::Integer),
                "sync_status" => record
                    .sync_status
                    .map_or(SqlValue::Null, |s| SqlValue::Text(s.as_str().to_string())),
                "sync_timestamp" => record
                    .sync_timestamp
                    .clone()
                    .map_or(SqlValue::Null, SqlValue::Text),
                "dataset_id" => record.dataset_id.map_or(SqlValue::Null, SqlValue::Integer),
                "edit_token" => record
                    .edit_token
                    .clone()
                    .map_or(SqlValue::Null, SqlValue::Text),
                _ => continue,
            };
            columns.push(name);
            values.push(value);
        }
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO features ({}) VALUES ({placeholders})",
            columns.join(", ")
        );
        self.conn.execute(&sql, params_from_iter(values))?;
        Ok(self.conn.last_insert_rowid())
    }

    fn features(&self) -> Result<Vec<FeatureRecord>> {
        let extra = self.fields()?;
        let has = |name: &str| extra.iter().any(|c| c == name);
        let has_sync = has("sync_status");
        let has_original = has("original_fid");
        let has_timestamp = has("sync_timestamp");
        let has_dataset = has("dataset_id");
        let has_token = has("edit_token");

        let mut select = vec!["fid", "geometry", "properties"];
        for name in &extra {
            select.push(name.as_str());
        }
        let sql = format!("SELECT {} FROM features ORDER BY fid", select.join(", "));
        let mut stmt = self.conn.prepare(&sql)?;

        let column = |name: &str| {
            3 + extra
                .iter()
                .position(|c| c == name)
                .unwrap_or(extra.len())
        };
        let rows = stmt.query_map([], |row| {
            let fid: i64 = row.get(0)?;
            let geometry: Vec<u8> = row.get(1)?;
            let properties: String = row.get(2)?;
            let original_id = if has_original {
                row.get::<_, Option<i64>>(column("original_fid"))?
            } else {
                None
            };
            let status = if has_sync {
                row.get::<_, Option<String>>(column("sync_status"))?
            } else {
                None
            };
            let timestamp = if has_timestamp {
                row.get::<_, Option<String>>(column("sync_timestamp"))?
            } else {
                None
            };
            let dataset_id = if has_dataset {
                row.get::<_, Option<i64>>(column("dataset_id"))?
            } else {
                None
            };
            let token = if has_token {
                row.get::<_, Option<String>>(column("edit_token"))?
            } else {
                None
            };
            Ok((fid, geometry, properties, original_id, status, timestamp, dataset_id, token))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (fid, geometry, properties, original_id, status, timestamp, dataset_id, token) =
                row?;
            let properties = serde_json::from_str(&properties)?;
            records.push(FeatureRecord {
                fid,
                original_id,
                geometry,
                properties,
                sync_status: status.as_deref().and_then(SyncStatus::parse),
                sync_timestamp: timestamp,
                dataset_id,
                edit_token: token,
            });
        }
        Ok(records)
    }

    fn set_sync_state(&mut self, fid: i64, status: SyncStatus, timestamp: &str) -> Result<()> {
        if !self.has_column("sync_status")? {
            return Err(Error::Format(
                "container has no sync fields".to_string(),
            ));
        }
        let updated = self.conn.execute(
            "UPDATE features SET sync_status = ?1, sync_timestamp = ?2 WHERE fid = ?3",
            rusqlite::params![status.as_str(), timestamp, fid],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("feature {fid}")));
        }
        Ok(())
    }

    fn count_by_status(&self) -> Result<StatusCounts> {
        let total: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM features", [], |row| row.get(0))?;
        if !self.has_column("sync_status")? {
            return Ok(StatusCounts {
                by_status: BTreeMap::new(),
                untagged: total,
                total,
            });
        }
        let mut stmt = self
            .conn
            .prepare("SELECT sync_status, COUNT(*) FROM features GROUP BY sync_status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, u64>(1)?))
        })?;
        let mut by_status = BTreeMap::new();
        let mut untagged = 0;
        for row in rows {
            let (status, count) = row?;
            match status.as_deref().and_then(SyncStatus::parse) {
                Some(status) => {
                    *by_status.entry(status).or_insert(0) += count;
                }
                None => untagged += count,
            }
        }
        Ok(StatusCounts {
            by_status,
            untagged,
            total,
        })
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::store::geometry::SYNC_FIELDS;
    use crate::util::now_rfc3339;

    fn record(original_id: Option<i64>, status: Option<SyncStatus>) -> FeatureRecord {
        let mut properties = Map::new();
        properties.insert("crop".to_string(), serde_json::json!("maize"));
        FeatureRecord {
            fid: 0,
            original_id,
            geometry: vec![0x01, 0x02],
            properties,
            sync_status: status,
            sync_timestamp: status.map(|_| now_rfc3339()),
            dataset_id: Some(42),
            edit_token: Some("tok".to_string()),
        }
    }

    #[test]
    fn append_fields_is_idempotent() {
        let mut store = SqliteContainer::in_memory().unwrap();
        store.append_fields(&SYNC_FIELDS).unwrap();
        store.append_fields(&SYNC_FIELDS).unwrap();
        let fields = store.fields().unwrap();
        assert_eq!(fields.len(), SYNC_FIELDS.len());
        assert!(fields.contains(&"sync_status".to_string()));
    }

    #[test]
    fn round_trips_features_with_sync_columns() {
        let mut store = SqliteContainer::in_memory().unwrap();
        store.append_fields(&SYNC_FIELDS).unwrap();
        let fid = store
            .append_feature(&record(Some(7), Some(SyncStatus::Downloaded)))
            .unwrap();
        let features = store.features().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].fid, fid);
        assert_eq!(features[0].original_id, Some(7));
        assert_eq!(features[0].sync_status, Some(SyncStatus::Downloaded));
        assert_eq!(features[0].properties["crop"], "maize");
        assert_eq!(features[0].geometry, vec![0x01, 0x02]);
    }

    #[test]
    fn counts_without_sync_columns_report_untagged() {
        let mut store = SqliteContainer::in_memory().unwrap();
        store.append_feature(&record(None, None)).unwrap();
        store.append_feature(&record(None, None)).unwrap();
        let counts = store.count_by_status().unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.untagged, 2);
        assert!(counts.by_status.is_empty());
        assert_eq!(counts.pending(), 0);
    }

    #[test]
    fn counts_group_by_status() {
        let mut store = SqliteContainer::in_memory().unwrap();
        store.append_fields(&SYNC_FIELDS).unwrap();
        store
            .append_feature(&record(Some(1), Some(SyncStatus::Downloaded)))
            .unwrap();
        store
            .append_feature(&record(Some(2), Some(SyncStatus::Modified)))
            .unwrap();
        store.append_feature(&record(None, Some(SyncStatus::New))).unwrap();
        let counts = store.count_by_status().unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.count(SyncStatus::Modified), 1);
        assert_eq!(counts.pending(), 2);
    }

    #[test]
    fn set_sync_state_requires_existing_row() {
        let mut store = SqliteContainer::in_memory().unwrap();
        store.append_fields(&SYNC_FIELDS).unwrap();
        let err = store
            .set_sync_state(99, SyncStatus::Modified, &now_rfc3339())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn set_sync_state_without_columns_is_a_format_error() {
        let mut store = SqliteContainer::in_memory().unwrap();
        store.append_feature(&record(None, None)).unwrap();
        let err = store
            .set_sync_state(1, SyncStatus::Modified, &now_rfc3339())
            .unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn rollback_discards_inserts() {
        let mut store = SqliteContainer::in_memory().unwrap();
        store.begin().unwrap();
        store.append_feature(&record(None, None)).unwrap();
        store.rollback().unwrap();
        assert_eq!(store.count_by_status().unwrap().total, 0);
    }
}
