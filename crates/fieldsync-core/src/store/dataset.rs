//! On-disk layout of checked-out datasets and their sidecars.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::CheckoutSession;

/// Sidecar file holding [`CheckoutSession`] metadata next to a container.
pub const SIDECAR_NAME: &str = ".fieldsync.json";

const CONTAINER_EXT: &str = "fpkg";

/// Resolves where a dataset lives under the local data directory.
///
/// Each dataset gets its own directory so the container, sidecar and
/// any working files stay together:
/// `<base>/dataset_<id>/dataset_<id>.fpkg`.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    base_dir: PathBuf,
}

impl DatasetLayout {
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[must_use]
    pub fn dataset_dir(&self, dataset_id: i64) -> PathBuf {
        self.base_dir.join(format!("dataset_{dataset_id}"))
    }

    #[must_use]
    pub fn container_path(&self, dataset_id: i64) -> PathBuf {
        self.dataset_dir(dataset_id)
            .join(format!("dataset_{dataset_id}.{CONTAINER_EXT}"))
    }

    #[must_use]
    pub fn sidecar_path(&self, dataset_id: i64) -> PathBuf {
        self.dataset_dir(dataset_id).join(SIDECAR_NAME)
    }

    /// Create the dataset directory if needed.
    pub fn ensure_dataset_dir(&self, dataset_id: i64) -> Result<PathBuf> {
        let dir = self.dataset_dir(dataset_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Persist checkout metadata next to the container.
pub fn write_sidecar(layout: &DatasetLayout, session: &CheckoutSession) -> Result<()> {
    layout.ensure_dataset_dir(session.dataset_id)?;
    let path = layout.sidecar_path(session.dataset_id);
    let body = serde_json::to_string_pretty(session)?;
    fs::write(path, body)?;
    Ok(())
}

/// Read checkout metadata, if any.
///
/// A missing or unparseable sidecar means no usable checkout; both
/// read as `None` so callers fall back to a fresh download.
#[must_use]
pub fn read_sidecar(layout: &DatasetLayout, dataset_id: i64) -> Option<CheckoutSession> {
    let body = fs::read_to_string(layout.sidecar_path(dataset_id)).ok()?;
    serde_json::from_str(&body).ok()
}

/// One dataset found under the local data directory.
#[derive(Debug)]
pub struct LocalDataset {
    pub dataset_id: i64,
    pub container_path: PathBuf,
    pub session: Option<CheckoutSession>,
}

/// Scan the data directory for checked-out datasets.
///
/// Directories that do not match the layout are ignored; a dataset is
/// listed only when its container file exists.
pub fn list_local_datasets(layout: &DatasetLayout) -> Result<Vec<LocalDataset>> {
    let mut datasets = Vec::new();
    let entries = match fs::read_dir(layout.base_dir()) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(datasets),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(id) = name
            .to_str()
            .and_then(|n| n.strip_prefix("dataset_"))
            .and_then(|n| n.parse::<i64>().ok())
        else {
            continue;
        };
        let container_path = layout.container_path(id);
        if !container_path.exists() {
            continue;
        }
        datasets.push(LocalDataset {
            dataset_id: id,
            container_path,
            session: read_sidecar(layout, id),
        });
    }
    datasets.sort_by_key(|d| d.dataset_id);
    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(dataset_id: i64) -> CheckoutSession {
        CheckoutSession {
            dataset_id,
            edit_token: "tok".to_string(),
            base_version: 1,
            snapshot_hash: "h".to_string(),
            feature_count: 10,
            expires_at: "2026-09-01T00:00:00Z".to_string(),
            cache_validator: None,
            downloaded_at: "2026-08-25T12:00:00Z".to_string(),
        }
    }

    #[test]
    fn sidecar_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        write_sidecar(&layout, &session(42)).unwrap();
        let read = read_sidecar(&layout, 42).unwrap();
        assert_eq!(read.dataset_id, 42);
        assert_eq!(read.edit_token, "tok");
    }

    #[test]
    fn missing_sidecar_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        assert!(read_sidecar(&layout, 1).is_none());
    }

    #[test]
    fn corrupt_sidecar_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        layout.ensure_dataset_dir(1).unwrap();
        fs::write(layout.sidecar_path(1), "{not json").unwrap();
        assert!(read_sidecar(&layout, 1).is_none());
    }

    #[test]
    fn lists_only_directories_with_containers() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());

        layout.ensure_dataset_dir(7).unwrap();
        fs::write(layout.container_path(7), b"").unwrap();
        write_sidecar(&layout, &session(7)).unwrap();

        // Sidecar but no container: skipped.
        write_sidecar(&layout, &session(8)).unwrap();
        // Unrelated directory: skipped.
        fs::create_dir_all(dir.path().join("scratch")).unwrap();

        let datasets = list_local_datasets(&layout).unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].dataset_id, 7);
        assert!(datasets[0].session.is_some());
    }

    #[test]
    fn missing_base_dir_lists_empty() {
        let layout = DatasetLayout::new("/nonexistent/fieldsync-test");
        assert!(list_local_datasets(&layout).unwrap().is_empty());
    }
}
