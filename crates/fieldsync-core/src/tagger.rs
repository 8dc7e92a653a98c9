//! Edit tagging: translating commit deltas into sync statuses.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::models::SyncStatus;
use crate::store::GeometryStore;
use crate::util::now_rfc3339;

/// What happens to `UPLOADED` rows when they are edited again before
/// the next checkout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadedRowPolicy {
    /// Uploaded rows stay locked until a fresh checkout re-bases them.
    #[default]
    Locked,
    /// Edits to uploaded rows re-tag them as `MODIFIED` so the next
    /// upload carries them again.
    Retag,
}

/// Fids touched by one local commit.
#[derive(Debug, Clone, Default)]
pub struct EditDelta {
    /// Rows whose geometry or attributes changed.
    pub changed: BTreeSet<i64>,
    /// Rows created in this commit. Also present in `changed` when the
    /// editor reports new rows both ways.
    pub added: BTreeSet<i64>,
}

impl EditDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty()
    }
}

/// Outcome of one tagging pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagSummary {
    /// Rows moved to `MODIFIED`.
    pub modified: u64,
    /// Rows moved to `NEW`.
    pub added: u64,
    /// Edited `UPLOADED` rows left untouched under the locked policy.
    pub skipped_uploaded: u64,
}

/// Apply a commit delta to the container's sync statuses.
///
/// Runs in one transaction; a partial tagging pass is never visible.
/// Containers without sync columns are left untouched, as are empty
/// deltas. Re-tagging an already `MODIFIED` or `NEW` row only
/// refreshes its timestamp, so repeated commits are idempotent.
pub fn apply_tags(
    store: &mut dyn GeometryStore,
    delta: &EditDelta,
    policy: UploadedRowPolicy,
) -> Result<TagSummary> {
    let mut summary = TagSummary::default();
    if delta.is_empty() {
        return Ok(summary);
    }
    if !store.fields()?.iter().any(|f| f == "sync_status") {
        tracing::debug!("container has no sync fields, skipping tagging");
        return Ok(summary);
    }

    let now = now_rfc3339();
    store.begin()?;
    let result = (|| {
        let features = store.features()?;
        for feature in &features {
            let fid = feature.fid;
            if delta.added.contains(&fid) {
                store.set_sync_state(fid, SyncStatus::New, &now)?;
                summary.added += 1;
                continue;
            }
            if !delta.changed.contains(&fid) {
                continue;
            }
            match feature.sync_status {
                Some(SyncStatus::Downloaded | SyncStatus::Modified) => {
                    store.set_sync_state(fid, SyncStatus::Modified, &now)?;
                    summary.modified += 1;
                }
                Some(SyncStatus::New) => {
                    store.set_sync_state(fid, SyncStatus::New, &now)?;
                }
                Some(SyncStatus::Uploaded) => match policy {
                    UploadedRowPolicy::Locked => summary.skipped_uploaded += 1,
                    UploadedRowPolicy::Retag => {
                        store.set_sync_state(fid, SyncStatus::Modified, &now)?;
                        summary.modified += 1;
                    }
                },
                None => {
                    store.set_sync_state(fid, SyncStatus::Modified, &now)?;
                    summary.modified += 1;
                }
            }
        }
        Ok(())
    })();
    match result {
        Ok(()) => {
            store.commit()?;
            tracing::debug!(
                modified = summary.modified,
                added = summary.added,
                skipped = summary.skipped_uploaded,
                "tagged commit delta"
            );
            Ok(summary)
        }
        Err(err) => {
            store.rollback()?;
            Err(err)
        }
    }
}

/// Move every pending row to `UPLOADED` after a completed batch.
pub fn mark_uploaded(store: &mut dyn GeometryStore) -> Result<u64> {
    let now = now_rfc3339();
    store.begin()?;
    let result = (|| {
        let mut count = 0;
        for feature in store.features()? {
            if feature.sync_status.is_some_and(SyncStatus::is_pending) {
                store.set_sync_state(feature.fid, SyncStatus::Uploaded, &now)?;
                count += 1;
            }
        }
        Ok(count)
    })();
    match result {
        Ok(count) => {
            store.commit()?;
            Ok(count)
        }
        Err(err) => {
            store.rollback()?;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::models::FeatureRecord;
    use crate::store::{SqliteContainer, SYNC_FIELDS};

    fn store_with(statuses: &[Option<SyncStatus>]) -> SqliteContainer {
        let mut store = SqliteContainer::in_memory().unwrap();
        store.append_fields(&SYNC_FIELDS).unwrap();
        for status in statuses {
            store
                .append_feature(&FeatureRecord {
                    fid: 0,
                    original_id: Some(100),
                    geometry: vec![1],
                    properties: Map::new(),
                    sync_status: *status,
                    sync_timestamp: Some("2026-08-01T00:00:00Z".to_string()),
                    dataset_id: Some(42),
                    edit_token: None,
                })
                .unwrap();
        }
        store
    }

    fn delta(changed: &[i64], added: &[i64]) -> EditDelta {
        EditDelta {
            changed: changed.iter().copied().collect(),
            added: added.iter().copied().collect(),
        }
    }

    fn status_of(store: &SqliteContainer, fid: i64) -> Option<SyncStatus> {
        store
            .features()
            .unwrap()
            .into_iter()
            .find(|f| f.fid == fid)
            .unwrap()
            .sync_status
    }

    fn timestamp_of(store: &SqliteContainer, fid: i64) -> Option<String> {
        store
            .features()
            .unwrap()
            .into_iter()
            .find(|f| f.fid == fid)
            .unwrap()
            .sync_timestamp
    }

    #[test]
    fn downloaded_rows_become_modified() {
        let mut store = store_with(&[Some(SyncStatus::Downloaded), Some(SyncStatus::Downloaded)]);
        let summary =
            apply_tags(&mut store, &delta(&[1], &[]), UploadedRowPolicy::Locked).unwrap();
        assert_eq!(summary.modified, 1);
        assert_eq!(status_of(&store, 1), Some(SyncStatus::Modified));
        assert_eq!(status_of(&store, 2), Some(SyncStatus::Downloaded));
    }

    #[test]
    fn added_rows_become_new_even_when_also_changed() {
        let mut store = store_with(&[Some(SyncStatus::Downloaded)]);
        let summary =
            apply_tags(&mut store, &delta(&[1], &[1]), UploadedRowPolicy::Locked).unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.modified, 0);
        assert_eq!(status_of(&store, 1), Some(SyncStatus::New));
    }

    #[test]
    fn tagging_is_idempotent_and_refreshes_the_timestamp() {
        let mut store = store_with(&[Some(SyncStatus::Downloaded)]);
        apply_tags(&mut store, &delta(&[1], &[]), UploadedRowPolicy::Locked).unwrap();
        let first = timestamp_of(&store, 1).unwrap();
        let again =
            apply_tags(&mut store, &delta(&[1], &[]), UploadedRowPolicy::Locked).unwrap();
        assert_eq!(again.modified, 1);
        assert_eq!(status_of(&store, 1), Some(SyncStatus::Modified));
        // RFC 3339 timestamps sort chronologically; retagging never
        // moves one backwards.
        let second = timestamp_of(&store, 1).unwrap();
        assert!(second >= first, "{second} < {first}");
    }

    #[test]
    fn uploaded_rows_stay_locked_by_default() {
        let mut store = store_with(&[Some(SyncStatus::Uploaded)]);
        let summary =
            apply_tags(&mut store, &delta(&[1], &[]), UploadedRowPolicy::Locked).unwrap();
        assert_eq!(summary.skipped_uploaded, 1);
        assert_eq!(status_of(&store, 1), Some(SyncStatus::Uploaded));
    }

    #[test]
    fn retag_policy_reopens_uploaded_rows() {
        let mut store = store_with(&[Some(SyncStatus::Uploaded)]);
        let summary =
            apply_tags(&mut store, &delta(&[1], &[]), UploadedRowPolicy::Retag).unwrap();
        assert_eq!(summary.modified, 1);
        assert_eq!(status_of(&store, 1), Some(SyncStatus::Modified));
    }

    #[test]
    fn untagged_container_is_left_alone() {
        let mut store = SqliteContainer::in_memory().unwrap();
        store
            .append_feature(&FeatureRecord {
                fid: 0,
                original_id: None,
                geometry: vec![1],
                properties: Map::new(),
                sync_status: None,
                sync_timestamp: None,
                dataset_id: None,
                edit_token: None,
            })
            .unwrap();
        let summary =
            apply_tags(&mut store, &delta(&[1], &[]), UploadedRowPolicy::Locked).unwrap();
        assert_eq!(summary, TagSummary::default());
    }

    #[test]
    fn mark_uploaded_moves_pending_rows() {
        let mut store = store_with(&[
            Some(SyncStatus::Modified),
            Some(SyncStatus::New),
            Some(SyncStatus::Downloaded),
        ]);
        let count = mark_uploaded(&mut store).unwrap();
        assert_eq!(count, 2);
        assert_eq!(status_of(&store, 1), Some(SyncStatus::Uploaded));
        assert_eq!(status_of(&store, 2), Some(SyncStatus::Uploaded));
        assert_eq!(status_of(&store, 3), Some(SyncStatus::Downloaded));
    }
}
