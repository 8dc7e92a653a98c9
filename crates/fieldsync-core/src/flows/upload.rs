//! Upload flow: package pending edits, submit, and poll to a terminal state.

use std::collections::BTreeSet;
use std::fs;
use std::io::{Cursor, Write as _};
use std::time::Instant;

use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::api::{SubmitRequest, SyncApi};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::flows::{CancelToken, EventSink, FlowTermination, ProgressTracker};
use crate::models::{
    BatchStage, ConflictDecision, ConflictResolution, ConflictSet, SyncStatus, UploadBatch,
};
use crate::store::{read_sidecar, DatasetLayout, GeometryStore, SqliteContainer, UPLOAD_FIELDS};
use crate::tagger;

const EDITS_CONTAINER: &str = "edits.fpkg";

/// What to do when the server parks a batch on conflicts.
#[derive(Debug, Clone, Copy)]
pub enum ConflictHandling {
    /// Report the conflict and keep polling; decisions are submitted
    /// out of band (interactively or by another process).
    Manual,
    /// Resolve every conflict the same way as soon as it is reported.
    ///
    /// `Merge` cannot be applied in bulk and fails validation.
    AutoResolve(ConflictResolution),
}

/// Result of a completed upload flow.
#[derive(Debug)]
pub struct UploadOutcome {
    pub batch: UploadBatch,
    /// Rows moved to `UPLOADED` in the local container.
    pub marked_uploaded: u64,
}

/// Check that decisions cover a conflict set exactly.
///
/// Every conflict needs exactly one decision, decisions for unknown
/// conflicts are rejected, and `Merge` decisions must carry a payload.
pub fn validate_decisions(set: &ConflictSet, decisions: &[ConflictDecision]) -> Result<()> {
    let expected: BTreeSet<&str> = set.conflicts.iter().map(|c| c.feature_hash.as_str()).collect();
    let mut seen = BTreeSet::new();
    for decision in decisions {
        let hash = decision.feature_hash.as_str();
        if !expected.contains(hash) {
            return Err(Error::ResolutionIncomplete(format!(
                "decision for unknown conflict '{hash}'"
            )));
        }
        if !seen.insert(hash) {
            return Err(Error::ResolutionIncomplete(format!(
                "duplicate decision for conflict '{hash}'"
            )));
        }
        if decision.resolution == ConflictResolution::Merge && decision.merged.is_none() {
            return Err(Error::ResolutionIncomplete(format!(
                "merge decision for '{hash}' has no merged payload"
            )));
        }
    }
    if seen.len() != expected.len() {
        let missing = expected.difference(&seen).count();
        return Err(Error::ResolutionIncomplete(format!(
            "{missing} conflict(s) have no decision"
        )));
    }
    Ok(())
}

/// Packages pending edits and drives a batch through the server pipeline.
///
/// Progress bands: preparation to 10, packaging to 40, submission to
/// 50, then server progress blended into 50 to 95, and 100 on a
/// completed batch.
pub struct UploadFlow<'a, A: SyncApi> {
    api: &'a A,
    layout: &'a DatasetLayout,
    config: &'a ClientConfig,
    cancel: CancelToken,
}

impl<'a, A: SyncApi> UploadFlow<'a, A> {
    pub fn new(
        api: &'a A,
        layout: &'a DatasetLayout,
        config: &'a ClientConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            api,
            layout,
            config,
            cancel,
        }
    }

    pub async fn run(
        &self,
        dataset_id: i64,
        handling: ConflictHandling,
        sink: &mut dyn EventSink,
    ) -> Result<UploadOutcome> {
        let mut tracker = ProgressTracker::new();
        let result = self.run_inner(dataset_id, handling, sink, &mut tracker).await;
        match &result {
            Ok(_) => sink.on_terminal(&FlowTermination::Success),
            Err(Error::Cancelled) => sink.on_terminal(&FlowTermination::Cancelled),
            Err(err) => sink.on_terminal(&FlowTermination::Failure(err.to_string())),
        }
        result
    }

    async fn run_inner(
        &self,
        dataset_id: i64,
        handling: ConflictHandling,
        sink: &mut dyn EventSink,
        tracker: &mut ProgressTracker,
    ) -> Result<UploadOutcome> {
        self.cancel.check()?;
        tracker.emit(sink, 0, "Preparing edits", None);
        let session = read_sidecar(self.layout, dataset_id)
            .ok_or_else(|| Error::MissingCheckout(format!("dataset {dataset_id}")))?;

        let container_path = self.layout.container_path(dataset_id);
        let store = SqliteContainer::open_readonly(&container_path)?;
        let pending: Vec<_> = store
            .features()?
            .into_iter()
            .filter(|f| f.sync_status.is_some_and(SyncStatus::is_pending))
            .collect();
        drop(store);
        if pending.is_empty() {
            return Err(Error::NothingToUpload);
        }
        tracker.emit(sink, 10, "Preparing edits", None);

        self.cancel.check()?;
        let archive = self.package(dataset_id, &pending)?;
        tracker.emit(sink, 40, "Packaging edits", None);

        self.cancel.check()?;
        tracker.emit(sink, 50, "Submitting batch", None);
        let accepted = self
            .api
            .submit(SubmitRequest {
                dataset_id,
                archive,
                edit_token: &session.edit_token,
                expected_version: session.base_version,
                conflict_strategy: self.config.conflict_strategy.as_str(),
            })
            .await?;
        tracing::info!(
            dataset_id,
            batch_uuid = %accepted.batch_uuid,
            rows = pending.len(),
            "upload batch accepted"
        );

        let started = Instant::now();
        let mut conflict_seen = false;
        loop {
            // Cancelling here stops the client; the server keeps
            // processing the batch it already accepted.
            self.cancel.check()?;
            let batch = self.api.poll_batch(&accepted.poll_url).await?;
            let blended = 50 + ((u64::from(batch.progress_pct.min(100)) * 45) / 100) as u8;
            tracker.emit(sink, blended, &batch.status.to_string(), Some(batch.clone()));

            if batch.status == BatchStage::ConflictChecking
                && batch.conflict_count > 0
                && !conflict_seen
            {
                conflict_seen = true;
                sink.on_conflict_detected(&batch.batch_uuid);
                if let ConflictHandling::AutoResolve(resolution) = handling {
                    self.auto_resolve(&batch.batch_uuid, resolution).await?;
                }
            }

            if batch.status.is_terminal() {
                return self.finish(dataset_id, batch, sink, tracker);
            }
            if started.elapsed() >= self.config.max_poll_duration {
                return Err(Error::PollTimeout(accepted.batch_uuid));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn auto_resolve(
        &self,
        batch_uuid: &str,
        resolution: ConflictResolution,
    ) -> Result<()> {
        match self.api.fetch_conflicts(batch_uuid).await {
            Ok(set) if !set.is_empty() => {
                let decisions = set.decide_all(resolution);
                validate_decisions(&set, &decisions)?;
                self.api.resolve_conflicts(batch_uuid, &decisions).await
            }
            Ok(_) => Ok(()),
            // The batch can move past conflict checking between polls.
            Err(Error::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn finish(
        &self,
        dataset_id: i64,
        batch: UploadBatch,
        sink: &mut dyn EventSink,
        tracker: &mut ProgressTracker,
    ) -> Result<UploadOutcome> {
        match batch.status {
            BatchStage::Completed => {
                let mut store = SqliteContainer::open(&self.layout.container_path(dataset_id))?;
                let marked_uploaded = tagger::mark_uploaded(&mut store)?;
                tracker.emit(sink, 100, "COMPLETED", Some(batch.clone()));
                tracing::info!(
                    dataset_id,
                    batch_uuid = %batch.batch_uuid,
                    marked_uploaded,
                    "upload completed"
                );
                Ok(UploadOutcome {
                    batch,
                    marked_uploaded,
                })
            }
            BatchStage::Failed => Err(Error::UploadFailed(
                batch
                    .error_log
                    .unwrap_or_else(|| "no error log provided".to_string()),
            )),
            BatchStage::Cancelled => Err(Error::ServerCancelled(batch.batch_uuid)),
            _ => Err(Error::Format(format!(
                "non-terminal batch stage {} at finish",
                batch.status
            ))),
        }
    }

    /// Build a clean edits container and wrap it in a zip archive.
    ///
    /// Only the pending rows and the upload-safe columns go in; local
    /// timestamps, dataset ids and lease tokens stay on this machine.
    fn package(
        &self,
        dataset_id: i64,
        pending: &[crate::models::FeatureRecord],
    ) -> Result<Vec<u8>> {
        let work_dir = self
            .layout
            .dataset_dir(dataset_id)
            .join(format!("upload_{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&work_dir)?;

        let result = (|| {
            let edits_path = work_dir.join(EDITS_CONTAINER);
            let mut store = SqliteContainer::create(&edits_path)?;
            store.append_fields(&UPLOAD_FIELDS)?;
            store.begin()?;
            for record in pending {
                // The clean container has no timestamp, dataset or
                // token columns, so those fields are dropped here.
                store.append_feature(record)?;
            }
            store.commit()?;
            drop(store);

            let bytes = fs::read(&edits_path)?;
            let mut cursor = Cursor::new(Vec::new());
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            writer.start_file(EDITS_CONTAINER, options)?;
            writer.write_all(&bytes)?;
            writer.finish()?;
            Ok(cursor.into_inner())
        })();
        let _ = fs::remove_dir_all(&work_dir);
        result
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn set_with(hashes: &[&str]) -> ConflictSet {
        serde_json::from_value(json!({
            "batchUuid": "b-1",
            "conflicts": hashes
                .iter()
                .map(|h| json!({"featureHash": h, "conflictType": "ATTRIBUTE"}))
                .collect::<Vec<_>>(),
        }))
        .unwrap()
    }

    fn decision(hash: &str, resolution: ConflictResolution) -> ConflictDecision {
        ConflictDecision {
            feature_hash: hash.to_string(),
            resolution,
            merged: None,
        }
    }

    #[test]
    fn complete_decisions_validate() {
        let set = set_with(&["h1", "h2"]);
        let decisions = vec![
            decision("h1", ConflictResolution::TakeMine),
            decision("h2", ConflictResolution::TakeTheirs),
        ];
        assert!(validate_decisions(&set, &decisions).is_ok());
    }

    #[test]
    fn missing_decision_is_rejected() {
        let set = set_with(&["h1", "h2"]);
        let err = validate_decisions(&set, &[decision("h1", ConflictResolution::TakeMine)])
            .unwrap_err();
        assert!(matches!(err, Error::ResolutionIncomplete(msg) if msg.contains("no decision")));
    }

    #[test]
    fn duplicate_decision_is_rejected() {
        let set = set_with(&["h1"]);
        let decisions = vec![
            decision("h1", ConflictResolution::TakeMine),
            decision("h1", ConflictResolution::TakeTheirs),
        ];
        let err = validate_decisions(&set, &decisions).unwrap_err();
        assert!(matches!(err, Error::ResolutionIncomplete(msg) if msg.contains("duplicate")));
    }

    #[test]
    fn unknown_decision_is_rejected() {
        let set = set_with(&["h1"]);
        let err = validate_decisions(&set, &[decision("h9", ConflictResolution::TakeMine)])
            .unwrap_err();
        assert!(matches!(err, Error::ResolutionIncomplete(msg) if msg.contains("unknown")));
    }

    #[test]
    fn merge_requires_a_payload() {
        let set = set_with(&["h1"]);
        let err =
            validate_decisions(&set, &[decision("h1", ConflictResolution::Merge)]).unwrap_err();
        assert!(matches!(err, Error::ResolutionIncomplete(msg) if msg.contains("merged")));

        let with_payload = ConflictDecision {
            feature_hash: "h1".to_string(),
            resolution: ConflictResolution::Merge,
            merged: Some(json!({"crop": "maize"})),
        };
        assert!(validate_decisions(&set, &[with_payload]).is_ok());
    }
}
