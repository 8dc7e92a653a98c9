//! Checkout and snapshot download flow.

use std::fs;
use std::path::PathBuf;

use crate::api::{SnapshotDownload, SyncApi};
use crate::error::{Error, Result};
use crate::flows::{CancelToken, EventSink, FlowTermination, ProgressTracker};
use crate::models::{CheckoutSession, SyncStatus};
use crate::store::{
    parse_snapshot, read_sidecar, write_sidecar, DatasetLayout, GeometryStore, SourceFeature,
    SqliteContainer, SYNC_FIELDS,
};
use crate::util::now_rfc3339;

/// Result of a completed download flow.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub container_path: PathBuf,
    pub session: CheckoutSession,
    /// The server confirmed the cached snapshot was still current.
    pub cache_hit: bool,
    pub feature_count: u64,
}

/// Checks a dataset out and materializes its snapshot locally.
///
/// Progress bands: checkout finishes at 15, the snapshot transfer runs
/// to 55, materialization to 90, and sidecar bookkeeping to 100.
pub struct DownloadFlow<'a, A: SyncApi> {
    api: &'a A,
    layout: &'a DatasetLayout,
    cancel: CancelToken,
}

impl<'a, A: SyncApi> DownloadFlow<'a, A> {
    pub fn new(api: &'a A, layout: &'a DatasetLayout, cancel: CancelToken) -> Self {
        Self {
            api,
            layout,
            cancel,
        }
    }

    pub async fn run(
        &self,
        dataset_id: i64,
        sink: &mut dyn EventSink,
    ) -> Result<DownloadOutcome> {
        let mut tracker = ProgressTracker::new();
        let result = self.run_inner(dataset_id, sink, &mut tracker).await;
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
        sink: &mut dyn EventSink,
        tracker: &mut ProgressTracker,
    ) -> Result<DownloadOutcome> {
        self.cancel.check()?;
        tracker.emit(sink, 0, "Requesting checkout", None);
        let grant = self.api.checkout(dataset_id).await?;
        tracker.emit(sink, 15, "Checkout granted", None);

        let container_path = self.layout.container_path(dataset_id);
        let prior = read_sidecar(self.layout, dataset_id);
        let validator = prior
            .as_ref()
            .filter(|_| container_path.exists())
            .and_then(|s| s.cache_validator.clone());

        self.cancel.check()?;
        let download = {
            let mut on_chunk = |received: u64, total: Option<u64>| {
                let percent = match total {
                    Some(total) if total > 0 => {
                        15 + ((received.min(total) * 40) / total) as u8
                    }
                    _ => 15,
                };
                tracker.emit(sink, percent, "Downloading snapshot", None);
            };
            self.api
                .download_snapshot(dataset_id, validator.as_deref(), &mut on_chunk)
                .await?
        };
        self.cancel.check()?;

        match download {
            SnapshotDownload::NotModified => {
                // Lease details still change on every checkout; only the
                // snapshot itself is reusable.
                let prior = prior.ok_or_else(|| {
                    Error::MissingCheckout(format!("dataset {dataset_id}"))
                })?;
                let session = CheckoutSession {
                    dataset_id,
                    edit_token: grant.edit_token,
                    base_version: grant.base_version,
                    snapshot_hash: grant.snapshot_hash,
                    feature_count: grant.feature_count,
                    expires_at: grant.expires_at,
                    cache_validator: prior.cache_validator,
                    downloaded_at: prior.downloaded_at,
                };
                tracker.emit(sink, 90, "Snapshot up to date", None);
                write_sidecar(self.layout, &session)?;
                tracker.emit(sink, 100, "Complete", None);
                tracing::info!(dataset_id, "checkout refreshed from cache");
                Ok(DownloadOutcome {
                    container_path,
                    feature_count: session.feature_count,
                    session,
                    cache_hit: true,
                })
            }
            SnapshotDownload::Fetched { body, validator } => {
                tracker.emit(sink, 55, "Materializing features", None);
                let features = parse_snapshot(&body)?;
                let feature_count = features.len() as u64;
                self.materialize(dataset_id, &grant.edit_token, &features, sink, tracker)?;

                tracker.emit(sink, 90, "Writing checkout metadata", None);
                let session = CheckoutSession {
                    dataset_id,
                    edit_token: grant.edit_token,
                    base_version: grant.base_version,
                    snapshot_hash: grant.snapshot_hash,
                    feature_count: grant.feature_count,
                    expires_at: grant.expires_at,
                    cache_validator: validator,
                    downloaded_at: now_rfc3339(),
                };
                write_sidecar(self.layout, &session)?;
                tracker.emit(sink, 100, "Complete", None);
                tracing::info!(dataset_id, feature_count, "dataset materialized");
                Ok(DownloadOutcome {
                    container_path,
                    session,
                    cache_hit: false,
                    feature_count,
                })
            }
        }
    }

    /// Write features into a fresh container, then swap it into place.
    ///
    /// The container is built under a `.part` name and renamed only
    /// when complete, so a crash or cancellation never leaves a
    /// half-written container at the final path.
    fn materialize(
        &self,
        dataset_id: i64,
        edit_token: &str,
        features: &[SourceFeature],
        sink: &mut dyn EventSink,
        tracker: &mut ProgressTracker,
    ) -> Result<()> {
        self.layout.ensure_dataset_dir(dataset_id)?;
        let final_path = self.layout.container_path(dataset_id);
        let part_path = final_path.with_extension("fpkg.part");
        if part_path.exists() {
            fs::remove_file(&part_path)?;
        }

        let result = (|| {
            let mut store = SqliteContainer::create(&part_path)?;
            store.append_fields(&SYNC_FIELDS)?;
            let now = now_rfc3339();
            store.begin()?;
            for (idx, feature) in features.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    store.rollback()?;
                    return Err(Error::Cancelled);
                }
                store.append_feature(&crate::models::FeatureRecord {
                    fid: 0,
                    original_id: Some(feature.server_id),
                    geometry: feature.geometry.clone(),
                    properties: feature.properties.clone(),
                    sync_status: Some(SyncStatus::Downloaded),
                    sync_timestamp: Some(now.clone()),
                    dataset_id: Some(dataset_id),
                    edit_token: Some(edit_token.to_string()),
                })?;
                if idx % 100 == 99 {
                    let percent = 55 + ((idx as u64 * 35) / features.len() as u64) as u8;
                    tracker.emit(sink, percent, "Materializing features", None);
                }
            }
            store.commit()?;
            Ok(())
        })();
        if let Err(err) = result {
            let _ = fs::remove_file(&part_path);
            return Err(err);
        }

        if final_path.exists() {
            fs::remove_file(&final_path)?;
        }
        fs::rename(&part_path, &final_path)?;
        Ok(())
    }
}
