//! HTTP client for the sync server API.
//!
//! Flows depend on the [`SyncApi`] trait rather than the HTTP client
//! directly, so tests can script server behavior without a network.

use serde::Deserialize;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{CatalogItem, ConflictDecision, ConflictSet, UploadBatch};
use crate::util::{compact_text, is_http_url};

/// Lease and snapshot metadata returned by a checkout.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutGrant {
    pub dataset_id: i64,
    pub edit_token: String,
    pub base_version: i64,
    pub snapshot_hash: String,
    pub feature_count: u64,
    pub expires_at: String,
}

impl std::fmt::Debug for CheckoutGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutGrant")
            .field("dataset_id", &self.dataset_id)
            .field("edit_token", &"[REDACTED]")
            .field("base_version", &self.base_version)
            .field("snapshot_hash", &self.snapshot_hash)
            .field("feature_count", &self.feature_count)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of a conditional snapshot request.
#[derive(Debug)]
pub enum SnapshotDownload {
    /// The cached snapshot is still current.
    NotModified,
    /// Fresh snapshot body plus the validator for the next request.
    Fetched {
        body: Vec<u8>,
        validator: Option<String>,
    },
}

/// Everything the server needs to accept an upload batch.
pub struct SubmitRequest<'a> {
    pub dataset_id: i64,
    /// Zip archive containing the stripped edits container.
    pub archive: Vec<u8>,
    pub edit_token: &'a str,
    pub expected_version: i64,
    pub conflict_strategy: &'a str,
}

/// Server acknowledgement of a submitted batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAccepted {
    pub batch_uuid: String,
    pub poll_url: String,
}

/// Server operations used by the download and upload flows.
#[allow(async_fn_in_trait)]
pub trait SyncApi {
    /// Acquire an edit lease on a dataset.
    async fn checkout(&self, dataset_id: i64) -> Result<CheckoutGrant>;

    /// Fetch the dataset snapshot, honoring a cache validator.
    ///
    /// `on_chunk` is called with bytes received so far and the total
    /// size when the server reports one.
    async fn download_snapshot(
        &self,
        dataset_id: i64,
        validator: Option<&str>,
        on_chunk: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<SnapshotDownload>;

    /// Submit an edits archive for asynchronous processing.
    async fn submit(&self, request: SubmitRequest<'_>) -> Result<SubmitAccepted>;

    /// Poll the batch status endpoint once.
    async fn poll_batch(&self, poll_url: &str) -> Result<UploadBatch>;

    /// Fetch the conflicts blocking a batch.
    async fn fetch_conflicts(&self, batch_uuid: &str) -> Result<ConflictSet>;

    /// Submit resolution decisions for every conflict in the set.
    async fn resolve_conflicts(
        &self,
        batch_uuid: &str,
        decisions: &[ConflictDecision],
    ) -> Result<()>;
}

/// Which operation a failed response belongs to.
///
/// The same status code can mean different things per endpoint; 409 is
/// a lease conflict at checkout but a concurrent upload at submit.
#[derive(Debug, Clone, Copy)]
enum Operation {
    Checkout(i64),
    Snapshot,
    Submit,
    Poll,
    Conflicts,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Extract a user-facing message from an error response body.
fn parse_error_message(status: u16, body: &str) -> String {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message.or(b.error));
    match detail {
        Some(detail) if !detail.trim().is_empty() => compact_text(&detail),
        _ => match status {
            400 => "Invalid request (400)".to_string(),
            401 => "Authentication failed. Check your access token (401)".to_string(),
            403 => "Access denied (403)".to_string(),
            404 => "Resource not found (404)".to_string(),
            413 => "Upload too large (413)".to_string(),
            429 => "Rate limited, try again later (429)".to_string(),
            500..=599 => format!("Server error ({status})"),
            _ if !body.trim().is_empty() => {
                format!("HTTP {status}: {}", compact_text(body))
            }
            _ => format!("HTTP {status}"),
        },
    }
}

async fn fail(response: reqwest::Response, op: Operation) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    match (status, op) {
        (409, Operation::Checkout(dataset_id)) => Error::LeaseConflict(dataset_id),
        (409, Operation::Submit) => Error::ConcurrentUpload,
        (403, Operation::Submit | Operation::Conflicts) => Error::InvalidLease,
        (404, Operation::Poll | Operation::Conflicts) => {
            Error::NotFound(parse_error_message(status, &body))
        }
        _ => Error::ServerRejected {
            status,
            message: parse_error_message(status, &body),
        },
    }
}

/// Bare array or a paged wrapper, depending on server version.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogResponse {
    Plain(Vec<CatalogItem>),
    Paged { content: Vec<CatalogItem> },
}

/// [`SyncApi`] implementation over HTTPS.
pub struct HttpSyncApi {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    request_timeout: std::time::Duration,
    transfer_timeout: std::time::Duration,
}

impl std::fmt::Debug for HttpSyncApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSyncApi")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl HttpSyncApi {
    /// Build a client from the configuration and a bearer token.
    ///
    /// Token acquisition is the caller's concern; this client only
    /// presents whatever it is given.
    pub fn new(config: &ClientConfig, access_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: config.api_base_url.clone(),
            access_token: access_token.to_string(),
            request_timeout: config.request_timeout,
            transfer_timeout: config.transfer_timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// List datasets available for checkout.
    pub async fn fetch_catalog(&self) -> Result<Vec<CatalogItem>> {
        let response = self
            .http
            .get(self.url("/datasets"))
            .bearer_auth(&self.access_token)
            .timeout(self.request_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(fail(response, Operation::Snapshot).await);
        }
        match response.json::<CatalogResponse>().await? {
            CatalogResponse::Plain(items) | CatalogResponse::Paged { content: items } => {
                Ok(items)
            }
        }
    }
}

impl SyncApi for HttpSyncApi {
    async fn checkout(&self, dataset_id: i64) -> Result<CheckoutGrant> {
        let response = self
            .http
            .post(self.url(&format!("/datasets/{dataset_id}/checkout")))
            .bearer_auth(&self.access_token)
            .timeout(self.request_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(fail(response, Operation::Checkout(dataset_id)).await);
        }
        let grant: CheckoutGrant = response.json().await?;
        tracing::debug!(
            dataset_id,
            base_version = grant.base_version,
            feature_count = grant.feature_count,
            "checkout granted"
        );
        Ok(grant)
    }

    async fn download_snapshot(
        &self,
        dataset_id: i64,
        validator: Option<&str>,
        on_chunk: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<SnapshotDownload> {
        let mut request = self
            .http
            .get(self.url(&format!("/datasets/{dataset_id}/features")))
            .bearer_auth(&self.access_token)
            .timeout(self.transfer_timeout);
        if let Some(validator) = validator {
            request = request.header(reqwest::header::IF_NONE_MATCH, validator);
        }
        let mut response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            tracing::debug!(dataset_id, "snapshot not modified");
            return Ok(SnapshotDownload::NotModified);
        }
        if !response.status().is_success() {
            return Err(fail(response, Operation::Snapshot).await);
        }
        let next_validator = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let total = response.content_length();
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            on_chunk(body.len() as u64, total);
        }
        tracing::debug!(dataset_id, bytes = body.len(), "snapshot downloaded");
        Ok(SnapshotDownload::Fetched {
            body,
            validator: next_validator,
        })
    }

    async fn submit(&self, request: SubmitRequest<'_>) -> Result<SubmitAccepted> {
        let part = reqwest::multipart::Part::bytes(request.archive)
            .file_name("edits.zip")
            .mime_str("application/zip")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("editToken", request.edit_token.to_string())
            .text("expectedVersion", request.expected_version.to_string())
            .text("conflictStrategy", request.conflict_strategy.to_string());
        let response = self
            .http
            .post(self.url(&format!("/datasets/{}/upload", request.dataset_id)))
            .bearer_auth(&self.access_token)
            .timeout(self.transfer_timeout)
            .multipart(form)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(fail(response, Operation::Submit).await);
        }
        let accepted: SubmitAccepted = response.json().await?;
        tracing::debug!(batch_uuid = %accepted.batch_uuid, "upload accepted");
        Ok(accepted)
    }

    async fn poll_batch(&self, poll_url: &str) -> Result<UploadBatch> {
        let url = if is_http_url(poll_url) {
            poll_url.to_string()
        } else {
            self.url(poll_url)
        };
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .timeout(self.request_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(fail(response, Operation::Poll).await);
        }
        Ok(response.json().await?)
    }

    async fn fetch_conflicts(&self, batch_uuid: &str) -> Result<ConflictSet> {
        let response = self
            .http
            .get(self.url(&format!("/upload/{batch_uuid}/conflicts")))
            .bearer_auth(&self.access_token)
            .timeout(self.request_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(fail(response, Operation::Conflicts).await);
        }
        Ok(response.json().await?)
    }

    async fn resolve_conflicts(
        &self,
        batch_uuid: &str,
        decisions: &[ConflictDecision],
    ) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/upload/{batch_uuid}/resolve")))
            .bearer_auth(&self.access_token)
            .timeout(self.request_timeout)
            .json(&serde_json::json!({ "decisions": decisions }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(fail(response, Operation::Conflicts).await);
        }
        tracing::debug!(batch_uuid, count = decisions.len(), "conflicts resolved");
        Ok(())
    }
}
