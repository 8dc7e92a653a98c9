//! Long-running client flows: checkout/download and upload.

mod download;
mod upload;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use download::{DownloadFlow, DownloadOutcome};
pub use upload::{validate_decisions, ConflictHandling, UploadFlow, UploadOutcome};

use crate::error::{Error, Result};
use crate::models::UploadBatch;

/// Cooperative cancellation flag shared with the caller.
///
/// Flows check the token at step boundaries; a cancelled flow cleans
/// up its partial work before returning [`Error::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One progress update emitted by a flow.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Overall flow progress, 0 to 100, monotone within a flow run.
    pub percent: u8,
    /// Short human-readable stage label.
    pub stage: String,
    /// Latest batch state, present while polling an upload.
    pub batch: Option<UploadBatch>,
}

/// How a flow run ended.
#[derive(Debug, Clone)]
pub enum FlowTermination {
    Success,
    Failure(String),
    Cancelled,
}

/// Receives flow events. All methods have no-op defaults except
/// progress, which every caller wants.
pub trait EventSink {
    fn on_progress(&mut self, event: &ProgressEvent);

    fn on_conflict_detected(&mut self, _batch_uuid: &str) {}

    fn on_terminal(&mut self, _termination: &FlowTermination) {}
}

/// Clamps reported progress so it never moves backwards.
///
/// Server-reported percentages can regress between polls; the caller
/// only ever sees a monotone sequence ending at 100 on success.
struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    const fn new() -> Self {
        Self { last: 0 }
    }

    fn emit(&mut self, sink: &mut dyn EventSink, percent: u8, stage: &str, batch: Option<UploadBatch>) {
        let percent = percent.min(100).max(self.last);
        self.last = percent;
        sink.on_progress(&ProgressEvent {
            percent,
            stage: stage.to_string(),
            batch,
        });
    }
}
