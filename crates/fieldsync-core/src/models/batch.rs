//! Upload batch state as reported by the server pipeline.

use serde::Deserialize;

/// Stage of the server-side upload pipeline.
///
/// Stages advance in declaration order; FAILED and CANCELLED can be
/// jumped to from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStage {
    Received,
    Staging,
    ValidatingStructure,
    ValidatingSchema,
    ValidatingTopology,
    Diffing,
    ConflictChecking,
    Reconciling,
    Promoting,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStage {
    /// Position in the pipeline, used to detect stage regressions
    /// when polling responses arrive out of order.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::Received => 0,
            Self::Staging => 1,
            Self::ValidatingStructure => 2,
            Self::ValidatingSchema => 3,
            Self::ValidatingTopology => 4,
            Self::Diffing => 5,
            Self::ConflictChecking => 6,
            Self::Reconciling => 7,
            Self::Promoting => 8,
            Self::Completed | Self::Failed | Self::Cancelled => 9,
        }
    }

    /// Whether the batch has reached a final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for BatchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Received => "RECEIVED",
            Self::Staging => "STAGING",
            Self::ValidatingStructure => "VALIDATING_STRUCTURE",
            Self::ValidatingSchema => "VALIDATING_SCHEMA",
            Self::ValidatingTopology => "VALIDATING_TOPOLOGY",
            Self::Diffing => "DIFFING",
            Self::ConflictChecking => "CONFLICT_CHECKING",
            Self::Reconciling => "RECONCILING",
            Self::Promoting => "PROMOTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(text)
    }
}

/// One poll response from the batch status endpoint.
///
/// Counts are flat camelCase fields on the response body and fill in
/// as the pipeline progresses, so every one of them defaults to zero.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadBatch {
    pub batch_uuid: String,
    pub status: BatchStage,
    /// Server-reported pipeline progress, 0 to 100.
    #[serde(default)]
    pub progress_pct: u8,
    #[serde(default)]
    pub feature_count: u64,
    #[serde(default)]
    pub valid_count: u64,
    #[serde(default)]
    pub invalid_count: u64,
    /// Number of conflicts found during `CONFLICT_CHECKING`.
    #[serde(default)]
    pub conflict_count: u64,
    #[serde(default)]
    pub accepted_count: u64,
    #[serde(default)]
    pub modified_count: u64,
    #[serde(default)]
    pub new_count: u64,
    #[serde(default)]
    pub deleted_count: u64,
    /// Human-readable failure log, set for FAILED batches.
    #[serde(default)]
    pub error_log: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}
