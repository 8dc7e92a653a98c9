//! Error types for fieldsync-core

use thiserror::Error;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Dataset is already checked out by another user (terminal, not retryable)
    #[error("Dataset {0} is already checked out by another user")]
    LeaseConflict(i64),

    /// Edit token rejected by the server; a fresh checkout is required
    #[error("Edit lease is invalid or expired. Check the dataset out again.")]
    InvalidLease,

    /// Another upload for the same session is still being processed
    #[error("A concurrent upload is already in progress for this dataset")]
    ConcurrentUpload,

    /// No MODIFIED or NEW rows to submit
    #[error("No modified or new features to upload")]
    NothingToUpload,

    /// Sidecar with checkout metadata is missing or incomplete
    #[error("Checkout metadata not found for {0}. Download the dataset again.")]
    MissingCheckout(String),

    /// Snapshot or container could not be parsed
    #[error("Format error: {0}")]
    Format(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level failure (DNS, connection reset, timeout)
    #[error("Transfer error: {0}")]
    Transfer(#[from] reqwest::Error),

    /// Well-formed HTTP error response, normalized into a user-facing message
    #[error("{message}")]
    ServerRejected { status: u16, message: String },

    /// Upload batch reached the FAILED terminal state
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Upload batch was cancelled on the server side
    #[error("Upload batch {0} was cancelled by the server")]
    ServerCancelled(String),

    /// No terminal batch state within the configured polling window
    #[error("Upload batch {0} did not finish within the polling window")]
    PollTimeout(String),

    /// Resource no longer available (e.g. conflict set fetched after the batch moved on)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Conflict decisions do not cover the conflict set exactly
    #[error("Conflict resolution incomplete: {0}")]
    ResolutionIncomplete(String),

    /// Local container error
    #[error("Container error: {0}")]
    Container(#[from] rusqlite::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Upload archive error
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl Error {
    /// Whether the failure is worth retrying after a delay.
    ///
    /// Retry policy itself is a caller decision; this core never retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ServerRejected { status, .. } => {
                matches!(status, 429 | 502 | 503 | 504)
            }
            Self::ConcurrentUpload | Self::Transfer(_) => true,
            _ => false,
        }
    }
}
