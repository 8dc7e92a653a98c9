//! Per-feature synchronization status.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a feature row in the local container.
///
/// Stored as text in the `sync_status` column; rows predating the
/// sync columns have no status at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// Row matches the server snapshot it was materialized from.
    Downloaded,
    /// Row was edited locally since download.
    Modified,
    /// Row was created locally and has no server identity yet.
    New,
    /// Row was part of a successfully promoted upload batch.
    Uploaded,
}

impl SyncStatus {
    /// Text stored in the container column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Downloaded => "DOWNLOADED",
            Self::Modified => "MODIFIED",
            Self::New => "NEW",
            Self::Uploaded => "UPLOADED",
        }
    }

    /// Parse the container column text, tolerating unknown values.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DOWNLOADED" => Some(Self::Downloaded),
            "MODIFIED" => Some(Self::Modified),
            "NEW" => Some(Self::New),
            "UPLOADED" => Some(Self::Uploaded),
            _ => None,
        }
    }

    /// Whether a row with this status carries unsynced local work.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Modified | Self::New)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
