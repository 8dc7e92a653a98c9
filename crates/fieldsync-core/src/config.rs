//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tagger::UploadedRowPolicy;
use crate::util::is_http_url;

/// Server-side conflict handling requested at submit time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Fail the batch as soon as any conflict is found.
    #[default]
    RejectConflicts,
    /// Park the batch in `CONFLICT_CHECKING` and wait for decisions.
    Interactive,
}

impl ConflictStrategy {
    /// Value sent in the upload form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RejectConflicts => "REJECT_CONFLICTS",
            Self::Interactive => "INTERACTIVE",
        }
    }
}

/// Settings for a sync client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base API URL without a trailing slash.
    pub api_base_url: String,
    /// Directory where checked-out datasets are materialized.
    pub data_dir: PathBuf,
    /// Timeout for short control requests (checkout, poll, resolve).
    pub request_timeout: Duration,
    /// Timeout for snapshot downloads and batch submissions.
    pub transfer_timeout: Duration,
    /// Delay between batch status polls.
    pub poll_interval: Duration,
    /// Give up polling after this long without a terminal state.
    pub max_poll_duration: Duration,
    pub conflict_strategy: ConflictStrategy,
    pub uploaded_row_policy: UploadedRowPolicy,
}

impl ClientConfig {
    /// Create a configuration with defaults for everything but the
    /// server URL and data directory.
    pub fn new(api_base_url: &str, data_dir: impl Into<PathBuf>) -> Result<Self> {
        let api_base_url = api_base_url.trim().trim_end_matches('/').to_string();
        if !is_http_url(&api_base_url) {
            return Err(Error::InvalidConfiguration(format!(
                "API base URL must start with http:// or https://, got '{api_base_url}'"
            )));
        }
        Ok(Self {
            api_base_url,
            data_dir: data_dir.into(),
            request_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(2),
            max_poll_duration: Duration::from_secs(600),
            conflict_strategy: ConflictStrategy::default(),
            uploaded_row_policy: UploadedRowPolicy::default(),
        })
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_max_poll_duration(mut self, duration: Duration) -> Self {
        self.max_poll_duration = duration;
        self
    }

    #[must_use]
    pub const fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    #[must_use]
    pub const fn with_uploaded_row_policy(mut self, policy: UploadedRowPolicy) -> Self {
        self.uploaded_row_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let config = ClientConfig::new("https://api.example.com/", "/tmp/fieldsync").unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");
    }

    #[test]
    fn rejects_non_http_urls() {
        let err = ClientConfig::new("ftp://api.example.com", "/tmp/fieldsync").unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = ClientConfig::new("https://api.example.com", "/tmp/fieldsync")
            .unwrap()
            .with_poll_interval(Duration::from_millis(100))
            .with_conflict_strategy(ConflictStrategy::Interactive);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.conflict_strategy, ConflictStrategy::Interactive);
        assert_eq!(config.conflict_strategy.as_str(), "INTERACTIVE");
    }
}
