//! Shared utility functions used across multiple modules.

use chrono::{SecondsFormat, Utc};

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current UTC timestamp as an RFC 3339 string.
///
/// This is the format used for `sync_timestamp` values in the local
/// container; lexicographic order matches chronological order.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_http_url_accepts_valid_schemes() {
        assert!(is_http_url("http://localhost"));
        assert!(is_http_url("https://example.com"));
        assert!(!is_http_url("ftp://example.com"));
        assert!(!is_http_url("example.com"));
    }

    #[test]
    fn now_rfc3339_is_sortable() {
        let first = now_rfc3339();
        let second = now_rfc3339();
        assert!(second >= first);
    }
}
