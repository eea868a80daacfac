//! Error types for the threat intelligence aggregator.
//!
//! Library crates use [`ThreatIntelError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Collector and storage failures have their own enums because they are
//! absorbed or downgraded to warnings instead of aborting a run.

use std::path::PathBuf;

/// Top-level error type for all aggregator operations.
#[derive(Debug, thiserror::Error)]
pub enum ThreatIntelError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside of a collector call.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed finding or unparseable upstream content.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Session store error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (illegal state transition, bad identifier, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// No collector produced a usable finding.
    #[error("run failed: no collector succeeded ({})", .failures.join("; "))]
    RunFailed { failures: Vec<String> },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ThreatIntelError>;

impl ThreatIntelError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// CollectorError
// ---------------------------------------------------------------------------

/// Failure of a single collector call.
///
/// Never aborts a run. The transient flag feeds a future retry policy; nothing
/// is retried within a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectorError {
    /// The call did not finish before its deadline.
    #[error("timed out before deadline")]
    Timeout,

    /// Upstream asked us to slow down.
    #[error("rate limited{}", .retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// Connection, DNS, TLS or 5xx failure.
    #[error("network error: {message}")]
    Network { message: String, transient: bool },

    /// Upstream rejected the request (4xx other than 429).
    #[error("upstream returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Upstream answered with a body we could not decode.
    #[error("malformed upstream response: {message}")]
    Malformed { message: String },
}

impl CollectorError {
    /// Whether a later run could reasonably succeed with the same input.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimited { .. } => true,
            Self::Network { transient, .. } => *transient,
            Self::Upstream { .. } | Self::Malformed { .. } => false,
        }
    }

    /// Create a malformed-response error from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed {
            message: msg.into(),
        }
    }

    /// Create a transient network error from any displayable message.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network {
            message: msg.into(),
            transient: true,
        }
    }
}

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

/// Session store failure. Reported to callers as a warning, never fatal to a run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// The write would violate the append-only ordering of a session.
    #[error("write conflict in session {session_id}: {reason}")]
    WriteConflict { session_id: String, reason: String },

    /// The backing database could not be reached or opened.
    #[error("storage connection error: {0}")]
    Connection(String),

    /// A query failed or a stored payload could not be decoded.
    #[error("storage error: {0}")]
    Backend(String),

    /// The configured table/namespace is not a plain SQL identifier.
    #[error("invalid storage namespace: {0:?}")]
    InvalidNamespace(String),
}

impl StorageError {
    /// Create a write conflict for a session.
    pub fn conflict(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteConflict {
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ThreatIntelError::config("missing collectors");
        assert_eq!(err.to_string(), "config error: missing collectors");

        let err = ThreatIntelError::RunFailed {
            failures: vec!["web: timed out".into(), "feed: HTTP 500".into()],
        };
        assert!(err.to_string().contains("web: timed out; feed: HTTP 500"));
    }

    #[test]
    fn collector_error_transience() {
        assert!(CollectorError::Timeout.is_transient());
        assert!(CollectorError::RateLimited { retry_after_secs: Some(30) }.is_transient());
        assert!(CollectorError::network("connection reset").is_transient());
        assert!(!CollectorError::malformed("not json").is_transient());
        assert!(
            !CollectorError::Upstream {
                status: 401,
                message: "unauthorized".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn rate_limit_display_includes_retry_hint() {
        let err = CollectorError::RateLimited { retry_after_secs: Some(12) };
        assert_eq!(err.to_string(), "rate limited (retry after 12s)");
        let err = CollectorError::RateLimited { retry_after_secs: None };
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn storage_error_converts() {
        let err: ThreatIntelError = StorageError::conflict("abc", "timestamp went backwards").into();
        assert!(err.to_string().contains("session abc"));
    }
}
