//! Error types for the autoblogger pipeline.
//!
//! Library crates use [`AutoBloggerError`] via `thiserror`.
//! App crates (cli) wrap this with `color-eyre` for rich diagnostics.
//!
//! Each stage error is classified retryable or permanent at construction
//! (see [`AutoBloggerError::is_retryable`]); the orchestrator never infers
//! retryability from anything else.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all autoblogger operations.
#[derive(Debug, thiserror::Error)]
pub enum AutoBloggerError {
    /// Configuration or rule-table loading/validation error. Fatal at startup.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/driver failure while fetching a source article.
    #[error("fetch error: {message}")]
    Fetch { message: String, transient: bool },

    /// Extracted content fell below the minimum viable article threshold.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Language-model service unavailable or returned a malformed completion.
    #[error("model error: {message}")]
    Model { message: String },

    /// Rewritten output violates a hard content constraint.
    #[error("content policy violation: {message}")]
    ContentPolicy { message: String },

    /// The draft has no extractable keyword candidates at all.
    #[error("enrichment error: {message}")]
    Enrichment { message: String },

    /// No stock image matched any of the derived keywords.
    #[error("no image found: {message}")]
    ImageNotFound { message: String },

    /// Images matched but none satisfied licensing/attribution requirements.
    #[error("license error: {message}")]
    License { message: String },

    /// CMS authentication failed and could not be refreshed.
    #[error("auth error: {message}")]
    Auth { message: String },

    /// CMS rejected or failed to accept the post submission.
    #[error("submit error: {message}")]
    Submit { message: String, transient: bool },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AutoBloggerError>;

impl AutoBloggerError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a transient (retry-eligible) fetch error.
    pub fn fetch_transient(msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
            transient: true,
        }
    }

    /// Create a permanent fetch error (404, malformed URL).
    pub fn fetch_permanent(msg: impl Into<String>) -> Self {
        Self::Fetch {
            message: msg.into(),
            transient: false,
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a model error (always classified retryable).
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model {
            message: msg.into(),
        }
    }

    /// Create a content-policy error (never retried without a template change).
    pub fn content_policy(msg: impl Into<String>) -> Self {
        Self::ContentPolicy {
            message: msg.into(),
        }
    }

    /// Create an enrichment error for degenerate input.
    pub fn enrichment(msg: impl Into<String>) -> Self {
        Self::Enrichment {
            message: msg.into(),
        }
    }

    /// Create an image-not-found error (keyword candidates exhausted).
    pub fn image_not_found(msg: impl Into<String>) -> Self {
        Self::ImageNotFound {
            message: msg.into(),
        }
    }

    /// Create a license error (matches exist but none are compliant).
    pub fn license(msg: impl Into<String>) -> Self {
        Self::License {
            message: msg.into(),
        }
    }

    /// Create a transient submit error (network/5xx).
    pub fn submit_transient(msg: impl Into<String>) -> Self {
        Self::Submit {
            message: msg.into(),
            transient: true,
        }
    }

    /// Create a permanent submit error (validation rejection).
    pub fn submit_permanent(msg: impl Into<String>) -> Self {
        Self::Submit {
            message: msg.into(),
            transient: false,
        }
    }

    /// Create an auth error.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth {
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

    /// Whether a retry against the same input may succeed.
    ///
    /// Model errors cover timeouts, rate limiting, and malformed completions
    /// and are always retry-eligible. Fetch/submit errors carry their own
    /// classification. Everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch { transient, .. } | Self::Submit { transient, .. } => *transient,
            Self::Model { .. } => true,
            _ => false,
        }
    }

    /// The serializable kind tag for failure records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Fetch { .. } => ErrorKind::Fetch,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Model { .. } => ErrorKind::Model,
            Self::ContentPolicy { .. } => ErrorKind::ContentPolicy,
            Self::Enrichment { .. } => ErrorKind::Enrichment,
            Self::ImageNotFound { .. } => ErrorKind::ImageNotFound,
            Self::License { .. } => ErrorKind::License,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Submit { .. } => ErrorKind::Submit,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Serializable error classification stored in job failure records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    Fetch,
    Parse,
    Model,
    ContentPolicy,
    Enrichment,
    ImageNotFound,
    License,
    Auth,
    Submit,
    Storage,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Model => "model",
            Self::ContentPolicy => "content_policy",
            Self::Enrichment => "enrichment",
            Self::ImageNotFound => "image_not_found",
            Self::License => "license",
            Self::Auth => "auth",
            Self::Submit => "submit",
            Self::Storage => "storage",
            Self::Io => "io",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = AutoBloggerError::config("missing rules directory");
        assert_eq!(err.to_string(), "config error: missing rules directory");

        let err = AutoBloggerError::content_policy("banned phrase \"click here\"");
        assert!(err.to_string().contains("click here"));
    }

    #[test]
    fn retryable_classification() {
        assert!(AutoBloggerError::fetch_transient("timeout").is_retryable());
        assert!(!AutoBloggerError::fetch_permanent("HTTP 404").is_retryable());
        assert!(AutoBloggerError::model("rate limited").is_retryable());
        assert!(!AutoBloggerError::content_policy("too short").is_retryable());
        assert!(AutoBloggerError::submit_transient("HTTP 502").is_retryable());
        assert!(!AutoBloggerError::submit_permanent("validation failed").is_retryable());
        assert!(!AutoBloggerError::auth("token rejected").is_retryable());
    }

    #[test]
    fn kind_roundtrips_through_json() {
        let kind = AutoBloggerError::model("x").kind();
        let json = serde_json::to_string(&kind).unwrap();
        assert_eq!(json, r#""model""#);
        let parsed: ErrorKind = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ErrorKind::Model);
    }
}
