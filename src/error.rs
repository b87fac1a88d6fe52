//! Error types for acl-crawler
//!
//! This module defines the error hierarchy for the crawler:
//! - Store access errors (resolve, list, ACL fetch, create)
//! - Work queue errors (Redis or in-process)
//! - Protocol violations (invalid work items)
//! - Result sink errors
//! - Configuration errors
//!
//! Whether a failure is retried or dead-lettered is decided by
//! [`CrawlerError::is_terminal`].

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for acl-crawler
#[derive(Error, Debug)]
pub enum CrawlerError {
    /// Hierarchical store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Work queue errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Invalid work item
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Result sink errors
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization of an outgoing work item or result failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CrawlerError {
    /// Terminal errors are dead-lettered instead of being redelivered.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CrawlerError::Protocol(_))
    }
}

/// Errors raised by a hierarchical store
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Path not found
    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    /// Path exists but is not a directory
    #[error("Not a directory: '{path}'")]
    NotADirectory { path: String },

    /// Path exists but is not a file
    #[error("Not a file: '{path}'")]
    NotAFile { path: String },

    /// Permission denied
    #[error("Permission denied: '{path}'")]
    PermissionDenied { path: String },

    /// Listing a directory failed
    #[error("Failed to list directory '{path}': {reason}")]
    ListFailed { path: String, reason: String },

    /// Creating a subdirectory failed
    #[error("Failed to create '{name}' under '{parent}': {reason}")]
    CreateFailed {
        parent: String,
        name: String,
        reason: String,
    },

    /// Path escapes the store root or is otherwise malformed
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Transient service or network fault
    #[error("Transient store failure on '{path}': {reason}")]
    Transient { path: String, reason: String },
}

impl StoreError {
    /// Map an I/O error on `path` to a store error
    pub fn from_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound {
                path: path.to_string(),
            },
            std::io::ErrorKind::PermissionDenied => StoreError::PermissionDenied {
                path: path.to_string(),
            },
            _ => StoreError::Transient {
                path: path.to_string(),
                reason: err.to_string(),
            },
        }
    }

    /// Path associated with this error
    pub fn path(&self) -> &str {
        match self {
            StoreError::NotFound { path }
            | StoreError::NotADirectory { path }
            | StoreError::NotAFile { path }
            | StoreError::PermissionDenied { path }
            | StoreError::ListFailed { path, .. }
            | StoreError::InvalidPath { path, .. }
            | StoreError::Transient { path, .. } => path,
            StoreError::CreateFailed { parent, .. } => parent,
        }
    }
}

/// Work queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Redis connection failed
    #[error("Failed to connect to Redis at '{url}': {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// Queue operation failed
    #[error("Queue operation failed: {0}")]
    OperationFailed(String),

    /// Lock token does not match an in-flight delivery
    #[error("Unknown or expired lock token '{0}'")]
    LockLost(String),

    /// Redis error
    #[error("Redis error: {0}")]
    Redis(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Redis(err.to_string())
    }
}

/// Invalid work items. These are never retried.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A visit item that claims to be a file
    #[error("Visit item for '{path}' is not a directory; only directories can be crawled")]
    NotADirectory { path: String },

    /// Payload could not be decoded as the expected work item
    #[error("Malformed {kind} work item: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

/// Result sink errors
#[derive(Error, Debug)]
pub enum SinkError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error while writing results
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Result could not be encoded
    #[error("Failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),

    /// Blocking writer task failed
    #[error("Sink writer task failed: {0}")]
    Writer(String),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid consumer concurrency
    #[error("Invalid concurrency {count}: must be between 1 and {max}")]
    InvalidConcurrency { count: usize, max: usize },

    /// Invalid lease duration
    #[error("Invalid lease of {secs}s: must be at least {min}s")]
    InvalidLease { secs: u64, min: u64 },

    /// Invalid Redis URL
    #[error("Invalid Redis URL: {0}")]
    InvalidRedisUrl(String),

    /// Invalid queue name
    #[error("Invalid queue name '{0}': must be non-empty and contain no whitespace")]
    InvalidQueueName(String),

    /// Output path error
    #[error("Invalid output path '{path}': {reason}")]
    InvalidOutputPath { path: PathBuf, reason: String },

    /// Store root missing or not a directory
    #[error("Invalid store root '{path}': {reason}")]
    InvalidStoreRoot { path: PathBuf, reason: String },
}

/// Seeding endpoint errors
#[derive(Error, Debug)]
pub enum ServerError {
    /// Request did not name a root to crawl
    #[error("Missing 'name': pass ?name=<root> or a JSON body {{\"name\": \"<root>\"}}")]
    MissingName,

    /// Seeding or status lookup failed
    #[error("{0}")]
    Crawler(#[from] CrawlerError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bind address could not be parsed
    #[error("Invalid bind address '{0}'")]
    InvalidBind(String),
}

impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::Json;

        let status = match &self {
            ServerError::MissingName | ServerError::InvalidBind(_) => StatusCode::BAD_REQUEST,
            ServerError::Crawler(CrawlerError::Store(StoreError::NotFound { .. })) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Result type alias for CrawlerError
pub type Result<T> = std::result::Result<T, CrawlerError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for QueueError
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Result type alias for SinkError
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// Result type alias for ServerError
pub type ServerResult<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_are_terminal() {
        let err: CrawlerError = ProtocolError::NotADirectory {
            path: "/a/file.txt".into(),
        }
        .into();
        assert!(err.is_terminal());

        let err: CrawlerError = StoreError::NotFound { path: "/a".into() }.into();
        assert!(!err.is_terminal());

        let err: CrawlerError = QueueError::OperationFailed("XADD".into()).into();
        assert!(!err.is_terminal());
    }

    #[test]
    fn test_store_error_from_io() {
        let err = StoreError::from_io(
            "/missing",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(err.path(), "/missing");

        let err = StoreError::from_io(
            "/locked",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"),
        );
        assert!(matches!(err, StoreError::PermissionDenied { .. }));

        let err = StoreError::from_io("/flaky", std::io::Error::other("reset"));
        assert!(matches!(err, StoreError::Transient { .. }));
    }
}
