use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Errors raised by snapshot capture, restore and bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("service '{0}' not found")]
    UnknownService(String),

    #[error("unsupported engine '{0}'")]
    UnsupportedEngine(String),

    #[error("container '{0}' is not running")]
    ContainerNotRunning(String),

    /// A remote command exited non-zero or reported errors in its output.
    #[error("{context}: command exited with code {exit_code}: {output}")]
    CommandFailed {
        context: String,
        exit_code: i32,
        output: String,
    },

    #[error("{context}: {source}")]
    Stream {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("timed out after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    #[error("operation cancelled while waiting for {0}")]
    Cancelled(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid compression '{0}' (expected none, gzip or zstd)")]
    InvalidCompression(String),

    #[error("{0}")]
    SnapshotNotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SnapshotError {
    pub fn stream(context: impl Into<String>, source: std::io::Error) -> Self {
        SnapshotError::Stream {
            context: context.into(),
            source,
        }
    }

    pub fn command(context: impl Into<String>, exit_code: i32, output: impl Into<String>) -> Self {
        SnapshotError::CommandFailed {
            context: context.into(),
            exit_code,
            output: output.into(),
        }
    }
}
