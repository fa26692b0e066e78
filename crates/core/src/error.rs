//! Shared error kinds for osgrep, matchable by variant per the error-handling design:
//! callers branch on *kind*, not on message text.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum OsgrepError {
    #[error("writer lock held by pid {holder_pid} since {holder_since}")]
    LockHeld { holder_pid: u32, holder_since: String },

    #[error("lock I/O error: {0}")]
    LockIo(#[source] std::io::Error),

    #[error("file is not valid UTF-8: {path}")]
    DecodeError { path: PathBuf },

    #[error("parser failed for {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("worker {worker_id} crashed: {reason}")]
    WorkerCrash { worker_id: u32, reason: String },

    #[error("worker {worker_id} timed out after {timeout_ms}ms")]
    WorkerTimeout { worker_id: u32, timeout_ms: u64 },

    #[error("vector has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("store '{name}' is not yet created")]
    StoreMissing { name: String },

    #[error("path escapes project root: {path}")]
    InvalidPath { path: String },

    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("schema migration failed: {reason}")]
    SchemaMigrationFailed { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, OsgrepError>;
