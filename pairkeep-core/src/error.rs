use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors surfaced by the test/repair engine.
///
/// Block read errors never show up here: they are absorbed at block
/// granularity by the streaming primitives and reported through
/// [`crate::report::Outcome`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Raised at the next per-block poll after the cancel token trips.
    #[error("operation cancelled")]
    Cancelled,

    #[error("ledger format error: {0}")]
    LedgerFormat(String),

    #[error("length mismatch: {first} has {first_len} bytes, {second} has {second_len} bytes")]
    LengthMismatch {
        first: PathBuf,
        first_len: u64,
        second: PathBuf,
        second_len: u64,
    },

    #[error("{blocks} unreadable block(s) in {path}")]
    Unreadable { path: PathBuf, blocks: u64 },

    #[error("file changed while being scanned: {0}")]
    ChangedDuringScan(PathBuf),

    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
}

impl SyncError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io { path: path.as_ref().to_path_buf(), source }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
