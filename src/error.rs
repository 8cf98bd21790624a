//! Crate-wide error type.
//!
//! Mirrors the teacher's one-enum-per-failure-mode style (see
//! `SuperblockError`, `CryptoError`): a flat `thiserror` enum with one
//! variant per documented failure kind, no nested error hierarchies.

use std::io;
use thiserror::Error;

/// The six error kinds the cache surfaces to its callers.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Operation attempted after `close()`.
    #[error("cache is closed")]
    Closed,

    /// WAL failed structural validation: bad magic, truncated entry,
    /// out-of-bounds length, or unknown entry tag.
    #[error("WAL corrupt: {0}")]
    Corrupt(String),

    /// WAL header version does not match the version this build understands.
    #[error("WAL version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u16, expected: u16 },

    /// Underlying filesystem error (open, truncate, mmap, sync).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Caller-signaled cancellation before an append started.
    #[error("operation cancelled")]
    Cancelled,

    /// Argument failed validation, e.g. a content id longer than 65535 bytes.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
