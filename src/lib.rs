//! # walcache — crash-safe, mmap-backed write-ahead-logged block cache
//!
//! Guarantees:
//! - Every accepted write is durable before the call returns: the WAL entry
//!   is flushed, then the header's `next_offset` is advanced and flushed,
//!   in that order (I1).
//! - Recovery never reads past `next_offset`, even on a truncated or
//!   partially-written tail entry (I2).
//! - A write to a `Cached` entry resets it to `Buffering` (I3) — the cache
//!   never reports data as durable that a crash could have dropped.
//! - Content ids are opaque byte strings, compared and hashed as raw bytes,
//!   up to 65535 bytes long (I7).

pub mod cache;
pub mod cancel;
pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod mapper;
pub mod recovery;
pub mod table;
pub mod types;
pub mod wal;

pub use cache::Cache;
pub use cancel::CancellationToken;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{CacheConfig, SyncPolicy};
pub use error::{CacheError, Result};
pub use types::{BlockKey, BlockState, CacheState, ContentId};
