//! Configuration surface. Plain struct, no CLI, no environment variables —
//! this component is embedded (see §6 of the spec).

use crate::error::{CacheError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// How often the WAL requests an OS flush of dirty mmap pages to disk.
///
/// This is independent of crash-safety (§4.3.1): the header-before-ack
/// ordering holds regardless of sync policy. `sync()` only bounds how much
/// durable-but-unflushed data could be lost to a whole-machine power loss,
/// as opposed to a process crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    /// Never sync proactively; rely on the OS's own writeback schedule.
    Async,
    /// Sync on a fixed interval, driven by the embedder.
    Periodic(Duration),
    /// Sync after every single append. Safest, slowest.
    EveryAppend,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::Async
    }
}

/// Default block size: 64 KiB.
pub const DEFAULT_BLOCK_SIZE: u32 = 64 * 1024;
/// Default chunk size: 16 MiB.
pub const DEFAULT_CHUNK_SIZE: u32 = 16 * 1024 * 1024;
/// Default initial WAL file size: 64 MiB.
pub const DEFAULT_INITIAL_FILE_SIZE: u64 = 64 * 1024 * 1024;
/// Default growth factor: double on overflow.
pub const DEFAULT_GROWTH_FACTOR: u32 = 2;

/// Engine configuration. Everything the cache needs is threaded through this
/// struct — no process-wide singletons (Design Notes, §9).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding `cache.dat`. Must exist or be creatable.
    pub cache_dir: PathBuf,
    /// Size of one block unit, in bytes. Must be a power of two.
    pub block_size: u32,
    /// Size of one chunk, in bytes. Must be a multiple of `block_size`.
    pub chunk_size: u32,
    /// Starting WAL file size, in bytes.
    pub initial_file_size: u64,
    /// Multiplicative growth applied on overflow. Must be >= 2.
    pub growth_factor: u32,
    /// How often to msync the mmap region.
    pub sync_policy: SyncPolicy,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Validate field combinations the engine depends on. Called once at
    /// startup; never re-checked on the hot path.
    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two() {
            return Err(CacheError::InvalidArgument(format!(
                "block_size {} is not a power of two",
                self.block_size
            )));
        }
        if self.chunk_size == 0 || self.chunk_size % self.block_size != 0 {
            return Err(CacheError::InvalidArgument(format!(
                "chunk_size {} is not a positive multiple of block_size {}",
                self.chunk_size, self.block_size
            )));
        }
        if self.growth_factor < 2 {
            return Err(CacheError::InvalidArgument(format!(
                "growth_factor {} must be >= 2",
                self.growth_factor
            )));
        }
        if self.initial_file_size < crate::wal::HEADER_SIZE as u64 {
            return Err(CacheError::InvalidArgument(format!(
                "initial_file_size {} smaller than WAL header size {}",
                self.initial_file_size,
                crate::wal::HEADER_SIZE
            )));
        }
        Ok(())
    }

    /// Number of blocks per chunk, derived from `chunk_size` / `block_size`.
    pub fn blocks_per_chunk(&self) -> u32 {
        self.chunk_size / self.block_size
    }

    pub fn wal_path(&self) -> PathBuf {
        self.cache_dir.join("cache.dat")
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("."),
            block_size: DEFAULT_BLOCK_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            initial_file_size: DEFAULT_INITIAL_FILE_SIZE,
            growth_factor: DEFAULT_GROWTH_FACTOR,
            sync_policy: SyncPolicy::default(),
        }
    }
}
