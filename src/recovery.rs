//! Recovery Coordinator — §4.5: runs once at startup, turning the WAL's
//! on-disk state into a populated `EntryTable`, and handling the case where
//! the log itself can't be trusted.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{info, warn};

use crate::cancel::CancellationToken;
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::entry::{Block, CacheEntry};
use crate::error::{CacheError, Result};
use crate::table::EntryTable;
use crate::wal::WalPersister;

/// Open the WAL and rebuild the entry table from it. Never cancelled
/// partway — see [`recover_with_cancel`].
///
/// On `Corrupt` or `VersionMismatch` (§7's propagation policy for recovery),
/// the log is reinitialized as empty rather than surfaced to the caller —
/// everything buffered-but-not-yet-uploaded is lost, but the cache starts
/// clean instead of refusing to open.
pub fn recover(config: &CacheConfig, clock: &dyn Clock) -> Result<(WalPersister, EntryTable)> {
    recover_with_cancel(config, clock, &CancellationToken::new())
}

/// As [`recover`], but threads `cancel` through the WAL walk (§9).
pub fn recover_with_cancel(
    config: &CacheConfig,
    clock: &dyn Clock,
    cancel: &CancellationToken,
) -> Result<(WalPersister, EntryTable)> {
    cancel.check()?;
    let wal = WalPersister::open(config)?;
    let table = EntryTable::new();

    let recovered = match wal.recover_with_cancel(cancel) {
        Ok(state) => state,
        Err(CacheError::Corrupt(reason)) => {
            warn!("WAL at {:?} corrupt ({reason}); reinitializing", wal.path());
            wal.reinitialize(config.initial_file_size)?;
            Default::default()
        }
        Err(CacheError::VersionMismatch { found, expected }) => {
            warn!(
                "WAL at {:?} has version {found}, expected {expected}; reinitializing",
                wal.path()
            );
            wal.reinitialize(config.initial_file_size)?;
            Default::default()
        }
        Err(other) => return Err(other),
    };

    let now = clock.now_millis();
    let mut by_content: BTreeMap<Vec<u8>, BTreeMap<(u32, u32), Block>> = BTreeMap::new();
    let mut logical_size: BTreeMap<Vec<u8>, u64> = BTreeMap::new();
    for block in recovered.blocks {
        let end_offset = block.chunk_idx as u64 * config.chunk_size as u64
            + block.block_idx as u64 * config.block_size as u64
            + block.data.len() as u64;
        let size_entry = logical_size.entry(block.content_id.clone()).or_insert(0);
        *size_entry = (*size_entry).max(end_offset);
        by_content.entry(block.content_id).or_default().insert(
            (block.chunk_idx, block.block_idx),
            Block {
                data: block.data,
                state: block.state,
            },
        );
    }

    let entry_count = by_content.len();
    for (content_id, blocks) in by_content {
        let size = logical_size.get(&content_id).copied().unwrap_or(0);
        table.insert(
            content_id,
            Arc::new(CacheEntry::from_recovered(blocks, size, now)),
        );
    }

    info!(
        "recovered {} entries from WAL at {:?}",
        entry_count,
        wal.path()
    );

    Ok((wal, table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[test]
    fn recovery_on_corrupt_header_starts_clean() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            initial_file_size: 256,
            ..CacheConfig::default()
        };

        // Write garbage bytes over the header before the engine ever opens it.
        std::fs::create_dir_all(&config.cache_dir).unwrap();
        std::fs::write(config.wal_path(), vec![0xFFu8; 256]).unwrap();

        let clock = FixedClock::new(0);
        let (_wal, table) = recover(&config, &clock).unwrap();
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn recovery_rehydrates_entries_from_prior_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            initial_file_size: 4096,
            ..CacheConfig::default()
        };
        let clock = FixedClock::new(0);

        {
            let (wal, _table) = recover(&config, &clock).unwrap();
            wal.append_block_write(b"id1".to_vec(), 0, 0, 0, b"payload".to_vec())
                .unwrap();
            wal.close().unwrap();
        }

        let (_wal, table) = recover(&config, &clock).unwrap();
        assert_eq!(table.count(), 1);
        assert!(table.contains(b"id1"));
    }

    /// §4.5: a recovered entry with one uploaded block and one still
    /// pending must come back as `Buffering`, not `Uploading` — the log
    /// proves bytes exist, not that an upload is actually in flight.
    #[test]
    fn recovery_of_partially_uploaded_multi_block_entry_is_buffering() {
        use crate::types::CacheState;

        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            block_size: 16,
            chunk_size: 64,
            initial_file_size: 4096,
            ..CacheConfig::default()
        };
        let clock = FixedClock::new(0);

        {
            let (wal, _table) = recover(&config, &clock).unwrap();
            wal.append_block_write(b"id1".to_vec(), 0, 0, 0, b"first".to_vec())
                .unwrap();
            wal.append_block_write(b"id1".to_vec(), 0, 1, 0, b"second".to_vec())
                .unwrap();
            wal.append_block_uploaded(b"id1".to_vec(), 0, 0).unwrap();
            wal.close().unwrap();
        }

        let (_wal, table) = recover(&config, &clock).unwrap();
        let entry = table.get(b"id1").unwrap();
        assert_eq!(entry.get_state(), CacheState::Buffering);
        assert_eq!(entry.total_size(), 16 + 6);
    }
}
