//! The top-level engine — §6 "External Interfaces". `Cache` ties the WAL,
//! the entry table, and the chunk/block mapper together into the public
//! read/write/upload-tracking API, the way the teacher's `Archive` sits on
//! top of `Superblock` + `FileIndex` + `codec`.

use log::info;

use crate::cancel::CancellationToken;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::mapper;
use crate::recovery;
use crate::table::EntryTable;
use crate::types::{validate_content_id, CacheState};
use crate::wal::WalPersister;

/// The cache engine: one open WAL, one entry table, one configuration.
pub struct Cache {
    config: CacheConfig,
    wal: WalPersister,
    table: EntryTable,
    clock: Box<dyn Clock>,
}

impl Cache {
    /// Open (or create) the cache at `config.cache_dir`, running recovery
    /// synchronously before returning (§4.5). Never cancelled partway — see
    /// [`Cache::open_with_cancel`].
    pub fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with_clock(config, Box::new(SystemClock))
    }

    pub fn open_with_clock(config: CacheConfig, clock: Box<dyn Clock>) -> Result<Self> {
        Self::open_with_clock_and_cancel(config, clock, &CancellationToken::new())
    }

    /// As [`Cache::open`], but threads `cancel` through the recovery walk (§9).
    pub fn open_with_cancel(config: CacheConfig, cancel: &CancellationToken) -> Result<Self> {
        Self::open_with_clock_and_cancel(config, Box::new(SystemClock), cancel)
    }

    pub fn open_with_clock_and_cancel(
        config: CacheConfig,
        clock: Box<dyn Clock>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        cancel.check()?;
        config.validate()?;
        let (wal, table) = recovery::recover_with_cancel(&config, clock.as_ref(), cancel)?;
        info!("cache opened at {:?}", config.cache_dir);
        Ok(Self {
            config,
            wal,
            table,
            clock,
        })
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Replace `content_id`'s bytes starting at offset 0. Sugar over
    /// `write_at(content_id, 0, data)`.
    pub fn write(&self, content_id: &[u8], data: &[u8]) -> Result<()> {
        self.write_at(content_id, 0, data)
    }

    /// Write `data` at `offset` within `content_id`, creating the entry if
    /// it doesn't exist yet. Never cancelled partway — see
    /// [`Cache::write_at_with_cancel`].
    pub fn write_at(&self, content_id: &[u8], offset: u64, data: &[u8]) -> Result<()> {
        self.write_at_with_cancel(content_id, offset, data, &CancellationToken::new())
    }

    /// As [`Cache::write_at`], but checked at entry and before each block's
    /// WAL append (§9). The WAL append happens before the entry table is
    /// updated (§5): a crash between the two just means recovery redoes the
    /// table update from the log.
    pub fn write_at_with_cancel(
        &self,
        content_id: &[u8],
        offset: u64,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.check()?;
        validate_content_id(content_id)?;
        let now = self.clock.now_millis();
        let entry = self.table.get_or_create(content_id, now);

        for slice in mapper::split(
            offset,
            data.len(),
            self.config.block_size,
            self.config.blocks_per_chunk(),
        ) {
            cancel.check()?;
            let payload = &data[slice.slice_start..slice.slice_start + slice.slice_len];
            let end_offset = offset + slice.slice_start as u64 + slice.slice_len as u64;
            self.wal.append_block_write_with_cancel(
                content_id.to_vec(),
                slice.chunk_idx,
                slice.block_idx,
                slice.offset_in_block,
                payload.to_vec(),
                cancel,
            )?;
            entry.write_block(
                self.config.block_size,
                slice.chunk_idx,
                slice.block_idx,
                slice.offset_in_block,
                payload,
                end_offset,
                now,
            );
        }

        self.maybe_sync()?;
        Ok(())
    }

    fn maybe_sync(&self) -> Result<()> {
        if self.config.sync_policy == crate::config::SyncPolicy::EveryAppend {
            self.wal.sync()?;
        }
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────────

    pub fn read(&self, content_id: &[u8], len: usize) -> Result<Vec<u8>> {
        self.read_at(content_id, 0, len)
    }

    /// Read `len` bytes starting at `offset` within `content_id`. Never
    /// cancelled partway — see [`Cache::read_at_with_cancel`].
    pub fn read_at(&self, content_id: &[u8], offset: u64, len: usize) -> Result<Vec<u8>> {
        self.read_at_with_cancel(content_id, offset, len, &CancellationToken::new())
    }

    /// As [`Cache::read_at`]. `ReadAt` creates the entry on first touch
    /// (§3.3) the same as a write would; an id nobody has written to yet
    /// reads back as zeros rather than erroring (§6 lists only `Closed` as
    /// a `ReadAt` error, not a missing-id case).
    pub fn read_at_with_cancel(
        &self,
        content_id: &[u8],
        offset: u64,
        len: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        cancel.check()?;
        validate_content_id(content_id)?;
        let now = self.clock.now_millis();
        let entry = self.table.get_or_create(content_id, now);

        let mut out = Vec::with_capacity(len);
        for slice in mapper::split(
            offset,
            len,
            self.config.block_size,
            self.config.blocks_per_chunk(),
        ) {
            cancel.check()?;
            let bytes = entry.read_range(
                self.config.block_size,
                slice.chunk_idx,
                slice.block_idx,
                slice.offset_in_block,
                slice.slice_len,
                now,
            );
            out.extend_from_slice(&bytes);
        }
        Ok(out)
    }

    // ── Metadata ────────────────────────────────────────────────────────

    pub fn exists(&self, content_id: &[u8]) -> bool {
        self.table.contains(content_id)
    }

    pub fn size(&self, content_id: &[u8]) -> Option<u64> {
        self.table.get(content_id).map(|e| e.total_size())
    }

    pub fn list(&self) -> Vec<Vec<u8>> {
        self.table.list()
    }

    pub fn total_size(&self) -> u64 {
        self.table.total_size()
    }

    pub fn remove(&self, content_id: &[u8]) -> Result<()> {
        self.remove_with_cancel(content_id, &CancellationToken::new())
    }

    pub fn remove_with_cancel(&self, content_id: &[u8], cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        validate_content_id(content_id)?;
        self.wal
            .append_remove_with_cancel(content_id.to_vec(), cancel)?;
        self.table.remove(content_id);
        self.maybe_sync()?;
        Ok(())
    }

    pub fn remove_all(&self) -> Result<()> {
        self.remove_all_with_cancel(&CancellationToken::new())
    }

    pub fn remove_all_with_cancel(&self, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        for content_id in self.table.list() {
            cancel.check()?;
            self.wal.append_remove_with_cancel(content_id, cancel)?;
        }
        self.table.clear();
        self.maybe_sync()?;
        Ok(())
    }

    pub fn get_state(&self, content_id: &[u8]) -> CacheState {
        self.table
            .get(content_id)
            .map(|e| e.get_state())
            .unwrap_or(CacheState::None)
    }

    pub fn set_state(&self, content_id: &[u8], state: CacheState) {
        if let Some(entry) = self.table.get(content_id) {
            entry.set_state(state);
        }
    }

    pub fn get_flushed_offset(&self, content_id: &[u8]) -> Option<u64> {
        self.table.get(content_id).map(|e| e.flushed_offset())
    }

    pub fn set_flushed_offset(&self, content_id: &[u8], offset: u64) {
        if let Some(entry) = self.table.get(content_id) {
            entry.set_flushed_offset(offset);
        }
    }

    pub fn last_access(&self, content_id: &[u8]) -> Option<u64> {
        self.table.get(content_id).map(|e| e.last_access_millis())
    }

    // ── Uploader-facing ─────────────────────────────────────────────────

    /// Record that a block has been durably uploaded to object storage.
    /// Trusts the caller (Open Question Q2): no cross-check against what
    /// was actually written is performed.
    pub fn mark_block_uploaded(&self, content_id: &[u8], chunk_idx: u32, block_idx: u32) -> Result<()> {
        self.mark_block_uploaded_with_cancel(content_id, chunk_idx, block_idx, &CancellationToken::new())
    }

    pub fn mark_block_uploaded_with_cancel(
        &self,
        content_id: &[u8],
        chunk_idx: u32,
        block_idx: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        cancel.check()?;
        validate_content_id(content_id)?;
        self.wal.append_block_uploaded_with_cancel(
            content_id.to_vec(),
            chunk_idx,
            block_idx,
            cancel,
        )?;
        if let Some(entry) = self.table.get(content_id) {
            entry.mark_block_uploaded(chunk_idx, block_idx);
        }
        self.maybe_sync()?;
        Ok(())
    }

    /// Blocks still pending upload for `content_id`, for an uploader to drain.
    pub fn iter_dirty_blocks(&self, content_id: &[u8]) -> Vec<(u32, u32, Vec<u8>)> {
        self.table
            .get(content_id)
            .map(|e| e.dirty_blocks())
            .unwrap_or_default()
    }

    pub fn sync(&self) -> Result<()> {
        self.wal.sync()
    }

    pub fn close(&self) -> Result<()> {
        self.wal.close()
    }

}
