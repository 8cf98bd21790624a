//! The write-ahead log: a single mmap-backed append-only file plus the
//! recovery walk that rebuilds in-memory state from it (§3, §4.3).
//!
//! Locking follows the same single-writer-lock shape as the teacher's
//! `append_storage`-style stores: one `Mutex<Inner>` guards the file, the
//! mmap, and the header for the full duration of an append, a sync, or a
//! recovery walk. No operation here holds any *other* lock while this one
//! is held.

pub mod entry;
pub mod header;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use memmap2::MmapMut;

use crate::cancel::CancellationToken;
use crate::config::{CacheConfig, SyncPolicy};
use crate::error::{CacheError, Result};
use crate::types::BlockState;
use entry::WalEntry;
use header::WalHeader;

/// Re-exported so callers (e.g. `CacheConfig::validate`) can reference
/// `crate::wal::HEADER_SIZE` without reaching into the `header` submodule.
pub const HEADER_SIZE: usize = header::HEADER_SIZE;

/// One live block reconstructed from the log during recovery. `data` is
/// already merged across every surviving `BlockWrite` that touched this
/// block, in log order — callers don't need `offset_in_block` themselves.
#[derive(Debug, Clone)]
pub struct RecoveredBlock {
    pub content_id: Vec<u8>,
    pub chunk_idx: u32,
    pub block_idx: u32,
    pub data: Vec<u8>,
    pub state: BlockState,
}

/// Everything the Recovery Coordinator needs to rehydrate the entry table.
#[derive(Debug, Clone, Default)]
pub struct RecoveredState {
    pub blocks: Vec<RecoveredBlock>,
}

struct Inner {
    file: File,
    mmap: MmapMut,
    file_size: u64,
    header: WalHeader,
    growth_factor: u32,
    sync_policy: SyncPolicy,
    closed: bool,
}

/// The WAL persister: owns `cache.dat` and serializes every append behind
/// a single mutex (§5).
pub struct WalPersister {
    inner: Mutex<Inner>,
    path: PathBuf,
}

impl WalPersister {
    /// Open an existing WAL file or create a fresh one, mapping it into
    /// memory. Does not walk entries — call [`WalPersister::recover`] next.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.cache_dir)?;
        let path = config.wal_path();
        let is_new = !path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_size = if is_new {
            file.set_len(config.initial_file_size)?;
            config.initial_file_size
        } else {
            file.metadata()?.len()
        };

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        let header = if is_new {
            let fresh = WalHeader::fresh();
            fresh.write_into(&mut mmap[0..HEADER_SIZE]);
            mmap.flush_range(0, HEADER_SIZE)?;
            fresh
        } else {
            WalHeader::read_from(&mmap[0..HEADER_SIZE.min(mmap.len())], file_size)?
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                file,
                mmap,
                file_size,
                header,
                growth_factor: config.growth_factor,
                sync_policy: config.sync_policy,
                closed: false,
            }),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Walk the log from just past the header to `header.next_offset`,
    /// rebuilding live block state (§4.3.3, §4.3.4). Never cancelled
    /// partway — see [`WalPersister::recover_with_cancel`].
    pub fn recover(&self) -> Result<RecoveredState> {
        self.recover_with_cancel(&CancellationToken::new())
    }

    /// As [`WalPersister::recover`], but checks `cancel` before walking each
    /// entry in either pass (§9: checked before a step that might block).
    ///
    /// Pass 1 collects `Remove` tombstones and `BlockUploaded` markers,
    /// skipping `BlockWrite` payloads without materializing them. Pass 2
    /// re-walks only the recorded `BlockWrite` offsets, in order, applying
    /// tombstones by position so a write that follows a remove survives.
    pub fn recover_with_cancel(&self, cancel: &CancellationToken) -> Result<RecoveredState> {
        cancel.check()?;
        let guard = self.inner.lock().unwrap();
        let bound = guard.header.next_offset;
        let buf = &guard.mmap[..];

        let mut pos = HEADER_SIZE as u64;
        let mut block_write_offsets = Vec::new();
        let mut last_remove: HashMap<Vec<u8>, u64> = HashMap::new();
        let mut uploaded: HashMap<(Vec<u8>, u32, u32), u64> = HashMap::new();

        while pos < bound {
            cancel.check()?;
            let tag = entry::peek_tag(buf, pos as usize, bound)?;
            match tag {
                entry::TAG_BLOCK_WRITE => {
                    let size = entry::skip_size(buf, pos as usize, bound)?;
                    block_write_offsets.push(pos);
                    pos += size as u64;
                }
                entry::TAG_BLOCK_UPLOADED => {
                    let (decoded, size) = entry::decode_full(buf, pos as usize, bound)?;
                    if let WalEntry::BlockUploaded {
                        content_id,
                        chunk_idx,
                        block_idx,
                    } = decoded
                    {
                        uploaded.insert((content_id, chunk_idx, block_idx), pos);
                    }
                    pos += size as u64;
                }
                entry::TAG_REMOVE => {
                    let (decoded, size) = entry::decode_full(buf, pos as usize, bound)?;
                    if let WalEntry::Remove { content_id } = decoded {
                        last_remove.insert(content_id, pos);
                    }
                    pos += size as u64;
                }
                other => {
                    return Err(CacheError::Corrupt(format!(
                        "unknown WAL entry tag {other} at offset {pos}"
                    )))
                }
            }
        }

        // Merged in write order so a later partial write patches over an
        // earlier one in the same block, exactly like `entry::Block::patch`.
        let mut live: HashMap<(Vec<u8>, u32, u32), (u64, RecoveredBlock)> = HashMap::new();

        for write_pos in block_write_offsets {
            cancel.check()?;
            let (decoded, _) = entry::decode_full(buf, write_pos as usize, bound)?;
            let WalEntry::BlockWrite {
                content_id,
                chunk_idx,
                block_idx,
                offset_in_block,
                data,
            } = decoded
            else {
                unreachable!("offset recorded as BlockWrite in pass 1");
            };

            if let Some(&rm_pos) = last_remove.get(&content_id) {
                if rm_pos > write_pos {
                    continue; // tombstoned: a Remove follows this write
                }
            }

            let key = (content_id.clone(), chunk_idx, block_idx);
            let slot = live.entry(key).or_insert_with(|| {
                (
                    write_pos,
                    RecoveredBlock {
                        content_id: content_id.clone(),
                        chunk_idx,
                        block_idx,
                        data: Vec::new(),
                        state: BlockState::Pending,
                    },
                )
            });
            let needed = offset_in_block as usize + data.len();
            if slot.1.data.len() < needed {
                slot.1.data.resize(needed, 0);
            }
            slot.1.data[offset_in_block as usize..needed].copy_from_slice(&data);
            slot.0 = write_pos; // last write to touch this block
        }

        let blocks = live
            .into_iter()
            .map(|(key, (write_pos, mut block))| {
                if let Some(&up_pos) = uploaded.get(&key) {
                    if up_pos > write_pos {
                        block.state = BlockState::Uploaded;
                    }
                }
                block
            })
            .collect();

        Ok(RecoveredState { blocks })
    }

    /// Discard the current log and start a fresh, empty WAL. Called by the
    /// Recovery Coordinator when `recover` reports `Corrupt` or
    /// `VersionMismatch` (§7 propagation policy).
    pub fn reinitialize(&self, initial_file_size: u64) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.file_size < initial_file_size {
            guard.file.set_len(initial_file_size)?;
            guard.mmap = unsafe { MmapMut::map_mut(&guard.file)? };
            guard.file_size = initial_file_size;
        }
        let fresh = WalHeader::fresh();
        fresh.write_into(&mut guard.mmap[0..HEADER_SIZE]);
        guard.mmap.flush_range(0, HEADER_SIZE)?;
        guard.header = fresh;
        Ok(())
    }

    pub fn append_block_write(
        &self,
        content_id: Vec<u8>,
        chunk_idx: u32,
        block_idx: u32,
        offset_in_block: u32,
        data: Vec<u8>,
    ) -> Result<()> {
        self.append_block_write_with_cancel(
            content_id,
            chunk_idx,
            block_idx,
            offset_in_block,
            data,
            &CancellationToken::new(),
        )
    }

    pub fn append_block_write_with_cancel(
        &self,
        content_id: Vec<u8>,
        chunk_idx: u32,
        block_idx: u32,
        offset_in_block: u32,
        data: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.append(
            WalEntry::BlockWrite {
                content_id,
                chunk_idx,
                block_idx,
                offset_in_block,
                data,
            },
            cancel,
        )
    }

    pub fn append_block_uploaded(
        &self,
        content_id: Vec<u8>,
        chunk_idx: u32,
        block_idx: u32,
    ) -> Result<()> {
        self.append_block_uploaded_with_cancel(
            content_id,
            chunk_idx,
            block_idx,
            &CancellationToken::new(),
        )
    }

    pub fn append_block_uploaded_with_cancel(
        &self,
        content_id: Vec<u8>,
        chunk_idx: u32,
        block_idx: u32,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.append(
            WalEntry::BlockUploaded {
                content_id,
                chunk_idx,
                block_idx,
            },
            cancel,
        )
    }

    pub fn append_remove(&self, content_id: Vec<u8>) -> Result<()> {
        self.append_remove_with_cancel(content_id, &CancellationToken::new())
    }

    pub fn append_remove_with_cancel(
        &self,
        content_id: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.append(WalEntry::Remove { content_id }, cancel)
    }

    /// The §4.3.1 append contract, in order:
    /// 1. compute the entry's encoded size
    /// 2. ensure there is room, growing the file if not
    /// 3. serialize the entry at `next_offset`
    /// 4. compute the new header
    /// 5. write the header at offset 0 (this is the durability point, I1)
    /// 6. return success
    ///
    /// `cancel` is honored at entry and before the (potentially slow) grow
    /// step, but never once step 3 has started: a cancellation racing with
    /// an append already writing its entry bytes loses, and the append
    /// always finishes (§9). Sync is gated on `sync_policy` — this path
    /// deliberately does not flush on every append; only `EveryAppend`
    /// does, and `sync()`/`close()` remain the explicit flush points.
    fn append(&self, entry: WalEntry, cancel: &CancellationToken) -> Result<()> {
        cancel.check()?;
        let mut guard = self.inner.lock().unwrap();
        if guard.closed {
            return Err(CacheError::Closed);
        }

        let size = entry.encoded_len() as u64;
        let write_offset = guard.header.next_offset;
        let required = write_offset
            .checked_add(size)
            .ok_or_else(|| CacheError::Corrupt("append size overflow".into()))?;

        if required > guard.file_size {
            cancel.check()?;
            Self::grow_to_fit(&mut guard, required)?;
        }

        let extra = if let WalEntry::BlockWrite { ref data, .. } = entry {
            data.len() as u64
        } else {
            0
        };

        let sync_every_append = guard.sync_policy == SyncPolicy::EveryAppend;

        entry.encode_into(&mut guard.mmap[write_offset as usize..(write_offset + size) as usize]);
        if sync_every_append {
            guard
                .mmap
                .flush_range(write_offset as usize, size as usize)?;
        }

        let new_header = WalHeader {
            version: guard.header.version,
            entry_count: guard.header.entry_count + 1,
            next_offset: required,
            total_data_size: guard.header.total_data_size + extra,
        };
        new_header.write_into(&mut guard.mmap[0..HEADER_SIZE]);
        if sync_every_append {
            guard.mmap.flush_range(0, HEADER_SIZE)?;
        }
        guard.header = new_header;

        Ok(())
    }

    fn grow_to_fit(guard: &mut Inner, required: u64) -> Result<()> {
        let mut new_size = guard.file_size.max(HEADER_SIZE as u64);
        while new_size < required {
            new_size = new_size
                .checked_mul(guard.growth_factor as u64)
                .ok_or_else(|| CacheError::Corrupt("WAL growth size overflow".into()))?;
        }
        guard.file.set_len(new_size)?;
        guard.mmap = unsafe { MmapMut::map_mut(&guard.file)? };
        guard.file_size = new_size;
        Ok(())
    }

    /// Flush mmap pages to disk. Meaning depends on `SyncPolicy` (§10.1);
    /// the persister itself just does the flush when asked.
    pub fn sync(&self) -> Result<()> {
        let guard = self.inner.lock().unwrap();
        guard.mmap.flush()?;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if !guard.closed {
            guard.mmap.flush()?;
            guard.closed = true;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockState;

    fn config(dir: &Path) -> CacheConfig {
        CacheConfig {
            cache_dir: dir.to_path_buf(),
            initial_file_size: HEADER_SIZE as u64 + 256,
            growth_factor: 2,
            ..CacheConfig::default()
        }
    }

    #[test]
    fn fresh_wal_recovers_empty() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalPersister::open(&config(dir.path())).unwrap();
        let state = wal.recover().unwrap();
        assert!(state.blocks.is_empty());
    }

    #[test]
    fn append_then_recover_roundtrips_block() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalPersister::open(&config(dir.path())).unwrap();
        wal.append_block_write(b"id1".to_vec(), 0, 0, 0, b"payload".to_vec())
            .unwrap();
        let state = wal.recover().unwrap();
        assert_eq!(state.blocks.len(), 1);
        assert_eq!(state.blocks[0].data, b"payload");
        assert_eq!(state.blocks[0].state, BlockState::Pending);
    }

    #[test]
    fn uploaded_marker_after_write_sets_state() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalPersister::open(&config(dir.path())).unwrap();
        wal.append_block_write(b"id1".to_vec(), 0, 0, 0, b"payload".to_vec())
            .unwrap();
        wal.append_block_uploaded(b"id1".to_vec(), 0, 0).unwrap();
        let state = wal.recover().unwrap();
        assert_eq!(state.blocks[0].state, BlockState::Uploaded);
    }

    #[test]
    fn remove_tombstones_earlier_writes() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalPersister::open(&config(dir.path())).unwrap();
        wal.append_block_write(b"id1".to_vec(), 0, 0, 0, b"payload".to_vec())
            .unwrap();
        wal.append_remove(b"id1".to_vec()).unwrap();
        let state = wal.recover().unwrap();
        assert!(state.blocks.is_empty());
    }

    #[test]
    fn write_after_remove_survives() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalPersister::open(&config(dir.path())).unwrap();
        wal.append_block_write(b"id1".to_vec(), 0, 0, 0, b"stale".to_vec())
            .unwrap();
        wal.append_remove(b"id1".to_vec()).unwrap();
        wal.append_block_write(b"id1".to_vec(), 0, 0, 0, b"fresh".to_vec())
            .unwrap();
        let state = wal.recover().unwrap();
        assert_eq!(state.blocks.len(), 1);
        assert_eq!(state.blocks[0].data, b"fresh");
    }

    #[test]
    fn append_grows_file_when_out_of_room() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalPersister::open(&config(dir.path())).unwrap();
        let big = vec![7u8; 1024];
        wal.append_block_write(b"big".to_vec(), 0, 0, 0, big.clone())
            .unwrap();
        let state = wal.recover().unwrap();
        assert_eq!(state.blocks[0].data, big);
    }

    #[test]
    fn reinitialize_clears_recovered_state() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let wal = WalPersister::open(&cfg).unwrap();
        wal.append_block_write(b"id1".to_vec(), 0, 0, 0, b"payload".to_vec())
            .unwrap();
        wal.reinitialize(cfg.initial_file_size).unwrap();
        let state = wal.recover().unwrap();
        assert!(state.blocks.is_empty());
    }

    #[test]
    fn append_after_close_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalPersister::open(&config(dir.path())).unwrap();
        wal.close().unwrap();
        let err = wal
            .append_block_write(b"id1".to_vec(), 0, 0, 0, b"x".to_vec())
            .unwrap_err();
        assert!(matches!(err, CacheError::Closed));
    }

    #[test]
    fn every_append_sync_policy_still_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.sync_policy = crate::config::SyncPolicy::EveryAppend;
        let wal = WalPersister::open(&cfg).unwrap();
        wal.append_block_write(b"id1".to_vec(), 0, 0, 0, b"payload".to_vec())
            .unwrap();
        let state = wal.recover().unwrap();
        assert_eq!(state.blocks[0].data, b"payload");
    }

    #[test]
    fn cancelled_token_rejects_append_before_it_starts() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalPersister::open(&config(dir.path())).unwrap();
        let cancel = crate::cancel::CancellationToken::new();
        cancel.cancel();
        let err = wal
            .append_block_write_with_cancel(b"id1".to_vec(), 0, 0, 0, b"x".to_vec(), &cancel)
            .unwrap_err();
        assert!(matches!(err, CacheError::Cancelled));
        assert!(wal.recover().unwrap().blocks.is_empty());
    }
}
