//! Per-content cache entry — §4.2 "Cache Entry" state machine.
//!
//! Each entry owns its blocks and moves through `None -> Buffering ->
//! Uploading -> Cached`, resetting to `Buffering` (with `flushedOffset`
//! zeroed) whenever a write lands on an entry that is `Cached` or
//! `Uploading` (I3). The entry's own mutex is never held while the WAL
//! persister's append lock is held (§5): callers append to the WAL first,
//! then update the entry under its own lock.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::types::{BlockState, CacheState};

/// One block's worth of buffered bytes, keyed by `(chunk_idx, block_idx)`
/// within the owning entry. `data` is lazily grown to `block_size` and
/// patched in place so partial writes to the same block compose correctly.
#[derive(Debug, Clone)]
pub struct Block {
    pub data: Vec<u8>,
    pub state: BlockState,
}

impl Block {
    fn patch(&mut self, block_size: u32, offset_in_block: u32, bytes: &[u8]) {
        let needed = offset_in_block as usize + bytes.len();
        if self.data.len() < needed {
            self.data.resize(needed.min(block_size as usize).max(needed), 0);
        }
        let start = offset_in_block as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

struct Inner {
    state: CacheState,
    blocks: BTreeMap<(u32, u32), Block>,
    flushed_offset: u64,
    /// Highest (exclusive) byte offset any write has touched — `Size()`
    /// per §6 is this value, not the sum of buffered block lengths (a
    /// sparse write can leave gaps that were never buffered in memory).
    logical_size: u64,
    last_access_millis: u64,
}

/// A single content id's cached bytes and upload progress.
pub struct CacheEntry {
    inner: Mutex<Inner>,
}

impl CacheEntry {
    pub fn new(now_millis: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CacheState::Buffering,
                blocks: BTreeMap::new(),
                flushed_offset: 0,
                logical_size: 0,
                last_access_millis: now_millis,
            }),
        }
    }

    /// Rebuild an entry directly from recovered WAL blocks, skipping the
    /// `None` state since the log already proves data exists.
    ///
    /// Per §4.5, an entry with at least one block not yet `Uploaded`
    /// recovers as `Buffering` — the log alone doesn't prove an upload is
    /// in flight, only that bytes exist.
    pub fn from_recovered(
        blocks: BTreeMap<(u32, u32), Block>,
        logical_size: u64,
        now_millis: u64,
    ) -> Self {
        let state = if !blocks.is_empty() && blocks.values().all(|b| b.state == BlockState::Uploaded) {
            CacheState::Cached
        } else {
            CacheState::Buffering
        };
        Self {
            inner: Mutex::new(Inner {
                state,
                blocks,
                flushed_offset: 0,
                logical_size,
                last_access_millis: now_millis,
            }),
        }
    }

    /// Apply a (possibly partial) write to one block. Any write while
    /// `Cached` or `Uploading` resets the entry to `Buffering` and zeroes
    /// `flushed_offset` (I3, §4.2's state table) — a write must never leave
    /// a durability claim standing that a crash could still invalidate.
    pub fn write_block(
        &self,
        block_size: u32,
        chunk_idx: u32,
        block_idx: u32,
        offset_in_block: u32,
        bytes: &[u8],
        end_offset: u64,
        now_millis: u64,
    ) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CacheState::Cached | CacheState::Uploading => {
                inner.state = CacheState::Buffering;
                inner.flushed_offset = 0;
            }
            CacheState::Buffering | CacheState::None => {
                inner.state = CacheState::Buffering;
            }
        }
        let block = inner.blocks.entry((chunk_idx, block_idx)).or_insert_with(|| Block {
            data: Vec::new(),
            state: BlockState::Pending,
        });
        block.patch(block_size, offset_in_block, bytes);
        block.state = BlockState::Pending;
        inner.logical_size = inner.logical_size.max(end_offset);
        inner.last_access_millis = now_millis;
    }

    pub fn read_range(
        &self,
        block_size: u32,
        chunk_idx: u32,
        block_idx: u32,
        offset_in_block: u32,
        len: usize,
        now_millis: u64,
    ) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();
        inner.last_access_millis = now_millis;
        let start = offset_in_block as usize;
        match inner.blocks.get(&(chunk_idx, block_idx)) {
            Some(block) if block.data.len() >= start => {
                let avail = block.data.len() - start;
                let take = len.min(avail);
                let mut out = block.data[start..start + take].to_vec();
                out.resize(len, 0);
                out
            }
            _ => vec![0u8; len.min(block_size as usize)],
        }
    }

    /// Mark a single block durable in object storage. Once every known
    /// block is uploaded the entry transitions to `Cached`.
    pub fn mark_block_uploaded(&self, chunk_idx: u32, block_idx: u32) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(block) = inner.blocks.get_mut(&(chunk_idx, block_idx)) {
            block.state = BlockState::Uploaded;
        }
        if !inner.blocks.is_empty()
            && inner.blocks.values().all(|b| b.state == BlockState::Uploaded)
        {
            inner.state = CacheState::Cached;
        } else if inner.state == CacheState::Buffering {
            inner.state = CacheState::Uploading;
        }
    }

    pub fn set_state(&self, state: CacheState) {
        self.inner.lock().unwrap().state = state;
    }

    pub fn get_state(&self) -> CacheState {
        self.inner.lock().unwrap().state
    }

    pub fn set_flushed_offset(&self, offset: u64) {
        self.inner.lock().unwrap().flushed_offset = offset;
    }

    pub fn flushed_offset(&self) -> u64 {
        self.inner.lock().unwrap().flushed_offset
    }

    pub fn last_access_millis(&self) -> u64 {
        self.inner.lock().unwrap().last_access_millis
    }

    /// `Size()` per §6: the highest written offset + 1, not the number of
    /// bytes actually buffered (a sparse write leaves unbuffered gaps).
    pub fn total_size(&self) -> u64 {
        self.inner.lock().unwrap().logical_size
    }

    /// Blocks still `Pending`, for an uploader to drain (`IterDirtyBlocks`, §6).
    pub fn dirty_blocks(&self) -> Vec<(u32, u32, Vec<u8>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .blocks
            .iter()
            .filter(|(_, b)| b.state == BlockState::Pending)
            .map(|(&(chunk_idx, block_idx), b)| (chunk_idx, block_idx, b.data.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: u32 = 64;

    #[test]
    fn new_entry_starts_buffering() {
        let entry = CacheEntry::new(0);
        assert_eq!(entry.get_state(), CacheState::Buffering);
    }

    #[test]
    fn write_then_read_roundtrips() {
        let entry = CacheEntry::new(0);
        entry.write_block(BLOCK, 0, 0, 0, b"hello", 5, 1);
        assert_eq!(entry.read_range(BLOCK, 0, 0, 0, 5, 2), b"hello".to_vec());
    }

    #[test]
    fn partial_writes_to_same_block_compose() {
        let entry = CacheEntry::new(0);
        entry.write_block(BLOCK, 0, 0, 0, b"AAAA", 4, 0);
        entry.write_block(BLOCK, 0, 0, 2, b"BB", 4, 0);
        assert_eq!(entry.read_range(BLOCK, 0, 0, 0, 4, 0), b"AABB".to_vec());
    }

    #[test]
    fn uploading_all_blocks_moves_to_cached() {
        let entry = CacheEntry::new(0);
        entry.write_block(BLOCK, 0, 0, 0, b"a", 1, 0);
        entry.write_block(BLOCK, 0, 1, 0, b"b", BLOCK as u64 + 1, 0);
        entry.mark_block_uploaded(0, 0);
        assert_eq!(entry.get_state(), CacheState::Uploading);
        entry.mark_block_uploaded(0, 1);
        assert_eq!(entry.get_state(), CacheState::Cached);
    }

    #[test]
    fn write_after_cached_resets_to_buffering() {
        let entry = CacheEntry::new(0);
        entry.write_block(BLOCK, 0, 0, 0, b"a", 1, 0);
        entry.mark_block_uploaded(0, 0);
        assert_eq!(entry.get_state(), CacheState::Cached);
        entry.set_flushed_offset(64);
        entry.write_block(BLOCK, 0, 0, 0, b"b", 1, 0);
        assert_eq!(entry.get_state(), CacheState::Buffering);
        assert_eq!(entry.flushed_offset(), 0);
    }

    /// §4.2's state table: `Uploading` × client write -> `Buffering`, with
    /// `flushedOffset` reset, exactly like the `Cached` case above.
    #[test]
    fn write_while_uploading_resets_to_buffering() {
        let entry = CacheEntry::new(0);
        entry.write_block(BLOCK, 0, 0, 0, b"a", 1, 0);
        entry.write_block(BLOCK, 0, 1, 0, b"b", BLOCK as u64 + 1, 0);
        entry.mark_block_uploaded(0, 0);
        assert_eq!(entry.get_state(), CacheState::Uploading);

        entry.set_flushed_offset(32);
        entry.write_block(BLOCK, 0, 1, 0, b"c", BLOCK as u64 + 1, 0);
        assert_eq!(entry.get_state(), CacheState::Buffering);
        assert_eq!(entry.flushed_offset(), 0);
    }

    #[test]
    fn dirty_blocks_excludes_uploaded() {
        let entry = CacheEntry::new(0);
        entry.write_block(BLOCK, 0, 0, 0, b"a", 1, 0);
        entry.write_block(BLOCK, 0, 1, 0, b"b", BLOCK as u64 + 1, 0);
        entry.mark_block_uploaded(0, 0);
        let dirty = entry.dirty_blocks();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].0, 0);
        assert_eq!(dirty[0].1, 1);
    }

    /// Sparse writes must report `Size()` as the highest touched offset,
    /// not the number of bytes actually buffered.
    #[test]
    fn total_size_is_highest_write_end_not_buffered_bytes() {
        let entry = CacheEntry::new(0);
        entry.write_block(BLOCK, 0, 0, 0, b"hello", 5, 0);
        entry.write_block(BLOCK, 0, 1, 4, b"world", BLOCK as u64 + 4 + 5, 0);
        assert_eq!(entry.total_size(), BLOCK as u64 + 9);
    }

    /// §4.5: an entry recovered with some but not all blocks uploaded comes
    /// back as `Buffering`, never `Uploading` — the log doesn't prove an
    /// upload is actually in flight.
    #[test]
    fn from_recovered_partial_upload_is_buffering_not_uploading() {
        let mut blocks = BTreeMap::new();
        blocks.insert(
            (0, 0),
            Block {
                data: b"a".to_vec(),
                state: BlockState::Uploaded,
            },
        );
        blocks.insert(
            (0, 1),
            Block {
                data: b"b".to_vec(),
                state: BlockState::Pending,
            },
        );
        let entry = CacheEntry::from_recovered(blocks, BLOCK as u64 + 1, 0);
        assert_eq!(entry.get_state(), CacheState::Buffering);
    }

    #[test]
    fn from_recovered_fully_uploaded_is_cached() {
        let mut blocks = BTreeMap::new();
        blocks.insert(
            (0, 0),
            Block {
                data: b"a".to_vec(),
                state: BlockState::Uploaded,
            },
        );
        let entry = CacheEntry::from_recovered(blocks, 1, 0);
        assert_eq!(entry.get_state(), CacheState::Cached);
    }
}
