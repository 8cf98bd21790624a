//! Shared small types used across the WAL, entry, and table layers.

/// Opaque content identifier. Compared and hashed as raw bytes (I7) — no
/// case folding, no Unicode normalization.
pub type ContentId = Vec<u8>;

/// Composite identity of a block within the cache (§3.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub content_id: ContentId,
    pub chunk_idx: u32,
    pub block_idx: u32,
}

impl BlockKey {
    pub fn new(content_id: ContentId, chunk_idx: u32, block_idx: u32) -> Self {
        Self {
            content_id,
            chunk_idx,
            block_idx,
        }
    }
}

/// Per-entry lifecycle state (§4.2 state machine). A tagged sum type, not
/// an integer, per the Design Notes' explicit guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No entry exists for this id.
    None,
    /// Bytes held in memory, not yet known durable.
    Buffering,
    /// Uploader has started pushing blocks; some may still be Pending.
    Uploading,
    /// Every block is known durable in object storage.
    Cached,
}

/// Per-block durability state within an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Pending,
    Uploaded,
}

/// Validate a content id against the 65535-byte WAL length-prefix limit (§3.1).
pub fn validate_content_id(id: &[u8]) -> Result<(), crate::error::CacheError> {
    if id.is_empty() || id.len() > crate::wal::entry::MAX_CONTENT_ID_LEN {
        return Err(crate::error::CacheError::InvalidArgument(format!(
            "content id length {} outside [1, {}]",
            id.len(),
            crate::wal::entry::MAX_CONTENT_ID_LEN
        )));
    }
    Ok(())
}
