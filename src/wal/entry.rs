//! WAL entry formats — §3.1 "WAL entry types".
//!
//! Each entry starts with a 1-byte type tag. Field layouts are fixed and
//! little-endian, following the same manual buffer-packing style as the
//! teacher's `BlockHeader::write`/`read` (explicit offsets, no serde).

use crate::error::{CacheError, Result};

pub const TAG_BLOCK_WRITE: u8 = 0;
pub const TAG_BLOCK_UPLOADED: u8 = 1;
// Tag 2 is reserved/unused.
pub const TAG_REMOVE: u8 = 3;

/// Maximum length of a ContentID (must fit in a u16 length prefix), §3.1.
pub const MAX_CONTENT_ID_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalEntry {
    BlockWrite {
        content_id: Vec<u8>,
        chunk_idx: u32,
        block_idx: u32,
        offset_in_block: u32,
        data: Vec<u8>,
    },
    BlockUploaded {
        content_id: Vec<u8>,
        chunk_idx: u32,
        block_idx: u32,
    },
    Remove {
        content_id: Vec<u8>,
    },
}

impl WalEntry {
    /// Total on-disk size of this entry, including the tag byte.
    pub fn encoded_len(&self) -> usize {
        match self {
            WalEntry::BlockWrite {
                content_id, data, ..
            } => 1 + 2 + content_id.len() + 4 + 4 + 4 + 4 + data.len(),
            WalEntry::BlockUploaded { content_id, .. } => 1 + 2 + content_id.len() + 4 + 4,
            WalEntry::Remove { content_id } => 1 + 2 + content_id.len(),
        }
    }

    /// Serialize into `buf[0..encoded_len()]`.
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= self.encoded_len());
        match self {
            WalEntry::BlockWrite {
                content_id,
                chunk_idx,
                block_idx,
                offset_in_block,
                data,
            } => {
                let mut pos = 0;
                buf[pos] = TAG_BLOCK_WRITE;
                pos += 1;
                buf[pos..pos + 2].copy_from_slice(&(content_id.len() as u16).to_le_bytes());
                pos += 2;
                buf[pos..pos + content_id.len()].copy_from_slice(content_id);
                pos += content_id.len();
                buf[pos..pos + 4].copy_from_slice(&chunk_idx.to_le_bytes());
                pos += 4;
                buf[pos..pos + 4].copy_from_slice(&block_idx.to_le_bytes());
                pos += 4;
                buf[pos..pos + 4].copy_from_slice(&offset_in_block.to_le_bytes());
                pos += 4;
                buf[pos..pos + 4].copy_from_slice(&(data.len() as u32).to_le_bytes());
                pos += 4;
                buf[pos..pos + data.len()].copy_from_slice(data);
            }
            WalEntry::BlockUploaded {
                content_id,
                chunk_idx,
                block_idx,
            } => {
                let mut pos = 0;
                buf[pos] = TAG_BLOCK_UPLOADED;
                pos += 1;
                buf[pos..pos + 2].copy_from_slice(&(content_id.len() as u16).to_le_bytes());
                pos += 2;
                buf[pos..pos + content_id.len()].copy_from_slice(content_id);
                pos += content_id.len();
                buf[pos..pos + 4].copy_from_slice(&chunk_idx.to_le_bytes());
                pos += 4;
                buf[pos..pos + 4].copy_from_slice(&block_idx.to_le_bytes());
            }
            WalEntry::Remove { content_id } => {
                let mut pos = 0;
                buf[pos] = TAG_REMOVE;
                pos += 1;
                buf[pos..pos + 2].copy_from_slice(&(content_id.len() as u16).to_le_bytes());
                pos += 2;
                buf[pos..pos + content_id.len()].copy_from_slice(content_id);
            }
        }
    }
}

/// Read just the tag byte at `pos`, bounds-checked. Lets callers dispatch
/// before deciding whether to fully decode or cheaply skip an entry.
pub fn peek_tag(buf: &[u8], pos: usize, bound: u64) -> Result<u8> {
    Ok(bounded_slice(buf, pos, 1, bound)?[0])
}

/// Bounds-checked read of a byte range: `offset + len <= bound` (I2).
fn bounded_slice<'a>(buf: &'a [u8], offset: usize, len: usize, bound: u64) -> Result<&'a [u8]> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| CacheError::Corrupt("entry field length overflow".into()))?;
    if (end as u64) > bound || end > buf.len() {
        return Err(CacheError::Corrupt(format!(
            "entry field [{offset}..{end}) exceeds bound {bound}"
        )));
    }
    Ok(&buf[offset..end])
}

/// Fully decode the entry starting at `pos`, validating every field offset
/// against `bound` (`nextOffset`, itself already bounded by file size) per
/// invariant I2. Returns the entry and the number of bytes consumed.
pub fn decode_full(buf: &[u8], pos: usize, bound: u64) -> Result<(WalEntry, usize)> {
    let tag_slice = bounded_slice(buf, pos, 1, bound)?;
    let tag = tag_slice[0];
    let mut cursor = pos + 1;

    match tag {
        TAG_BLOCK_WRITE => {
            let id_len = u16::from_le_bytes(
                bounded_slice(buf, cursor, 2, bound)?.try_into().unwrap(),
            ) as usize;
            cursor += 2;
            let content_id = bounded_slice(buf, cursor, id_len, bound)?.to_vec();
            cursor += id_len;
            let chunk_idx =
                u32::from_le_bytes(bounded_slice(buf, cursor, 4, bound)?.try_into().unwrap());
            cursor += 4;
            let block_idx =
                u32::from_le_bytes(bounded_slice(buf, cursor, 4, bound)?.try_into().unwrap());
            cursor += 4;
            let offset_in_block =
                u32::from_le_bytes(bounded_slice(buf, cursor, 4, bound)?.try_into().unwrap());
            cursor += 4;
            let data_len = u32::from_le_bytes(
                bounded_slice(buf, cursor, 4, bound)?.try_into().unwrap(),
            ) as usize;
            cursor += 4;
            let data = bounded_slice(buf, cursor, data_len, bound)?.to_vec();
            cursor += data_len;

            Ok((
                WalEntry::BlockWrite {
                    content_id,
                    chunk_idx,
                    block_idx,
                    offset_in_block,
                    data,
                },
                cursor - pos,
            ))
        }
        TAG_BLOCK_UPLOADED => {
            let id_len = u16::from_le_bytes(
                bounded_slice(buf, cursor, 2, bound)?.try_into().unwrap(),
            ) as usize;
            cursor += 2;
            let content_id = bounded_slice(buf, cursor, id_len, bound)?.to_vec();
            cursor += id_len;
            let chunk_idx =
                u32::from_le_bytes(bounded_slice(buf, cursor, 4, bound)?.try_into().unwrap());
            cursor += 4;
            let block_idx =
                u32::from_le_bytes(bounded_slice(buf, cursor, 4, bound)?.try_into().unwrap());
            cursor += 4;

            Ok((
                WalEntry::BlockUploaded {
                    content_id,
                    chunk_idx,
                    block_idx,
                },
                cursor - pos,
            ))
        }
        TAG_REMOVE => {
            let id_len = u16::from_le_bytes(
                bounded_slice(buf, cursor, 2, bound)?.try_into().unwrap(),
            ) as usize;
            cursor += 2;
            let content_id = bounded_slice(buf, cursor, id_len, bound)?.to_vec();
            cursor += id_len;

            Ok((WalEntry::Remove { content_id }, cursor - pos))
        }
        other => Err(CacheError::Corrupt(format!("unknown WAL entry tag {other}"))),
    }
}

/// Pass-1 style skip: validate and size a BlockWrite entry without copying
/// its payload bytes. Used by recovery pass 1 (§4.3.3) which only needs
/// tombstones and uploaded-markers, not BlockWrite payloads.
pub fn skip_size(buf: &[u8], pos: usize, bound: u64) -> Result<usize> {
    let tag_slice = bounded_slice(buf, pos, 1, bound)?;
    let tag = tag_slice[0];
    let mut cursor = pos + 1;

    match tag {
        TAG_BLOCK_WRITE => {
            let id_len = u16::from_le_bytes(
                bounded_slice(buf, cursor, 2, bound)?.try_into().unwrap(),
            ) as usize;
            cursor += 2;
            bounded_slice(buf, cursor, id_len, bound)?;
            cursor += id_len;
            cursor += 4 + 4 + 4; // chunk_idx, block_idx, offset_in_block
            let data_len = u32::from_le_bytes(
                bounded_slice(buf, cursor, 4, bound)?.try_into().unwrap(),
            ) as usize;
            cursor += 4;
            bounded_slice(buf, cursor, data_len, bound)?; // validate only
            cursor += data_len;
            Ok(cursor - pos)
        }
        TAG_BLOCK_UPLOADED | TAG_REMOVE => {
            // Cheap enough to fully decode; no bulk payload to skip.
            let (_, len) = decode_full(buf, pos, bound)?;
            Ok(len)
        }
        other => Err(CacheError::Corrupt(format!("unknown WAL entry tag {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_write_roundtrip() {
        let entry = WalEntry::BlockWrite {
            content_id: b"abc".to_vec(),
            chunk_idx: 1,
            block_idx: 2,
            offset_in_block: 3,
            data: b"hello world".to_vec(),
        };
        let mut buf = vec![0u8; entry.encoded_len()];
        entry.encode_into(&mut buf);
        let (decoded, consumed) = decode_full(&buf, 0, buf.len() as u64).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, entry);
    }

    #[test]
    fn block_uploaded_roundtrip() {
        let entry = WalEntry::BlockUploaded {
            content_id: b"xyz".to_vec(),
            chunk_idx: 7,
            block_idx: 8,
        };
        let mut buf = vec![0u8; entry.encoded_len()];
        entry.encode_into(&mut buf);
        let (decoded, _) = decode_full(&buf, 0, buf.len() as u64).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn remove_roundtrip() {
        let entry = WalEntry::Remove {
            content_id: b"gone".to_vec(),
        };
        let mut buf = vec![0u8; entry.encoded_len()];
        entry.encode_into(&mut buf);
        let (decoded, _) = decode_full(&buf, 0, buf.len() as u64).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn unknown_tag_is_corrupt() {
        let buf = [0xFFu8; 16];
        let err = decode_full(&buf, 0, buf.len() as u64).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_)));
    }

    #[test]
    fn truncated_entry_is_corrupt() {
        let entry = WalEntry::BlockWrite {
            content_id: b"abc".to_vec(),
            chunk_idx: 1,
            block_idx: 2,
            offset_in_block: 3,
            data: b"hello world".to_vec(),
        };
        let mut buf = vec![0u8; entry.encoded_len()];
        entry.encode_into(&mut buf);
        // Claim a bound shorter than the real entry — simulates an
        // in-flight append that crashed mid-payload.
        let short_bound = (buf.len() - 3) as u64;
        let err = decode_full(&buf, 0, short_bound).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_)));
    }

    #[test]
    fn skip_size_matches_decode_full_for_block_write() {
        let entry = WalEntry::BlockWrite {
            content_id: b"abc".to_vec(),
            chunk_idx: 1,
            block_idx: 2,
            offset_in_block: 3,
            data: b"hello world".to_vec(),
        };
        let mut buf = vec![0u8; entry.encoded_len()];
        entry.encode_into(&mut buf);
        let size_skip = skip_size(&buf, 0, buf.len() as u64).unwrap();
        let (_, size_full) = decode_full(&buf, 0, buf.len() as u64).unwrap();
        assert_eq!(size_skip, size_full);
    }
}
