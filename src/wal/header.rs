//! WAL header — 64-byte format anchor at offset 0 of `cache.dat`.
//!
//! ```text
//! Offset  Size  Field
//!    0      4   magic            = "DTTC" (4 ASCII bytes, not LE)
//!    4      2   version          format version (LE u16)
//!    6      4   entry_count      entries appended since file creation (LE u32)
//!   10      8   next_offset      byte offset of the next append (LE u64)
//!   18      8   total_data_size  sum of BlockWrite payload bytes, advisory (LE u64)
//!   26     38   reserved         zero-filled
//! ```
//!
//! Unlike the teacher's `Superblock`, this header carries no CRC32: the spec
//! format (§3.1) defines exactly these six fields and nothing else, and
//! crash-safety here comes from ordering (§4.3.1), not from a checksum.

use crate::error::{CacheError, Result};

pub const MAGIC: &[u8; 4] = b"DTTC";
pub const CURRENT_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct WalHeader {
    pub version: u16,
    pub entry_count: u32,
    pub next_offset: u64,
    pub total_data_size: u64,
}

impl WalHeader {
    pub fn fresh() -> Self {
        Self {
            version: CURRENT_VERSION,
            entry_count: 0,
            next_offset: HEADER_SIZE as u64,
            total_data_size: 0,
        }
    }

    /// Serialize into the first `HEADER_SIZE` bytes of `buf`.
    pub fn write_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..10].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[10..18].copy_from_slice(&self.next_offset.to_le_bytes());
        buf[18..26].copy_from_slice(&self.total_data_size.to_le_bytes());
        buf[26..64].fill(0);
    }

    /// Parse and validate magic + version. `file_size` bounds `next_offset`.
    pub fn read_from(buf: &[u8], file_size: u64) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(CacheError::Corrupt("file shorter than WAL header".into()));
        }
        if &buf[0..4] != MAGIC {
            return Err(CacheError::Corrupt("bad WAL magic".into()));
        }
        let version = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        if version != CURRENT_VERSION {
            return Err(CacheError::VersionMismatch {
                found: version,
                expected: CURRENT_VERSION,
            });
        }
        let entry_count = u32::from_le_bytes(buf[6..10].try_into().unwrap());
        let next_offset = u64::from_le_bytes(buf[10..18].try_into().unwrap());
        let total_data_size = u64::from_le_bytes(buf[18..26].try_into().unwrap());

        if next_offset < HEADER_SIZE as u64 || next_offset > file_size {
            return Err(CacheError::Corrupt(format!(
                "next_offset {next_offset} out of bounds (file size {file_size})"
            )));
        }

        Ok(Self {
            version,
            entry_count,
            next_offset,
            total_data_size,
        })
    }
}
