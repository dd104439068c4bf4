//! Fragment-table entries.
//!
//! Fragment blocks pack the tails of many small files into one compressed
//! block. The table is stored two-level: 16-byte entries packed 512 per
//! metadata block, with the metadata-block offsets listed at
//! `fragment_table_start`.

use crate::inode::BlockLen;
use serde::{Deserialize, Serialize};
use sqfs_types::{read_le_u32, read_le_u64, ParseError};

/// On-disk size of one fragment-table entry.
pub const FRAGMENT_ENTRY_SIZE: usize = 16;

/// One fragment-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentEntry {
    /// Absolute byte offset of the fragment block in the image.
    pub start: u64,
    /// On-disk length plus the uncompressed marker bit, as for data blocks.
    pub size: BlockLen,
}

impl FragmentEntry {
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let start = read_le_u64(bytes, 0x00)?;
        let size = BlockLen(read_le_u32(bytes, 0x08)?);
        let _pad = read_le_u32(bytes, 0x0C)?;
        Ok(Self { start, size })
    }
}
