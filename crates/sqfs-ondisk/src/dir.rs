//! Directory listings.
//!
//! A directory's listing is a run of headers, each followed by a batch of
//! entries. The header carries the metadata-block offset (relative to the
//! inode table start) and a base inode number; entries store a signed delta
//! against that base. A header covers at most 256 entries; longer listings
//! continue with additional headers. Name lengths are stored off-by-one (a
//! zero-length name cannot be encoded).

use crate::inode::InodeKind;
use serde::{Deserialize, Serialize};
use sqfs_types::{
    ensure_slice, read_le_i16, read_le_u16, read_le_u32, ParseError, DIR_ENTRIES_PER_HEADER,
};

/// A 12-byte directory header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirHeader {
    /// One less than the number of entries that follow.
    pub count: u32,
    /// Offset of the entries' inode metadata block, relative to the inode
    /// table start.
    pub inode_block_start: u32,
    /// Base inode number; entries store a delta against this.
    pub inode_number_base: u32,
}

impl DirHeader {
    pub const SIZE: usize = 12;

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            count: read_le_u32(bytes, 0x00)?,
            inode_block_start: read_le_u32(bytes, 0x04)?,
            inode_number_base: read_le_u32(bytes, 0x08)?,
        })
    }

    /// Entries announced by this header (`count` is stored biased by −1).
    #[must_use]
    pub fn entry_count(self) -> u64 {
        u64::from(self.count) + 1
    }
}

/// A decoded directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name exactly as stored; arbitrary bytes, never trimmed.
    pub name: Vec<u8>,
    /// Basic kind tag (extended inodes store their basic tag here).
    pub kind: InodeKind,
    /// From the governing header: inode metadata block offset relative to
    /// the inode table start.
    pub inode_block_start: u32,
    /// Byte offset of the inode inside that block's decompressed stream.
    pub offset: u16,
    /// Reconstructed inode number (header base plus entry delta).
    pub inode_number: u32,
}

impl DirEntry {
    /// Name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// A directory-index record from an extended directory inode.
///
/// Read to keep the inode stream positioned; lookups do not consult it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirIndex {
    /// Byte offset from the first directory header to the indexed header,
    /// as if the listing were laid out contiguously.
    pub index: u32,
    /// Start offset of the indexed directory-table metadata block.
    pub start: u32,
    /// One less than the length of the name that follows.
    pub name_size: u32,
}

impl DirIndex {
    pub const SIZE: usize = 12;

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            index: read_le_u32(bytes, 0x00)?,
            start: read_le_u32(bytes, 0x04)?,
            name_size: read_le_u32(bytes, 0x08)?,
        })
    }
}

/// Parse a full directory listing from its uncompressed bytes.
///
/// `buf` holds the `size` bytes declared by the directory inode (possibly
/// fewer, when the metadata chain ended early). The declared size includes
/// 3 phantom bytes for the implicit `.`/`..` entries, so a tail shorter
/// than one header terminates the listing cleanly.
pub fn parse_dir_listing(buf: &[u8]) -> Result<Vec<DirEntry>, ParseError> {
    let mut entries = Vec::new();
    let mut pos = 0_usize;

    while buf.len() - pos >= DirHeader::SIZE {
        let header = DirHeader::parse(&buf[pos..])?;
        pos += DirHeader::SIZE;

        let total = header.entry_count();
        if total > u64::from(DIR_ENTRIES_PER_HEADER) {
            return Err(ParseError::InvalidField {
                field: "dir_header_count",
                reason: "header declares more than 256 entries",
            });
        }
        for _ in 0..total {
            let (entry, consumed) = parse_entry(&buf[pos..], header)?;
            pos += consumed;
            entries.push(entry);
        }
    }

    Ok(entries)
}

fn parse_entry(bytes: &[u8], header: DirHeader) -> Result<(DirEntry, usize), ParseError> {
    let offset = read_le_u16(bytes, 0x00)?;
    let delta = read_le_i16(bytes, 0x02)?;
    let kind_raw = read_le_u16(bytes, 0x04)?;
    let name_size = read_le_u16(bytes, 0x06)?;

    let kind = InodeKind::from_raw(kind_raw).ok_or(ParseError::InvalidField {
        field: "dir_entry_type",
        reason: "unknown inode kind tag",
    })?;
    // Entries always carry the basic tag, even for extended inodes.
    if kind.basic() != kind {
        return Err(ParseError::InvalidField {
            field: "dir_entry_type",
            reason: "extended kind tag in a directory entry",
        });
    }

    let name_len = usize::from(name_size) + 1;
    let name = ensure_slice(bytes, 8, name_len)?.to_vec();

    let inode_number = header.inode_number_base.wrapping_add_signed(i32::from(delta));

    Ok((
        DirEntry {
            name,
            kind,
            inode_block_start: header.inode_block_start,
            offset,
            inode_number,
        },
        8 + name_len,
    ))
}
