//! The 96-byte superblock and its feature-flag bitmap.

use serde::{Deserialize, Serialize};
use sqfs_types::{
    read_le_u16, read_le_u32, read_le_u64, InodeRef, ParseError, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE,
    SQFS_MAGIC, SUPERBLOCK_SIZE, VERSION_MAJOR, VERSION_MINOR,
};

// Feature-flag bits of the superblock `flags` field.
const FLAG_INODES_UNCOMPRESSED: u16 = 0x0001;
const FLAG_DATA_UNCOMPRESSED: u16 = 0x0002;
const FLAG_FRAGMENTS_UNCOMPRESSED: u16 = 0x0008;
const FLAG_NO_FRAGMENTS: u16 = 0x0010;
const FLAG_ALWAYS_FRAGMENTS: u16 = 0x0020;
const FLAG_DUPLICATES: u16 = 0x0040;
const FLAG_EXPORTABLE: u16 = 0x0080;
const FLAG_XATTRS_UNCOMPRESSED: u16 = 0x0100;
const FLAG_NO_XATTRS: u16 = 0x0200;
const FLAG_COMPRESSOR_OPTIONS: u16 = 0x0400;
const FLAG_IDS_UNCOMPRESSED: u16 = 0x0800;

/// Feature-flag bitmap from the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags(u16);

impl Flags {
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn inodes_uncompressed(self) -> bool {
        self.0 & FLAG_INODES_UNCOMPRESSED != 0
    }

    #[must_use]
    pub fn data_uncompressed(self) -> bool {
        self.0 & FLAG_DATA_UNCOMPRESSED != 0
    }

    #[must_use]
    pub fn fragments_uncompressed(self) -> bool {
        self.0 & FLAG_FRAGMENTS_UNCOMPRESSED != 0
    }

    #[must_use]
    pub fn no_fragments(self) -> bool {
        self.0 & FLAG_NO_FRAGMENTS != 0
    }

    #[must_use]
    pub fn always_fragments(self) -> bool {
        self.0 & FLAG_ALWAYS_FRAGMENTS != 0
    }

    #[must_use]
    pub fn duplicates_removed(self) -> bool {
        self.0 & FLAG_DUPLICATES != 0
    }

    #[must_use]
    pub fn exportable(self) -> bool {
        self.0 & FLAG_EXPORTABLE != 0
    }

    #[must_use]
    pub fn xattrs_uncompressed(self) -> bool {
        self.0 & FLAG_XATTRS_UNCOMPRESSED != 0
    }

    #[must_use]
    pub fn no_xattrs(self) -> bool {
        self.0 & FLAG_NO_XATTRS != 0
    }

    #[must_use]
    pub fn has_compressor_options(self) -> bool {
        self.0 & FLAG_COMPRESSOR_OPTIONS != 0
    }

    #[must_use]
    pub fn ids_uncompressed(self) -> bool {
        self.0 & FLAG_IDS_UNCOMPRESSED != 0
    }
}

/// Parsed superblock.
///
/// Immutable for the lifetime of an open archive. Table start offsets are
/// absolute byte offsets into the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub inode_count: u32,
    /// Creation / last-append time, unsigned unix seconds.
    pub modification_time: u32,
    pub block_size: u32,
    pub fragment_count: u32,
    pub compression_id: u16,
    pub block_log: u16,
    pub flags: Flags,
    pub id_count: u16,
    pub root_inode_ref: InodeRef,
    /// Bytes used by the archive; images are often padded past this.
    pub bytes_used: u64,
    pub id_table_start: u64,
    pub xattr_id_table_start: u64,
    pub inode_table_start: u64,
    pub directory_table_start: u64,
    pub fragment_table_start: u64,
    pub export_table_start: u64,
}

impl Superblock {
    /// Parse and validate the 96-byte superblock region.
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u32(region, 0x00)?;
        if magic != SQFS_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(SQFS_MAGIC),
                actual: u64::from(magic),
            });
        }

        let block_size = read_le_u32(region, 0x0C)?;
        let block_log = read_le_u16(region, 0x16)?;
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size)
            || !block_size.is_power_of_two()
        {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be a power of two in 4096..=1048576",
            });
        }
        if u32::from(block_log) != block_size.trailing_zeros() {
            return Err(ParseError::InvalidField {
                field: "block_log",
                reason: "disagrees with block_size",
            });
        }

        let version_major = read_le_u16(region, 0x1C)?;
        let version_minor = read_le_u16(region, 0x1E)?;
        if (version_major, version_minor) != (VERSION_MAJOR, VERSION_MINOR) {
            return Err(ParseError::InvalidField {
                field: "version",
                reason: "only 4.0 archives are supported",
            });
        }

        Ok(Self {
            inode_count: read_le_u32(region, 0x04)?,
            modification_time: read_le_u32(region, 0x08)?,
            block_size,
            fragment_count: read_le_u32(region, 0x10)?,
            compression_id: read_le_u16(region, 0x14)?,
            block_log,
            flags: Flags::from_raw(read_le_u16(region, 0x18)?),
            id_count: read_le_u16(region, 0x1A)?,
            root_inode_ref: InodeRef(read_le_u64(region, 0x20)?),
            bytes_used: read_le_u64(region, 0x28)?,
            id_table_start: read_le_u64(region, 0x30)?,
            xattr_id_table_start: read_le_u64(region, 0x38)?,
            inode_table_start: read_le_u64(region, 0x40)?,
            directory_table_start: read_le_u64(region, 0x48)?,
            fragment_table_start: read_le_u64(region, 0x50)?,
            export_table_start: read_le_u64(region, 0x58)?,
        })
    }
}
