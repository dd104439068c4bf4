//! Inode headers and the fourteen inode variants.
//!
//! Every inode is a 16-byte common header followed by a kind-specific tail.
//! The variant tag on disk is authoritative; the tail is sized exactly by
//! its variant. File inodes append a block list (one `u32` per data block)
//! and symlinks append the target path, so those tails are parsed in two
//! phases: a fixed prefix from a slice, then the variable part attached by
//! the caller once its length is known.

use serde::{Deserialize, Serialize};
use sqfs_types::{
    ceil_div, read_le_u16, read_le_u32, read_le_u64, ParseError, FRAGMENT_NONE,
    UNCOMPRESSED_BLOCK_FLAG,
};

/// Inode kind tags as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum InodeKind {
    Dir = 1,
    File = 2,
    Symlink = 3,
    BlockDev = 4,
    CharDev = 5,
    Fifo = 6,
    Socket = 7,
    ExtDir = 8,
    ExtFile = 9,
    ExtSymlink = 10,
    ExtBlockDev = 11,
    ExtCharDev = 12,
    ExtFifo = 13,
    ExtSocket = 14,
}

impl InodeKind {
    #[must_use]
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            1 => Self::Dir,
            2 => Self::File,
            3 => Self::Symlink,
            4 => Self::BlockDev,
            5 => Self::CharDev,
            6 => Self::Fifo,
            7 => Self::Socket,
            8 => Self::ExtDir,
            9 => Self::ExtFile,
            10 => Self::ExtSymlink,
            11 => Self::ExtBlockDev,
            12 => Self::ExtCharDev,
            13 => Self::ExtFifo,
            14 => Self::ExtSocket,
            _ => return None,
        })
    }

    /// The basic tag for this kind (directory entries always store the
    /// basic tag, even for extended inodes).
    #[must_use]
    pub fn basic(self) -> Self {
        match self {
            Self::Dir | Self::ExtDir => Self::Dir,
            Self::File | Self::ExtFile => Self::File,
            Self::Symlink | Self::ExtSymlink => Self::Symlink,
            Self::BlockDev | Self::ExtBlockDev => Self::BlockDev,
            Self::CharDev | Self::ExtCharDev => Self::CharDev,
            Self::Fifo | Self::ExtFifo => Self::Fifo,
            Self::Socket | Self::ExtSocket => Self::Socket,
        }
    }

    #[must_use]
    pub fn is_dir(self) -> bool {
        self.basic() == Self::Dir
    }

    #[must_use]
    pub fn is_file(self) -> bool {
        self.basic() == Self::File
    }

    #[must_use]
    pub fn is_symlink(self) -> bool {
        self.basic() == Self::Symlink
    }

    #[must_use]
    pub fn is_device(self) -> bool {
        matches!(self.basic(), Self::BlockDev | Self::CharDev)
    }

    #[must_use]
    pub fn is_ipc(self) -> bool {
        matches!(self.basic(), Self::Fifo | Self::Socket)
    }
}

/// The 16-byte header common to all inode variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeHeader {
    pub kind: InodeKind,
    /// Permission bits only; the file type lives in `kind`.
    pub mode: u16,
    /// Index into the id table.
    pub uid_idx: u16,
    /// Index into the id table.
    pub gid_idx: u16,
    /// Modification time, unsigned unix seconds.
    pub mtime: u32,
    /// Unique inode number, 1-based.
    pub inode_number: u32,
}

impl InodeHeader {
    pub const SIZE: usize = 16;

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let raw_kind = read_le_u16(bytes, 0x00)?;
        let kind = InodeKind::from_raw(raw_kind).ok_or(ParseError::InvalidField {
            field: "inode_type",
            reason: "unknown inode kind tag",
        })?;
        Ok(Self {
            kind,
            mode: read_le_u16(bytes, 0x02)?,
            uid_idx: read_le_u16(bytes, 0x04)?,
            gid_idx: read_le_u16(bytes, 0x06)?,
            mtime: read_le_u32(bytes, 0x08)?,
            inode_number: read_le_u32(bytes, 0x0C)?,
        })
    }
}

/// One word of a file's block list.
///
/// Low 24 bits: on-disk byte length. Bit 24: stored uncompressed. A zero
/// word denotes a sparse block (a full block of zeros, nothing on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLen(pub u32);

impl BlockLen {
    #[must_use]
    pub fn disk_len(self) -> u32 {
        self.0 & !UNCOMPRESSED_BLOCK_FLAG
    }

    #[must_use]
    pub fn is_uncompressed(self) -> bool {
        self.0 & UNCOMPRESSED_BLOCK_FLAG != 0
    }

    #[must_use]
    pub fn is_sparse(self) -> bool {
        self.0 == 0
    }
}

/// Reference to a file's fragment tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRef {
    /// Index into the fragment table.
    pub index: u32,
    /// Byte offset of the tail inside the fragment block's decompressed
    /// payload.
    pub offset: u32,
}

/// Number of entries in a file's block list.
///
/// When a fragment holds the tail, the final partial block lives there and
/// the list covers only whole blocks; otherwise the list covers the
/// remainder too.
#[must_use]
pub fn file_block_count(file_size: u64, has_fragment: bool, block_size: u32) -> u64 {
    if has_fragment {
        file_size / u64::from(block_size)
    } else {
        ceil_div(file_size, u64::from(block_size))
    }
}

/// Parse `count` block-list words from `bytes`.
pub fn parse_block_list(bytes: &[u8], count: usize) -> Result<Vec<BlockLen>, ParseError> {
    let mut list = Vec::with_capacity(count);
    for i in 0..count {
        list.push(BlockLen(read_le_u32(bytes, i * 4)?));
    }
    Ok(list)
}

// ── Directory variants ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirInode {
    /// Offset of the directory's metadata block, relative to the directory
    /// table start.
    pub dir_block: u32,
    pub link_count: u32,
    /// Uncompressed listing size in bytes, plus 3 phantom bytes for the
    /// implicit `.` and `..` entries.
    pub dir_size: u16,
    /// Offset of the listing inside the block's decompressed stream.
    pub dir_offset: u16,
    pub parent_inode: u32,
}

impl DirInode {
    pub const SIZE: usize = 16;

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            dir_block: read_le_u32(bytes, 0x00)?,
            link_count: read_le_u32(bytes, 0x04)?,
            dir_size: read_le_u16(bytes, 0x08)?,
            dir_offset: read_le_u16(bytes, 0x0A)?,
            parent_inode: read_le_u32(bytes, 0x0C)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtDirInode {
    pub link_count: u32,
    pub dir_size: u32,
    pub dir_block: u32,
    pub parent_inode: u32,
    /// Number of directory-index records following the tail.
    pub index_count: u16,
    pub dir_offset: u16,
    pub xattr_index: u32,
}

impl ExtDirInode {
    pub const SIZE: usize = 24;

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            link_count: read_le_u32(bytes, 0x00)?,
            dir_size: read_le_u32(bytes, 0x04)?,
            dir_block: read_le_u32(bytes, 0x08)?,
            parent_inode: read_le_u32(bytes, 0x0C)?,
            index_count: read_le_u16(bytes, 0x10)?,
            dir_offset: read_le_u16(bytes, 0x12)?,
            xattr_index: read_le_u32(bytes, 0x14)?,
        })
    }
}

// ── File variants ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInode {
    /// Absolute byte offset of the first data block.
    pub blocks_start: u32,
    /// `FRAGMENT_NONE` when the file has no fragment tail.
    pub fragment_index: u32,
    pub fragment_offset: u32,
    pub file_size: u32,
    pub block_list: Vec<BlockLen>,
}

impl FileInode {
    pub const FIXED_SIZE: usize = 16;

    /// Parse the fixed tail; the caller attaches the block list after
    /// sizing it via [`Self::block_count`].
    pub fn parse_fixed(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            blocks_start: read_le_u32(bytes, 0x00)?,
            fragment_index: read_le_u32(bytes, 0x04)?,
            fragment_offset: read_le_u32(bytes, 0x08)?,
            file_size: read_le_u32(bytes, 0x0C)?,
            block_list: Vec::new(),
        })
    }

    #[must_use]
    pub fn fragment(&self) -> Option<FragmentRef> {
        (self.fragment_index != FRAGMENT_NONE).then_some(FragmentRef {
            index: self.fragment_index,
            offset: self.fragment_offset,
        })
    }

    #[must_use]
    pub fn block_count(&self, block_size: u32) -> u64 {
        file_block_count(
            u64::from(self.file_size),
            self.fragment().is_some(),
            block_size,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtFileInode {
    pub blocks_start: u64,
    pub file_size: u64,
    /// Bytes saved by sparse-block elision.
    pub sparse: u64,
    pub link_count: u32,
    pub fragment_index: u32,
    pub fragment_offset: u32,
    pub xattr_index: u32,
    pub block_list: Vec<BlockLen>,
}

impl ExtFileInode {
    pub const FIXED_SIZE: usize = 40;

    pub fn parse_fixed(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            blocks_start: read_le_u64(bytes, 0x00)?,
            file_size: read_le_u64(bytes, 0x08)?,
            sparse: read_le_u64(bytes, 0x10)?,
            link_count: read_le_u32(bytes, 0x18)?,
            fragment_index: read_le_u32(bytes, 0x1C)?,
            fragment_offset: read_le_u32(bytes, 0x20)?,
            xattr_index: read_le_u32(bytes, 0x24)?,
            block_list: Vec::new(),
        })
    }

    #[must_use]
    pub fn fragment(&self) -> Option<FragmentRef> {
        (self.fragment_index != FRAGMENT_NONE).then_some(FragmentRef {
            index: self.fragment_index,
            offset: self.fragment_offset,
        })
    }

    #[must_use]
    pub fn block_count(&self, block_size: u32) -> u64 {
        file_block_count(self.file_size, self.fragment().is_some(), block_size)
    }
}

// ── Symlink variants ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymlinkInode {
    pub link_count: u32,
    /// Declared length of the target path in bytes (no NUL terminator on
    /// disk).
    pub target_size: u32,
    pub target: Vec<u8>,
}

impl SymlinkInode {
    pub const FIXED_SIZE: usize = 8;

    /// Parse the fixed tail; the caller attaches `target_size` target
    /// bytes.
    pub fn parse_fixed(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            link_count: read_le_u32(bytes, 0x00)?,
            target_size: read_le_u32(bytes, 0x04)?,
            target: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtSymlinkInode {
    pub link_count: u32,
    pub target_size: u32,
    pub target: Vec<u8>,
    /// Stored after the target bytes.
    pub xattr_index: u32,
}

impl ExtSymlinkInode {
    pub const FIXED_SIZE: usize = 8;

    pub fn parse_fixed(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            link_count: read_le_u32(bytes, 0x00)?,
            target_size: read_le_u32(bytes, 0x04)?,
            target: Vec::new(),
            xattr_index: 0,
        })
    }
}

// ── Device and IPC variants ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInode {
    pub link_count: u32,
    /// Packed major/minor device number, Linux encoding.
    pub rdev: u32,
}

impl DeviceInode {
    pub const SIZE: usize = 8;

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            link_count: read_le_u32(bytes, 0x00)?,
            rdev: read_le_u32(bytes, 0x04)?,
        })
    }

    #[must_use]
    pub fn major(self) -> u32 {
        (self.rdev >> 8) & 0xFFF
    }

    #[must_use]
    pub fn minor(self) -> u32 {
        (self.rdev & 0xFF) | ((self.rdev >> 12) & 0xF_FF00)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtDeviceInode {
    pub link_count: u32,
    pub rdev: u32,
    pub xattr_index: u32,
}

impl ExtDeviceInode {
    pub const SIZE: usize = 12;

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            link_count: read_le_u32(bytes, 0x00)?,
            rdev: read_le_u32(bytes, 0x04)?,
            xattr_index: read_le_u32(bytes, 0x08)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcInode {
    pub link_count: u32,
}

impl IpcInode {
    pub const SIZE: usize = 4;

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            link_count: read_le_u32(bytes, 0x00)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtIpcInode {
    pub link_count: u32,
    pub xattr_index: u32,
}

impl ExtIpcInode {
    pub const SIZE: usize = 8;

    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            link_count: read_le_u32(bytes, 0x00)?,
            xattr_index: read_le_u32(bytes, 0x04)?,
        })
    }
}

// ── The tagged union ────────────────────────────────────────────────────────

/// Kind-specific inode payload, one variant per on-disk tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InodeData {
    Dir(DirInode),
    File(FileInode),
    Symlink(SymlinkInode),
    BlockDev(DeviceInode),
    CharDev(DeviceInode),
    Fifo(IpcInode),
    Socket(IpcInode),
    ExtDir(ExtDirInode),
    ExtFile(ExtFileInode),
    ExtSymlink(ExtSymlinkInode),
    ExtBlockDev(ExtDeviceInode),
    ExtCharDev(ExtDeviceInode),
    ExtFifo(ExtIpcInode),
    ExtSocket(ExtIpcInode),
}

/// Where a directory inode's listing lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirLocation {
    /// Metadata-block offset relative to the directory table start.
    pub block: u32,
    /// Offset inside the block's decompressed stream.
    pub offset: u16,
    /// Declared listing size (includes the 3 phantom bytes).
    pub size: u32,
}

/// A fully decoded inode: common header plus variant payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inode {
    pub header: InodeHeader,
    pub data: InodeData,
}

impl Inode {
    #[must_use]
    pub fn kind(&self) -> InodeKind {
        self.header.kind
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.header.kind.is_dir()
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.header.kind.is_file()
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.header.kind.is_symlink()
    }

    /// Payload size for regular files; 0 for everything else.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        match &self.data {
            InodeData::File(f) => u64::from(f.file_size),
            InodeData::ExtFile(f) => f.file_size,
            _ => 0,
        }
    }

    /// Listing location for directory inodes.
    #[must_use]
    pub fn dir_location(&self) -> Option<DirLocation> {
        match &self.data {
            InodeData::Dir(d) => Some(DirLocation {
                block: d.dir_block,
                offset: d.dir_offset,
                size: u32::from(d.dir_size),
            }),
            InodeData::ExtDir(d) => Some(DirLocation {
                block: d.dir_block,
                offset: d.dir_offset,
                size: d.dir_size,
            }),
            _ => None,
        }
    }

    /// Target path for symlink inodes, exactly as stored.
    #[must_use]
    pub fn symlink_target(&self) -> Option<&[u8]> {
        match &self.data {
            InodeData::Symlink(s) => Some(&s.target),
            InodeData::ExtSymlink(s) => Some(&s.target),
            _ => None,
        }
    }

    /// Hard-link count; basic files and directories track it too.
    #[must_use]
    pub fn link_count(&self) -> u32 {
        match &self.data {
            InodeData::Dir(d) => d.link_count,
            InodeData::File(_) => 1,
            InodeData::Symlink(s) => s.link_count,
            InodeData::BlockDev(d) | InodeData::CharDev(d) => d.link_count,
            InodeData::Fifo(i) | InodeData::Socket(i) => i.link_count,
            InodeData::ExtDir(d) => d.link_count,
            InodeData::ExtFile(f) => f.link_count,
            InodeData::ExtSymlink(s) => s.link_count,
            InodeData::ExtBlockDev(d) | InodeData::ExtCharDev(d) => d.link_count,
            InodeData::ExtFifo(i) | InodeData::ExtSocket(i) => i.link_count,
        }
    }

    /// Xattr-table index carried by extended variants.
    #[must_use]
    pub fn xattr_index(&self) -> Option<u32> {
        match &self.data {
            InodeData::ExtDir(d) => Some(d.xattr_index),
            InodeData::ExtFile(f) => Some(f.xattr_index),
            InodeData::ExtSymlink(s) => Some(s.xattr_index),
            InodeData::ExtBlockDev(d) | InodeData::ExtCharDev(d) => Some(d.xattr_index),
            InodeData::ExtFifo(i) | InodeData::ExtSocket(i) => Some(i.xattr_index),
            _ => None,
        }
    }
}
