#![forbid(unsafe_code)]
//! On-disk format parsing for SquashFS 4.0 structures.
//!
//! Pure parsing crate — no I/O, no side effects. Parses byte slices into
//! typed Rust structures representing the superblock, metadata-block
//! headers, the fourteen inode variants, directory listings, and
//! fragment-table entries.

pub mod dir;
pub mod fragment;
pub mod inode;
pub mod metablock;
pub mod superblock;

pub use dir::{parse_dir_listing, DirEntry, DirHeader, DirIndex};
pub use fragment::{FragmentEntry, FRAGMENT_ENTRY_SIZE};
pub use inode::{
    file_block_count, parse_block_list, BlockLen, DeviceInode, DirInode, DirLocation,
    ExtDeviceInode, ExtDirInode, ExtFileInode, ExtIpcInode, ExtSymlinkInode, FileInode,
    FragmentRef, Inode, InodeData, InodeHeader, InodeKind, IpcInode, SymlinkInode,
};
pub use metablock::MetaBlockHeader;
pub use superblock::{Flags, Superblock};
