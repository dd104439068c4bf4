//! File-system nodes: the stat/readdir/open surface over decoded inodes.

use crate::file::FileReader;
use crate::ArchiveInner;
use sqfs_error::{Result, SqfsError};
use sqfs_ondisk::{DirEntry, Inode, InodeKind};
use sqfs_types::{
    MODE_PERM_MASK, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG, S_IFSOCK,
};
use std::sync::Arc;

/// One file-system object inside an archive.
///
/// Nodes are values copied out of the metadata stream on demand; they stay
/// valid for as long as their `Arc` to the archive state lives, regardless
/// of the `Archive` handle.
#[derive(Clone)]
pub struct Node {
    archive: Arc<ArchiveInner>,
    name: Vec<u8>,
    inode: Inode,
}

impl Node {
    pub(crate) fn new(archive: Arc<ArchiveInner>, name: Vec<u8>, inode: Inode) -> Self {
        Self {
            archive,
            name,
            inode,
        }
    }

    /// Entry name as stored on disk; `/` for the root.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.name
    }

    /// Name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// Basic kind tag; extended inodes report their basic kind.
    #[must_use]
    pub fn kind(&self) -> InodeKind {
        self.inode.kind().basic()
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.inode.is_dir()
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.inode.is_file()
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.inode.is_symlink()
    }

    /// Payload size in bytes; 0 for anything but a regular file.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.inode.file_size()
    }

    /// Permission bits from the inode header.
    #[must_use]
    pub fn permissions(&self) -> u16 {
        self.inode.header.mode & MODE_PERM_MASK
    }

    /// Full POSIX mode: file-type bits composed with the permission bits.
    #[must_use]
    pub fn mode(&self) -> u32 {
        let type_bits = match self.kind() {
            InodeKind::Dir => S_IFDIR,
            InodeKind::File => S_IFREG,
            InodeKind::Symlink => S_IFLNK,
            InodeKind::BlockDev => S_IFBLK,
            InodeKind::CharDev => S_IFCHR,
            InodeKind::Fifo => S_IFIFO,
            InodeKind::Socket => S_IFSOCK,
            // extended tags never escape `kind()`
            _ => 0,
        };
        type_bits | u32::from(self.permissions())
    }

    /// Modification time, unsigned unix seconds.
    #[must_use]
    pub fn mod_time(&self) -> u32 {
        self.inode.header.mtime
    }

    #[must_use]
    pub fn inode_number(&self) -> u32 {
        self.inode.header.inode_number
    }

    /// `(uid, gid)` resolved through the id table.
    pub fn owner_ids(&self) -> Result<(u32, u32)> {
        let uid = self.archive.resolve_id(self.inode.header.uid_idx)?;
        let gid = self.archive.resolve_id(self.inode.header.gid_idx)?;
        Ok((uid, gid))
    }

    /// The decoded inode, for callers that want the raw metadata.
    #[must_use]
    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// List this directory's entries in on-disk order.
    pub fn read_dir(&self) -> Result<Vec<DirEntryHandle>> {
        let location = self.inode.dir_location().ok_or(SqfsError::NotADirectory)?;
        let entries = self.archive.dir_listing(location)?;
        Ok(entries
            .into_iter()
            .map(|entry| DirEntryHandle {
                archive: Arc::clone(&self.archive),
                entry,
            })
            .collect())
    }

    /// Open a byte stream over this regular file.
    pub fn open_reader(&self) -> Result<FileReader> {
        FileReader::new(Arc::clone(&self.archive), &self.inode)
    }

    /// Symlink target exactly as stored; absolute targets keep their
    /// leading `/`.
    pub fn symlink_target(&self) -> Result<&[u8]> {
        self.inode.symlink_target().ok_or(SqfsError::NotASymlink)
    }

    /// Symlink target as a UTF-8 string (lossy).
    pub fn symlink_target_str(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.symlink_target()?).into_owned())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name_str())
            .field("kind", &self.kind())
            .field("inode_number", &self.inode_number())
            .finish_non_exhaustive()
    }
}

/// A directory entry plus everything needed to open it.
#[derive(Clone)]
pub struct DirEntryHandle {
    archive: Arc<ArchiveInner>,
    entry: DirEntry,
}

impl DirEntryHandle {
    /// Entry name as stored on disk: arbitrary bytes, never trimmed.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        &self.entry.name
    }

    /// Name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        self.entry.name_str()
    }

    /// Basic kind tag from the directory listing.
    #[must_use]
    pub fn kind(&self) -> InodeKind {
        self.entry.kind
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.entry.kind.is_dir()
    }

    #[must_use]
    pub fn inode_number(&self) -> u32 {
        self.entry.inode_number
    }

    /// Decode the entry's inode and return it as a [`Node`].
    pub fn open(&self) -> Result<Node> {
        let inode = self
            .archive
            .read_inode(self.entry.inode_block_start, self.entry.offset)?;
        Ok(Node::new(
            Arc::clone(&self.archive),
            self.entry.name.clone(),
            inode,
        ))
    }
}

impl std::fmt::Debug for DirEntryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirEntryHandle")
            .field("name", &self.entry.name_str())
            .field("kind", &self.entry.kind)
            .finish_non_exhaustive()
    }
}
