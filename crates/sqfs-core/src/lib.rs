#![forbid(unsafe_code)]
//! Read-only SquashFS 4.0 archive reader.
//!
//! [`Archive::open`] walks superblock → decompressor → id table → fragment
//! super-table → root inode, then hands out [`Node`]s for stat, directory
//! listing, and file streaming. All state shared between streams is
//! immutable after open, so an archive can serve any number of concurrent
//! readers; each stream owns its own cursors and scratch buffers.

mod file;
mod fsview;
mod inodes;
mod metadata;
mod node;
mod tables;

pub use file::FileReader;
pub use node::{DirEntryHandle, Node};
pub use sqfs_block::{ByteDevice, FileByteDevice, MemByteDevice};
pub use sqfs_compress::{CompatWarning, Compressor};
pub use sqfs_error::{Result, SqfsError};
pub use sqfs_ondisk::{DirEntry, Flags, Inode, InodeData, InodeKind, Superblock};
pub use sqfs_types::InodeRef;

use crate::inodes::InodeSource;
use crate::metadata::{MetaCache, MetaReader};
use sqfs_block::{read_superblock_region, BoundedDevice};
use sqfs_ondisk::DirLocation;
use sqfs_types::{u64_to_usize, SUPERBLOCK_SIZE};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub(crate) struct ArchiveInner {
    pub(crate) dev: BoundedDevice<Box<dyn ByteDevice>>,
    pub(crate) superblock: Superblock,
    pub(crate) compressor: Compressor,
    warning: Option<CompatWarning>,
    id_table: Vec<u32>,
    fragment_index: Vec<u64>,
    meta_cache: MetaCache,
}

impl ArchiveInner {
    fn inode_source(&self) -> InodeSource<'_> {
        InodeSource {
            dev: &self.dev,
            compressor: &self.compressor,
            cache: &self.meta_cache,
            superblock: &self.superblock,
        }
    }

    pub(crate) fn read_inode(&self, block_offset: u32, intra_offset: u16) -> Result<Inode> {
        self.inode_source().read_inode(block_offset, intra_offset)
    }

    pub(crate) fn read_inode_ref(&self, inode_ref: InodeRef) -> Result<Inode> {
        self.inode_source().read_inode_ref(inode_ref)
    }

    /// Decode a directory listing at its metadata location.
    ///
    /// The declared size includes 3 phantom bytes for the implicit `.` and
    /// `..` entries, so the read tolerates a short tail.
    pub(crate) fn dir_listing(&self, location: DirLocation) -> Result<Vec<DirEntry>> {
        let chain_start = self
            .superblock
            .directory_table_start
            .checked_add(u64::from(location.block))
            .ok_or_else(|| SqfsError::corrupt("directory table offset overflows u64"))?;

        let mut reader = MetaReader::new(&self.dev, &self.compressor, &self.meta_cache, chain_start);
        reader.skip(usize::from(location.offset))?;
        let listing = reader.read_vec_up_to(u64_to_usize(
            u64::from(location.size),
            "directory_size",
        )?)?;
        Ok(sqfs_ondisk::parse_dir_listing(&listing)?)
    }

    /// Fetch and decode the fragment block holding fragment `index`.
    pub(crate) fn fragment_payload(&self, index: u32) -> Result<Vec<u8>> {
        let entry = tables::fragment_entry(
            &self.dev,
            &self.compressor,
            &self.meta_cache,
            &self.fragment_index,
            self.superblock.fragment_count,
            index,
        )?;
        tables::fragment_payload(&self.dev, &self.compressor, entry, self.superblock.block_size)
    }

    pub(crate) fn resolve_id(&self, index: u16) -> Result<u32> {
        self.id_table
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| {
                SqfsError::corrupt(format!(
                    "id index {index} out of range ({} ids)",
                    self.id_table.len()
                ))
            })
    }
}

/// An open archive.
///
/// Clones share all immutable state, so handing one to each worker of a
/// parallel tree walk is cheap. Dropping the `Archive` while nodes or
/// file readers are alive is fine.
#[derive(Clone)]
pub struct Archive {
    inner: Arc<ArchiveInner>,
}

impl Archive {
    /// Open an archive over any byte source.
    pub fn open<D: ByteDevice + 'static>(device: D) -> Result<Self> {
        Self::open_boxed(Box::new(device))
    }

    /// Open an archive file from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(FileByteDevice::open(path)?)
    }

    fn open_boxed(device: Box<dyn ByteDevice>) -> Result<Self> {
        let region = read_superblock_region(&device)?;
        let superblock = Superblock::parse(&region)?;
        debug!(
            target: "sqfs::core",
            event = "superblock",
            inode_count = superblock.inode_count,
            block_size = superblock.block_size,
            compression_id = superblock.compression_id,
            fragment_count = superblock.fragment_count,
            id_count = superblock.id_count,
            bytes_used = superblock.bytes_used,
        );

        if superblock.bytes_used < SUPERBLOCK_SIZE as u64 {
            return Err(SqfsError::corrupt(format!(
                "declared archive length {} smaller than the superblock",
                superblock.bytes_used
            )));
        }

        let (compressor, warning) = if superblock.flags.has_compressor_options() {
            let len = Compressor::options_len(superblock.compression_id)?;
            let mut block = vec![0_u8; len];
            device.read_exact_at(SUPERBLOCK_SIZE as u64, &mut block)?;
            Compressor::with_options(superblock.compression_id, &block)?
        } else {
            (Compressor::new(superblock.compression_id)?, None)
        };
        debug!(target: "sqfs::core", event = "compressor", name = compressor.name());

        let dev = BoundedDevice::new(device, superblock.bytes_used)?;
        let meta_cache = MetaCache::new();
        let id_table = tables::load_id_table(&dev, &compressor, &meta_cache, &superblock)?;
        let fragment_index = tables::load_fragment_index(&dev, &superblock)?;
        debug!(
            target: "sqfs::core",
            event = "tables",
            ids = id_table.len(),
            fragment_index_blocks = fragment_index.len(),
        );

        let inner = Arc::new(ArchiveInner {
            dev,
            superblock,
            compressor,
            warning,
            id_table,
            fragment_index,
            meta_cache,
        });

        let root = inner.read_inode_ref(inner.superblock.root_inode_ref)?;
        if !root.is_dir() {
            return Err(SqfsError::corrupt("root inode is not a directory"));
        }

        Ok(Self { inner })
    }

    /// The validated superblock.
    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.inner.superblock
    }

    /// Archive creation / last-append time, unsigned unix seconds.
    #[must_use]
    pub fn modification_time(&self) -> u32 {
        self.inner.superblock.modification_time
    }

    /// Data block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.inner.superblock.block_size
    }

    /// The non-fatal gzip-options notice, when one was raised at open.
    #[must_use]
    pub fn compat_warning(&self) -> Option<&CompatWarning> {
        self.inner.warning.as_ref()
    }

    /// The root directory.
    pub fn root(&self) -> Result<Node> {
        let inode = self
            .inner
            .read_inode_ref(self.inner.superblock.root_inode_ref)?;
        Ok(Node::new(Arc::clone(&self.inner), b"/".to_vec(), inode))
    }
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("block_size", &self.inner.superblock.block_size)
            .field("inode_count", &self.inner.superblock.inode_count)
            .field("compressor", &self.inner.compressor.name())
            .finish_non_exhaustive()
    }
}
