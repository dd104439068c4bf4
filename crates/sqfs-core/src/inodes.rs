//! Loading inodes from the inode table.
//!
//! An inode reference names a metadata block (relative to the inode table
//! start) and a byte offset inside its decompressed stream. The common
//! header is read first; the variant tail's length is either fixed or
//! derived from header fields, so decoding streams exactly as many bytes
//! as the variant owns.

use crate::metadata::{MetaCache, MetaReader};
use sqfs_block::ByteDevice;
use sqfs_compress::Compressor;
use sqfs_error::{Result, SqfsError};
use sqfs_ondisk::{
    parse_block_list, DeviceInode, DirIndex, DirInode, ExtDeviceInode, ExtDirInode, ExtFileInode,
    ExtIpcInode, ExtSymlinkInode, FileInode, Inode, InodeData, InodeHeader, InodeKind, IpcInode,
    Superblock, SymlinkInode,
};
use sqfs_types::{u64_to_usize, InodeRef};
use tracing::trace;

/// Symlink targets beyond this length indicate a mangled inode.
const MAX_SYMLINK_TARGET: u32 = 65_535;

pub(crate) struct InodeSource<'a> {
    pub dev: &'a dyn ByteDevice,
    pub compressor: &'a Compressor,
    pub cache: &'a MetaCache,
    pub superblock: &'a Superblock,
}

impl InodeSource<'_> {
    /// Decode the inode at `(block_offset, intra_offset)` in the inode
    /// table.
    pub fn read_inode(&self, block_offset: u32, intra_offset: u16) -> Result<Inode> {
        let chain_start = self
            .superblock
            .inode_table_start
            .checked_add(u64::from(block_offset))
            .ok_or_else(|| SqfsError::corrupt("inode table offset overflows u64"))?;

        let mut reader = MetaReader::new(self.dev, self.compressor, self.cache, chain_start);
        reader.skip(usize::from(intra_offset))?;

        let raw_header = reader.read_vec(InodeHeader::SIZE)?;
        let header = InodeHeader::parse(&raw_header)?;
        trace!(
            target: "sqfs::core",
            event = "inode",
            kind = ?header.kind,
            number = header.inode_number,
        );

        let data = self.read_tail(&mut reader, header.kind)?;
        Ok(Inode { header, data })
    }

    pub fn read_inode_ref(&self, inode_ref: InodeRef) -> Result<Inode> {
        self.read_inode(inode_ref.block_offset(), inode_ref.intra_offset())
    }

    fn read_tail(&self, reader: &mut MetaReader<'_>, kind: InodeKind) -> Result<InodeData> {
        Ok(match kind {
            InodeKind::Dir => {
                let raw = reader.read_vec(DirInode::SIZE)?;
                InodeData::Dir(DirInode::parse(&raw)?)
            }
            InodeKind::File => {
                let raw = reader.read_vec(FileInode::FIXED_SIZE)?;
                let mut file = FileInode::parse_fixed(&raw)?;
                file.block_list =
                    self.read_block_list(reader, file.block_count(self.superblock.block_size))?;
                InodeData::File(file)
            }
            InodeKind::Symlink => {
                let raw = reader.read_vec(SymlinkInode::FIXED_SIZE)?;
                let mut link = SymlinkInode::parse_fixed(&raw)?;
                link.target = self.read_symlink_target(reader, link.target_size)?;
                InodeData::Symlink(link)
            }
            InodeKind::BlockDev => {
                let raw = reader.read_vec(DeviceInode::SIZE)?;
                InodeData::BlockDev(DeviceInode::parse(&raw)?)
            }
            InodeKind::CharDev => {
                let raw = reader.read_vec(DeviceInode::SIZE)?;
                InodeData::CharDev(DeviceInode::parse(&raw)?)
            }
            InodeKind::Fifo => {
                let raw = reader.read_vec(IpcInode::SIZE)?;
                InodeData::Fifo(IpcInode::parse(&raw)?)
            }
            InodeKind::Socket => {
                let raw = reader.read_vec(IpcInode::SIZE)?;
                InodeData::Socket(IpcInode::parse(&raw)?)
            }
            InodeKind::ExtDir => {
                let raw = reader.read_vec(ExtDirInode::SIZE)?;
                let dir = ExtDirInode::parse(&raw)?;
                // The directory index implements name hashing for large
                // directories; it is read to keep the stream positioned
                // but not consumed by lookups.
                for _ in 0..dir.index_count {
                    let raw_index = reader.read_vec(DirIndex::SIZE)?;
                    let index = DirIndex::parse(&raw_index)?;
                    reader.skip(u64_to_usize(
                        u64::from(index.name_size) + 1,
                        "dir_index_name",
                    )?)?;
                }
                InodeData::ExtDir(dir)
            }
            InodeKind::ExtFile => {
                let raw = reader.read_vec(ExtFileInode::FIXED_SIZE)?;
                let mut file = ExtFileInode::parse_fixed(&raw)?;
                file.block_list =
                    self.read_block_list(reader, file.block_count(self.superblock.block_size))?;
                InodeData::ExtFile(file)
            }
            InodeKind::ExtSymlink => {
                let raw = reader.read_vec(ExtSymlinkInode::FIXED_SIZE)?;
                let mut link = ExtSymlinkInode::parse_fixed(&raw)?;
                link.target = self.read_symlink_target(reader, link.target_size)?;
                link.xattr_index = reader.read_u32()?;
                InodeData::ExtSymlink(link)
            }
            InodeKind::ExtBlockDev => {
                let raw = reader.read_vec(ExtDeviceInode::SIZE)?;
                InodeData::ExtBlockDev(ExtDeviceInode::parse(&raw)?)
            }
            InodeKind::ExtCharDev => {
                let raw = reader.read_vec(ExtDeviceInode::SIZE)?;
                InodeData::ExtCharDev(ExtDeviceInode::parse(&raw)?)
            }
            InodeKind::ExtFifo => {
                let raw = reader.read_vec(ExtIpcInode::SIZE)?;
                InodeData::ExtFifo(ExtIpcInode::parse(&raw)?)
            }
            InodeKind::ExtSocket => {
                let raw = reader.read_vec(ExtIpcInode::SIZE)?;
                InodeData::ExtSocket(ExtIpcInode::parse(&raw)?)
            }
        })
    }

    fn read_block_list(
        &self,
        reader: &mut MetaReader<'_>,
        count: u64,
    ) -> Result<Vec<sqfs_ondisk::BlockLen>> {
        // The list must physically fit in the archive's metadata region.
        if count > self.superblock.bytes_used / 4 {
            return Err(SqfsError::corrupt(format!(
                "block list of {count} entries exceeds the archive"
            )));
        }
        let count = u64_to_usize(count, "block_list_len")?;
        let raw = reader.read_vec(count * 4)?;
        Ok(parse_block_list(&raw, count)?)
    }

    fn read_symlink_target(&self, reader: &mut MetaReader<'_>, size: u32) -> Result<Vec<u8>> {
        if size > MAX_SYMLINK_TARGET {
            return Err(SqfsError::corrupt(format!(
                "symlink target of {size} bytes"
            )));
        }
        reader.read_vec(u64_to_usize(u64::from(size), "symlink_target")?)
    }
}
