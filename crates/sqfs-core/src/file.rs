//! Streaming reads of a regular file's payload.
//!
//! A file's bytes live in up to three places: full data blocks addressed
//! by the inode's block list, holes encoded as zero-length list words
//! (sparse blocks), and an optional tail packed into a shared fragment
//! block. The reader walks them in file order; there is no backward seek,
//! so re-reading from the start means opening a new reader.

use crate::ArchiveInner;
use sqfs_block::ByteDevice;
use sqfs_error::{Result, SqfsError};
use sqfs_ondisk::{BlockLen, FragmentRef, Inode, InodeData};
use sqfs_types::u64_to_usize;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::trace;

/// Byte stream over one regular file.
///
/// Shares the archive's immutable state and owns all cursor state, so any
/// number of readers can stream concurrently.
pub struct FileReader {
    archive: Arc<ArchiveInner>,
    blocks_start: u64,
    file_size: u64,
    fragment: Option<FragmentRef>,
    block_list: Vec<BlockLen>,
    block_size: u32,

    next_block: usize,
    /// Absolute offset of the next on-disk data block: `blocks_start` plus
    /// the compressed lengths of every prior block.
    disk_offset: u64,
    current: Vec<u8>,
    pos: usize,
    fragment_done: bool,
}

impl FileReader {
    pub(crate) fn new(archive: Arc<ArchiveInner>, inode: &Inode) -> Result<Self> {
        let (blocks_start, file_size, fragment, block_list) = match &inode.data {
            InodeData::File(f) => (
                u64::from(f.blocks_start),
                u64::from(f.file_size),
                f.fragment(),
                f.block_list.clone(),
            ),
            InodeData::ExtFile(f) => {
                (f.blocks_start, f.file_size, f.fragment(), f.block_list.clone())
            }
            _ => return Err(SqfsError::NotAFile),
        };

        let block_size = archive.superblock.block_size;
        Ok(Self {
            archive,
            blocks_start,
            file_size,
            fragment,
            block_list,
            block_size,
            next_block: 0,
            disk_offset: blocks_start,
            current: Vec::new(),
            pos: 0,
            fragment_done: false,
        })
    }

    /// Total payload length, independent of how much has been read.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.file_size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_size == 0
    }

    /// Logical (decompressed) length of list block `index`.
    ///
    /// Every listed block is a full `block_size` except the last block of
    /// an unfragmented file, which carries the remainder.
    fn logical_block_len(&self, index: usize) -> u64 {
        let block_size = u64::from(self.block_size);
        if self.fragment.is_some() || index + 1 < self.block_list.len() {
            return block_size;
        }
        let tail = self.file_size % block_size;
        if tail == 0 {
            block_size
        } else {
            tail
        }
    }

    /// Bytes of the file that live in the fragment block.
    fn fragment_len(&self) -> u64 {
        self.file_size - self.block_list.len() as u64 * u64::from(self.block_size)
    }

    /// Load the next chunk (data block or fragment tail) into `current`.
    ///
    /// Returns `false` at end of file.
    fn advance(&mut self) -> Result<bool> {
        if self.next_block < self.block_list.len() {
            let word = self.block_list[self.next_block];
            let logical_len = u64_to_usize(
                self.logical_block_len(self.next_block),
                "data_block_len",
            )?;

            if word.is_sparse() {
                // A hole: no bytes on disk, no decompression.
                self.current = vec![0_u8; logical_len];
            } else {
                let disk_len = u64_to_usize(u64::from(word.disk_len()), "data_block_len")?;
                if disk_len > self.block_size as usize {
                    return Err(SqfsError::corrupt(format!(
                        "data block {} longer than block size ({disk_len} bytes)",
                        self.next_block
                    )));
                }
                let mut raw = vec![0_u8; disk_len];
                self.archive.dev.read_exact_at(self.disk_offset, &mut raw)?;
                self.current = if word.is_uncompressed() {
                    raw
                } else {
                    self.archive
                        .compressor
                        .decompress(&raw, self.block_size as usize)?
                };
                if self.current.len() != logical_len {
                    return Err(SqfsError::corrupt(format!(
                        "data block {} decoded to {} bytes, expected {logical_len}",
                        self.next_block,
                        self.current.len()
                    )));
                }
                self.disk_offset += u64::from(word.disk_len());
            }

            trace!(
                target: "sqfs::core",
                event = "data_block",
                index = self.next_block,
                sparse = word.is_sparse(),
                len = self.current.len(),
            );
            self.next_block += 1;
            self.pos = 0;
            return Ok(true);
        }

        if self.fragment_done {
            return Ok(false);
        }
        self.fragment_done = true;

        let Some(fragment) = self.fragment else {
            return Ok(false);
        };
        let tail_len = u64_to_usize(self.fragment_len(), "fragment_tail")?;
        if tail_len == 0 {
            return Ok(false);
        }

        let payload = self.archive.fragment_payload(fragment.index)?;
        // A tail that starts past the end of the fragment payload yields
        // zero bytes (short read), matching real archives.
        let start = (fragment.offset as usize).min(payload.len());
        let end = (start + tail_len).min(payload.len());
        self.current = payload[start..end].to_vec();
        self.pos = 0;
        trace!(
            target: "sqfs::core",
            event = "fragment_tail",
            index = fragment.index,
            len = self.current.len(),
        );
        Ok(!self.current.is_empty())
    }

    /// Stream the remaining bytes into `sink`.
    ///
    /// Semantically equivalent to draining `read`, without intermediate
    /// copies into caller buffers.
    pub fn write_to<W: Write + ?Sized>(&mut self, sink: &mut W) -> Result<u64> {
        let mut written = 0_u64;
        loop {
            if self.pos == self.current.len() && !self.advance()? {
                return Ok(written);
            }
            let chunk = &self.current[self.pos..];
            sink.write_all(chunk)?;
            written += chunk.len() as u64;
            self.pos = self.current.len();
        }
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos == self.current.len() {
            match self.advance() {
                Ok(true) => {}
                Ok(false) => return Ok(0),
                Err(SqfsError::Io(err)) => return Err(err),
                Err(err) => return Err(std::io::Error::other(err)),
            }
        }
        let take = buf.len().min(self.current.len() - self.pos);
        buf[..take].copy_from_slice(&self.current[self.pos..self.pos + take]);
        self.pos += take;
        Ok(take)
    }
}
