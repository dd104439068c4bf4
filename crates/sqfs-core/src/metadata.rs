//! The metadata stream: a logically contiguous byte stream over a chain of
//! compressed metadata blocks.
//!
//! Inode, directory, fragment, and id tables all live in such chains. Block
//! boundaries are never exposed to callers; a read that exhausts the
//! current block transparently advances to the block at
//! `header_offset + 2 + on_disk_len`. End-of-chain surfaces as a short
//! read.
//!
//! Decompressed blocks are immutable, so they are shared through a small
//! bounded cache keyed by the block's file offset.

use parking_lot::Mutex;
use sqfs_block::ByteDevice;
use sqfs_compress::Compressor;
use sqfs_error::{Result, SqfsError};
use sqfs_ondisk::MetaBlockHeader;
use sqfs_types::METADATA_BLOCK_SIZE;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::trace;

/// Number of decompressed metadata blocks kept in the shared cache.
const META_CACHE_CAPACITY: usize = 64;

/// A decompressed metadata block plus the file offset of its successor.
#[derive(Clone)]
pub(crate) struct CachedBlock {
    pub payload: Arc<Vec<u8>>,
    /// File offset of the next block header in the chain.
    pub next_offset: u64,
}

/// Bounded cache of decompressed metadata blocks.
///
/// Eviction is oldest-inserted-first; the cache never holds more than
/// `capacity` blocks of at most 8 KiB each.
pub(crate) struct MetaCache {
    capacity: usize,
    inner: Mutex<CacheState>,
}

struct CacheState {
    map: HashMap<u64, CachedBlock>,
    order: VecDeque<u64>,
}

impl MetaCache {
    pub fn new() -> Self {
        Self::with_capacity(META_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheState {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    fn get(&self, offset: u64) -> Option<CachedBlock> {
        self.inner.lock().map.get(&offset).cloned()
    }

    fn insert(&self, offset: u64, block: CachedBlock) {
        let mut state = self.inner.lock();
        if state.map.contains_key(&offset) {
            return;
        }
        while state.map.len() >= self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.map.remove(&oldest);
        }
        state.order.push_back(offset);
        state.map.insert(offset, block);
    }
}

/// Cursor over one metadata chain.
///
/// Cheap to construct; the first block is fetched lazily on the first
/// read. Each reader owns its cursor, so any number of them can run over
/// the same archive concurrently.
pub(crate) struct MetaReader<'a> {
    dev: &'a dyn ByteDevice,
    compressor: &'a Compressor,
    cache: &'a MetaCache,
    /// File offset of the next block header to fetch.
    next_offset: u64,
    block: Arc<Vec<u8>>,
    pos: usize,
}

impl<'a> MetaReader<'a> {
    pub fn new(
        dev: &'a dyn ByteDevice,
        compressor: &'a Compressor,
        cache: &'a MetaCache,
        offset: u64,
    ) -> Self {
        Self {
            dev,
            compressor,
            cache,
            next_offset: offset,
            block: Arc::new(Vec::new()),
            pos: 0,
        }
    }

    /// Fetch blocks until one with payload is current.
    ///
    /// Returns `false` at end-of-chain. Zero-length blocks are valid
    /// no-op advances; the chain strictly moves forward, so the loop
    /// terminates at the device boundary.
    fn advance_block(&mut self) -> Result<bool> {
        loop {
            let Some(header_end) = self.next_offset.checked_add(MetaBlockHeader::SIZE as u64)
            else {
                return Ok(false);
            };
            if header_end > self.dev.len_bytes() {
                return Ok(false);
            }

            let cached = match self.cache.get(self.next_offset) {
                Some(hit) => hit,
                None => {
                    let block = self.fetch_block(self.next_offset)?;
                    self.cache.insert(self.next_offset, block.clone());
                    block
                }
            };

            self.next_offset = cached.next_offset;
            self.pos = 0;
            self.block = cached.payload;
            if !self.block.is_empty() {
                return Ok(true);
            }
        }
    }

    fn fetch_block(&self, offset: u64) -> Result<CachedBlock> {
        let mut raw_header = [0_u8; MetaBlockHeader::SIZE];
        self.dev.read_exact_at(offset, &mut raw_header)?;
        let header = MetaBlockHeader::parse(u16::from_le_bytes(raw_header))?;

        let mut payload = vec![0_u8; header.payload_len];
        self.dev
            .read_exact_at(offset + MetaBlockHeader::SIZE as u64, &mut payload)?;

        if !header.uncompressed {
            payload = self.compressor.decompress(&payload, METADATA_BLOCK_SIZE)?;
        }
        if payload.len() > METADATA_BLOCK_SIZE {
            return Err(SqfsError::corrupt(format!(
                "metadata block at {offset} decompressed to {} bytes",
                payload.len()
            )));
        }

        trace!(
            target: "sqfs::core",
            event = "metadata_block",
            offset,
            on_disk = header.payload_len,
            decoded = payload.len(),
            uncompressed = header.uncompressed,
        );

        Ok(CachedBlock {
            payload: Arc::new(payload),
            next_offset: offset + (MetaBlockHeader::SIZE + header.payload_len) as u64,
        })
    }

    /// Read into `buf`; short only at end-of-chain.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut copied = 0;
        while copied < buf.len() {
            if self.pos == self.block.len() && !self.advance_block()? {
                break;
            }
            let take = (buf.len() - copied).min(self.block.len() - self.pos);
            buf[copied..copied + take].copy_from_slice(&self.block[self.pos..self.pos + take]);
            self.pos += take;
            copied += take;
        }
        Ok(copied)
    }

    /// Read exactly `buf.len()` bytes; a short read is `Corrupt`.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let got = self.read(buf)?;
        if got != buf.len() {
            return Err(SqfsError::corrupt(format!(
                "metadata stream ended early: wanted {} bytes, got {got}",
                buf.len()
            )));
        }
        Ok(())
    }

    /// Read exactly `len` bytes into a fresh buffer.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0_u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read up to `len` bytes; shorter only at end-of-chain.
    ///
    /// Grows the buffer as bytes arrive, so a corrupt declared length
    /// costs memory proportional to the data actually present.
    pub fn read_vec_up_to(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len.min(METADATA_BLOCK_SIZE));
        let mut chunk = [0_u8; 4096];
        let mut remaining = len;
        while remaining > 0 {
            let take = remaining.min(chunk.len());
            let got = self.read(&mut chunk[..take])?;
            if got == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..got]);
            remaining -= got;
        }
        Ok(out)
    }

    /// Discard `n` bytes. Used to seek to an intra-block offset.
    pub fn skip(&mut self, mut n: usize) -> Result<()> {
        while n > 0 {
            if self.pos == self.block.len() && !self.advance_block()? {
                return Err(SqfsError::corrupt(
                    "metadata stream ended early while seeking",
                ));
            }
            let take = n.min(self.block.len() - self.pos);
            self.pos += take;
            n -= take;
        }
        Ok(())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0_u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0_u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}
