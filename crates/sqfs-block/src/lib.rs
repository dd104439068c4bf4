#![forbid(unsafe_code)]
//! Byte sources for archive decoding.
//!
//! Defines the [`ByteDevice`] trait — positioned reads with pread
//! semantics, no shared cursor — plus file-backed and in-memory
//! implementations and a length-bounding wrapper. All implementations are
//! safe for concurrent readers.

use sqfs_error::{Result, SqfsError};
use sqfs_types::SUPERBLOCK_SIZE;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Byte-addressed source for fixed-offset reads (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

fn check_range(offset: u64, len: usize, device_len: u64) -> Result<()> {
    let len_u64 = u64::try_from(len).map_err(|_| SqfsError::corrupt("read length overflows u64"))?;
    let end = offset
        .checked_add(len_u64)
        .ok_or_else(|| SqfsError::corrupt("read range overflows u64"))?;
    if end > device_len {
        return Err(SqfsError::corrupt(format!(
            "read out of bounds: offset={offset} len={len} device_len={device_len}"
        )));
    }
    Ok(())
}

/// File-backed byte device using `pread`-style I/O.
///
/// Uses `std::os::unix::fs::FileExt`, which is thread-safe and does not
/// require a shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        use std::os::unix::fs::FileExt;

        check_range(offset, buf.len(), self.len)?;
        trace!(target: "sqfs::block", event = "read_at", offset, len = buf.len());
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

/// In-memory byte device over an owned image buffer.
#[derive(Debug, Clone)]
pub struct MemByteDevice {
    data: Arc<Vec<u8>>,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }
}

impl ByteDevice for MemByteDevice {
    fn len_bytes(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len_bytes())?;
        let start = usize::try_from(offset)
            .map_err(|_| SqfsError::corrupt("read offset does not fit usize"))?;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }
}

/// Caps a device at the archive's declared `bytes_used`.
///
/// Images are frequently padded to the storage block size; every read past
/// the declared length is a decoding bug, so the bound is enforced here
/// rather than at each call site.
#[derive(Debug)]
pub struct BoundedDevice<D> {
    inner: D,
    limit: u64,
}

impl<D: ByteDevice> BoundedDevice<D> {
    pub fn new(inner: D, limit: u64) -> Result<Self> {
        if limit > inner.len_bytes() {
            return Err(SqfsError::corrupt(format!(
                "declared archive length {limit} exceeds source length {}",
                inner.len_bytes()
            )));
        }
        Ok(Self { inner, limit })
    }
}

impl<D: ByteDevice> ByteDevice for BoundedDevice<D> {
    fn len_bytes(&self) -> u64 {
        self.limit
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.limit)?;
        self.inner.read_exact_at(offset, buf)
    }
}

impl ByteDevice for Box<dyn ByteDevice> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// Read the superblock region (96 bytes at offset 0).
pub fn read_superblock_region(dev: &dyn ByteDevice) -> Result<[u8; SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; SUPERBLOCK_SIZE];
    dev.read_exact_at(0, &mut buf)?;
    Ok(buf)
}
