#![forbid(unsafe_code)]
//! Decompressor registry.
//!
//! One [`Compressor`] variant per supported algorithm, selected by the
//! superblock's compression id. Each archive uses exactly one algorithm for
//! all of its metadata, data, and fragment blocks. Decompression is
//! one-shot per frame; there is no streaming within a frame.
//!
//! When the superblock's compressor-options flag is set, a small
//! algorithm-specific block follows the superblock. Gzip options outside
//! the tested envelope produce a non-fatal [`CompatWarning`]; xz options
//! that declare filters are fatal.

use sqfs_error::{Result, SqfsError};
use sqfs_types::{
    read_le_u16, read_le_u32, COMPRESSION_GZIP, COMPRESSION_LZ4, COMPRESSION_LZMA,
    COMPRESSION_LZO, COMPRESSION_XZ, COMPRESSION_ZSTD,
};
use std::fmt;
use std::io::Read;
use tracing::debug;

/// Gzip window size every tested archive uses.
const GZIP_DEFAULT_WINDOW: u16 = 15;
/// Bit 0 of the gzip strategy bitmap is the default strategy.
const GZIP_STRATEGY_DEFAULT: u16 = 0x0001;
/// The lz4 options block always declares version 1.
const LZ4_VERSION: u32 = 1;

/// Parsed gzip options block (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GzipOptions {
    pub compression_level: u32,
    pub window_size: u16,
    pub strategies: u16,
}

impl GzipOptions {
    pub const SIZE: usize = 8;

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            compression_level: read_le_u32(bytes, 0x00)?,
            window_size: read_le_u16(bytes, 0x04)?,
            strategies: read_le_u16(bytes, 0x06)?,
        })
    }
}

/// Parsed xz options block (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XzOptions {
    pub dictionary_size: u32,
    pub filters: u32,
}

impl XzOptions {
    pub const SIZE: usize = 8;

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            dictionary_size: read_le_u32(bytes, 0x00)?,
            filters: read_le_u32(bytes, 0x04)?,
        })
    }
}

/// Parsed lz4 options block (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lz4Options {
    pub version: u32,
    pub flags: u32,
}

impl Lz4Options {
    pub const SIZE: usize = 8;

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            version: read_le_u32(bytes, 0x00)?,
            flags: read_le_u32(bytes, 0x04)?,
        })
    }
}

/// Parsed zstd options block (4 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZstdOptions {
    pub compression_level: u32,
}

impl ZstdOptions {
    pub const SIZE: usize = 4;

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            compression_level: read_le_u32(bytes, 0x00)?,
        })
    }
}

/// Non-fatal notice that gzip options fall outside the tested envelope.
///
/// Returned alongside a fully usable archive; the caller decides whether
/// to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatWarning {
    /// Set when the window size differs from 15.
    pub custom_window: Option<u16>,
    /// Set when any non-default strategy bit is present.
    pub custom_strategies: Option<u16>,
}

impl fmt::Display for CompatWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gzip options may be incompatible:")?;
        if let Some(window) = self.custom_window {
            write!(f, " window_size={window}")?;
        }
        if let Some(strategies) = self.custom_strategies {
            write!(f, " strategies={strategies:#06x}")?;
        }
        Ok(())
    }
}

/// The selected decompression algorithm, with any parsed options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compressor {
    Gzip(Option<GzipOptions>),
    Lzma,
    Xz(Option<XzOptions>),
    Lz4(Option<Lz4Options>),
    Zstd(Option<ZstdOptions>),
}

impl Compressor {
    /// Select by superblock compression id, without an options block.
    pub fn new(id: u16) -> Result<Self> {
        match id {
            COMPRESSION_GZIP => Ok(Self::Gzip(None)),
            COMPRESSION_LZMA => Ok(Self::Lzma),
            COMPRESSION_XZ => Ok(Self::Xz(None)),
            COMPRESSION_LZ4 => Ok(Self::Lz4(None)),
            COMPRESSION_ZSTD => Ok(Self::Zstd(None)),
            // LZO is deliberately unsupported, same as every unknown id.
            COMPRESSION_LZO => Err(SqfsError::UnsupportedCompression { id }),
            _ => Err(SqfsError::UnsupportedCompression { id }),
        }
    }

    /// Length of the options block following the superblock for `id`.
    pub fn options_len(id: u16) -> Result<usize> {
        match id {
            COMPRESSION_GZIP => Ok(GzipOptions::SIZE),
            COMPRESSION_LZMA => Ok(0),
            COMPRESSION_XZ => Ok(XzOptions::SIZE),
            COMPRESSION_LZ4 => Ok(Lz4Options::SIZE),
            COMPRESSION_ZSTD => Ok(ZstdOptions::SIZE),
            _ => Err(SqfsError::UnsupportedCompression { id }),
        }
    }

    /// Select by superblock compression id and decode its options block.
    ///
    /// `block` must hold exactly [`Self::options_len`] bytes. Gzip options
    /// outside the tested envelope yield a [`CompatWarning`] next to the
    /// compressor; xz filter bits are fatal.
    pub fn with_options(id: u16, block: &[u8]) -> Result<(Self, Option<CompatWarning>)> {
        match id {
            COMPRESSION_GZIP => {
                let opts = GzipOptions::parse(block)?;
                let custom_window =
                    (opts.window_size != GZIP_DEFAULT_WINDOW).then_some(opts.window_size);
                let custom_strategies =
                    (opts.strategies & !GZIP_STRATEGY_DEFAULT != 0).then_some(opts.strategies);
                let warning = (custom_window.is_some() || custom_strategies.is_some()).then_some(
                    CompatWarning {
                        custom_window,
                        custom_strategies,
                    },
                );
                if let Some(warning) = warning {
                    debug!(target: "sqfs::compress", %warning, "gzip options outside tested envelope");
                }
                Ok((Self::Gzip(Some(opts)), warning))
            }
            COMPRESSION_LZMA => Err(SqfsError::corrupt(
                "lzma archives carry no compressor options block",
            )),
            COMPRESSION_XZ => {
                let opts = XzOptions::parse(block)?;
                if opts.filters != 0 {
                    return Err(SqfsError::UnsupportedXzFilters);
                }
                Ok((Self::Xz(Some(opts)), None))
            }
            COMPRESSION_LZ4 => {
                let opts = Lz4Options::parse(block)?;
                if opts.version != LZ4_VERSION {
                    return Err(SqfsError::corrupt(format!(
                        "unknown lz4 options version {}",
                        opts.version
                    )));
                }
                Ok((Self::Lz4(Some(opts)), None))
            }
            COMPRESSION_ZSTD => {
                let opts = ZstdOptions::parse(block)?;
                Ok((Self::Zstd(Some(opts)), None))
            }
            _ => Err(SqfsError::UnsupportedCompression { id }),
        }
    }

    /// Algorithm name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gzip(_) => "gzip",
            Self::Lzma => "lzma",
            Self::Xz(_) => "xz",
            Self::Lz4(_) => "lz4",
            Self::Zstd(_) => "zstd",
        }
    }

    /// Decompress one frame.
    ///
    /// `hint` is an upper bound on the decompressed length (8 KiB for
    /// metadata blocks, the archive block size for data and fragments).
    /// Output is capped at `hint + 1` bytes so an over-long frame shows up
    /// as a length mismatch at the caller instead of an unbounded
    /// allocation. Pure with respect to its inputs.
    pub fn decompress(&self, src: &[u8], hint: usize) -> Result<Vec<u8>> {
        let cap = hint as u64 + 1;
        match self {
            Self::Gzip(_) => {
                let mut out = Vec::with_capacity(hint);
                flate2::read::ZlibDecoder::new(src)
                    .take(cap)
                    .read_to_end(&mut out)
                    .map_err(|e| SqfsError::corrupt(format!("gzip frame: {e}")))?;
                Ok(out)
            }
            Self::Lzma => {
                let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
                    .map_err(|e| SqfsError::corrupt(format!("lzma decoder: {e}")))?;
                let mut out = Vec::with_capacity(hint);
                xz2::bufread::XzDecoder::new_stream(src, stream)
                    .take(cap)
                    .read_to_end(&mut out)
                    .map_err(|e| SqfsError::corrupt(format!("lzma frame: {e}")))?;
                Ok(out)
            }
            Self::Xz(_) => {
                let mut out = Vec::with_capacity(hint);
                xz2::read::XzDecoder::new(src)
                    .take(cap)
                    .read_to_end(&mut out)
                    .map_err(|e| SqfsError::corrupt(format!("xz frame: {e}")))?;
                Ok(out)
            }
            Self::Lz4(_) => lz4_flex::block::decompress(src, hint)
                .map_err(|e| SqfsError::corrupt(format!("lz4 frame: {e}"))),
            Self::Zstd(_) => {
                let decoder = zstd::stream::read::Decoder::new(src)
                    .map_err(|e| SqfsError::corrupt(format!("zstd decoder: {e}")))?;
                let mut out = Vec::with_capacity(hint);
                decoder
                    .take(cap)
                    .read_to_end(&mut out)
                    .map_err(|e| SqfsError::corrupt(format!("zstd frame: {e}")))?;
                Ok(out)
            }
        }
    }
}
