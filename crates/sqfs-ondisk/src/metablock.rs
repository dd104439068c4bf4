//! Metadata-block headers.
//!
//! Every metadata block starts with a 2-byte little-endian header: the low
//! 15 bits give the on-disk payload length, the high bit is set when the
//! payload is stored uncompressed. The decompressed payload never exceeds
//! 8 KiB.

use serde::{Deserialize, Serialize};
use sqfs_types::{ParseError, METADATA_BLOCK_SIZE};

const UNCOMPRESSED_BIT: u16 = 1 << 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaBlockHeader {
    /// On-disk payload length in bytes. Zero-length blocks are valid.
    pub payload_len: usize,
    /// Whether the payload is stored as-is (no decompression needed).
    pub uncompressed: bool,
}

impl MetaBlockHeader {
    pub const SIZE: usize = 2;

    pub fn parse(raw: u16) -> Result<Self, ParseError> {
        let payload_len = usize::from(raw & !UNCOMPRESSED_BIT);
        if payload_len > METADATA_BLOCK_SIZE {
            return Err(ParseError::InvalidField {
                field: "metadata_block_len",
                reason: "payload longer than 8192 bytes",
            });
        }
        Ok(Self {
            payload_len,
            uncompressed: raw & UNCOMPRESSED_BIT != 0,
        })
    }

    /// Encode back to the on-disk header word.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // payload_len validated <= 8192
    pub fn to_raw(self) -> u16 {
        let mut raw = self.payload_len as u16;
        if self.uncompressed {
            raw |= UNCOMPRESSED_BIT;
        }
        raw
    }
}
