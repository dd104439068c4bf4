#![forbid(unsafe_code)]
//! Error types for the sqfs decoder.
//!
//! Defines `SqfsError` and a `Result<T>` alias used throughout the
//! workspace. Slice-level `ParseError`s fold into `BadMagic` or `Corrupt`
//! at this boundary.

use sqfs_types::ParseError;
use thiserror::Error;

/// Unified error type for all sqfs operations.
#[derive(Debug, Error)]
pub enum SqfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad superblock magic: {actual:#010x}")]
    BadMagic { actual: u32 },

    #[error("corrupt archive: {detail}")]
    Corrupt { detail: String },

    #[error("unsupported compression id {id}")]
    UnsupportedCompression { id: u16 },

    #[error("xz compressor options declare filters")]
    UnsupportedXzFilters,

    #[error("not a directory")]
    NotADirectory,

    #[error("not a regular file")]
    NotAFile,

    #[error("not a symlink")]
    NotASymlink,

    #[error("invalid path: {path:?}")]
    PathInvalid { path: String },

    #[error("path not found: {path:?}")]
    PathNotFound { path: String },
}

impl SqfsError {
    /// Shorthand for a `Corrupt` error with a formatted detail string.
    #[must_use]
    pub fn corrupt(detail: impl Into<String>) -> Self {
        Self::Corrupt {
            detail: detail.into(),
        }
    }
}

impl From<ParseError> for SqfsError {
    fn from(err: ParseError) -> Self {
        match err {
            #[allow(clippy::cast_possible_truncation)] // sqfs magics are 32-bit
            ParseError::InvalidMagic { actual, .. } => Self::BadMagic {
                actual: actual as u32,
            },
            other => Self::Corrupt {
                detail: other.to_string(),
            },
        }
    }
}

/// Result alias using `SqfsError`.
pub type Result<T> = std::result::Result<T, SqfsError>;
