#![forbid(unsafe_code)]
//! sqfs public API facade.
//!
//! Re-exports the reader from `sqfs-core` through a stable external
//! interface. This is the crate downstream consumers depend on.

pub use sqfs_core::*;
