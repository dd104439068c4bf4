//! The indirect id and fragment tables.
//!
//! Both share one shape: fixed-size records packed into metadata blocks,
//! with a super-table of absolute metadata-block offsets stored at the
//! table's start offset. The id table is small and decoded eagerly at
//! open; fragment entries are looked up on demand.

use crate::metadata::{MetaCache, MetaReader};
use sqfs_block::ByteDevice;
use sqfs_compress::Compressor;
use sqfs_error::{Result, SqfsError};
use sqfs_ondisk::{FragmentEntry, Superblock, FRAGMENT_ENTRY_SIZE};
use sqfs_types::{
    ceil_div, u64_to_usize, FRAGMENTS_PER_METADATA_BLOCK, IDS_PER_METADATA_BLOCK,
};

/// Read a packed list of `count` little-endian u64 words at `start`.
fn read_u64_table(dev: &dyn ByteDevice, start: u64, count: usize) -> Result<Vec<u64>> {
    let mut raw = vec![0_u8; count * 8];
    dev.read_exact_at(start, &mut raw)?;
    Ok(raw
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes")))
        .collect())
}

/// Decode the full id table into a flat array of UID/GID values.
pub(crate) fn load_id_table(
    dev: &dyn ByteDevice,
    compressor: &Compressor,
    cache: &MetaCache,
    superblock: &Superblock,
) -> Result<Vec<u32>> {
    let id_count = u64::from(superblock.id_count);
    if id_count == 0 {
        return Ok(Vec::new());
    }

    let block_count = u64_to_usize(ceil_div(id_count, IDS_PER_METADATA_BLOCK), "id_blocks")?;
    let block_offsets = read_u64_table(dev, superblock.id_table_start, block_count)?;

    let mut ids = Vec::with_capacity(u64_to_usize(id_count, "id_count")?);
    let mut unread = id_count;
    for offset in block_offsets {
        let take = unread.min(IDS_PER_METADATA_BLOCK);
        let mut reader = MetaReader::new(dev, compressor, cache, offset);
        let raw = reader.read_vec(u64_to_usize(take * 4, "id_block_bytes")?)?;
        ids.extend(
            raw.chunks_exact(4)
                .map(|chunk| u32::from_le_bytes(chunk.try_into().expect("chunk is 4 bytes"))),
        );
        unread -= take;
    }
    Ok(ids)
}

/// Read the fragment super-table: one metadata-block offset per 512
/// fragment entries.
pub(crate) fn load_fragment_index(
    dev: &dyn ByteDevice,
    superblock: &Superblock,
) -> Result<Vec<u64>> {
    let fragment_count = u64::from(superblock.fragment_count);
    if fragment_count == 0 {
        return Ok(Vec::new());
    }
    let block_count = u64_to_usize(
        ceil_div(fragment_count, FRAGMENTS_PER_METADATA_BLOCK),
        "fragment_blocks",
    )?;
    read_u64_table(dev, superblock.fragment_table_start, block_count)
}

/// Look up fragment `index` in the two-level table.
pub(crate) fn fragment_entry(
    dev: &dyn ByteDevice,
    compressor: &Compressor,
    cache: &MetaCache,
    fragment_index: &[u64],
    fragment_count: u32,
    index: u32,
) -> Result<FragmentEntry> {
    if index >= fragment_count {
        return Err(SqfsError::corrupt(format!(
            "fragment index {index} out of range ({fragment_count} fragments)"
        )));
    }

    let block = u64::from(index) / FRAGMENTS_PER_METADATA_BLOCK;
    let slot = u64::from(index) % FRAGMENTS_PER_METADATA_BLOCK;
    let offset = *fragment_index
        .get(u64_to_usize(block, "fragment_block")?)
        .ok_or_else(|| SqfsError::corrupt("fragment super-table shorter than declared"))?;

    let mut reader = MetaReader::new(dev, compressor, cache, offset);
    reader.skip(u64_to_usize(slot, "fragment_slot")? * FRAGMENT_ENTRY_SIZE)?;
    let raw = reader.read_vec(FRAGMENT_ENTRY_SIZE)?;
    Ok(FragmentEntry::parse(&raw)?)
}

/// Fetch and decode a fragment block's full payload.
pub(crate) fn fragment_payload(
    dev: &dyn ByteDevice,
    compressor: &Compressor,
    entry: FragmentEntry,
    block_size: u32,
) -> Result<Vec<u8>> {
    let disk_len = u64_to_usize(u64::from(entry.size.disk_len()), "fragment_len")?;
    if disk_len > u64_to_usize(u64::from(block_size), "block_size")? {
        return Err(SqfsError::corrupt(format!(
            "fragment block at {} longer than block size ({disk_len} bytes)",
            entry.start
        )));
    }

    let mut raw = vec![0_u8; disk_len];
    dev.read_exact_at(entry.start, &mut raw)?;

    if entry.size.is_uncompressed() {
        return Ok(raw);
    }
    let payload = compressor.decompress(&raw, u64_to_usize(u64::from(block_size), "block_size")?)?;
    if payload.len() > block_size as usize {
        return Err(SqfsError::corrupt(format!(
            "fragment block at {} decompressed past block size",
            entry.start
        )));
    }
    Ok(payload)
}
