//! In-test archive image builder.
//!
//! Assembles byte-exact SquashFS 4.0 images from a declared tree so the
//! reader can be exercised against known content without shelling out to
//! mksquashfs. Supports raw storage (uncompressed flags everywhere) and
//! per-codec compressed storage for the codecs whose crates ship encoders.
#![allow(dead_code)] // each test binary uses a different slice of the builder

use std::io::Read;

pub const GZIP: u16 = 1;
pub const LZMA: u16 = 2;
pub const XZ: u16 = 4;
pub const LZ4: u16 = 5;
pub const ZSTD: u16 = 6;

const METADATA_CHUNK: usize = 8192;
const FRAGMENT_NONE: u32 = 0xFFFF_FFFF;
const UNCOMPRESSED_BLOCK_FLAG: u32 = 1 << 24;

/// One node of the tree to be archived.
pub enum TreeEntry {
    File {
        name: Vec<u8>,
        mode: u16,
        content: Vec<u8>,
        /// Store the final partial block in the shared fragment block.
        tail_in_fragment: bool,
    },
    Dir {
        name: Vec<u8>,
        mode: u16,
        children: Vec<TreeEntry>,
    },
    Symlink {
        name: Vec<u8>,
        target: Vec<u8>,
    },
}

impl TreeEntry {
    pub fn file(name: &str, content: &[u8]) -> Self {
        TreeEntry::File {
            name: name.as_bytes().to_vec(),
            mode: 0o644,
            content: content.to_vec(),
            tail_in_fragment: true,
        }
    }

    pub fn file_named(name: &[u8], content: &[u8]) -> Self {
        TreeEntry::File {
            name: name.to_vec(),
            mode: 0o644,
            content: content.to_vec(),
            tail_in_fragment: true,
        }
    }

    pub fn file_with_mode(name: &str, content: &[u8], mode: u16) -> Self {
        TreeEntry::File {
            name: name.as_bytes().to_vec(),
            mode,
            content: content.to_vec(),
            tail_in_fragment: true,
        }
    }

    pub fn file_whole_blocks(name: &str, content: &[u8]) -> Self {
        TreeEntry::File {
            name: name.as_bytes().to_vec(),
            mode: 0o644,
            content: content.to_vec(),
            tail_in_fragment: false,
        }
    }

    pub fn dir(name: &str, children: Vec<TreeEntry>) -> Self {
        TreeEntry::Dir {
            name: name.as_bytes().to_vec(),
            mode: 0o755,
            children,
        }
    }

    pub fn symlink(name: &str, target: &str) -> Self {
        TreeEntry::Symlink {
            name: name.as_bytes().to_vec(),
            target: target.as_bytes().to_vec(),
        }
    }

    fn name(&self) -> &[u8] {
        match self {
            TreeEntry::File { name, .. }
            | TreeEntry::Dir { name, .. }
            | TreeEntry::Symlink { name, .. } => name,
        }
    }
}

pub struct FixtureBuilder {
    block_size: u32,
    compression_id: u16,
    compress: bool,
    options_block: Option<Vec<u8>>,
    ids: Vec<u32>,
    uid_idx: u16,
    gid_idx: u16,
    mod_time: u32,
    children: Vec<TreeEntry>,
    /// Give fragment-only files a nonzero `blocks_start`, pinning the
    /// decoder to the block-count predicate instead of the legacy
    /// `blocks_start == 0` heuristic.
    nonzero_fragment_only_start: bool,
    pad_to_multiple: Option<usize>,
}

impl FixtureBuilder {
    pub fn new(block_size: u32) -> Self {
        Self {
            block_size,
            compression_id: GZIP,
            compress: false,
            options_block: None,
            ids: vec![0],
            uid_idx: 0,
            gid_idx: 0,
            mod_time: 1_650_000_000,
            children: Vec::new(),
            nonzero_fragment_only_start: false,
            pad_to_multiple: None,
        }
    }

    /// Compress data, fragments, and metadata with the given codec.
    pub fn compressed(mut self, compression_id: u16) -> Self {
        self.compression_id = compression_id;
        self.compress = true;
        self
    }

    /// Raw storage, but declare this compression id in the superblock.
    pub fn compression_id(mut self, compression_id: u16) -> Self {
        self.compression_id = compression_id;
        self
    }

    /// Append a compressor-options block and set the superblock flag.
    pub fn options_block(mut self, block: Vec<u8>) -> Self {
        self.options_block = Some(block);
        self
    }

    pub fn ids(mut self, ids: Vec<u32>) -> Self {
        self.ids = ids;
        self
    }

    pub fn owner_indices(mut self, uid_idx: u16, gid_idx: u16) -> Self {
        self.uid_idx = uid_idx;
        self.gid_idx = gid_idx;
        self
    }

    pub fn mod_time(mut self, mod_time: u32) -> Self {
        self.mod_time = mod_time;
        self
    }

    pub fn entries(mut self, children: Vec<TreeEntry>) -> Self {
        self.children = children;
        self
    }

    pub fn nonzero_fragment_only_start(mut self) -> Self {
        self.nonzero_fragment_only_start = true;
        self
    }

    /// Pad the final image with zeros, like mksquashfs pads to the device
    /// block size.
    pub fn padded_to(mut self, multiple: usize) -> Self {
        self.pad_to_multiple = Some(multiple);
        self
    }

    pub fn build(self) -> Vec<u8> {
        Assembler::run(self)
    }
}

struct ChildRecord {
    name: Vec<u8>,
    kind: u16,
    inode_block: u32,
    inode_intra: u16,
    inode_number: u32,
}

struct Assembler {
    cfg: FixtureBuilder,
    data_base: u64,
    data: Vec<u8>,
    inode_payload: Vec<u8>,
    dir_payload: Vec<u8>,
    fragment_block: Vec<u8>,
    uses_fragment: bool,
    next_inode_number: u32,
    inode_count: u32,
}

impl Assembler {
    fn run(cfg: FixtureBuilder) -> Vec<u8> {
        let options_len = cfg.options_block.as_ref().map_or(0, Vec::len);
        let mut this = Assembler {
            data_base: (96 + options_len) as u64,
            cfg,
            data: Vec::new(),
            inode_payload: Vec::new(),
            dir_payload: Vec::new(),
            fragment_block: Vec::new(),
            uses_fragment: false,
            next_inode_number: 1,
            inode_count: 0,
        };
        this.assemble()
    }

    fn compress_frame(&self, data: &[u8]) -> Vec<u8> {
        match self.cfg.compression_id {
            GZIP => {
                use flate2::write::ZlibEncoder;
                use flate2::Compression;
                use std::io::Write;
                let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
                enc.write_all(data).expect("zlib write");
                enc.finish().expect("zlib finish")
            }
            LZMA => {
                let opts = xz2::stream::LzmaOptions::new_preset(6).expect("lzma preset");
                let stream = xz2::stream::Stream::new_lzma_encoder(&opts).expect("lzma encoder");
                let mut out = Vec::new();
                xz2::bufread::XzEncoder::new_stream(data, stream)
                    .read_to_end(&mut out)
                    .expect("lzma compress");
                out
            }
            XZ => {
                let mut out = Vec::new();
                xz2::read::XzEncoder::new(data, 6)
                    .read_to_end(&mut out)
                    .expect("xz compress");
                out
            }
            LZ4 => lz4_flex::block::compress(data),
            ZSTD => zstd::stream::encode_all(data, 3).expect("zstd compress"),
            other => panic!("fixture builder: no encoder for compression id {other}"),
        }
    }

    /// Map a logical table offset to `(block_offset, intra_offset)`.
    ///
    /// Raw chunks have a fixed on-disk pitch of `2 + 8192`; compressed
    /// tables are restricted to a single chunk by `push_metadata`.
    #[allow(clippy::cast_possible_truncation)]
    fn meta_position(&self, logical: usize) -> (u32, u16) {
        if self.cfg.compress {
            (0, logical as u16)
        } else {
            let chunk = logical / METADATA_CHUNK;
            let intra = logical % METADATA_CHUNK;
            ((chunk * (METADATA_CHUNK + 2)) as u32, intra as u16)
        }
    }

    /// Append a table payload as a chain of metadata blocks.
    #[allow(clippy::cast_possible_truncation)]
    fn push_metadata(&self, image: &mut Vec<u8>, payload: &[u8]) {
        if self.cfg.compress {
            assert!(
                payload.len() <= METADATA_CHUNK,
                "fixture builder: compressed tables must fit one metadata block"
            );
        }
        for chunk in payload.chunks(METADATA_CHUNK) {
            if self.cfg.compress {
                let frame = self.compress_frame(chunk);
                if frame.len() < chunk.len() {
                    image.extend_from_slice(&(frame.len() as u16).to_le_bytes());
                    image.extend_from_slice(&frame);
                    continue;
                }
            }
            image.extend_from_slice(&(0x8000_u16 | chunk.len() as u16).to_le_bytes());
            image.extend_from_slice(chunk);
        }
    }

    /// Write one data block, returning its block-list word.
    #[allow(clippy::cast_possible_truncation)]
    fn push_data_block(&mut self, block: &[u8]) -> u32 {
        if block.iter().all(|&b| b == 0) {
            return 0; // sparse
        }
        if self.cfg.compress {
            let frame = self.compress_frame(block);
            if frame.len() < block.len() {
                self.data.extend_from_slice(&frame);
                return frame.len() as u32;
            }
        }
        self.data.extend_from_slice(block);
        UNCOMPRESSED_BLOCK_FLAG | block.len() as u32
    }

    fn push_inode_header(&mut self, kind: u16, mode: u16) -> (u32, u16, u32) {
        let (block, intra) = self.meta_position(self.inode_payload.len());
        let number = self.next_inode_number;
        self.next_inode_number += 1;
        self.inode_count += 1;

        self.inode_payload.extend_from_slice(&kind.to_le_bytes());
        self.inode_payload.extend_from_slice(&mode.to_le_bytes());
        self.inode_payload
            .extend_from_slice(&self.cfg.uid_idx.to_le_bytes());
        self.inode_payload
            .extend_from_slice(&self.cfg.gid_idx.to_le_bytes());
        self.inode_payload
            .extend_from_slice(&self.cfg.mod_time.to_le_bytes());
        self.inode_payload.extend_from_slice(&number.to_le_bytes());
        (block, intra, number)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_file(&mut self, mode: u16, content: &[u8], tail_in_fragment: bool) -> (u32, u16, u32) {
        let block_size = self.cfg.block_size as usize;
        let tail_len = content.len() % block_size;
        let fragment_tail = tail_in_fragment && tail_len != 0;
        let whole = content.len() - if fragment_tail { tail_len } else { 0 };

        let blocks_start_abs = self.data_base + self.data.len() as u64;
        let mut words = Vec::new();
        for block in content[..whole].chunks(block_size) {
            words.push(self.push_data_block(block));
        }

        let (fragment_index, fragment_offset) = if fragment_tail {
            self.uses_fragment = true;
            let offset = self.fragment_block.len() as u32;
            self.fragment_block.extend_from_slice(&content[whole..]);
            assert!(
                self.fragment_block.len() <= block_size,
                "fixture builder: fragment tails exceed one block"
            );
            (0_u32, offset)
        } else {
            (FRAGMENT_NONE, 0)
        };

        // mksquashfs writes 0 for fragment-only files; the divergence knob
        // points the field at the data cursor instead.
        let blocks_start = if words.is_empty() && !self.cfg.nonzero_fragment_only_start {
            0
        } else {
            blocks_start_abs as u32
        };

        let (block, intra, number) = self.push_inode_header(2, mode);
        self.inode_payload
            .extend_from_slice(&blocks_start.to_le_bytes());
        self.inode_payload
            .extend_from_slice(&fragment_index.to_le_bytes());
        self.inode_payload
            .extend_from_slice(&fragment_offset.to_le_bytes());
        self.inode_payload
            .extend_from_slice(&(content.len() as u32).to_le_bytes());
        for word in words {
            self.inode_payload.extend_from_slice(&word.to_le_bytes());
        }
        (block, intra, number)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_symlink(&mut self, target: &[u8]) -> (u32, u16, u32) {
        let (block, intra, number) = self.push_inode_header(3, 0o777);
        self.inode_payload.extend_from_slice(&1_u32.to_le_bytes());
        self.inode_payload
            .extend_from_slice(&(target.len() as u32).to_le_bytes());
        self.inode_payload.extend_from_slice(target);
        (block, intra, number)
    }

    /// Emit the listing for `records` into the directory table and return
    /// `(dir_block, dir_offset, dir_size)`.
    #[allow(clippy::cast_possible_truncation)]
    fn write_listing(&mut self, records: &[ChildRecord]) -> (u32, u16, u32) {
        let logical = self.dir_payload.len();
        let (dir_block, dir_offset) = self.meta_position(logical);

        // A fresh header per inode metadata block and per 256 entries,
        // the way mksquashfs emits them.
        let mut run_start = 0;
        while run_start < records.len() {
            let block = records[run_start].inode_block;
            let mut run_end = run_start;
            while run_end < records.len()
                && records[run_end].inode_block == block
                && run_end - run_start < 256
            {
                run_end += 1;
            }
            let run = &records[run_start..run_end];
            let base = run[0].inode_number;

            self.dir_payload
                .extend_from_slice(&((run.len() - 1) as u32).to_le_bytes());
            self.dir_payload.extend_from_slice(&block.to_le_bytes());
            self.dir_payload.extend_from_slice(&base.to_le_bytes());
            for record in run {
                let delta = (i64::from(record.inode_number) - i64::from(base)) as i16;
                self.dir_payload
                    .extend_from_slice(&record.inode_intra.to_le_bytes());
                self.dir_payload.extend_from_slice(&delta.to_le_bytes());
                self.dir_payload
                    .extend_from_slice(&record.kind.to_le_bytes());
                self.dir_payload
                    .extend_from_slice(&((record.name.len() - 1) as u16).to_le_bytes());
                self.dir_payload.extend_from_slice(&record.name);
            }
            run_start = run_end;
        }

        let size = (self.dir_payload.len() - logical + 3) as u32;
        (dir_block, dir_offset, size)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_dir(&mut self, mode: u16, children: Vec<TreeEntry>) -> (u32, u16, u32) {
        let records = self.write_children(children);
        let subdirs = records.iter().filter(|r| r.kind == 1).count() as u32;
        let (dir_block, dir_offset, dir_size) = self.write_listing(&records);

        assert!(dir_size <= u16::MAX as u32, "fixture builder: listing too big");
        let (block, intra, number) = self.push_inode_header(1, mode);
        self.inode_payload
            .extend_from_slice(&dir_block.to_le_bytes());
        self.inode_payload
            .extend_from_slice(&(2 + subdirs).to_le_bytes());
        self.inode_payload
            .extend_from_slice(&(dir_size as u16).to_le_bytes());
        self.inode_payload
            .extend_from_slice(&dir_offset.to_le_bytes());
        self.inode_payload.extend_from_slice(&number.to_le_bytes()); // parent, unread
        (block, intra, number)
    }

    fn write_children(&mut self, mut children: Vec<TreeEntry>) -> Vec<ChildRecord> {
        children.sort_by(|a, b| a.name().cmp(b.name()));
        let mut records = Vec::new();
        for child in children {
            let record = match child {
                TreeEntry::File {
                    name,
                    mode,
                    content,
                    tail_in_fragment,
                } => {
                    let (block, intra, number) = self.write_file(mode, &content, tail_in_fragment);
                    ChildRecord {
                        name,
                        kind: 2,
                        inode_block: block,
                        inode_intra: intra,
                        inode_number: number,
                    }
                }
                TreeEntry::Dir {
                    name,
                    mode,
                    children,
                } => {
                    let (block, intra, number) = self.write_dir(mode, children);
                    ChildRecord {
                        name,
                        kind: 1,
                        inode_block: block,
                        inode_intra: intra,
                        inode_number: number,
                    }
                }
                TreeEntry::Symlink { name, target } => {
                    let (block, intra, number) = self.write_symlink(&target);
                    ChildRecord {
                        name,
                        kind: 3,
                        inode_block: block,
                        inode_intra: intra,
                        inode_number: number,
                    }
                }
            };
            records.push(record);
        }
        records
    }

    #[allow(clippy::cast_possible_truncation)]
    fn assemble(&mut self) -> Vec<u8> {
        let children = std::mem::take(&mut self.cfg.children);
        let root_mode = 0o755;
        let (root_block, root_intra, _) = self.write_dir(root_mode, children);

        // Flush the shared fragment block into the data region.
        let fragment_entry = if self.uses_fragment {
            let start = self.data_base + self.data.len() as u64;
            let block = std::mem::take(&mut self.fragment_block);
            let word = if self.cfg.compress {
                let frame = self.compress_frame(&block);
                if frame.len() < block.len() {
                    self.data.extend_from_slice(&frame);
                    frame.len() as u32
                } else {
                    self.data.extend_from_slice(&block);
                    UNCOMPRESSED_BLOCK_FLAG | block.len() as u32
                }
            } else {
                self.data.extend_from_slice(&block);
                UNCOMPRESSED_BLOCK_FLAG | block.len() as u32
            };
            Some((start, word))
        } else {
            None
        };

        let mut image = vec![0_u8; 96];
        let mut flags = 0_u16;
        if let Some(options) = &self.cfg.options_block {
            flags |= 0x0400;
            image.extend_from_slice(options);
        }
        if !self.cfg.compress {
            // uncompressed inodes, data, fragments, ids
            flags |= 0x0001 | 0x0002 | 0x0008 | 0x0800;
        }
        image.extend_from_slice(&self.data);

        let inode_table_start = image.len() as u64;
        let inode_payload = std::mem::take(&mut self.inode_payload);
        self.push_metadata(&mut image, &inode_payload);

        let directory_table_start = image.len() as u64;
        let dir_payload = std::mem::take(&mut self.dir_payload);
        self.push_metadata(&mut image, &dir_payload);

        let fragment_count = u32::from(fragment_entry.is_some());
        let fragment_table_start = match fragment_entry {
            Some((start, word)) => {
                let meta_start = image.len() as u64;
                let mut record = Vec::new();
                record.extend_from_slice(&start.to_le_bytes());
                record.extend_from_slice(&word.to_le_bytes());
                record.extend_from_slice(&0_u32.to_le_bytes());
                self.push_metadata(&mut image, &record);

                let table_start = image.len() as u64;
                image.extend_from_slice(&meta_start.to_le_bytes());
                table_start
            }
            None => image.len() as u64,
        };

        let ids = self.cfg.ids.clone();
        let id_meta_start = image.len() as u64;
        let mut id_record = Vec::new();
        for id in &ids {
            id_record.extend_from_slice(&id.to_le_bytes());
        }
        self.push_metadata(&mut image, &id_record);
        let id_table_start = image.len() as u64;
        image.extend_from_slice(&id_meta_start.to_le_bytes());

        let bytes_used = image.len() as u64;

        // Superblock.
        let root_ref = (u64::from(root_block) << 16) | u64::from(root_intra);
        image[0x00..0x04].copy_from_slice(&0x7371_7368_u32.to_le_bytes());
        image[0x04..0x08].copy_from_slice(&self.inode_count.to_le_bytes());
        image[0x08..0x0C].copy_from_slice(&self.cfg.mod_time.to_le_bytes());
        image[0x0C..0x10].copy_from_slice(&self.cfg.block_size.to_le_bytes());
        image[0x10..0x14].copy_from_slice(&fragment_count.to_le_bytes());
        image[0x14..0x16].copy_from_slice(&self.cfg.compression_id.to_le_bytes());
        image[0x16..0x18]
            .copy_from_slice(&(self.cfg.block_size.trailing_zeros() as u16).to_le_bytes());
        image[0x18..0x1A].copy_from_slice(&flags.to_le_bytes());
        image[0x1A..0x1C].copy_from_slice(&(ids.len() as u16).to_le_bytes());
        image[0x1C..0x1E].copy_from_slice(&4_u16.to_le_bytes());
        image[0x1E..0x20].copy_from_slice(&0_u16.to_le_bytes());
        image[0x20..0x28].copy_from_slice(&root_ref.to_le_bytes());
        image[0x28..0x30].copy_from_slice(&bytes_used.to_le_bytes());
        image[0x30..0x38].copy_from_slice(&id_table_start.to_le_bytes());
        image[0x38..0x40].copy_from_slice(&u64::MAX.to_le_bytes()); // no xattr table
        image[0x40..0x48].copy_from_slice(&inode_table_start.to_le_bytes());
        image[0x48..0x50].copy_from_slice(&directory_table_start.to_le_bytes());
        image[0x50..0x58].copy_from_slice(&fragment_table_start.to_le_bytes());
        image[0x58..0x60].copy_from_slice(&u64::MAX.to_le_bytes()); // no export table

        if let Some(multiple) = self.cfg.pad_to_multiple {
            let rem = image.len() % multiple;
            if rem != 0 {
                image.resize(image.len() + multiple - rem, 0);
            }
        }
        image
    }
}
