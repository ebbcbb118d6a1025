#![allow(dead_code)]

//! In-memory ext2 image builder for integration tests.

pub const MTIME: u32 = 1_600_000_000;
pub const S_IFDIR: u16 = 0o040_000;
pub const S_IFREG: u16 = 0o100_000;
pub const S_IFLNK: u16 = 0o120_000;
pub const S_IFIFO: u16 = 0o010_000;

const INODE_SIZE: usize = 128;

pub struct ImageBuilder {
    data: Vec<u8>,
    block_size: usize,
    blocks_per_group: u32,
    inodes_per_group: u32,
    first_data_block: u32,
    tables: Vec<u32>,
    next_free: u32,
}

impl ImageBuilder {
    /// Single-group image.
    pub fn new(block_size: usize, blocks_count: u32, inodes_count: u32) -> Self {
        Self::with_groups(block_size, blocks_count, inodes_count, 1)
    }

    /// `group_count` groups; inodes are split evenly. Data blocks are only
    /// allocated in group 0.
    pub fn with_groups(
        block_size: usize,
        blocks_count: u32,
        inodes_count: u32,
        group_count: u32,
    ) -> Self {
        let bs32 = u32::try_from(block_size).expect("block size");
        let first_data_block = u32::from(block_size == 1024);
        let blocks_per_group = blocks_count.div_ceil(group_count);
        let inodes_per_group = inodes_count / group_count;
        let table_blocks = u32::try_from((inodes_per_group as usize * INODE_SIZE).div_ceil(block_size))
            .expect("table blocks");

        let gdt_block = first_data_block + 1;
        let mut tables = vec![gdt_block + 3];
        for g in 1..group_count {
            tables.push(first_data_block + g * blocks_per_group + 2);
        }

        let mut b = Self {
            data: vec![0_u8; block_size * blocks_count as usize],
            block_size,
            blocks_per_group,
            inodes_per_group,
            first_data_block,
            next_free: tables[0] + table_blocks,
            tables,
        };

        let log_block_size = bs32.trailing_zeros() - 10;
        b.put_u32(1024, inodes_count);
        b.put_u32(1024 + 0x04, blocks_count);
        b.put_u32(1024 + 0x14, first_data_block);
        b.put_u32(1024 + 0x18, log_block_size);
        b.put_u32(1024 + 0x20, blocks_per_group);
        b.put_u32(1024 + 0x28, inodes_per_group);
        b.put_u32(1024 + 0x2C, MTIME);
        b.put_u32(1024 + 0x30, MTIME);
        b.put_u16(1024 + 0x38, 0xEF53);
        b.put_u16(1024 + 0x3A, 1);
        b.put_u32(1024 + 0x4C, 1);
        b.put_u32(1024 + 0x54, 11);
        b.put_u16(1024 + 0x58, 128);
        b.put_u32(1024 + 0x60, 0x0002);
        b.data[1024 + 0x78..1024 + 0x78 + 8].copy_from_slice(b"e2r-test");

        let gdt = gdt_block as usize * block_size;
        for (g, table) in b.tables.clone().into_iter().enumerate() {
            let rec = gdt + g * 32;
            b.put_u32(rec, table - 2);
            b.put_u32(rec + 4, table - 1);
            b.put_u32(rec + 8, table);
        }
        b
    }

    fn put_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set_incompat(&mut self, bits: u32) {
        self.put_u32(1024 + 0x60, bits);
    }

    pub fn set_superblock_u32(&mut self, field_offset: usize, value: u32) {
        self.put_u32(1024 + field_offset, value);
    }

    pub fn alloc(&mut self) -> u32 {
        let block = self.next_free;
        assert!(
            block < self.first_data_block + self.blocks_per_group
                && (block as usize) < self.data.len() / self.block_size,
            "group 0 is full"
        );
        self.next_free += 1;
        block
    }

    pub fn write_block(&mut self, block: u32, bytes: &[u8]) {
        assert!(bytes.len() <= self.block_size);
        let start = block as usize * self.block_size;
        self.data[start..start + self.block_size].fill(0);
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_pointers(&mut self, block: u32, pointers: &[u32]) {
        let raw: Vec<u8> = pointers.iter().flat_map(|p| p.to_le_bytes()).collect();
        self.write_block(block, &raw);
    }

    pub fn inode_offset(&self, ino: u32) -> usize {
        let idx = ino - 1;
        let group = (idx / self.inodes_per_group) as usize;
        let within = (idx % self.inodes_per_group) as usize;
        self.tables[group] as usize * self.block_size + within * INODE_SIZE
    }

    #[allow(clippy::too_many_arguments)]
    pub fn write_inode(
        &mut self,
        ino: u32,
        mode: u16,
        uid: u16,
        gid: u16,
        links: u16,
        size: u64,
        sectors: u32,
        pointers: [u32; 15],
    ) {
        let off = self.inode_offset(ino);
        self.data[off..off + INODE_SIZE].fill(0);
        self.put_u16(off, mode);
        self.put_u16(off + 0x02, uid);
        self.put_u32(off + 0x04, (size & 0xFFFF_FFFF) as u32);
        self.put_u32(off + 0x08, MTIME);
        self.put_u32(off + 0x0C, MTIME);
        self.put_u32(off + 0x10, MTIME);
        self.put_u16(off + 0x18, gid);
        self.put_u16(off + 0x1A, links);
        self.put_u32(off + 0x1C, sectors);
        for (i, ptr) in pointers.iter().enumerate() {
            self.put_u32(off + 0x28 + i * 4, *ptr);
        }
        self.put_u32(off + 0x6C, (size >> 32) as u32);
    }

    /// Overwrite one block pointer of an existing inode.
    pub fn set_pointer(&mut self, ino: u32, slot: usize, block: u32) {
        let off = self.inode_offset(ino);
        self.put_u32(off + 0x28 + slot * 4, block);
    }

    /// Lay `content` out in fresh blocks and return the inode's pointers.
    pub fn store(&mut self, content: &[u8]) -> [u32; 15] {
        let ppb = self.block_size / 4;
        let data_blocks: Vec<u32> = content
            .chunks(self.block_size)
            .map(|chunk| {
                let block = self.alloc();
                self.write_block(block, chunk);
                block
            })
            .collect();

        let mut pointers = [0_u32; 15];
        let (direct, rest) = data_blocks.split_at(data_blocks.len().min(12));
        pointers[..direct.len()].copy_from_slice(direct);

        let (single, rest) = rest.split_at(rest.len().min(ppb));
        if !single.is_empty() {
            let ind = self.alloc();
            self.write_pointers(ind, single);
            pointers[12] = ind;
        }

        if !rest.is_empty() {
            assert!(rest.len() <= ppb * ppb, "triple indirection not needed");
            let children: Vec<u32> = rest
                .chunks(ppb)
                .map(|chunk| {
                    let ind = self.alloc();
                    self.write_pointers(ind, chunk);
                    ind
                })
                .collect();
            let dind = self.alloc();
            self.write_pointers(dind, &children);
            pointers[13] = dind;
        }
        pointers
    }

    fn sectors_for(&self, len: usize) -> u32 {
        u32::try_from(len.div_ceil(self.block_size) * (self.block_size / 512)).expect("sectors")
    }

    pub fn file(&mut self, ino: u32, perm: u16, uid: u16, gid: u16, content: &[u8]) {
        let pointers = self.store(content);
        let sectors = self.sectors_for(content.len());
        self.write_inode(
            ino,
            S_IFREG | perm,
            uid,
            gid,
            1,
            content.len() as u64,
            sectors,
            pointers,
        );
    }

    /// Directory with `.`, `..` and `children` in one block.
    pub fn dir(&mut self, ino: u32, parent: u32, perm: u16, children: &[(u32, &str)]) {
        let mut entries = vec![(ino, "."), (parent, "..")];
        entries.extend_from_slice(children);
        let block_bytes = dir_block(self.block_size, &entries);
        let block = self.alloc();
        self.write_block(block, &block_bytes);
        let mut pointers = [0_u32; 15];
        pointers[0] = block;
        let sectors = self.sectors_for(self.block_size);
        self.write_inode(
            ino,
            S_IFDIR | perm,
            0,
            0,
            2,
            self.block_size as u64,
            sectors,
            pointers,
        );
    }

    pub fn fast_symlink(&mut self, ino: u32, target: &str) {
        assert!(target.len() <= 60);
        let mut raw = [0_u8; 60];
        raw[..target.len()].copy_from_slice(target.as_bytes());
        let mut pointers = [0_u32; 15];
        for (slot, chunk) in pointers.iter_mut().zip(raw.chunks_exact(4)) {
            *slot = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        self.write_inode(
            ino,
            S_IFLNK | 0o777,
            0,
            0,
            1,
            target.len() as u64,
            0,
            pointers,
        );
    }

    pub fn slow_symlink(&mut self, ino: u32, target: &str) {
        let pointers = self.store(target.as_bytes());
        let sectors = self.sectors_for(target.len());
        self.write_inode(
            ino,
            S_IFLNK | 0o777,
            0,
            0,
            1,
            target.len() as u64,
            sectors,
            pointers,
        );
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

/// Pack `(inode, name)` records into one directory block; the last record
/// spans the rest of the block.
pub fn dir_block(block_size: usize, entries: &[(u32, &str)]) -> Vec<u8> {
    let mut block = vec![0_u8; block_size];
    let mut offset = 0_usize;
    for (i, (ino, name)) in entries.iter().enumerate() {
        let min_len = (8 + name.len()).next_multiple_of(4);
        let rec_len = if i + 1 == entries.len() {
            block_size - offset
        } else {
            min_len
        };
        block[offset..offset + 4].copy_from_slice(&ino.to_le_bytes());
        block[offset + 4..offset + 6]
            .copy_from_slice(&u16::try_from(rec_len).expect("rec_len").to_le_bytes());
        block[offset + 6] = u8::try_from(name.len()).expect("name_len");
        block[offset + 8..offset + 8 + name.len()].copy_from_slice(name.as_bytes());
        offset += rec_len;
    }
    block
}

pub const HELLO: &[u8] = b"Hello, ext2!\n";
pub const NOTES: &[u8] = b"remember the milk\n";
pub const BIG_BLOCKS: usize = 300;

pub const ROOT: u32 = 2;
pub const HELLO_INO: u32 = 12;
pub const DOCS_INO: u32 = 13;
pub const LINK_INO: u32 = 14;
pub const BIG_INO: u32 = 15;
pub const FIFO_INO: u32 = 16;
pub const NOTES_INO: u32 = 17;
pub const TMP_INO: u32 = 18;
pub const SLOW_LINK_INO: u32 = 19;

pub fn big_content() -> Vec<u8> {
    (0..BIG_BLOCKS * 1024)
        .map(|i| u8::try_from(i % 251).expect("u8"))
        .collect()
}

pub const LONG_TARGET: &str =
    "docs/a/very/long/path/that/does/not/fit/inline/in/the/block/pointer/area";

/// 1 KiB-block image used by most tests:
///
/// ```text
/// /            (2)
/// ├── hello.txt  (12)
/// ├── docs/      (13)
/// │   ├── notes.txt (17)
/// │   └── tmp/      (18, sticky)
/// ├── link -> docs/notes.txt (14, fast)
/// ├── far -> LONG_TARGET     (19, slow)
/// ├── big.bin    (15, reaches the doubly indirect block)
/// └── fifo       (16)
/// ```
pub fn sample_builder() -> ImageBuilder {
    let mut b = ImageBuilder::new(1024, 1024, 64);
    b.dir(
        ROOT,
        ROOT,
        0o755,
        &[
            (HELLO_INO, "hello.txt"),
            (DOCS_INO, "docs"),
            (LINK_INO, "link"),
            (SLOW_LINK_INO, "far"),
            (BIG_INO, "big.bin"),
            (FIFO_INO, "fifo"),
        ],
    );
    b.file(HELLO_INO, 0o644, 1000, 100, HELLO);
    b.dir(
        DOCS_INO,
        ROOT,
        0o755,
        &[(NOTES_INO, "notes.txt"), (TMP_INO, "tmp")],
    );
    b.file(NOTES_INO, 0o600, 0, 0, NOTES);
    b.dir(TMP_INO, DOCS_INO, 0o1777, &[]);
    b.fast_symlink(LINK_INO, "docs/notes.txt");
    b.slow_symlink(SLOW_LINK_INO, LONG_TARGET);
    b.file(BIG_INO, 0o644, 1000, 100, &big_content());
    b.write_inode(FIFO_INO, S_IFIFO | 0o644, 0, 0, 1, 0, 0, [0; 15]);
    b
}

pub fn sample_image() -> Vec<u8> {
    sample_builder().build()
}
