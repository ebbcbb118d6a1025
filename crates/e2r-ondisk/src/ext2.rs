#![forbid(unsafe_code)]

use e2r_types::{
    BlockSize, EXT2_FAST_SYMLINK_MAX, EXT2_GOOD_OLD_INODE_SIZE, EXT2_GOOD_OLD_REV,
    EXT2_GROUP_DESC_SIZE, EXT2_N_BLOCKS, EXT2_SUPER_MAGIC, EXT2_SUPERBLOCK_OFFSET,
    EXT2_SUPERBLOCK_SIZE, ParseError, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG,
    S_IFSOCK, S_IRGRP, S_IROTH, S_IRUSR, S_ISVTX, S_IWGRP, S_IWOTH, S_IWUSR, S_IXGRP, S_IXOTH,
    S_IXUSR, ensure_slice, read_fixed, read_le_u16, read_le_u32, read_u8, trim_nul_padded,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

// ── Feature flags ───────────────────────────────────────────────────────────

fn describe_bits(bits: u32, known: &[(u32, &'static str)]) -> Vec<&'static str> {
    known
        .iter()
        .filter(|(mask, _)| bits & mask != 0)
        .map(|(_, name)| *name)
        .collect()
}

fn unknown_bits(bits: u32, known: &[(u32, &'static str)]) -> u32 {
    let all = known.iter().fold(0_u32, |acc, (mask, _)| acc | mask);
    bits & !all
}

/// Compatible feature flags (`s_feature_compat`). Safe to ignore when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2CompatFeatures(pub u32);

impl Ext2CompatFeatures {
    pub const DIR_PREALLOC: Self = Self(0x0001);
    pub const IMAGIC_INODES: Self = Self(0x0002);
    pub const HAS_JOURNAL: Self = Self(0x0004);
    pub const EXT_ATTR: Self = Self(0x0008);
    pub const RESIZE_INODE: Self = Self(0x0010);
    pub const DIR_INDEX: Self = Self(0x0020);

    const KNOWN: &'static [(u32, &'static str)] = &[
        (0x0001, "DIR_PREALLOC"),
        (0x0002, "IMAGIC_INODES"),
        (0x0004, "HAS_JOURNAL"),
        (0x0008, "EXT_ATTR"),
        (0x0010, "RESIZE_INODE"),
        (0x0020, "DIR_INDEX"),
    ];

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_bits(self.0, Self::KNOWN)
    }
}

/// Incompatible feature flags (`s_feature_incompat`).
///
/// Only `FILETYPE` changes nothing a read-only ext2 walk depends on; every
/// other bit alters the layout of inodes, directories or the group table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2IncompatFeatures(pub u32);

impl Ext2IncompatFeatures {
    pub const COMPRESSION: Self = Self(0x0001);
    pub const FILETYPE: Self = Self(0x0002);
    pub const RECOVER: Self = Self(0x0004);
    pub const JOURNAL_DEV: Self = Self(0x0008);
    pub const META_BG: Self = Self(0x0010);
    pub const EXTENTS: Self = Self(0x0040);
    pub const BIT64: Self = Self(0x0080);
    pub const MMP: Self = Self(0x0100);
    pub const FLEX_BG: Self = Self(0x0200);
    pub const INLINE_DATA: Self = Self(0x8000);
    pub const ENCRYPT: Self = Self(0x1_0000);

    /// Bits a read-only ext2 decoder can open.
    pub const SUPPORTED: Self = Self(Self::FILETYPE.0);

    const KNOWN: &'static [(u32, &'static str)] = &[
        (0x0001, "COMPRESSION"),
        (0x0002, "FILETYPE"),
        (0x0004, "RECOVER"),
        (0x0008, "JOURNAL_DEV"),
        (0x0010, "META_BG"),
        (0x0040, "EXTENTS"),
        (0x0080, "64BIT"),
        (0x0100, "MMP"),
        (0x0200, "FLEX_BG"),
        (0x0400, "EA_INODE"),
        (0x1000, "DIRDATA"),
        (0x2000, "CSUM_SEED"),
        (0x4000, "LARGEDIR"),
        (0x8000, "INLINE_DATA"),
        (0x1_0000, "ENCRYPT"),
        (0x2_0000, "CASEFOLD"),
    ];

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_bits(self.0, Self::KNOWN)
    }

    /// Names of set flags outside [`Self::SUPPORTED`], unknown bits as hex.
    #[must_use]
    pub fn describe_unsupported(self) -> Vec<String> {
        let rejected = self.0 & !Self::SUPPORTED.0;
        let mut names: Vec<String> = describe_bits(rejected, Self::KNOWN)
            .into_iter()
            .map(str::to_owned)
            .collect();
        let unknown = unknown_bits(rejected, Self::KNOWN);
        if unknown != 0 {
            names.push(format!("0x{unknown:X}"));
        }
        names
    }
}

/// Read-only compatible feature flags (`s_feature_ro_compat`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2RoCompatFeatures(pub u32);

impl Ext2RoCompatFeatures {
    pub const SPARSE_SUPER: Self = Self(0x0001);
    pub const LARGE_FILE: Self = Self(0x0002);
    pub const BTREE_DIR: Self = Self(0x0004);

    const KNOWN: &'static [(u32, &'static str)] = &[
        (0x0001, "SPARSE_SUPER"),
        (0x0002, "LARGE_FILE"),
        (0x0004, "BTREE_DIR"),
        (0x0008, "HUGE_FILE"),
        (0x0010, "GDT_CSUM"),
        (0x0020, "DIR_NLINK"),
        (0x0040, "EXTRA_ISIZE"),
    ];

    #[must_use]
    pub fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    #[must_use]
    pub fn describe(self) -> Vec<&'static str> {
        describe_bits(self.0, Self::KNOWN)
    }
}

// ── Superblock ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    /// Raw `s_inode_size`; zero on revision 0 images.
    pub inode_size: u16,
    pub first_ino: u32,
    /// Derived from `log_block_size`.
    pub block_size: BlockSize,

    // ── Identity ─────────────────────────────────────────────────────────
    pub magic: u16,
    pub uuid: [u8; 16],
    /// Raw NUL-padded `s_volume_name`.
    pub volume_label: [u8; 16],

    // ── Revision & state ─────────────────────────────────────────────────
    pub rev_level: u32,
    pub state: u16,
    pub mtime: u32,
    pub wtime: u32,

    // ── Features ─────────────────────────────────────────────────────────
    pub feature_compat: Ext2CompatFeatures,
    pub feature_incompat: Ext2IncompatFeatures,
    pub feature_ro_compat: Ext2RoCompatFeatures,
}

mod sb_off {
    pub const INODES_COUNT: usize = 0x00;
    pub const BLOCKS_COUNT: usize = 0x04;
    pub const R_BLOCKS_COUNT: usize = 0x08;
    pub const FREE_BLOCKS_COUNT: usize = 0x0C;
    pub const FREE_INODES_COUNT: usize = 0x10;
    pub const FIRST_DATA_BLOCK: usize = 0x14;
    pub const LOG_BLOCK_SIZE: usize = 0x18;
    pub const BLOCKS_PER_GROUP: usize = 0x20;
    pub const INODES_PER_GROUP: usize = 0x28;
    pub const MTIME: usize = 0x2C;
    pub const WTIME: usize = 0x30;
    pub const MAGIC: usize = 0x38;
    pub const STATE: usize = 0x3A;
    pub const REV_LEVEL: usize = 0x4C;
    pub const FIRST_INO: usize = 0x54;
    pub const INODE_SIZE: usize = 0x58;
    pub const FEATURE_COMPAT: usize = 0x5C;
    pub const FEATURE_INCOMPAT: usize = 0x60;
    pub const FEATURE_RO_COMPAT: usize = 0x64;
    pub const UUID: usize = 0x68;
    pub const VOLUME_NAME: usize = 0x78;
}

fn put_u16(region: &mut [u8], offset: usize, value: u16) {
    region[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(region: &mut [u8], offset: usize, value: u32) {
    region[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

impl Ext2Superblock {
    /// Parse an ext2 superblock from a 1024-byte superblock region.
    pub fn parse_superblock_region(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }

        let magic = read_le_u16(region, sb_off::MAGIC)?;
        if magic != EXT2_SUPER_MAGIC {
            return Err(ParseError::InvalidMagic {
                expected: u64::from(EXT2_SUPER_MAGIC),
                actual: u64::from(magic),
            });
        }

        let log_block_size = read_le_u32(region, sb_off::LOG_BLOCK_SIZE)?;
        let block_size = BlockSize::from_log(log_block_size)?;

        Ok(Self {
            inodes_count: read_le_u32(region, sb_off::INODES_COUNT)?,
            blocks_count: read_le_u32(region, sb_off::BLOCKS_COUNT)?,
            reserved_blocks_count: read_le_u32(region, sb_off::R_BLOCKS_COUNT)?,
            free_blocks_count: read_le_u32(region, sb_off::FREE_BLOCKS_COUNT)?,
            free_inodes_count: read_le_u32(region, sb_off::FREE_INODES_COUNT)?,
            first_data_block: read_le_u32(region, sb_off::FIRST_DATA_BLOCK)?,
            log_block_size,
            blocks_per_group: read_le_u32(region, sb_off::BLOCKS_PER_GROUP)?,
            inodes_per_group: read_le_u32(region, sb_off::INODES_PER_GROUP)?,
            inode_size: read_le_u16(region, sb_off::INODE_SIZE)?,
            first_ino: read_le_u32(region, sb_off::FIRST_INO)?,
            block_size,

            magic,
            uuid: read_fixed::<16>(region, sb_off::UUID)?,
            volume_label: read_fixed::<16>(region, sb_off::VOLUME_NAME)?,

            rev_level: read_le_u32(region, sb_off::REV_LEVEL)?,
            state: read_le_u16(region, sb_off::STATE)?,
            mtime: read_le_u32(region, sb_off::MTIME)?,
            wtime: read_le_u32(region, sb_off::WTIME)?,

            feature_compat: Ext2CompatFeatures(read_le_u32(region, sb_off::FEATURE_COMPAT)?),
            feature_incompat: Ext2IncompatFeatures(read_le_u32(
                region,
                sb_off::FEATURE_INCOMPAT,
            )?),
            feature_ro_compat: Ext2RoCompatFeatures(read_le_u32(
                region,
                sb_off::FEATURE_RO_COMPAT,
            )?),
        })
    }

    /// Parse an ext2 superblock from a full disk image.
    pub fn parse_from_image(image: &[u8]) -> Result<Self, ParseError> {
        let region = ensure_slice(image, EXT2_SUPERBLOCK_OFFSET, EXT2_SUPERBLOCK_SIZE)?;
        Self::parse_superblock_region(region)
    }

    /// Write every decoded field back to its on-disk offset.
    ///
    /// Bytes the decoder does not read are left untouched.
    pub fn encode_into(&self, region: &mut [u8]) -> Result<(), ParseError> {
        if region.len() < EXT2_SUPERBLOCK_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_SUPERBLOCK_SIZE,
                offset: 0,
                actual: region.len(),
            });
        }
        put_u32(region, sb_off::INODES_COUNT, self.inodes_count);
        put_u32(region, sb_off::BLOCKS_COUNT, self.blocks_count);
        put_u32(region, sb_off::R_BLOCKS_COUNT, self.reserved_blocks_count);
        put_u32(region, sb_off::FREE_BLOCKS_COUNT, self.free_blocks_count);
        put_u32(region, sb_off::FREE_INODES_COUNT, self.free_inodes_count);
        put_u32(region, sb_off::FIRST_DATA_BLOCK, self.first_data_block);
        put_u32(region, sb_off::LOG_BLOCK_SIZE, self.log_block_size);
        put_u32(region, sb_off::BLOCKS_PER_GROUP, self.blocks_per_group);
        put_u32(region, sb_off::INODES_PER_GROUP, self.inodes_per_group);
        put_u32(region, sb_off::MTIME, self.mtime);
        put_u32(region, sb_off::WTIME, self.wtime);
        put_u16(region, sb_off::MAGIC, self.magic);
        put_u16(region, sb_off::STATE, self.state);
        put_u32(region, sb_off::REV_LEVEL, self.rev_level);
        put_u32(region, sb_off::FIRST_INO, self.first_ino);
        put_u16(region, sb_off::INODE_SIZE, self.inode_size);
        put_u32(region, sb_off::FEATURE_COMPAT, self.feature_compat.0);
        put_u32(region, sb_off::FEATURE_INCOMPAT, self.feature_incompat.0);
        put_u32(region, sb_off::FEATURE_RO_COMPAT, self.feature_ro_compat.0);
        region[sb_off::UUID..sb_off::UUID + 16].copy_from_slice(&self.uuid);
        region[sb_off::VOLUME_NAME..sb_off::VOLUME_NAME + 16].copy_from_slice(&self.volume_label);
        Ok(())
    }

    /// Volume label with NUL padding removed.
    #[must_use]
    pub fn volume_name(&self) -> String {
        trim_nul_padded(&self.volume_label)
    }

    /// Size of one on-disk inode record.
    #[must_use]
    pub fn effective_inode_size(&self) -> u32 {
        if self.rev_level == EXT2_GOOD_OLD_REV {
            u32::from(EXT2_GOOD_OLD_INODE_SIZE)
        } else {
            u32::from(self.inode_size)
        }
    }

    /// Number of block groups: `ceil(blocks_count / blocks_per_group)`.
    #[must_use]
    pub fn group_count(&self) -> u32 {
        e2r_types::group_count(self.blocks_count, self.blocks_per_group)
    }

    /// Check geometry and feature flags before the image is walked.
    pub fn validate(&self) -> Result<(), ParseError> {
        let bs = self.block_size.get();

        if self.blocks_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_blocks_per_group",
                reason: "cannot be zero",
            });
        }
        if self.blocks_per_group > bs.saturating_mul(8) {
            return Err(ParseError::InvalidField {
                field: "s_blocks_per_group",
                reason: "exceeds block_size * 8 (block bitmap capacity)",
            });
        }
        if self.inodes_per_group == 0 {
            return Err(ParseError::InvalidField {
                field: "s_inodes_per_group",
                reason: "cannot be zero",
            });
        }
        if self.inodes_per_group > bs.saturating_mul(8) {
            return Err(ParseError::InvalidField {
                field: "s_inodes_per_group",
                reason: "exceeds block_size * 8 (inode bitmap capacity)",
            });
        }

        let inode_size = self.effective_inode_size();
        if inode_size < u32::from(EXT2_GOOD_OLD_INODE_SIZE) || !inode_size.is_power_of_two() {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "must be a power of two >= 128",
            });
        }
        if inode_size > bs {
            return Err(ParseError::InvalidField {
                field: "s_inode_size",
                reason: "inode_size exceeds block_size",
            });
        }

        if self.blocks_count == 0 || self.first_data_block >= self.blocks_count {
            return Err(ParseError::InvalidField {
                field: "s_blocks_count",
                reason: "no data blocks after first_data_block",
            });
        }
        let max_inodes = u64::from(self.group_count()) * u64::from(self.inodes_per_group);
        if u64::from(self.inodes_count) > max_inodes {
            return Err(ParseError::InvalidField {
                field: "s_inodes_count",
                reason: "inodes_count exceeds groups * inodes_per_group",
            });
        }

        if self.feature_incompat.0 & !Ext2IncompatFeatures::SUPPORTED.0 != 0 {
            return Err(ParseError::InvalidField {
                field: "feature_incompat",
                reason: "unsupported incompatible features present",
            });
        }

        Ok(())
    }
}

// ── Group descriptors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2GroupDesc {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    /// First block of this group's inode table.
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub used_dirs_count: u16,
}

impl Ext2GroupDesc {
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_GROUP_DESC_SIZE {
            return Err(ParseError::InsufficientData {
                needed: EXT2_GROUP_DESC_SIZE,
                offset: 0,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            block_bitmap: read_le_u32(bytes, 0x00)?,
            inode_bitmap: read_le_u32(bytes, 0x04)?,
            inode_table: read_le_u32(bytes, 0x08)?,
            free_blocks_count: read_le_u16(bytes, 0x0C)?,
            free_inodes_count: read_le_u16(bytes, 0x0E)?,
            used_dirs_count: read_le_u16(bytes, 0x10)?,
        })
    }
}

/// Decode `group_count` contiguous 32-byte descriptors.
///
/// Fails with `InsufficientData` when `bytes` is shorter than
/// `group_count * 32`.
pub fn parse_group_desc_table(
    bytes: &[u8],
    group_count: u32,
) -> Result<Vec<Ext2GroupDesc>, ParseError> {
    let count = usize::try_from(group_count)
        .map_err(|_| ParseError::IntegerConversion {
            field: "group_count",
        })?;
    let needed = count
        .checked_mul(EXT2_GROUP_DESC_SIZE)
        .ok_or(ParseError::IntegerConversion {
            field: "group_count",
        })?;
    if bytes.len() < needed {
        return Err(ParseError::InsufficientData {
            needed,
            offset: 0,
            actual: bytes.len(),
        });
    }

    bytes[..needed]
        .chunks_exact(EXT2_GROUP_DESC_SIZE)
        .map(Ext2GroupDesc::parse_from_bytes)
        .collect()
}

// ── Inodes ──────────────────────────────────────────────────────────────────

/// File type, resolved from the mode bits in a fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    Socket,
    Symlink,
    Regular,
    BlockDevice,
    Directory,
    CharDevice,
    Fifo,
    Unknown,
}

impl FileKind {
    /// Checked first to last; the first type whose bits are all present wins.
    const PRIORITY: [(u16, Self); 7] = [
        (S_IFSOCK, Self::Socket),
        (S_IFLNK, Self::Symlink),
        (S_IFREG, Self::Regular),
        (S_IFBLK, Self::BlockDevice),
        (S_IFDIR, Self::Directory),
        (S_IFCHR, Self::CharDevice),
        (S_IFIFO, Self::Fifo),
    ];

    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        Self::PRIORITY
            .iter()
            .find(|(bits, _)| mode & bits == *bits)
            .map_or(Self::Unknown, |(_, kind)| *kind)
    }

    /// `ls`-style type character.
    #[must_use]
    pub fn type_char(self) -> char {
        match self {
            Self::Socket => 's',
            Self::Symlink => 'l',
            Self::Regular => '-',
            Self::BlockDevice => 'b',
            Self::Directory => 'd',
            Self::CharDevice => 'c',
            Self::Fifo => 'p',
            Self::Unknown => '?',
        }
    }
}

const PERMISSION_BITS: [(u16, char); 9] = [
    (S_IRUSR, 'r'),
    (S_IWUSR, 'w'),
    (S_IXUSR, 'x'),
    (S_IRGRP, 'r'),
    (S_IWGRP, 'w'),
    (S_IXGRP, 'x'),
    (S_IROTH, 'r'),
    (S_IWOTH, 'w'),
    (S_IXOTH, 'x'),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Inode {
    pub mode: u16,
    pub uid: u16,
    pub gid: u16,
    pub uid_high: u16,
    pub gid_high: u16,
    /// `i_size | i_size_high << 32`.
    pub size: u64,
    pub links_count: u16,
    /// Allocated 512-byte sectors.
    pub blocks: u32,
    pub flags: u32,
    pub generation: u32,
    pub file_acl: u32,

    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,

    /// `i_block`: 12 direct, then single, double and triple indirect.
    pub block: [u32; EXT2_N_BLOCKS],
}

/// Minimum inode record length this decoder reads.
pub const EXT2_INODE_RECORD_MIN: usize = EXT2_GOOD_OLD_INODE_SIZE as usize;

impl Ext2Inode {
    /// Parse an inode from its on-disk record (at least 128 bytes).
    pub fn parse_from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() < EXT2_INODE_RECORD_MIN {
            return Err(ParseError::InsufficientData {
                needed: EXT2_INODE_RECORD_MIN,
                offset: 0,
                actual: bytes.len(),
            });
        }

        let mut block = [0_u32; EXT2_N_BLOCKS];
        for (i, slot) in block.iter_mut().enumerate() {
            *slot = read_le_u32(bytes, 0x28 + i * 4)?;
        }

        let size_lo = u64::from(read_le_u32(bytes, 0x04)?);
        let size_hi = u64::from(read_le_u32(bytes, 0x6C)?);

        Ok(Self {
            mode: read_le_u16(bytes, 0x00)?,
            uid: read_le_u16(bytes, 0x02)?,
            gid: read_le_u16(bytes, 0x18)?,
            uid_high: read_le_u16(bytes, 0x78)?,
            gid_high: read_le_u16(bytes, 0x7A)?,
            size: size_lo | (size_hi << 32),
            links_count: read_le_u16(bytes, 0x1A)?,
            blocks: read_le_u32(bytes, 0x1C)?,
            flags: read_le_u32(bytes, 0x20)?,
            generation: read_le_u32(bytes, 0x64)?,
            file_acl: read_le_u32(bytes, 0x68)?,

            atime: read_le_u32(bytes, 0x08)?,
            ctime: read_le_u32(bytes, 0x0C)?,
            mtime: read_le_u32(bytes, 0x10)?,
            dtime: read_le_u32(bytes, 0x14)?,

            block,
        })
    }

    // ── File type detection ─────────────────────────────────────────────

    #[must_use]
    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    /// Whether the regular-file type matched.
    ///
    /// Callers use this to choose between file content and directory entries.
    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind() == FileKind::Regular
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Permission bits (lower 12 bits of mode).
    #[must_use]
    pub fn permission_bits(&self) -> u16 {
        self.mode & 0o7777
    }

    #[must_use]
    pub fn is_sticky(&self) -> bool {
        self.permission_bits() & S_ISVTX != 0
    }

    /// `ls -l` style mode string: type character, `rwxrwxrwx`, then `t` when
    /// the sticky bit is set (10 or 11 characters).
    #[must_use]
    pub fn permission_string(&self) -> String {
        let mut out = String::with_capacity(11);
        out.push(self.kind().type_char());
        let perms = self.permission_bits();
        for (bit, ch) in PERMISSION_BITS {
            out.push(if perms & bit != 0 { ch } else { '-' });
        }
        if self.is_sticky() {
            out.push('t');
        }
        out
    }

    // ── Ownership ───────────────────────────────────────────────────────

    #[must_use]
    pub fn full_uid(&self) -> u32 {
        u32::from(self.uid) | (u32::from(self.uid_high) << 16)
    }

    #[must_use]
    pub fn full_gid(&self) -> u32 {
        u32::from(self.gid) | (u32::from(self.gid_high) << 16)
    }

    /// `root` when the 16-bit `i_uid` is 0, `user` for anything else.
    /// `uid_high` does not take part.
    #[must_use]
    pub fn owner_name(&self) -> &'static str {
        if self.uid == 0 { "root" } else { "user" }
    }

    /// `root` when the 16-bit `i_gid` is 0, `staff` for anything else.
    #[must_use]
    pub fn group_name(&self) -> &'static str {
        if self.gid == 0 { "root" } else { "staff" }
    }

    // ── Timestamps ──────────────────────────────────────────────────────

    #[must_use]
    pub fn to_system_time(secs: u32) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(u64::from(secs))
    }

    #[must_use]
    pub fn mtime_system_time(&self) -> SystemTime {
        Self::to_system_time(self.mtime)
    }

    #[must_use]
    pub fn atime_system_time(&self) -> SystemTime {
        Self::to_system_time(self.atime)
    }

    #[must_use]
    pub fn ctime_system_time(&self) -> SystemTime {
        Self::to_system_time(self.ctime)
    }

    // ── Symlinks ────────────────────────────────────────────────────────

    /// Whether the link target lives inline in `i_block`.
    ///
    /// Fast symlinks own no data blocks other than an optional xattr block.
    #[must_use]
    pub fn is_fast_symlink(&self, block_size: BlockSize) -> bool {
        let acl_sectors = if self.file_acl == 0 {
            0
        } else {
            block_size.get() / 512
        };
        self.is_symlink()
            && self.blocks.saturating_sub(acl_sectors) == 0
            && self.size <= EXT2_FAST_SYMLINK_MAX as u64
    }

    /// The inline target of a fast symlink.
    #[must_use]
    pub fn fast_symlink_target(&self, block_size: BlockSize) -> Option<Vec<u8>> {
        if !self.is_fast_symlink(block_size) {
            return None;
        }
        let raw: Vec<u8> = self.block.iter().flat_map(|p| p.to_le_bytes()).collect();
        let len = usize::try_from(self.size).ok()?;
        Some(raw[..len].to_vec())
    }
}

// ── Directory entry parsing ─────────────────────────────────────────────────

/// Size of the fixed header preceding a directory entry name.
pub const EXT2_DIR_ENTRY_HEADER: usize = 8;

/// One raw directory record (`ext2_dir_entry_2`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2DirEntry {
    pub inode: u32,
    pub rec_len: u16,
    pub name_len: u8,
    /// Only meaningful with the `FILETYPE` feature.
    pub file_type: u8,
    pub name: Vec<u8>,
}

impl Ext2DirEntry {
    /// Return the name as a UTF-8 string (lossy).
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    #[must_use]
    pub fn is_dotdot(&self) -> bool {
        self.name == b".."
    }
}

/// Parse every live record of one directory data block.
///
/// `rec_len` is the stride to the next record. Zero, anything shorter than
/// the record header, or a stride that runs past the block is a format
/// error. Records with inode 0 are skipped.
pub fn parse_dir_block(block: &[u8]) -> Result<Vec<Ext2DirEntry>, ParseError> {
    let mut entries = Vec::new();
    let mut offset = 0_usize;

    while offset < block.len() {
        let header = ensure_slice(block, offset, EXT2_DIR_ENTRY_HEADER)?;
        let inode = read_le_u32(header, 0)?;
        let rec_len = read_le_u16(header, 4)?;
        let name_len = read_u8(header, 6)?;
        let file_type = read_u8(header, 7)?;

        if rec_len == 0 {
            return Err(ParseError::InvalidField {
                field: "de_rec_len",
                reason: "zero record length does not advance",
            });
        }
        if usize::from(rec_len) < EXT2_DIR_ENTRY_HEADER {
            return Err(ParseError::InvalidField {
                field: "de_rec_len",
                reason: "record length shorter than entry header",
            });
        }
        let entry_end = offset + usize::from(rec_len);
        if entry_end > block.len() {
            return Err(ParseError::InvalidField {
                field: "de_rec_len",
                reason: "directory entry extends past block boundary",
            });
        }

        if inode != 0 {
            let name_start = offset + EXT2_DIR_ENTRY_HEADER;
            let name_end = name_start + usize::from(name_len);
            if name_end > entry_end {
                return Err(ParseError::InvalidField {
                    field: "de_name_len",
                    reason: "name extends past rec_len",
                });
            }
            let raw = &block[name_start..name_end];
            let trimmed = raw.iter().rposition(|b| *b != 0).map_or(0, |last| last + 1);
            entries.push(Ext2DirEntry {
                inode,
                rec_len,
                name_len,
                file_type,
                name: raw[..trimmed].to_vec(),
            });
        }

        offset = entry_end;
    }

    Ok(entries)
}
