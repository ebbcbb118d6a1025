#![forbid(unsafe_code)]
//! Read-only ext2 image session.
//!
//! [`Ext2Image`] owns the byte source, the decoded superblock and the group
//! descriptor table. Inodes are re-read from the image on every request;
//! data blocks go through an optional LRU cache. File and directory data are
//! reached through the lazy [`BlockWalk`].

pub mod walk;

use e2r_block::{
    BlockDevice, ByteBlockDevice, ByteDevice, FileByteDevice, LruBlockCache, MemoryByteDevice,
    read_ext2_superblock_region, read_group_desc_region,
};
use e2r_ondisk::{Ext2DirEntry, parse_dir_block, parse_group_desc_table};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace, warn};

pub use e2r_block::{BlockBuf, CacheStats};
pub use e2r_error::{E2rError, ErrorClass, Result};
pub use e2r_ondisk::{
    Ext2GroupDesc, Ext2IncompatFeatures, Ext2Inode, Ext2Superblock, FileKind, InodeLocation,
};
pub use e2r_types::{AddressError, BlockNumber, ByteOffset, GroupNumber, InodeNumber, ParseError};
pub use walk::{BlockWalk, DataBlock, slot_depth};

// ── Error mapping ───────────────────────────────────────────────────────────

/// Map a decoder error onto the runtime taxonomy.
#[must_use]
pub fn parse_error_to_e2r(e: &ParseError) -> E2rError {
    match e {
        ParseError::InvalidField { field, reason } => {
            if field.contains("feature") {
                E2rError::UnsupportedFeature(format!("{field}: {reason}"))
            } else if field.contains("block_size")
                || field.contains("blocks_per_group")
                || field.contains("inodes_per_group")
                || field.contains("inode_size")
                || field.contains("blocks_count")
                || field.contains("inodes_count")
            {
                E2rError::InvalidGeometry(format!("{field}: {reason}"))
            } else {
                E2rError::Format(e.to_string())
            }
        }
        ParseError::InvalidMagic { .. }
        | ParseError::InsufficientData { .. }
        | ParseError::IntegerConversion { .. } => E2rError::Format(e.to_string()),
    }
}

#[must_use]
pub fn address_error_to_e2r(e: &AddressError) -> E2rError {
    E2rError::Address(e.to_string())
}

fn validation_error(sb: &Ext2Superblock, e: &ParseError) -> E2rError {
    if let ParseError::InvalidField {
        field: "feature_incompat",
        ..
    } = e
    {
        return E2rError::UnsupportedFeature(format!(
            "incompatible features: {}",
            sb.feature_incompat.describe_unsupported().join(", ")
        ));
    }
    parse_error_to_e2r(e)
}

fn to_usize(value: u64, field: &'static str) -> Result<usize> {
    e2r_types::u64_to_usize(value, field).map_err(|e| parse_error_to_e2r(&e))
}

// ── Options & geometry ──────────────────────────────────────────────────────

pub const DEFAULT_CACHE_BLOCKS: usize = 256;

/// Options controlling how an image is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Skip geometry and feature checks.
    pub skip_validation: bool,
    /// Blocks kept by the read-through cache; 0 disables it.
    pub cache_blocks: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            skip_validation: false,
            cache_blocks: DEFAULT_CACHE_BLOCKS,
        }
    }
}

/// Filesystem geometry derived once at open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ext2Geometry {
    pub block_size: u32,
    pub blocks_count: u32,
    pub inodes_count: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub inode_size: u32,
    pub group_count: u32,
    pub first_data_block: u32,
    pub first_ino: u32,
    pub rev_level: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub volume_name: String,
}

impl Ext2Geometry {
    #[must_use]
    pub fn from_superblock(sb: &Ext2Superblock) -> Self {
        Self {
            block_size: sb.block_size.get(),
            blocks_count: sb.blocks_count,
            inodes_count: sb.inodes_count,
            blocks_per_group: sb.blocks_per_group,
            inodes_per_group: sb.inodes_per_group,
            inode_size: sb.effective_inode_size(),
            group_count: sb.group_count(),
            first_data_block: sb.first_data_block,
            first_ino: sb.first_ino,
            rev_level: sb.rev_level,
            free_blocks_count: sb.free_blocks_count,
            free_inodes_count: sb.free_inodes_count,
            volume_name: sb.volume_name(),
        }
    }
}

// ── Directory entries & content ─────────────────────────────────────────────

/// A directory record together with the inode it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub inode_number: InodeNumber,
    pub record_length: u16,
    pub name: String,
    pub inode: Ext2Inode,
}

impl DirectoryEntry {
    /// `perms links owner group size mtime name`, mtime in epoch seconds.
    #[must_use]
    pub fn listing_line(&self) -> String {
        format!(
            "{} {} {} {} {} {} {}",
            self.inode.permission_string(),
            self.inode.links_count,
            self.inode.owner_name(),
            self.inode.group_name(),
            self.inode.size,
            self.inode.mtime,
            self.name
        )
    }

    #[must_use]
    pub fn mtime(&self) -> SystemTime {
        self.inode.mtime_system_time()
    }
}

/// What an inode's data blocks hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeContent {
    Directory(Vec<DirectoryEntry>),
    FileContent(Vec<u8>),
}

/// Flattened inode metadata for `stat`-style reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeStat {
    pub ino: InodeNumber,
    pub kind: FileKind,
    pub permissions: String,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub owner: String,
    pub group: String,
    pub size: u64,
    pub links: u16,
    pub blocks: u32,
    pub flags: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    pub block_pointers: Vec<u32>,
}

impl InodeStat {
    #[must_use]
    pub fn from_inode(ino: InodeNumber, inode: &Ext2Inode) -> Self {
        Self {
            ino,
            kind: inode.kind(),
            permissions: inode.permission_string(),
            mode: inode.mode,
            uid: inode.full_uid(),
            gid: inode.full_gid(),
            owner: inode.owner_name().to_owned(),
            group: inode.group_name().to_owned(),
            size: inode.size,
            links: inode.links_count,
            blocks: inode.blocks,
            flags: inode.flags,
            atime: inode.atime,
            ctime: inode.ctime,
            mtime: inode.mtime,
            dtime: inode.dtime,
            block_pointers: inode.block.to_vec(),
        }
    }
}

// ── Block source ────────────────────────────────────────────────────────────

type ImageBlocks = ByteBlockDevice<Arc<dyn ByteDevice>>;

enum BlockSource {
    Direct(ImageBlocks),
    Cached(LruBlockCache<ImageBlocks>),
}

impl BlockDevice for BlockSource {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        match self {
            Self::Direct(dev) => dev.read_block(block),
            Self::Cached(cache) => cache.read_block(block),
        }
    }

    fn block_size(&self) -> u32 {
        match self {
            Self::Direct(dev) => dev.block_size(),
            Self::Cached(cache) => cache.block_size(),
        }
    }

    fn block_count(&self) -> u64 {
        match self {
            Self::Direct(dev) => dev.block_count(),
            Self::Cached(cache) => cache.block_count(),
        }
    }
}

// ── Image session ───────────────────────────────────────────────────────────

/// An opened ext2 image.
pub struct Ext2Image {
    dev: Arc<dyn ByteDevice>,
    blocks: BlockSource,
    superblock: Ext2Superblock,
    groups: Vec<Ext2GroupDesc>,
    geometry: Ext2Geometry,
}

impl std::fmt::Debug for Ext2Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ext2Image")
            .field("geometry", &self.geometry)
            .field("groups", &self.groups.len())
            .field("cached", &matches!(self.blocks, BlockSource::Cached(_)))
            .field("dev_len", &self.dev.len_bytes())
            .finish()
    }
}

impl Ext2Image {
    /// Open an image file with default options (validation enabled).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, &OpenOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        let dev = FileByteDevice::open(path.as_ref())?;
        Self::from_device(Box::new(dev), options)
    }

    /// Open an image held in memory.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, options: &OpenOptions) -> Result<Self> {
        Self::from_device(Box::new(MemoryByteDevice::new(bytes)), options)
    }

    /// Open an image from an already-opened device.
    pub fn from_device(dev: Box<dyn ByteDevice>, options: &OpenOptions) -> Result<Self> {
        let dev: Arc<dyn ByteDevice> = Arc::from(dev);

        let region = read_ext2_superblock_region(&*dev)?;
        let superblock =
            Ext2Superblock::parse_superblock_region(&region).map_err(|e| parse_error_to_e2r(&e))?;

        if options.skip_validation {
            warn!(
                blocks_per_group = superblock.blocks_per_group,
                inodes_per_group = superblock.inodes_per_group,
                feature_incompat = superblock.feature_incompat.0,
                "superblock validation skipped"
            );
        } else {
            superblock
                .validate()
                .map_err(|e| validation_error(&superblock, &e))?;
        }

        let block_size = superblock.block_size.get();
        let group_count = superblock.group_count();
        let gdt = read_group_desc_region(&*dev, block_size, group_count)?;
        let groups = parse_group_desc_table(&gdt, group_count).map_err(|e| parse_error_to_e2r(&e))?;

        let direct = ByteBlockDevice::new(Arc::clone(&dev), block_size)?;
        let blocks = if options.cache_blocks == 0 {
            BlockSource::Direct(direct)
        } else {
            BlockSource::Cached(LruBlockCache::new(direct, options.cache_blocks)?)
        };

        let geometry = Ext2Geometry::from_superblock(&superblock);
        debug!(
            block_size,
            blocks_count = geometry.blocks_count,
            inodes_count = geometry.inodes_count,
            group_count,
            inode_size = geometry.inode_size,
            volume = %geometry.volume_name,
            cache_blocks = options.cache_blocks,
            "opened ext2 image"
        );

        Ok(Self {
            dev,
            blocks,
            superblock,
            groups,
            geometry,
        })
    }

    // ── Accessors ─────────────────────────────────────────────────────

    #[must_use]
    pub fn superblock(&self) -> &Ext2Superblock {
        &self.superblock
    }

    #[must_use]
    pub fn geometry(&self) -> &Ext2Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn group_descs(&self) -> &[Ext2GroupDesc] {
        &self.groups
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.geometry.block_size
    }

    /// Cache counters, or `None` when the cache is disabled.
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        match &self.blocks {
            BlockSource::Direct(_) => None,
            BlockSource::Cached(cache) => Some(cache.stats()),
        }
    }

    // ── Blocks & inodes ───────────────────────────────────────────────

    /// Read one filesystem block.
    pub fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        let blocks_count = u64::from(self.superblock.blocks_count);
        if block.0 >= blocks_count {
            return Err(address_error_to_e2r(&AddressError::BlockOutOfRange {
                block: block.0,
                blocks_count,
            }));
        }
        self.blocks.read_block(block)
    }

    pub fn locate_inode(&self, ino: InodeNumber) -> Result<InodeLocation> {
        e2r_ondisk::locate_inode(ino, &self.superblock, &self.groups)
            .map_err(|e| address_error_to_e2r(&e))
    }

    /// Absolute byte offset of an inode record.
    pub fn inode_offset(&self, ino: InodeNumber) -> Result<ByteOffset> {
        self.locate_inode(ino).map(|loc| loc.offset)
    }

    /// Read and decode an inode. Never cached.
    pub fn read_inode(&self, ino: InodeNumber) -> Result<Ext2Inode> {
        let loc = self.locate_inode(ino)?;
        let len = to_usize(u64::from(self.superblock.effective_inode_size()), "inode_size")?;
        let raw = self.dev.read_at(loc.offset, len)?;
        trace!(ino = ino.0, group = loc.group.0, offset = loc.offset.0, "read inode");
        Ext2Inode::parse_from_bytes(&raw).map_err(|e| parse_error_to_e2r(&e))
    }

    #[must_use]
    pub fn walk(&self, inode: &Ext2Inode) -> BlockWalk<'_> {
        BlockWalk::new(
            &self.blocks,
            u64::from(self.superblock.blocks_count),
            &inode.block,
        )
    }

    // ── Directories ───────────────────────────────────────────────────

    fn resolve_entry(&self, raw: &Ext2DirEntry) -> Result<DirectoryEntry> {
        let inode_number = InodeNumber(raw.inode);
        let inode = self.read_inode(inode_number)?;
        Ok(DirectoryEntry {
            inode_number,
            record_length: raw.rec_len,
            name: raw.name_str(),
            inode,
        })
    }

    /// Parse one directory data block and resolve every live entry's inode.
    pub fn parse_directory_block(&self, block: &[u8]) -> Result<Vec<DirectoryEntry>> {
        let raw = parse_dir_block(block).map_err(|e| parse_error_to_e2r(&e))?;
        trace!(entries = raw.len(), "parsed directory block");
        raw.iter().map(|entry| self.resolve_entry(entry)).collect()
    }

    fn directory_entries(&self, dir: &Ext2Inode) -> Result<Vec<DirectoryEntry>> {
        let mut entries = Vec::new();
        for data in self.walk(dir) {
            let data = data?;
            entries.extend(self.parse_directory_block(data.bytes.as_slice())?);
        }
        Ok(entries)
    }

    /// Entries of directory `ino` in on-disk order.
    pub fn read_dir(&self, ino: InodeNumber) -> Result<Vec<DirectoryEntry>> {
        let inode = self.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(E2rError::NotDirectory);
        }
        self.directory_entries(&inode)
    }

    fn lookup_in(&self, dir: &Ext2Inode, name: &str) -> Result<DirectoryEntry> {
        if !dir.is_dir() {
            return Err(E2rError::NotDirectory);
        }
        for data in self.walk(dir) {
            let data = data?;
            let raw = parse_dir_block(data.bytes.as_slice()).map_err(|e| parse_error_to_e2r(&e))?;
            if let Some(hit) = raw.iter().find(|entry| entry.name == name.as_bytes()) {
                return self.resolve_entry(hit);
            }
        }
        Err(E2rError::NotFound(name.to_owned()))
    }

    /// Find `name` in directory `dir`.
    pub fn lookup(&self, dir: InodeNumber, name: &str) -> Result<DirectoryEntry> {
        let inode = self.read_inode(dir)?;
        self.lookup_in(&inode, name)
    }

    /// Resolve a path from the root directory.
    pub fn resolve_path(&self, path: &str) -> Result<(InodeNumber, Ext2Inode)> {
        self.resolve_path_from(InodeNumber::ROOT, path)
    }

    /// Resolve `path` relative to directory `start`.
    ///
    /// A leading `/` restarts at the root. `.` and `..` follow the entries
    /// stored in each directory.
    pub fn resolve_path_from(
        &self,
        start: InodeNumber,
        path: &str,
    ) -> Result<(InodeNumber, Ext2Inode)> {
        let mut current_ino = if path.starts_with('/') {
            InodeNumber::ROOT
        } else {
            start
        };
        let mut current = self.read_inode(current_ino)?;

        for component in path.split('/').filter(|c| !c.is_empty()) {
            let entry = self.lookup_in(&current, component)?;
            current_ino = entry.inode_number;
            current = entry.inode;
        }

        Ok((current_ino, current))
    }

    // ── File data ─────────────────────────────────────────────────────

    /// Bytes `[offset, offset + len)` of the walked data, clipped to size.
    fn file_bytes(&self, inode: &Ext2Inode, offset: u64, len: u64) -> Result<Vec<u8>> {
        let end = offset.saturating_add(len).min(inode.size);
        if offset >= end {
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(to_usize(end - offset, "read length")?);

        let mut pos = 0_u64;
        for data in self.walk(inode) {
            let data = data?;
            let bytes = data.bytes.as_slice();
            let block_end = pos + bytes.len() as u64;
            if block_end > offset {
                let from = to_usize(offset.saturating_sub(pos), "block offset")?;
                let to = to_usize((end - pos).min(bytes.len() as u64), "block offset")?;
                out.extend_from_slice(&bytes[from..to]);
            }
            pos = block_end;
            if pos >= end {
                break;
            }
        }
        Ok(out)
    }

    /// Decode what an inode's blocks hold.
    ///
    /// Regular files yield their bytes truncated to the inode size and
    /// directories their resolved entries. Any other type is
    /// `NotDirectory`.
    pub fn content_of(&self, inode: &Ext2Inode) -> Result<InodeContent> {
        match inode.kind() {
            FileKind::Regular => Ok(InodeContent::FileContent(self.file_bytes(
                inode,
                0,
                inode.size,
            )?)),
            FileKind::Directory => Ok(InodeContent::Directory(self.directory_entries(inode)?)),
            _ => Err(E2rError::NotDirectory),
        }
    }

    pub fn read_content(&self, ino: InodeNumber) -> Result<InodeContent> {
        let inode = self.read_inode(ino)?;
        self.content_of(&inode)
    }

    /// Whole contents of a regular file.
    pub fn read_file(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        let inode = self.read_inode(ino)?;
        if inode.is_dir() {
            return Err(E2rError::IsDirectory);
        }
        match self.content_of(&inode)? {
            InodeContent::FileContent(bytes) => Ok(bytes),
            InodeContent::Directory(_) => Err(E2rError::IsDirectory),
        }
    }

    /// `len` bytes of a regular file starting at `offset`, clipped to size.
    pub fn read_file_range(&self, ino: InodeNumber, offset: u64, len: u64) -> Result<Vec<u8>> {
        let inode = self.read_inode(ino)?;
        match inode.kind() {
            FileKind::Regular => self.file_bytes(&inode, offset, len),
            FileKind::Directory => Err(E2rError::IsDirectory),
            _ => Err(E2rError::NotDirectory),
        }
    }

    /// Target of a symbolic link.
    pub fn read_symlink(&self, ino: InodeNumber) -> Result<Vec<u8>> {
        let inode = self.read_inode(ino)?;
        if !inode.is_symlink() {
            return Err(E2rError::NotSymlink);
        }
        if let Some(target) = inode.fast_symlink_target(self.superblock.block_size) {
            return Ok(target);
        }
        self.file_bytes(&inode, 0, inode.size)
    }

    pub fn stat(&self, ino: InodeNumber) -> Result<InodeStat> {
        let inode = self.read_inode(ino)?;
        Ok(InodeStat::from_inode(ino, &inode))
    }
}
