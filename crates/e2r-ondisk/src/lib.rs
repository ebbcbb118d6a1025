#![forbid(unsafe_code)]
//! On-disk format parsing for ext2 structures.
//!
//! Pure parsing crate with no I/O. Turns byte slices into typed superblock,
//! group descriptor, inode and directory records, and maps inode numbers to
//! byte offsets inside an image.

pub mod address;
pub mod ext2;

pub use address::{InodeLocation, locate_inode, resolve_inode_offset};
pub use ext2::{
    EXT2_DIR_ENTRY_HEADER, EXT2_INODE_RECORD_MIN, Ext2CompatFeatures, Ext2DirEntry,
    Ext2GroupDesc, Ext2IncompatFeatures, Ext2Inode, Ext2RoCompatFeatures, Ext2Superblock,
    FileKind, parse_dir_block, parse_group_desc_table,
};
