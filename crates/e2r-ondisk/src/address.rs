#![forbid(unsafe_code)]
//! Inode number → byte offset resolution.

use crate::ext2::{Ext2GroupDesc, Ext2Superblock};
use e2r_types::{
    AddressError, BlockNumber, ByteOffset, GroupNumber, InodeNumber, inode_index_in_group,
    inode_to_group,
};
use serde::Serialize;

/// Where an inode record lives in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InodeLocation {
    pub group: GroupNumber,
    pub index_in_group: u32,
    /// Block holding the record.
    pub block: BlockNumber,
    /// Absolute byte offset of the record.
    pub offset: ByteOffset,
}

/// Locate the on-disk record for inode `ino`.
///
/// Addressable inodes are `2..inodes_count`. The owning group must exist in
/// both the superblock geometry and `groups`, and the record must land in a
/// block below `blocks_count`.
pub fn locate_inode(
    ino: InodeNumber,
    sb: &Ext2Superblock,
    groups: &[Ext2GroupDesc],
) -> Result<InodeLocation, AddressError> {
    if ino.0 <= InodeNumber::BAD_BLOCKS.0 {
        return Err(AddressError::ReservedInode(ino.0));
    }
    if ino.0 >= sb.inodes_count {
        return Err(AddressError::InodeOutOfRange {
            ino: ino.0,
            inodes_count: sb.inodes_count,
        });
    }

    let group = inode_to_group(ino, sb.inodes_per_group)
        .ok_or(AddressError::Overflow("inodes_per_group is zero"))?;
    let index_in_group = inode_index_in_group(ino, sb.inodes_per_group)
        .ok_or(AddressError::Overflow("inodes_per_group is zero"))?;

    let known_groups = u32::try_from(groups.len())
        .unwrap_or(u32::MAX)
        .min(sb.group_count());
    if group.0 >= known_groups {
        return Err(AddressError::GroupOutOfRange {
            group: group.0,
            group_count: known_groups,
        });
    }
    let desc = &groups[group.0 as usize];

    let table_start = sb
        .block_size
        .block_to_byte(BlockNumber(u64::from(desc.inode_table)))
        .ok_or(AddressError::Overflow("inode table byte offset"))?;
    let within_table = u64::from(index_in_group)
        .checked_mul(u64::from(sb.effective_inode_size()))
        .ok_or(AddressError::Overflow("inode offset within table"))?;
    let offset = table_start
        .checked_add(within_table)
        .ok_or(AddressError::Overflow("inode byte offset"))?;

    let block = offset >> sb.block_size.shift();
    if block >= u64::from(sb.blocks_count) {
        return Err(AddressError::BlockOutOfRange {
            block,
            blocks_count: u64::from(sb.blocks_count),
        });
    }

    Ok(InodeLocation {
        group,
        index_in_group,
        block: BlockNumber(block),
        offset: ByteOffset(offset),
    })
}

/// Byte offset of inode `ino`'s record. See [`locate_inode`].
pub fn resolve_inode_offset(
    ino: InodeNumber,
    sb: &Ext2Superblock,
    groups: &[Ext2GroupDesc],
) -> Result<ByteOffset, AddressError> {
    locate_inode(ino, sb, groups).map(|loc| loc.offset)
}
