#![forbid(unsafe_code)]
//! Lazy traversal of an inode's block pointer tree.
//!
//! `i_block` holds 12 direct pointers followed by a singly, doubly and
//! triply indirect pointer. [`BlockWalk`] yields the data blocks they reach
//! in index order, depth first, reading one indirect block at a time. Zero
//! pointers are holes and are skipped at every level.

use e2r_block::{BlockBuf, BlockDevice};
use e2r_error::{E2rError, Result};
use e2r_types::{
    BlockNumber, EXT2_DIND_BLOCK, EXT2_IND_BLOCK, EXT2_MAX_INDIRECTION, EXT2_N_BLOCKS,
    EXT2_NDIR_BLOCKS, EXT2_TIND_BLOCK,
};
use std::iter::FusedIterator;
use tracing::{trace, warn};

/// Levels of indirection below `i_block[slot]` before data is reached.
///
/// Slots past the triply indirect pointer do not exist and report 0.
#[must_use]
pub fn slot_depth(slot: usize) -> u8 {
    match slot {
        EXT2_IND_BLOCK => 1,
        EXT2_DIND_BLOCK => 2,
        EXT2_TIND_BLOCK => EXT2_MAX_INDIRECTION,
        _ => 0,
    }
}

/// One data block reached by the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    pub block: BlockNumber,
    pub bytes: BlockBuf,
}

#[derive(Debug)]
struct Frame {
    pointers: Vec<u32>,
    next: usize,
    /// Indirection levels remaining below each pointer in this frame.
    depth: u8,
}

/// Iterator over the data blocks of one inode.
///
/// Yields `Err` at most once: a pointer outside `[0, blocks_count)` or a
/// failed device read ends the walk.
pub struct BlockWalk<'a> {
    dev: &'a dyn BlockDevice,
    blocks_count: u64,
    stack: Vec<Frame>,
}

impl<'a> BlockWalk<'a> {
    pub fn new(
        dev: &'a dyn BlockDevice,
        blocks_count: u64,
        pointers: &[u32; EXT2_N_BLOCKS],
    ) -> Self {
        // Pushed deepest first so the direct pointers are popped first.
        let mut stack = Vec::with_capacity(usize::from(EXT2_MAX_INDIRECTION) + 1);
        for slot in [EXT2_TIND_BLOCK, EXT2_DIND_BLOCK, EXT2_IND_BLOCK] {
            stack.push(Frame {
                pointers: vec![pointers[slot]],
                next: 0,
                depth: slot_depth(slot),
            });
        }
        stack.push(Frame {
            pointers: pointers[..EXT2_NDIR_BLOCKS].to_vec(),
            next: 0,
            depth: 0,
        });
        Self {
            dev,
            blocks_count,
            stack,
        }
    }

    fn fail(&mut self, err: E2rError) -> Option<Result<DataBlock>> {
        self.stack.clear();
        Some(Err(err))
    }
}

impl std::fmt::Debug for BlockWalk<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockWalk")
            .field("blocks_count", &self.blocks_count)
            .field("pending_frames", &self.stack.len())
            .finish_non_exhaustive()
    }
}

impl Iterator for BlockWalk<'_> {
    type Item = Result<DataBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(&ptr) = frame.pointers.get(frame.next) else {
                self.stack.pop();
                continue;
            };
            frame.next += 1;
            let depth = frame.depth;

            if ptr == 0 {
                continue;
            }
            let block = BlockNumber(u64::from(ptr));
            if block.0 >= self.blocks_count {
                warn!(
                    block = block.0,
                    blocks_count = self.blocks_count,
                    depth,
                    "block pointer outside filesystem"
                );
                return self.fail(E2rError::Corruption {
                    block: block.0,
                    detail: format!(
                        "block pointer beyond blocks_count {} at indirection depth {depth}",
                        self.blocks_count
                    ),
                });
            }

            let bytes = match self.dev.read_block(block) {
                Ok(bytes) => bytes,
                Err(err) => return self.fail(err),
            };

            if depth == 0 {
                return Some(Ok(DataBlock { block, bytes }));
            }

            let pointers: Vec<u32> = bytes
                .as_slice()
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            trace!(block = block.0, depth, "descend into indirect block");
            self.stack.push(Frame {
                pointers,
                next: 0,
                depth: depth - 1,
            });
        }
    }
}

impl FusedIterator for BlockWalk<'_> {}
