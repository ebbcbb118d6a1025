#![forbid(unsafe_code)]
//! Read-only image access.
//!
//! [`ByteDevice`] is the random-access byte source every decoder reads
//! from: a file ([`FileByteDevice`]) or an in-memory buffer
//! ([`MemoryByteDevice`]). [`BlockDevice`] layers block addressing on top,
//! and [`LruBlockCache`] adds an optional read-through cache keyed by block
//! number.
//!
//! Reads are exact: a request that cannot be satisfied in full fails with
//! `E2rError::Io` (`UnexpectedEof`), never a short buffer.

use e2r_error::{E2rError, Result};
use e2r_types::{
    BlockNumber, ByteOffset, EXT2_GDT_OFFSET_1K, EXT2_GROUP_DESC_SIZE, EXT2_SUPERBLOCK_OFFSET,
    EXT2_SUPERBLOCK_SIZE,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Owned block buffer.
///
/// Invariant: length == device block size for the originating device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBuf {
    bytes: Vec<u8>,
}

impl BlockBuf {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

/// Byte-addressed, read-only image source (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()>;

    /// Read `len` bytes starting at `offset` into a fresh buffer.
    fn read_at(&self, offset: ByteOffset, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0_u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

impl<T: ByteDevice + ?Sized> ByteDevice for Arc<T> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

impl<T: ByteDevice + ?Sized> ByteDevice for Box<T> {
    fn len_bytes(&self) -> u64 {
        (**self).len_bytes()
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

fn check_range(offset: ByteOffset, len: usize, device_len: u64) -> Result<()> {
    let len_u64 = u64::try_from(len)
        .map_err(|_| E2rError::Format("read length overflows u64".to_owned()))?;
    let end = offset
        .checked_add(len_u64)
        .ok_or_else(|| E2rError::Format("read range overflows u64".to_owned()))?;
    if end.0 > device_len {
        return Err(E2rError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("read out of bounds: offset={offset} len={len} image_len={device_len}"),
        )));
    }
    Ok(())
}

/// File-backed byte device using positional reads.
///
/// `FileExt::read_exact_at` does not share a seek position, so one handle
/// can serve concurrent readers.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset.0)?;
        Ok(())
    }
}

/// In-memory image, used for synthetic images and images already loaded.
#[derive(Debug, Clone)]
pub struct MemoryByteDevice {
    bytes: Arc<[u8]>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        u64::try_from(self.bytes.len()).unwrap_or(u64::MAX)
    }

    fn read_exact_at(&self, offset: ByteOffset, buf: &mut [u8]) -> Result<()> {
        check_range(offset, buf.len(), self.len_bytes())?;
        let start = usize::try_from(offset.0)
            .map_err(|_| E2rError::Format("offset does not fit usize".to_owned()))?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}

/// Block-addressed read interface.
pub trait BlockDevice: Send + Sync {
    /// Read a block by number.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf>;

    /// Device block size in bytes.
    fn block_size(&self) -> u32;

    /// Number of whole blocks the device can serve.
    fn block_count(&self) -> u64;
}

#[derive(Debug)]
pub struct ByteBlockDevice<D: ByteDevice> {
    inner: D,
    block_size: u32,
    block_count: u64,
}

impl<D: ByteDevice> ByteBlockDevice<D> {
    /// Wrap `inner` with `block_size` addressing.
    ///
    /// A trailing partial block is not addressable.
    pub fn new(inner: D, block_size: u32) -> Result<Self> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(E2rError::Format(format!(
                "invalid block_size={block_size} (must be power of two)"
            )));
        }
        let block_count = inner.len_bytes() / u64::from(block_size);
        Ok(Self {
            inner,
            block_size,
            block_count,
        })
    }
}

impl<D: ByteDevice> BlockDevice for ByteBlockDevice<D> {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        if block.0 >= self.block_count {
            return Err(E2rError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "block past end of image: block={} device_blocks={}",
                    block.0, self.block_count
                ),
            )));
        }

        let offset = block
            .0
            .checked_mul(u64::from(self.block_size))
            .ok_or_else(|| E2rError::Format("block offset overflow".to_owned()))?;
        let len = usize::try_from(self.block_size)
            .map_err(|_| E2rError::Format("block_size does not fit usize".to_owned()))?;
        let buf = self.inner.read_at(ByteOffset(offset), len)?;
        Ok(BlockBuf::new(buf))
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }
}

/// Read the ext2 superblock region (1024 bytes at offset 1024).
pub fn read_ext2_superblock_region(dev: &dyn ByteDevice) -> Result<[u8; EXT2_SUPERBLOCK_SIZE]> {
    let mut buf = [0_u8; EXT2_SUPERBLOCK_SIZE];
    let offset = u64::try_from(EXT2_SUPERBLOCK_OFFSET)
        .map_err(|_| E2rError::Format("superblock offset does not fit u64".to_owned()))?;
    dev.read_exact_at(ByteOffset(offset), &mut buf)?;
    Ok(buf)
}

/// Byte offset of the group descriptor table for a block size.
///
/// The table occupies the block after the superblock: byte 2048 on 1 KiB
/// images, block 1 otherwise.
#[must_use]
pub fn group_desc_table_offset(block_size: u32) -> ByteOffset {
    if block_size <= 1024 {
        ByteOffset(EXT2_GDT_OFFSET_1K)
    } else {
        ByteOffset(u64::from(block_size))
    }
}

/// Read the raw bytes of `group_count` contiguous group descriptors.
///
/// The read stops at the end of the image, so a truncated table comes back
/// short and the descriptor decoder reports the shortfall.
pub fn read_group_desc_region(
    dev: &dyn ByteDevice,
    block_size: u32,
    group_count: u32,
) -> Result<Vec<u8>> {
    let wanted = u64::from(group_count) * EXT2_GROUP_DESC_SIZE as u64;
    let offset = group_desc_table_offset(block_size);
    let available = dev.len_bytes().saturating_sub(offset.0);
    let len = usize::try_from(wanted.min(available))
        .map_err(|_| E2rError::Format("group descriptor table size overflow".to_owned()))?;
    dev.read_at(offset, len)
}

// ── Read-through block cache ────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LruState {
    capacity: usize,
    /// Monotonic use counter; the smallest live stamp is least recent.
    clock: u64,
    /// Recency index: stamp → block.
    order: BTreeMap<u64, BlockNumber>,
    resident: HashMap<BlockNumber, (u64, Vec<u8>)>,
    hits: u64,
    misses: u64,
}

impl LruState {
    fn next_stamp(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Cached bytes for `block`, marked most recently used. O(log n).
    fn get(&mut self, block: BlockNumber) -> Option<Vec<u8>> {
        let stamp = self.next_stamp();
        let (old, bytes) = self.resident.get_mut(&block)?;
        let previous = std::mem::replace(old, stamp);
        let bytes = bytes.clone();
        let _ = self.order.remove(&previous);
        self.order.insert(stamp, block);
        Some(bytes)
    }

    fn insert(&mut self, block: BlockNumber, bytes: Vec<u8>) {
        let stamp = self.next_stamp();
        if let Some((previous, _)) = self.resident.insert(block, (stamp, bytes)) {
            let _ = self.order.remove(&previous);
        }
        self.order.insert(stamp, block);
        while self.resident.len() > self.capacity {
            let Some((_, victim)) = self.order.pop_first() else {
                break;
            };
            let _ = self.resident.remove(&victim);
        }
    }
}

/// Hit/miss counters of a [`LruBlockCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub resident: usize,
}

/// Bounded LRU read-through cache around a [`BlockDevice`].
///
/// Whole blocks are cached by number. The image is read-only, so cached
/// bytes never go stale.
#[derive(Debug)]
pub struct LruBlockCache<D: BlockDevice> {
    inner: D,
    state: Mutex<LruState>,
}

impl<D: BlockDevice> LruBlockCache<D> {
    pub fn new(inner: D, capacity_blocks: usize) -> Result<Self> {
        if capacity_blocks == 0 {
            return Err(E2rError::Format(
                "LruBlockCache capacity_blocks must be > 0".to_owned(),
            ));
        }
        Ok(Self {
            inner,
            state: Mutex::new(LruState {
                capacity: capacity_blocks,
                ..LruState::default()
            }),
        })
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let guard = self.state.lock();
        CacheStats {
            hits: guard.hits,
            misses: guard.misses,
            resident: guard.resident.len(),
        }
    }
}

impl<D: BlockDevice> BlockDevice for LruBlockCache<D> {
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        {
            let mut guard = self.state.lock();
            if let Some(bytes) = guard.get(block) {
                guard.hits += 1;
                drop(guard);
                trace!(block = block.0, "block cache hit");
                return Ok(BlockBuf::new(bytes));
            }
        }

        let buf = self.inner.read_block(block)?;

        let mut guard = self.state.lock();
        guard.misses += 1;
        guard.insert(block, buf.as_slice().to_vec());
        drop(guard);
        Ok(buf)
    }

    fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    fn block_count(&self) -> u64 {
        self.inner.block_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn memory_device_reads_exact_ranges() {
        let dev = MemoryByteDevice::new(patterned(4096));
        let bytes = dev.read_at(ByteOffset(1000), 8).expect("read");
        assert_eq!(bytes, patterned(4096)[1000..1008].to_vec());
        assert!(dev.read_at(ByteOffset(4096), 0).expect("empty").is_empty());
    }

    #[test]
    fn short_read_is_an_io_error() {
        let dev = MemoryByteDevice::new(vec![0_u8; 100]);
        let err = dev.read_at(ByteOffset(96), 8).expect_err("past end");
        match err {
            E2rError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn file_device_matches_contents() {
        let data = patterned(3 * 1024);
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(&data).expect("write");
        tmp.flush().expect("flush");

        let dev = FileByteDevice::open(tmp.path()).expect("open");
        assert_eq!(dev.len_bytes(), 3 * 1024);
        assert_eq!(
            dev.read_at(ByteOffset(2048), 16).expect("read"),
            data[2048..2064].to_vec()
        );
        assert!(dev.read_at(ByteOffset(3000), 100).is_err());
    }

    #[test]
    fn byte_block_device_addresses_whole_blocks() {
        let mut data = patterned(1024 * 4 + 100);
        data[2048..3072].fill(7);
        let dev = ByteBlockDevice::new(MemoryByteDevice::new(data), 1024).expect("device");

        assert_eq!(dev.block_count(), 4);
        assert_eq!(dev.read_block(BlockNumber(2)).expect("read").as_slice(), &[7_u8; 1024]);
        assert!(matches!(
            dev.read_block(BlockNumber(4)),
            Err(E2rError::Io(_))
        ));
        assert!(ByteBlockDevice::new(MemoryByteDevice::new(vec![0_u8; 8]), 1000).is_err());
    }

    #[test]
    fn superblock_and_gdt_regions() {
        let mut data = vec![0_u8; 8192];
        data[1024] = 0xAA;
        data[2048..2080].fill(0x11);
        data[4096..4128].fill(0x22);
        let dev = MemoryByteDevice::new(data);

        let sb = read_ext2_superblock_region(&dev).expect("sb");
        assert_eq!(sb[0], 0xAA);

        let gdt_1k = read_group_desc_region(&dev, 1024, 1).expect("gdt 1k");
        assert_eq!(gdt_1k, vec![0x11; 32]);
        let gdt_4k = read_group_desc_region(&dev, 4096, 1).expect("gdt 4k");
        assert_eq!(gdt_4k, vec![0x22; 32]);

        let clipped = read_group_desc_region(&dev, 1024, 1000).expect("clipped");
        assert_eq!(clipped.len(), 8192 - 2048);
    }

    #[test]
    fn lru_cache_hits_after_first_read() {
        let dev = ByteBlockDevice::new(MemoryByteDevice::new(patterned(1024 * 4)), 1024)
            .expect("device");
        let cache = LruBlockCache::new(dev, 2).expect("cache");

        let r1 = cache.read_block(BlockNumber(1)).expect("read1");
        let r2 = cache.read_block(BlockNumber(1)).expect("read2");
        assert_eq!(r1, r2);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                resident: 1
            }
        );
    }

    #[test]
    fn lru_cache_evicts_least_recently_used() {
        let dev = ByteBlockDevice::new(MemoryByteDevice::new(patterned(1024 * 4)), 1024)
            .expect("device");
        let cache = LruBlockCache::new(dev, 2).expect("cache");

        cache.read_block(BlockNumber(0)).expect("0");
        cache.read_block(BlockNumber(1)).expect("1");
        cache.read_block(BlockNumber(0)).expect("0 again");
        cache.read_block(BlockNumber(2)).expect("2 evicts 1");
        cache.read_block(BlockNumber(0)).expect("0 still resident");

        let stats = cache.stats();
        assert_eq!(stats.resident, 2);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 3);

        cache.read_block(BlockNumber(1)).expect("1 reloaded");
        assert_eq!(cache.stats().misses, 4);
    }

    #[test]
    fn lru_cache_rejects_zero_capacity() {
        let dev =
            ByteBlockDevice::new(MemoryByteDevice::new(vec![0_u8; 1024]), 1024).expect("device");
        assert!(LruBlockCache::new(dev, 0).is_err());
    }

    #[test]
    fn lru_recency_index_tracks_resident_set() {
        let mut state = LruState {
            capacity: 1000,
            ..LruState::default()
        };
        for n in 0..1000_u64 {
            state.insert(BlockNumber(n), vec![u8::try_from(n % 251).expect("u8")]);
        }
        // Refresh every even block; the odd ones become the oldest.
        for n in (0..1000_u64).step_by(2) {
            assert!(state.get(BlockNumber(n)).is_some());
        }
        for n in 1000..1010_u64 {
            state.insert(BlockNumber(n), vec![0]);
        }

        assert_eq!(state.resident.len(), 1000);
        assert_eq!(state.order.len(), state.resident.len());
        for n in (1..20_u64).step_by(2) {
            assert!(state.get(BlockNumber(n)).is_none(), "block {n} evicted");
        }
        assert!(state.get(BlockNumber(21)).is_some());
        assert_eq!(state.get(BlockNumber(0)), Some(vec![0]));

        // Re-inserting a resident block must not leave a stale stamp behind.
        state.insert(BlockNumber(0), vec![9]);
        assert_eq!(state.order.len(), state.resident.len());
        assert_eq!(state.get(BlockNumber(0)), Some(vec![9]));
    }
}
