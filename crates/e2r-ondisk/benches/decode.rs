#![forbid(unsafe_code)]

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use e2r_ondisk::{Ext2Inode, Ext2Superblock, parse_dir_block, parse_group_desc_table};

fn superblock_region() -> Vec<u8> {
    let mut sb = vec![0_u8; 1024];
    sb[0x00..0x04].copy_from_slice(&2048_u32.to_le_bytes());
    sb[0x04..0x08].copy_from_slice(&8192_u32.to_le_bytes());
    sb[0x14..0x18].copy_from_slice(&1_u32.to_le_bytes());
    sb[0x20..0x24].copy_from_slice(&8192_u32.to_le_bytes());
    sb[0x28..0x2C].copy_from_slice(&2048_u32.to_le_bytes());
    sb[0x38..0x3A].copy_from_slice(&0xEF53_u16.to_le_bytes());
    sb[0x4C..0x50].copy_from_slice(&1_u32.to_le_bytes());
    sb[0x58..0x5A].copy_from_slice(&128_u16.to_le_bytes());
    sb
}

fn directory_block() -> Vec<u8> {
    let mut block = vec![0_u8; 4096];
    let mut offset = 0_usize;
    let mut ino = 11_u32;
    while offset + 16 < block.len() {
        let rec_len: u16 = if offset + 32 >= block.len() {
            u16::try_from(block.len() - offset).expect("rec_len")
        } else {
            16
        };
        block[offset..offset + 4].copy_from_slice(&ino.to_le_bytes());
        block[offset + 4..offset + 6].copy_from_slice(&rec_len.to_le_bytes());
        block[offset + 6] = 6;
        block[offset + 8..offset + 14].copy_from_slice(b"file00");
        offset += usize::from(rec_len);
        ino += 1;
    }
    block
}

fn bench_superblock_parse(c: &mut Criterion) {
    let data = superblock_region();
    c.bench_function("ext2_superblock_parse", |b| {
        b.iter(|| Ext2Superblock::parse_superblock_region(black_box(&data)).expect("superblock"));
    });
}

fn bench_group_desc_table(c: &mut Criterion) {
    let data = vec![0_u8; 32 * 64];
    c.bench_function("ext2_group_desc_table_64", |b| {
        b.iter(|| parse_group_desc_table(black_box(&data), 64).expect("gdt"));
    });
}

fn bench_inode_parse(c: &mut Criterion) {
    let mut data = vec![0_u8; 128];
    data[0x00..0x02].copy_from_slice(&0o100_644_u16.to_le_bytes());
    data[0x04..0x08].copy_from_slice(&65_536_u32.to_le_bytes());
    c.bench_function("ext2_inode_parse", |b| {
        b.iter(|| Ext2Inode::parse_from_bytes(black_box(&data)).expect("inode"));
    });
}

fn bench_dir_block(c: &mut Criterion) {
    let data = directory_block();
    c.bench_function("ext2_dir_block_4k", |b| {
        b.iter(|| parse_dir_block(black_box(&data)).expect("dir block"));
    });
}

criterion_group!(
    benches,
    bench_superblock_parse,
    bench_group_desc_table,
    bench_inode_parse,
    bench_dir_block
);
criterion_main!(benches);
