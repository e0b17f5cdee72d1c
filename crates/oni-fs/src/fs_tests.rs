//! Inode addressing tests
//!
//! Offsets of interest sit at the addressing boundaries: direct blocks end
//! at logical block 10, the indirect range at 74, and the double-indirect
//! range at 74 + 64 * 64.

use pretty_assertions::assert_eq;
use test_case::test_case;

use crate::block::{BLOCK_SIZE, FsError, MemDisk};
use crate::inode::{Inode, MAX_FILE_SIZE, N_DIRECT, N_INDIRECT};

const BS: u64 = BLOCK_SIZE as u64;

/// First byte of the indirect range.
const INDIRECT_START: u64 = N_DIRECT as u64 * BS;
/// First byte of the double-indirect range.
const DINDIRECT_START: u64 = (N_DIRECT + N_INDIRECT) as u64 * BS;

fn disk() -> MemDisk {
    MemDisk::new(16 * 1024)
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[test_case(0, 10 ; "start of file")]
#[test_case(100, 300 ; "unaligned direct span")]
#[test_case(INDIRECT_START - 5, 10 ; "crossing into the indirect range")]
#[test_case(INDIRECT_START + 17, 1000 ; "inside the indirect range")]
#[test_case(DINDIRECT_START - 3, 600 ; "crossing into the double-indirect range")]
#[test_case(DINDIRECT_START + 70_000, 2 * BLOCK_SIZE ; "deep in the double-indirect range")]
fn write_then_read_round_trip(start: u64, len: usize) {
    let mut store = disk();
    let mut inode = Inode::new();

    let data = pattern(len, 7);
    assert_eq!(inode.write_data(&mut store, start, &data), Ok(len));
    assert_eq!(inode.size(), start + len as u64);
    assert!(inode.is_dirty());

    let mut out = vec![0u8; len];
    assert_eq!(inode.read_data(&store, start, &mut out), Ok(len));
    assert_eq!(out, data);
}

#[test]
fn unwritten_regions_read_as_zero() {
    let mut store = disk();
    let mut inode = Inode::new();

    // One byte far into the file leaves everything before it a hole.
    inode.write_data(&mut store, 5000, b"x").unwrap();

    let used_before_reads = store.blocks_in_use();
    let mut out = vec![0xAAu8; 5001];
    assert_eq!(inode.read_data(&store, 0, &mut out), Ok(5001));
    assert!(out[..5000].iter().all(|&b| b == 0));
    assert_eq!(out[5000], b'x');
    // Sparse reads allocate nothing.
    assert_eq!(store.blocks_in_use(), used_before_reads);
}

#[test]
fn read_clamps_to_file_size() {
    let mut store = disk();
    let mut inode = Inode::new();
    inode.write_data(&mut store, 0, b"hello").unwrap();

    let mut out = [0u8; 64];
    assert_eq!(inode.read_data(&store, 0, &mut out), Ok(5));
    assert_eq!(&out[..5], b"hello");
    assert_eq!(inode.read_data(&store, 5, &mut out), Ok(0));
    assert_eq!(inode.read_data(&store, 1000, &mut out), Ok(0));
}

#[test]
fn overwrite_within_a_block() {
    let mut store = disk();
    let mut inode = Inode::new();
    inode.write_data(&mut store, 0, b"abc").unwrap();
    inode.write_data(&mut store, 1, b"XY").unwrap();

    let mut out = [0u8; 3];
    assert_eq!(inode.read_data(&store, 0, &mut out), Ok(3));
    assert_eq!(&out, b"aXY");
    assert_eq!(inode.size(), 3);
}

#[test]
fn sparse_write_far_offset() {
    let mut store = disk();
    let mut inode = Inode::new();

    assert_eq!(inode.write_data(&mut store, 1_000_000, b"hi"), Ok(2));
    assert_eq!(inode.size(), 1_000_002);

    // One data block plus the two indirection pages needed to reach it.
    assert_eq!(store.blocks_in_use(), 3);
    assert_eq!(inode.indirect_block(), 0);
    assert_ne!(inode.dindirect_block(), 0);

    let mut out = vec![0xFFu8; 1_000_002];
    assert_eq!(inode.read_data(&store, 0, &mut out), Ok(1_000_002));
    assert!(out[..1_000_000].iter().all(|&b| b == 0));
    assert_eq!(&out[1_000_000..], b"hi");
}

#[test]
fn offsets_beyond_the_maximum_are_rejected() {
    let mut store = disk();
    let mut inode = Inode::new();
    let mut buf = [0u8; 4];

    assert_eq!(
        inode.read_data(&store, MAX_FILE_SIZE, &mut buf),
        Err(FsError::FileTooBig)
    );
    assert_eq!(
        inode.write_data(&mut store, MAX_FILE_SIZE, &buf),
        Err(FsError::FileTooBig)
    );
}

#[test]
fn write_crossing_the_maximum_is_partial() {
    let mut store = disk();
    let mut inode = Inode::new();

    let data = [9u8; 20];
    assert_eq!(
        inode.write_data(&mut store, MAX_FILE_SIZE - 10, &data),
        Err(FsError::FileTooBig)
    );
    // The first ten bytes landed and the size reflects them.
    assert_eq!(inode.size(), MAX_FILE_SIZE);

    let mut out = [0u8; 10];
    assert_eq!(inode.read_data(&store, MAX_FILE_SIZE - 10, &mut out), Ok(10));
    assert_eq!(out, [9u8; 10]);
}

// ============================================================================
// Allocation failure rollback
// ============================================================================

#[test]
fn failed_direct_allocation_changes_nothing() {
    let mut store = disk();
    let mut inode = Inode::new();
    store.fail_after(0);

    assert_eq!(inode.write_data(&mut store, 0, b"data"), Err(FsError::NoSpace));
    assert_eq!(inode.size(), 0);
    assert!(!inode.is_dirty());
    assert_eq!(store.blocks_in_use(), 0);
}

#[test]
fn failed_leaf_rolls_back_fresh_indirect_page() {
    let mut store = disk();
    let mut inode = Inode::new();

    // First allocation (the indirect page) succeeds, the data block fails.
    store.fail_after(1);
    assert_eq!(
        inode.write_data(&mut store, INDIRECT_START, b"data"),
        Err(FsError::NoSpace)
    );
    assert_eq!(inode.indirect_block(), 0);
    assert_eq!(store.blocks_in_use(), 0);
}

#[test]
fn failed_leaf_rolls_back_whole_dindirect_chain() {
    let mut store = disk();
    let mut inode = Inode::new();

    // dindirect page and inner page succeed, the data block fails; both
    // pages must come back.
    store.fail_after(2);
    assert_eq!(
        inode.write_data(&mut store, DINDIRECT_START, b"data"),
        Err(FsError::NoSpace)
    );
    assert_eq!(inode.dindirect_block(), 0);
    assert_eq!(store.blocks_in_use(), 0);
}

#[test]
fn failed_inner_page_rolls_back_fresh_dindirect_page() {
    let mut store = disk();
    let mut inode = Inode::new();

    store.fail_after(1);
    assert_eq!(
        inode.write_data(&mut store, DINDIRECT_START, b"data"),
        Err(FsError::NoSpace)
    );
    assert_eq!(inode.dindirect_block(), 0);
    assert_eq!(store.blocks_in_use(), 0);
}

#[test]
fn rollback_keeps_established_dindirect_page() {
    let mut store = disk();
    let mut inode = Inode::new();

    // Establish the dindirect page with one resident block.
    inode.write_data(&mut store, DINDIRECT_START, b"first").unwrap();
    let used = store.blocks_in_use();
    let dindirect = inode.dindirect_block();

    // A write through a different outer slot: the fresh inner page is
    // allocated, the data block fails, and only the fresh page is undone.
    store.fail_after(1);
    let far = DINDIRECT_START + (N_INDIRECT * BLOCK_SIZE) as u64;
    assert_eq!(
        inode.write_data(&mut store, far, b"second"),
        Err(FsError::NoSpace)
    );
    assert_eq!(inode.dindirect_block(), dindirect);
    assert_eq!(store.blocks_in_use(), used);

    // The established data is untouched and the store recovers.
    store.clear_failure();
    let mut out = [0u8; 5];
    assert_eq!(inode.read_data(&store, DINDIRECT_START, &mut out), Ok(5));
    assert_eq!(&out, b"first");
    assert_eq!(inode.write_data(&mut store, far, b"second"), Ok(6));
}

#[test]
fn partial_write_updates_size_before_failing() {
    let mut store = disk();
    let mut inode = Inode::new();

    // Four blocks needed; the third allocation fails.
    store.fail_after(2);
    let data = pattern(1000, 3);
    assert_eq!(inode.write_data(&mut store, 0, &data), Err(FsError::NoSpace));
    assert_eq!(inode.size(), 2 * BS);
    assert!(inode.is_dirty());

    let mut out = vec![0u8; 2 * BLOCK_SIZE];
    assert_eq!(inode.read_data(&store, 0, &mut out), Ok(2 * BLOCK_SIZE));
    assert_eq!(out, data[..2 * BLOCK_SIZE]);
}

// ============================================================================
// Freeing
// ============================================================================

#[test]
fn free_releases_every_level() {
    let mut store = disk();
    let mut inode = Inode::new();

    // One resident block in each addressing range.
    inode.write_data(&mut store, 0, b"direct").unwrap();
    inode.write_data(&mut store, INDIRECT_START, b"indirect").unwrap();
    inode.write_data(&mut store, DINDIRECT_START, b"dindirect").unwrap();
    // direct data + (page + data) + (dind page + inner page + data)
    assert_eq!(store.blocks_in_use(), 6);

    inode.free_blocks(&mut store).unwrap();
    assert_eq!(store.blocks_in_use(), 0);
    assert_eq!(inode.size(), 0);
    assert_eq!(inode.direct_block(0), 0);
    assert_eq!(inode.indirect_block(), 0);
    assert_eq!(inode.dindirect_block(), 0);
}

#[test]
fn free_skips_holes() {
    let mut store = disk();
    let mut inode = Inode::new();

    // A very sparse file: everything below the far write is holes.
    inode.write_data(&mut store, 1_000_000, b"hi").unwrap();
    inode.free_blocks(&mut store).unwrap();
    assert_eq!(store.blocks_in_use(), 0);
    assert_eq!(inode.size(), 0);
}

#[test]
fn freed_inode_is_reusable() {
    let mut store = disk();
    let mut inode = Inode::new();

    inode.write_data(&mut store, 300, &pattern(700, 11)).unwrap();
    inode.free_blocks(&mut store).unwrap();

    assert_eq!(inode.write_data(&mut store, 0, b"fresh"), Ok(5));
    let mut out = [0u8; 5];
    assert_eq!(inode.read_data(&store, 0, &mut out), Ok(5));
    assert_eq!(&out, b"fresh");
}
