//! Inode block addressing
//!
//! A single inode maps logical file blocks to physical blocks through a
//! fixed array of direct pointers, one indirect page, and one
//! double-indirect page. Indirection pages are blocks interpreted as arrays
//! of little-endian 32-bit block numbers. A zero at any level means
//! "unallocated": reads through zeros yield zero-filled data without
//! touching the store, so files can be sparse.

use log::trace;

use crate::block::{BLOCK_SIZE, BlockNr, BlockStore, FsError};

// ============================================================================
// Constants
// ============================================================================

/// Direct block pointers per inode.
pub const N_DIRECT: usize = 10;

/// Block pointers per indirection page.
pub const N_INDIRECT: usize = BLOCK_SIZE / 4;

/// Addressable logical blocks per inode.
pub const MAX_LOGICAL: usize = N_DIRECT + N_INDIRECT + N_INDIRECT * N_INDIRECT;

/// Maximum file size in bytes.
pub const MAX_FILE_SIZE: u64 = (MAX_LOGICAL * BLOCK_SIZE) as u64;

// ============================================================================
// Pointer page helpers
// ============================================================================

fn read_ptr(page: &[u8], index: usize) -> BlockNr {
    let offset = index * 4;
    u32::from_le_bytes([
        page[offset],
        page[offset + 1],
        page[offset + 2],
        page[offset + 3],
    ])
}

fn write_ptr(page: &mut [u8], index: usize, value: BlockNr) {
    let offset = index * 4;
    page[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

// ============================================================================
// Inode
// ============================================================================

/// A single file's block map and size.
#[derive(Debug, Clone)]
pub struct Inode {
    i_block_nr: [BlockNr; N_DIRECT],
    i_indirect: BlockNr,
    i_dindirect: BlockNr,
    i_size: u64,
    dirty: bool,
}

impl Default for Inode {
    fn default() -> Self {
        Self::new()
    }
}

impl Inode {
    /// A fresh inode: no blocks, zero size.
    pub fn new() -> Self {
        Self {
            i_block_nr: [0; N_DIRECT],
            i_indirect: 0,
            i_dindirect: 0,
            i_size: 0,
            dirty: false,
        }
    }

    pub fn size(&self) -> u64 {
        self.i_size
    }

    /// Whether the in-memory inode diverges from its on-disk image.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn direct_block(&self, index: usize) -> BlockNr {
        self.i_block_nr[index]
    }

    pub fn indirect_block(&self) -> BlockNr {
        self.i_indirect
    }

    pub fn dindirect_block(&self) -> BlockNr {
        self.i_dindirect
    }

    // ========================================================================
    // Logical -> physical translation
    // ========================================================================

    /// Read logical block `log_block_nr` into `block`. Returns the physical
    /// block number, or 0 if the block maps through an unallocated pointer,
    /// in which case `block` is zero-filled.
    fn read_block<S: BlockStore>(
        &self,
        store: &S,
        log_block_nr: usize,
        block: &mut [u8; BLOCK_SIZE],
    ) -> Result<BlockNr, FsError> {
        if log_block_nr >= MAX_LOGICAL {
            return Err(FsError::FileTooBig);
        }

        let mut phy_block_nr: BlockNr = 0;
        if log_block_nr < N_DIRECT {
            phy_block_nr = self.i_block_nr[log_block_nr];
        } else {
            let lb = log_block_nr - N_DIRECT;
            if lb >= N_INDIRECT {
                let lb = lb - N_INDIRECT;
                let outer = lb / N_INDIRECT;
                let inner = lb % N_INDIRECT;
                if self.i_dindirect > 0 {
                    store.read_blocks(self.i_dindirect, 1, block)?;
                    let id_block = read_ptr(block, outer);
                    if id_block > 0 {
                        store.read_blocks(id_block, 1, block)?;
                        phy_block_nr = read_ptr(block, inner);
                    }
                }
            } else if self.i_indirect > 0 {
                store.read_blocks(self.i_indirect, 1, block)?;
                phy_block_nr = read_ptr(block, lb);
            }
        }

        if phy_block_nr > 0 {
            store.read_blocks(phy_block_nr, 1, block)?;
        } else {
            // Sparse hole: nothing on the store backs this block.
            block.fill(0);
        }
        Ok(phy_block_nr)
    }

    /// Read up to `buf.len()` bytes starting at byte offset `start`,
    /// clamped to the file size. Returns the number of bytes read.
    pub fn read_data<S: BlockStore>(
        &self,
        store: &S,
        start: u64,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        if start >= MAX_FILE_SIZE {
            return Err(FsError::FileTooBig);
        }
        if start >= self.i_size {
            return Ok(0);
        }

        let mut size = buf.len().min((self.i_size - start) as usize);
        let mut block = [0u8; BLOCK_SIZE];
        let mut block_nr = (start / BLOCK_SIZE as u64) as usize;
        let mut block_ix = (start % BLOCK_SIZE as u64) as usize;
        let mut pos = 0usize;

        while size > 0 {
            self.read_block(store, block_nr, &mut block)?;
            let to_read = (BLOCK_SIZE - block_ix).min(size);
            buf[pos..pos + to_read].copy_from_slice(&block[block_ix..block_ix + to_read]);
            pos += to_read;
            size -= to_read;
            block_nr += 1;
            block_ix = 0;
        }

        Ok(pos)
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Return the physical block backing logical block `log_block_nr`,
    /// allocating it (and any containing indirection pages) on demand.
    ///
    /// On return `block` holds the block's current contents, so callers can
    /// do read-modify-write. Any allocation failure leaves the inode and the
    /// store's block usage exactly as before the call: freshly allocated
    /// indirection pages are freed and their pointers reset before the error
    /// propagates.
    fn allocate_block<S: BlockStore>(
        &mut self,
        store: &mut S,
        log_block_nr: usize,
        block: &mut [u8; BLOCK_SIZE],
    ) -> Result<BlockNr, FsError> {
        let phy_block_nr = self.read_block(store, log_block_nr, block)?;
        if phy_block_nr != 0 {
            return Ok(phy_block_nr);
        }

        // Direct block.
        if log_block_nr < N_DIRECT {
            let nr = store.alloc_block()?;
            self.i_block_nr[log_block_nr] = nr;
            self.dirty = true;
            return Ok(nr);
        }

        let lb = log_block_nr - N_DIRECT;
        if lb < N_INDIRECT {
            return self.allocate_indirect(store, lb);
        }
        self.allocate_dindirect(store, lb - N_INDIRECT)
    }

    /// Allocate a block reached through the single-indirect page.
    fn allocate_indirect<S: BlockStore>(
        &mut self,
        store: &mut S,
        slot: usize,
    ) -> Result<BlockNr, FsError> {
        let mut indirect = [0u8; BLOCK_SIZE];
        let mut indirect_allocated = false;

        if self.i_indirect == 0 {
            self.i_indirect = store.alloc_block()?;
            indirect_allocated = true;
        } else {
            store.read_blocks(self.i_indirect, 1, &mut indirect)?;
        }

        match store.alloc_block() {
            Ok(nr) => {
                write_ptr(&mut indirect, slot, nr);
                store.write_blocks(self.i_indirect, 1, &indirect)?;
                self.dirty = true;
                Ok(nr)
            }
            Err(e) => {
                if indirect_allocated {
                    // Data block allocation failed; undo the page we just
                    // took so nothing leaks.
                    let _ = store.free_block(self.i_indirect);
                    self.i_indirect = 0;
                }
                Err(e)
            }
        }
    }

    /// Allocate a block reached through the double-indirect tree. `lb` is
    /// relative to the start of the double-indirect range.
    fn allocate_dindirect<S: BlockStore>(
        &mut self,
        store: &mut S,
        lb: usize,
    ) -> Result<BlockNr, FsError> {
        let outer = lb / N_INDIRECT;
        let inner = lb % N_INDIRECT;

        let mut dindirect = [0u8; BLOCK_SIZE];
        let mut dindirect_allocated = false;
        if self.i_dindirect == 0 {
            self.i_dindirect = store.alloc_block()?;
            dindirect_allocated = true;
        } else {
            store.read_blocks(self.i_dindirect, 1, &mut dindirect)?;
        }

        let mut indirect = [0u8; BLOCK_SIZE];
        let mut indirect_allocated = false;
        let mut id_block = read_ptr(&dindirect, outer);
        if id_block == 0 {
            match store.alloc_block() {
                Ok(nr) => {
                    id_block = nr;
                    indirect_allocated = true;
                    write_ptr(&mut dindirect, outer, nr);
                }
                Err(e) => {
                    if dindirect_allocated {
                        let _ = store.free_block(self.i_dindirect);
                        self.i_dindirect = 0;
                    }
                    return Err(e);
                }
            }
        } else {
            store.read_blocks(id_block, 1, &mut indirect)?;
        }

        match store.alloc_block() {
            Ok(nr) => {
                write_ptr(&mut indirect, inner, nr);
                store.write_blocks(id_block, 1, &indirect)?;
                if indirect_allocated {
                    store.write_blocks(self.i_dindirect, 1, &dindirect)?;
                }
                self.dirty = true;
                Ok(nr)
            }
            Err(e) => {
                // Cascade: free the indirect page if it was fresh, and the
                // dindirect page if that was fresh too.
                if indirect_allocated {
                    let _ = store.free_block(id_block);
                    write_ptr(&mut dindirect, outer, 0);
                    if dindirect_allocated {
                        let _ = store.free_block(self.i_dindirect);
                        self.i_dindirect = 0;
                    }
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `buf` at byte offset `start`, allocating blocks as needed and
    /// extending the file size. Returns the number of bytes written.
    ///
    /// If allocation fails mid-write, the size is first advanced to cover
    /// the bytes already written and the inode marked dirty, then the error
    /// propagates.
    pub fn write_data<S: BlockStore>(
        &mut self,
        store: &mut S,
        start: u64,
        buf: &[u8],
    ) -> Result<usize, FsError> {
        if start >= MAX_FILE_SIZE {
            return Err(FsError::FileTooBig);
        }

        let mut block = [0u8; BLOCK_SIZE];
        let mut block_nr = (start / BLOCK_SIZE as u64) as usize;
        let mut block_ix = (start % BLOCK_SIZE as u64) as usize;
        let mut pos = 0usize;
        let mut size = buf.len();

        while size > 0 {
            let phy_block_nr = match self.allocate_block(store, block_nr, &mut block) {
                Ok(nr) => nr,
                Err(e) => {
                    if pos > 0 {
                        self.i_size = self.i_size.max(start + pos as u64);
                        self.dirty = true;
                    }
                    return Err(e);
                }
            };
            let to_write = (BLOCK_SIZE - block_ix).min(size);
            block[block_ix..block_ix + to_write].copy_from_slice(&buf[pos..pos + to_write]);
            store.write_blocks(phy_block_nr, 1, &block)?;
            pos += to_write;
            size -= to_write;
            block_nr += 1;
            block_ix = 0;
        }

        if pos > 0 {
            self.i_size = self.i_size.max(start + pos as u64);
        }
        self.dirty = true;
        trace!("wrote {} bytes at {}, size now {}", pos, start, self.i_size);
        Ok(pos)
    }

    // ========================================================================
    // Freeing
    // ========================================================================

    /// Free every block the file maps, including its indirection pages.
    /// Holes are skipped without fetching anything. Resets the size to 0.
    pub fn free_blocks<S: BlockStore>(&mut self, store: &mut S) -> Result<(), FsError> {
        // Last logical block number, rounded up.
        let mut e_block_nr = self.i_size.div_ceil(BLOCK_SIZE as u64) as i64;

        for i in 0..(e_block_nr.min(N_DIRECT as i64).max(0) as usize) {
            if self.i_block_nr[i] == 0 {
                continue;
            }
            store.free_block(self.i_block_nr[i])?;
            self.i_block_nr[i] = 0;
        }
        e_block_nr -= N_DIRECT as i64;

        if self.i_indirect > 0 {
            let mut page = [0u8; BLOCK_SIZE];
            store.read_blocks(self.i_indirect, 1, &mut page)?;
            for i in 0..(e_block_nr.min(N_INDIRECT as i64).max(0) as usize) {
                let nr = read_ptr(&page, i);
                if nr == 0 {
                    continue;
                }
                store.free_block(nr)?;
            }
            store.free_block(self.i_indirect)?;
            self.i_indirect = 0;
        }
        e_block_nr -= N_INDIRECT as i64;

        if e_block_nr > 0 && self.i_dindirect > 0 {
            let mut did_page = [0u8; BLOCK_SIZE];
            store.read_blocks(self.i_dindirect, 1, &mut did_page)?;
            for i in 0..N_INDIRECT {
                if e_block_nr <= 0 {
                    break;
                }
                let id_block = read_ptr(&did_page, i);
                if id_block == 0 {
                    e_block_nr -= N_INDIRECT as i64;
                    continue;
                }
                let mut page = [0u8; BLOCK_SIZE];
                store.read_blocks(id_block, 1, &mut page)?;
                for j in 0..(e_block_nr.min(N_INDIRECT as i64) as usize) {
                    let nr = read_ptr(&page, j);
                    if nr == 0 {
                        continue;
                    }
                    store.free_block(nr)?;
                }
                store.free_block(id_block)?;
                e_block_nr -= N_INDIRECT as i64;
            }
            store.free_block(self.i_dindirect)?;
            self.i_dindirect = 0;
        }

        self.i_size = 0;
        self.dirty = true;
        Ok(())
    }
}
