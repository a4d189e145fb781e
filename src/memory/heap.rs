//! Block-bitmap heap.
//!
//! The heap is a contiguous region carved into 4 KiB blocks, described by a
//! table with one byte per block. The low nibble of an entry says whether
//! the block is free or taken; the high bits mark the first block of an
//! allocation and whether the allocation continues into the next block.
//! `free` only needs the start address: it walks forward while the previous
//! entry has the continuation bit set.
//!
//! Allocation is a first-fit linear scan. With a 100 MiB heap the table has
//! 25 600 entries, so the scan is cheap enough and keeps the bookkeeping at
//! a single byte per block.

use crate::error::{Error, Result};

/// Size of one heap block in bytes. Matches the page size so any block
/// address can be handed straight to the paging code.
pub const HEAP_BLOCK_SIZE: usize = 4096;

/// Entry value of a free block.
const BLOCK_FREE: u8 = 0x00;
/// Low-nibble marker of an allocated block.
const BLOCK_TAKEN: u8 = 0x01;
/// Set on the first block of an allocation.
const BLOCK_IS_FIRST: u8 = 0b0100_0000;
/// Set on every block of an allocation except its last.
const BLOCK_HAS_NEXT: u8 = 0b1000_0000;

/// A heap descriptor: the managed region plus its block table.
///
/// The table lives outside the managed region (for the kernel heap it sits
/// in low conventional memory), so the heap itself is never used for its own
/// bookkeeping.
pub struct Heap {
    start_address: usize,
    table: *mut u8,
    total_entries: usize,
}

// SAFETY:
// A Heap is only ever reached through the kernel-wide lock in `allocator`.
unsafe impl Send for Heap {}

impl Heap {
    /// Creates a heap over `[start_address, end_address)` with its block
    /// table at `table`.
    ///
    /// # Errors
    ///
    /// `InvalidArg` when either boundary is not block-aligned or the region
    /// is not a whole number of blocks.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that the managed region and the table
    /// region (`(end - start) / HEAP_BLOCK_SIZE` bytes at `table`) are
    /// unused RAM owned by this heap from now on.
    pub unsafe fn new(start_address: usize, end_address: usize, table: *mut u8) -> Result<Self> {
        if start_address % HEAP_BLOCK_SIZE != 0 || end_address % HEAP_BLOCK_SIZE != 0 {
            return Err(Error::InvalidArg);
        }
        if end_address <= start_address {
            return Err(Error::InvalidArg);
        }

        let total_entries = (end_address - start_address) / HEAP_BLOCK_SIZE;

        // SAFETY:
        // The caller vouches for the table region; mark every block free.
        unsafe {
            core::ptr::write_bytes(table, BLOCK_FREE, total_entries);
        }

        Ok(Self {
            start_address,
            table,
            total_entries,
        })
    }

    /// Allocates `size` bytes, rounded up to a whole number of blocks, and
    /// returns the address of the first block.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when no free run is long enough.
    pub fn alloc(&mut self, size: usize) -> Result<usize> {
        let total_blocks = size.div_ceil(HEAP_BLOCK_SIZE);
        if total_blocks == 0 {
            return Err(Error::InvalidArg);
        }

        let start_block = self.find_free_run(total_blocks)?;
        self.mark_blocks_taken(start_block, total_blocks);
        Ok(self.block_to_address(start_block))
    }

    /// Releases the allocation that starts at `address`.
    ///
    /// Walks the table from the first block, clearing entries until one
    /// without the continuation bit has been cleared.
    pub fn free(&mut self, address: usize) {
        let start_block = self.address_to_block(address);
        let entries = self.entries_mut();

        for i in start_block..entries.len() {
            let entry = entries[i];
            entries[i] = BLOCK_FREE;
            if entry & BLOCK_HAS_NEXT == 0 {
                break;
            }
        }
    }

    /// Number of blocks covered by the table.
    #[must_use]
    pub const fn total_blocks(&self) -> usize {
        self.total_entries
    }

    /// Returns a snapshot of the raw table entry for `block`. Used by the
    /// allocator tests to check the flag invariants.
    #[must_use]
    pub fn entry(&self, block: usize) -> u8 {
        self.entries()[block]
    }

    fn entries(&self) -> &[u8] {
        // SAFETY:
        // The table region was handed to this heap at construction.
        unsafe { core::slice::from_raw_parts(self.table, self.total_entries) }
    }

    fn entries_mut(&mut self) -> &mut [u8] {
        // SAFETY:
        // The table region was handed to this heap at construction.
        unsafe { core::slice::from_raw_parts_mut(self.table, self.total_entries) }
    }

    /// First-fit scan for a run of `total_blocks` free blocks. Returns the
    /// index of the first block of the run.
    fn find_free_run(&self, total_blocks: usize) -> Result<usize> {
        let entries = self.entries();
        let mut run_start = None;
        let mut run_len = 0;

        for (i, entry) in entries.iter().enumerate() {
            if entry & 0x0F != BLOCK_FREE {
                run_start = None;
                run_len = 0;
                continue;
            }

            if run_start.is_none() {
                run_start = Some(i);
            }
            run_len += 1;

            if run_len == total_blocks {
                return run_start.ok_or(Error::OutOfMemory);
            }
        }

        Err(Error::OutOfMemory)
    }

    /// Marks `total_blocks` blocks starting at `start_block` as one
    /// allocation: every block taken, the first flagged as such, and all but
    /// the last chained with the continuation bit.
    fn mark_blocks_taken(&mut self, start_block: usize, total_blocks: usize) {
        let end_block = start_block + total_blocks - 1;
        let entries = self.entries_mut();

        for i in start_block..=end_block {
            let mut entry = BLOCK_TAKEN;
            if i == start_block {
                entry |= BLOCK_IS_FIRST;
            }
            if i != end_block {
                entry |= BLOCK_HAS_NEXT;
            }
            entries[i] = entry;
        }
    }

    const fn block_to_address(&self, block: usize) -> usize {
        self.start_address + block * HEAP_BLOCK_SIZE
    }

    const fn address_to_block(&self, address: usize) -> usize {
        (address - self.start_address) / HEAP_BLOCK_SIZE
    }
}
