//! Two-level x86 paging.
//!
//! An [`AddressSpace`] owns one page directory and the 1024 page tables it
//! references, identity-mapping the full 4 GiB at creation. The kernel runs
//! inside one such address space with read/write access everywhere; each
//! task gets its own with user-visible but read-only defaults, and the
//! process loader then maps the task's stack, argument block and executable
//! on top.
//!
//! Virtual addresses split as: bits 31-22 index the directory, bits 21-12
//! index the table, bits 11-0 are the byte offset. Every public operation
//! takes 4 KiB-aligned addresses and fails with `InvalidArg` otherwise.

use core::arch::asm;

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::memory::allocator::{kfree, kzalloc};

/// Size of one page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Entries per page directory and per page table.
const TABLE_ENTRIES: usize = 1024;

/// Mask extracting the physical frame or table address from an entry.
const ENTRY_ADDRESS_MASK: u32 = 0xFFFF_F000;

bitflags! {
    /// Flag bits in the low 12 bits of directory and table entries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// The entry references a present page or table.
        const PRESENT = 1 << 0;
        /// The page may be written (in Ring 3; Ring 0 ignores this without
        /// `CR0.WP`).
        const WRITABLE = 1 << 1;
        /// The page is accessible from Ring 3.
        const USER = 1 << 2;
        /// Write-through caching.
        const WRITE_THROUGH = 1 << 3;
        /// Caching disabled.
        const NO_CACHE = 1 << 4;
        /// Set by the CPU on access.
        const ACCESSED = 1 << 5;
        /// Set by the CPU on write.
        const DIRTY = 1 << 6;
    }
}

/// A page directory plus all of its page tables.
///
/// Destroying an address space frees every page table and then the
/// directory. The directory must never be live in `cr3` when that happens;
/// the kernel switches to its own address space before dropping a task's.
pub struct AddressSpace {
    directory: *mut u32,
}

// SAFETY:
// Address spaces are only reached through the task and process tables,
// which are lock-protected, and the kernel is single-CPU.
unsafe impl Send for AddressSpace {}
// SAFETY: see above.
unsafe impl Sync for AddressSpace {}

impl AddressSpace {
    /// Allocates a directory and 1024 page tables, identity-mapping the
    /// whole 4 GiB with `flags` (directory entries additionally carry
    /// `WRITABLE` so table-level flags stay authoritative).
    ///
    /// This costs about 4 MiB of page-table memory per address space, the
    /// price of never taking a page fault for a missing table.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when the kernel heap cannot back the tables.
    pub fn new(flags: PageFlags) -> Result<Self> {
        let directory = kzalloc(TABLE_ENTRIES * 4)? as *mut u32;

        for dir_index in 0..TABLE_ENTRIES {
            let table = match kzalloc(TABLE_ENTRIES * 4) {
                Ok(table) => table as *mut u32,
                Err(err) => {
                    // Unwind the tables built so far.
                    free_tables(directory, dir_index);
                    kfree(directory as *mut u8);
                    return Err(err);
                }
            };

            let base = (dir_index * TABLE_ENTRIES * PAGE_SIZE) as u32;
            for table_index in 0..TABLE_ENTRIES {
                let frame = base + (table_index * PAGE_SIZE) as u32;

                // SAFETY:
                // `table` has room for TABLE_ENTRIES u32 entries.
                unsafe {
                    table
                        .add(table_index)
                        .write(frame | flags.bits());
                }
            }

            // SAFETY:
            // `directory` has room for TABLE_ENTRIES u32 entries.
            unsafe {
                directory
                    .add(dir_index)
                    .write(table as u32 | (flags | PageFlags::WRITABLE).bits());
            }
        }

        Ok(Self { directory })
    }

    /// Physical address of the page directory, as loaded into `cr3`.
    #[must_use]
    pub fn directory_address(&self) -> u32 {
        self.directory as u32
    }

    /// Makes this address space the active one.
    pub fn activate(&self) {
        // SAFETY:
        // The directory is fully populated (every slot references a present
        // page table), so the CPU never walks into a freed table.
        unsafe {
            asm!("mov cr3, {}", in(reg) self.directory_address(), options(nostack, preserves_flags));
        }
    }

    /// Writes a raw page-table entry for `virtual_address`.
    ///
    /// # Errors
    ///
    /// `InvalidArg` when the address is not page-aligned.
    pub fn set_entry(&mut self, virtual_address: u32, value: u32) -> Result<()> {
        let (dir_index, table_index) = entry_indexes(virtual_address)?;

        // SAFETY:
        // Both indexes are below TABLE_ENTRIES and every directory slot was
        // filled with a valid table pointer at construction.
        unsafe {
            let table = (self.directory.add(dir_index).read() & ENTRY_ADDRESS_MASK) as *mut u32;
            table.add(table_index).write(value);
        }
        Ok(())
    }

    /// Returns the raw page-table entry for `virtual_address`.
    ///
    /// # Errors
    ///
    /// `InvalidArg` when the address is not page-aligned.
    pub fn entry(&self, virtual_address: u32) -> Result<u32> {
        let (dir_index, table_index) = entry_indexes(virtual_address)?;

        // SAFETY:
        // Both indexes are below TABLE_ENTRIES and the referenced table is
        // owned by this address space.
        unsafe {
            let table = (self.directory.add(dir_index).read() & ENTRY_ADDRESS_MASK) as *const u32;
            Ok(table.add(table_index).read())
        }
    }

    /// Maps one page: `virtual_address` resolves to `physical_address` with
    /// `flags`.
    ///
    /// # Errors
    ///
    /// `InvalidArg` when either address is not page-aligned.
    pub fn map_page(
        &mut self,
        virtual_address: u32,
        physical_address: u32,
        flags: PageFlags,
    ) -> Result<()> {
        if !is_aligned(physical_address) {
            return Err(Error::InvalidArg);
        }
        self.set_entry(virtual_address, physical_address | flags.bits())
    }

    /// Maps `count` contiguous pages starting at the given addresses.
    ///
    /// # Errors
    ///
    /// `InvalidArg` when either start address is not page-aligned.
    pub fn map_range(
        &mut self,
        virtual_address: u32,
        physical_address: u32,
        count: usize,
        flags: PageFlags,
    ) -> Result<()> {
        for page in 0..count as u32 {
            self.map_page(
                virtual_address + page * PAGE_SIZE as u32,
                physical_address + page * PAGE_SIZE as u32,
                flags,
            )?;
        }
        Ok(())
    }

    /// Maps the physical range `[physical_start, physical_end)` at
    /// `virtual_address`. The end address may be unaligned; it is rounded up
    /// to the next page boundary. The start addresses must be aligned.
    ///
    /// # Errors
    ///
    /// `InvalidArg` on unaligned start addresses or an inverted range.
    pub fn map_physical_range(
        &mut self,
        virtual_address: u32,
        physical_start: u32,
        physical_end: u32,
        flags: PageFlags,
    ) -> Result<()> {
        if !is_aligned(virtual_address) || !is_aligned(physical_start) {
            return Err(Error::InvalidArg);
        }
        if physical_end < physical_start {
            return Err(Error::InvalidArg);
        }

        let count = (align_up(physical_end) - physical_start) as usize / PAGE_SIZE;
        self.map_range(virtual_address, physical_start, count, flags)
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        free_tables(self.directory, TABLE_ENTRIES);
        kfree(self.directory as *mut u8);
    }
}

/// Frees the first `count` page tables referenced by `directory`.
fn free_tables(directory: *mut u32, count: usize) {
    for dir_index in 0..count {
        // SAFETY:
        // Slots below `count` were populated with heap-allocated tables.
        unsafe {
            let table = (directory.add(dir_index).read() & ENTRY_ADDRESS_MASK) as *mut u8;
            kfree(table);
        }
    }
}

/// Splits a page-aligned virtual address into directory and table indexes.
fn entry_indexes(virtual_address: u32) -> Result<(usize, usize)> {
    if !is_aligned(virtual_address) {
        return Err(Error::InvalidArg);
    }

    let dir_index = (virtual_address >> 22) as usize;
    let table_index = ((virtual_address >> 12) & 0x3FF) as usize;
    Ok((dir_index, table_index))
}

/// Returns true when `address` sits on a page boundary.
#[must_use]
pub const fn is_aligned(address: u32) -> bool {
    address % PAGE_SIZE as u32 == 0
}

/// Rounds `address` up to the next page boundary.
#[must_use]
pub const fn align_up(address: u32) -> u32 {
    if address % PAGE_SIZE as u32 == 0 {
        address
    } else {
        address - (address % PAGE_SIZE as u32) + PAGE_SIZE as u32
    }
}

/// Rounds `address` down to the previous page boundary.
#[must_use]
pub const fn align_down(address: u32) -> u32 {
    address - (address % PAGE_SIZE as u32)
}

/// Sets the paging bit in `cr0`. Called exactly once at boot, after the
/// kernel address space has been activated; paging is never disabled again.
pub fn enable_paging() {
    // SAFETY:
    // The caller activated an identity-mapping address space beforehand, so
    // instruction fetch continues seamlessly at the same addresses.
    unsafe {
        asm!(
            "mov eax, cr0",
            "or eax, 0x80000000",
            "mov cr0, eax",
            out("eax") _,
            options(nostack, preserves_flags),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_entry_indexes_split_the_address() {
        let (dir, table) = entry_indexes(0x0040_3000).expect("aligned address");
        assert_eq!(dir, 1, "0x400000 region lives in directory slot 1.");
        assert_eq!(table, 3, "Third page within the table.");
    }

    #[test_case]
    fn test_unaligned_addresses_are_rejected() {
        assert_eq!(entry_indexes(0x0040_0001), Err(Error::InvalidArg));
        assert!(!is_aligned(0x123));
        assert!(is_aligned(0x4000));
    }

    #[test_case]
    fn test_alignment_helpers() {
        assert_eq!(align_up(0x1001), 0x2000);
        assert_eq!(align_up(0x2000), 0x2000);
        assert_eq!(align_down(0x2FFF), 0x2000);
    }

    #[test_case]
    fn test_new_address_space_identity_maps() {
        let space = AddressSpace::new(PageFlags::PRESENT | PageFlags::USER)
            .expect("address space creation failed");

        for address in [0x0000_0000u32, 0x0000_1000, 0x0040_0000, 0xFFC0_0000] {
            let entry = space.entry(address).expect("aligned");
            assert_eq!(
                entry & ENTRY_ADDRESS_MASK,
                address,
                "Identity mapping must point each page at itself.",
            );
            assert_eq!(
                entry & 0xFFF,
                (PageFlags::PRESENT | PageFlags::USER).bits(),
                "Creation flags must be applied to every entry.",
            );
        }
    }

    #[test_case]
    fn test_map_range_writes_consecutive_entries() {
        let mut space = AddressSpace::new(PageFlags::PRESENT | PageFlags::USER)
            .expect("address space creation failed");
        let flags = PageFlags::PRESENT | PageFlags::USER | PageFlags::WRITABLE;

        space
            .map_range(0x0040_0000, 0x0150_0000, 4, flags)
            .expect("map_range failed");

        for page in 0..4u32 {
            let entry = space.entry(0x0040_0000 + page * 0x1000).expect("aligned");
            assert_eq!(
                entry,
                (0x0150_0000 + page * 0x1000) | flags.bits(),
                "Each page must map to the matching physical page.",
            );
        }
    }

    #[test_case]
    fn test_map_physical_range_rounds_the_end_up() {
        let mut space = AddressSpace::new(PageFlags::PRESENT | PageFlags::USER)
            .expect("address space creation failed");
        let flags = PageFlags::PRESENT | PageFlags::USER;

        space
            .map_physical_range(0x0080_0000, 0x0150_0000, 0x0150_1001, flags)
            .expect("map_physical_range failed");

        assert_eq!(
            space.entry(0x0080_1000).expect("aligned"),
            0x0150_1000 | flags.bits(),
            "The partial trailing page must still be mapped.",
        );
    }

    #[test_case]
    fn test_map_page_requires_alignment() {
        let mut space = AddressSpace::new(PageFlags::PRESENT | PageFlags::USER)
            .expect("address space creation failed");

        assert_eq!(
            space.map_page(0x0040_0000, 0x0150_0800, PageFlags::PRESENT),
            Err(Error::InvalidArg),
            "Unaligned physical addresses must be rejected.",
        );
    }
}
