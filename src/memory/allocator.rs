//! The kernel heap: a single [`Heap`] instance covering 100 MiB, plus the
//! `#[global_allocator]` adapter that lets `alloc` collections ride it.
//!
//! The kernel page tables map physical memory 1:1, so every address handed
//! out here is simultaneously the physical address of the backing blocks.
//! The process loader leans on that: buffers allocated with [`kzalloc`] are
//! mapped straight into user address spaces.

use core::alloc::{GlobalAlloc, Layout};

use spin::Mutex;

use crate::config::{KERNEL_HEAP_ADDRESS, KERNEL_HEAP_SIZE, KERNEL_HEAP_TABLE_ADDRESS};
use crate::error::{Error, Result};
use crate::memory::heap::Heap;

static KERNEL_HEAP: Mutex<Option<Heap>> = Mutex::new(None);

/// Creates the kernel heap. Must run before anything allocates, including
/// the first `Box` or `Vec`.
///
/// # Panics
///
/// Panics when the heap region is misconfigured or when called twice; both
/// are kernel bugs that nothing downstream could recover from.
pub fn init() {
    let mut kernel_heap = KERNEL_HEAP.lock();
    assert!(kernel_heap.is_none(), "Kernel heap initialized twice.");

    // SAFETY:
    // The heap region and its table address come from the fixed memory map
    // in `config`; nothing else owns those ranges.
    let heap = unsafe {
        Heap::new(
            KERNEL_HEAP_ADDRESS,
            KERNEL_HEAP_ADDRESS + KERNEL_HEAP_SIZE,
            KERNEL_HEAP_TABLE_ADDRESS as *mut u8,
        )
    };

    match heap {
        Ok(heap) => *kernel_heap = Some(heap),
        Err(_) => panic!("Failed to create kernel heap."),
    }
}

/// Allocates `size` bytes from the kernel heap. The returned address is
/// always block-aligned (4 KiB).
///
/// # Errors
///
/// `OutOfMemory` when the heap cannot satisfy the request.
pub fn kmalloc(size: usize) -> Result<*mut u8> {
    let mut kernel_heap = KERNEL_HEAP.lock();
    let heap = kernel_heap.as_mut().ok_or(Error::OutOfMemory)?;
    heap.alloc(size).map(|address| address as *mut u8)
}

/// Allocates `size` bytes and zeroes them.
///
/// # Errors
///
/// `OutOfMemory` when the heap cannot satisfy the request.
pub fn kzalloc(size: usize) -> Result<*mut u8> {
    let ptr = kmalloc(size)?;

    // SAFETY:
    // `ptr` points at a fresh allocation of at least `size` bytes.
    unsafe {
        core::ptr::write_bytes(ptr, 0, size);
    }
    Ok(ptr)
}

/// Returns an allocation to the kernel heap. Passing a pointer that did not
/// come from [`kmalloc`]/[`kzalloc`] corrupts the block table.
pub fn kfree(ptr: *mut u8) {
    let mut kernel_heap = KERNEL_HEAP.lock();
    if let Some(heap) = kernel_heap.as_mut() {
        heap.free(ptr as usize);
    }
}

/// Adapter tying the `alloc` crate to the kernel heap.
struct KernelHeapAllocator;

// SAFETY:
// Allocation and deallocation go through the locked kernel heap; the block
// table guarantees that distinct live allocations never overlap, and every
// returned address is 4 KiB aligned which satisfies any layout the kernel
// uses.
unsafe impl GlobalAlloc for KernelHeapAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        kmalloc(layout.size()).unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        kfree(ptr);
    }
}

#[global_allocator]
static ALLOCATOR: KernelHeapAllocator = KernelHeapAllocator;
