//! User memory syscalls.
//!
//! User allocations come out of the kernel heap and are mapped 1:1 into
//! the caller's address space. Sharing the kernel heap this way is a known
//! hazard of the design (see DESIGN.md); the bookkeeping lives entirely in
//! `process` so a dedicated user allocator can replace it locally.

use crate::interrupts::InterruptFrame;
use crate::task::{self, process};

/// Command 4: allocates the number of bytes on the caller's stack and
/// returns a pointer the caller can write through, or 0 on failure.
pub fn malloc(_frame: &mut InterruptFrame) -> u32 {
    let size = match task::current_stack_item(0) {
        Ok(size) => size as usize,
        Err(_) => return 0,
    };
    let Some(pid) = task::current_process_id() else {
        return 0;
    };

    process::malloc(pid, size).unwrap_or(0)
}

/// Command 5: frees a pointer previously returned by [`malloc`]. Unknown
/// pointers are silently ignored; the caller's mapping of a freed block is
/// downgraded so later writes fault.
pub fn free(_frame: &mut InterruptFrame) -> u32 {
    let Ok(address) = task::current_stack_item(0) else {
        return 0;
    };
    let Some(pid) = task::current_process_id() else {
        return 0;
    };

    process::free_allocation(pid, address);
    0
}
