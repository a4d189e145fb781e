//! Miscellaneous syscalls.

use crate::interrupts::InterruptFrame;
use crate::task;

/// Command 0: returns the sum of the two words the caller pushed. Exists
/// as an end-to-end check of the whole argument path: user stack, stack
/// fetch across address spaces, and return through `eax`.
pub fn sum(_frame: &mut InterruptFrame) -> u32 {
    let first = task::current_stack_item(0).unwrap_or(0);
    let second = task::current_stack_item(1).unwrap_or(0);
    first.wrapping_add(second)
}
