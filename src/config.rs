//! Fixed layout of the kernel: segment selectors, physical memory map and
//! the virtual addresses that every user process is built around.
//!
//! Everything in here is compile-time policy. The values mirror the layout
//! that the stage-2 loader and the linker script agree on, so changing them
//! usually means changing those too.

/// Byte offset of the kernel code descriptor in the GDT.
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;

/// Byte offset of the kernel data descriptor in the GDT.
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;

/// Selector for the user code descriptor, with RPL set to Ring 3.
///
/// `0x1b` = `0001 1011`: index 3 in the GDT, TI = 0, RPL = 3.
pub const USER_CODE_SELECTOR: u16 = 0x1b;

/// Selector for the user data descriptor, with RPL set to Ring 3.
///
/// `0x23` = `0010 0011`: index 4 in the GDT, TI = 0, RPL = 3.
pub const USER_DATA_SELECTOR: u16 = 0x23;

/// Number of descriptors in the GDT (null, kernel code/data, user code/data,
/// TSS).
pub const TOTAL_GDT_SEGMENTS: usize = 6;

/// Size of the kernel heap in bytes (100 MiB).
pub const KERNEL_HEAP_SIZE: usize = 100 * 1024 * 1024;

/// Physical address where the kernel heap begins.
///
/// Picked from the OSDev memory map: everything from 16 MiB upward is free
/// RAM on the machines we target.
pub const KERNEL_HEAP_ADDRESS: usize = 0x0100_0000;

/// Physical address of the heap block table.
///
/// The region below 480.5 KiB is unused once the kernel is running, so the
/// table lives in conventional memory.
pub const KERNEL_HEAP_TABLE_ADDRESS: usize = 0x7E00;

/// Physical address of the kernel stack. Loaded into `esp0` so that every
/// entry from Ring 3 lands on a fresh kernel stack.
pub const KERNEL_STACK_ADDRESS: u32 = 0x0060_0000;

/// Maximum length of a file path, including the drive prefix.
pub const MAX_FILE_PATH_CHARS: usize = 128;

/// Maximum number of filesystem drivers that can be registered.
pub const MAX_FILESYSTEMS: usize = 12;

/// Maximum number of file descriptors open at once.
pub const MAX_OPEN_FILES: usize = 512;

/// Maximum number of disks the kernel keeps track of.
pub const MAX_DISKS: usize = 4;

/// Virtual address that task executable code is loaded at (4 MiB).
pub const TASK_LOAD_VIRTUAL_ADDRESS: u32 = 0x0040_0000;

/// Size of a user task's stack in bytes.
pub const TASK_STACK_SIZE: usize = 1024 * 16;

/// Highest virtual address of a user task's stack. The stack grows downward
/// from just below the executable image.
pub const TASK_STACK_VIRTUAL_ADDRESS: u32 = 0x003F_F000;

/// Lowest virtual address of a user task's stack.
pub const TASK_STACK_VIRTUAL_ADDRESS_END: u32 =
    TASK_STACK_VIRTUAL_ADDRESS - TASK_STACK_SIZE as u32;

/// Virtual address that a process's command-line argument block is mapped at.
pub const COMMAND_LINE_ARGS_VIRTUAL_ADDRESS: u32 = 0x003F_0000;

/// Maximum number of command-line arguments passed to a process.
pub const MAX_NUM_ARGS: usize = 16;

/// Maximum length of a single command-line argument, including the
/// terminating NUL.
pub const MAX_COMMAND_ARG_LENGTH: usize = 64;

/// Maximum number of live memory allocations a single process can hold.
pub const PROCESS_MAX_ALLOCATIONS: usize = 1024;

/// Maximum number of processes.
pub const MAX_PROCESSES: usize = 12;

/// Number of slots in the syscall command table. Command ids are valid in
/// `0..MAX_ISR80H_COMMANDS`.
pub const MAX_ISR80H_COMMANDS: usize = 1024;

/// Capacity of a process's keyboard ring buffer in bytes.
pub const KEYBOARD_BUFFER_SIZE: usize = 1024;
