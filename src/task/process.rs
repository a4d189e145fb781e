//! Processes: address-space construction, executable loading and the
//! per-process resources (stack, argument block, tracked allocations,
//! keyboard buffer).
//!
//! A process exclusively owns its task; the task holds the process id as a
//! non-owning back-reference. Destruction order on terminate: unlink the
//! task, then release the process payload, then clear the slot.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::{
    COMMAND_LINE_ARGS_VIRTUAL_ADDRESS, MAX_COMMAND_ARG_LENGTH, MAX_FILE_PATH_CHARS, MAX_NUM_ARGS,
    MAX_PROCESSES, PROCESS_MAX_ALLOCATIONS, TASK_LOAD_VIRTUAL_ADDRESS, TASK_STACK_SIZE,
    TASK_STACK_VIRTUAL_ADDRESS, TASK_STACK_VIRTUAL_ADDRESS_END,
};
use crate::error::{Error, Result};
use crate::fs::{self, SeekWhence};
use crate::keyboard::KeyboardBuffer;
use crate::loader::elf::{ElfFile, SegmentFlags, PT_LOAD};
use crate::memory::allocator::{kfree, kzalloc};
use crate::memory::paging::{align_down, align_up, PageFlags};
use crate::task::{self, TaskId};

/// Size of the argument block: one user-space pointer slot per argument,
/// followed by the argument strings at a fixed stride.
const ARG_BLOCK_SIZE: usize =
    MAX_NUM_ARGS * core::mem::size_of::<u32>() + MAX_NUM_ARGS * MAX_COMMAND_ARG_LENGTH;

/// The executable image backing a process.
pub enum Payload {
    /// A flat binary, loaded verbatim at the task load address.
    Binary {
        /// The raw image bytes in kernel memory.
        data: Vec<u8>,
    },
    /// A parsed ELF executable.
    Elf(ElfFile),
}

/// One tracked user allocation made through the `malloc` syscall.
#[derive(Clone, Copy)]
struct Allocation {
    address: u32,
    size: usize,
}

/// A user process.
pub struct Process {
    pid: usize,
    filename: String,
    task: TaskId,
    payload: Payload,
    /// Kernel-allocated user stack. The allocator hands back block-aligned
    /// memory, so the address doubles as a mappable physical page address.
    stack: Vec<u8>,
    /// Kernel copy of the argument block mapped at the fixed argv address.
    arg_block: Vec<u8>,
    /// Outstanding `malloc` allocations, reclaimed at termination.
    allocations: [Option<Allocation>; PROCESS_MAX_ALLOCATIONS],
    /// Keystrokes queued for this process.
    pub keyboard: KeyboardBuffer,
}

impl Process {
    /// The process id.
    #[must_use]
    pub const fn pid(&self) -> usize {
        self.pid
    }

    /// Path the executable was loaded from.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The task owned by this process.
    #[must_use]
    pub const fn task(&self) -> TaskId {
        self.task
    }
}

static PROCESSES: Mutex<[Option<Process>; MAX_PROCESSES]> =
    Mutex::new([const { None }; MAX_PROCESSES]);

/// The process whose keyboard buffer receives keystrokes. Distinct from the
/// current task: the ISR publishes into the current *process*, while
/// `get_key` consumes from the current *task*'s process.
static CURRENT_PROCESS: Mutex<Option<usize>> = Mutex::new(None);

/// The process currently receiving keyboard input.
pub fn current() -> Option<usize> {
    *CURRENT_PROCESS.lock()
}

/// Marks `pid` as the current process. Called by `task::exec` on every
/// switch into Ring 3.
pub fn set_current(pid: usize) {
    *CURRENT_PROCESS.lock() = Some(pid);
}

/// Runs `f` against the process at `pid`.
///
/// # Errors
///
/// `InvalidArg` when no such process exists, plus whatever `f` returns.
pub fn with_process<T>(pid: usize, f: impl FnOnce(&mut Process) -> Result<T>) -> Result<T> {
    let mut processes = PROCESSES.lock();
    let process = processes
        .get_mut(pid)
        .and_then(Option::as_mut)
        .ok_or(Error::InvalidArg)?;
    f(process)
}

/// Loads the executable at `filename` into a new process with the given
/// argument vector, ready to run via `task::exec`. Returns the new pid.
///
/// The file is parsed as ELF first; when the format validation rejects it,
/// the raw bytes are loaded as a flat binary instead.
///
/// # Errors
///
/// `SlotTaken` when every process slot is occupied; `InvalidArg` for
/// over-long paths or too many arguments; plus any VFS or loader error.
pub fn load(filename: &str, args: &[String]) -> Result<usize> {
    if filename.len() > MAX_FILE_PATH_CHARS {
        return Err(Error::InvalidArg);
    }
    if args.len() > MAX_NUM_ARGS {
        return Err(Error::InvalidArg);
    }

    let pid = {
        let processes = PROCESSES.lock();
        processes
            .iter()
            .position(Option::is_none)
            .ok_or(Error::SlotTaken)?
    };

    let payload = load_payload(filename)?;

    let mut stack = vec![0u8; TASK_STACK_SIZE];
    let arg_block = build_arg_block(args)?;
    seed_stack_arguments(&mut stack, args.len() as u32);

    let task = task::new_task(pid)?;
    let process = Process {
        pid,
        filename: String::from(filename),
        task,
        payload,
        stack,
        arg_block,
        allocations: [None; PROCESS_MAX_ALLOCATIONS],
        keyboard: KeyboardBuffer::new(),
    };

    if let Err(err) = map_task_memory(&process) {
        task::free_task(task);
        return Err(err);
    }
    if let Err(err) = seed_task_registers(&process) {
        task::free_task(task);
        return Err(err);
    }

    PROCESSES.lock()[pid] = Some(process);

    if current().is_none() {
        set_current(pid);
    }

    log::info!("loaded process {pid}: {filename}");
    Ok(pid)
}

/// Terminates `pid`: reclaims its syscall allocations, unlinks and frees
/// its task, and clears the slot. Returns the task that is current after
/// the removal, when any remains.
pub fn terminate(pid: usize) -> Option<TaskId> {
    let process = PROCESSES.lock()[pid].take();

    let survivor = match process {
        Some(process) => {
            for allocation in process.allocations.iter().flatten() {
                kfree(allocation.address as *mut u8);
            }
            let survivor = task::free_task(process.task);
            // Payload, stack and argument block fall out of scope here and
            // return their heap blocks.
            drop(process);
            survivor
        }
        None => task::current(),
    };

    let mut current_process = CURRENT_PROCESS.lock();
    if *current_process == Some(pid) {
        *current_process = None;
    }
    drop(current_process);

    if let Some(survivor) = survivor {
        let survivor_pid = {
            let processes = PROCESSES.lock();
            processes
                .iter()
                .flatten()
                .find(|slot| slot.task == survivor)
                .map(Process::pid)
        };
        if let Some(survivor_pid) = survivor_pid {
            set_current(survivor_pid);
        }
    }

    log::info!("terminated process {pid}");
    survivor
}

/// Allocates `size` bytes for the process from the kernel heap, maps them
/// 1:1 into its address space with user write access, and records the
/// allocation. Returns the user-visible address.
///
/// # Errors
///
/// `OutOfMemory` when the heap or the allocation table is exhausted.
pub fn malloc(pid: usize, size: usize) -> Result<u32> {
    let address = kzalloc(size)? as u32;

    let result = with_process(pid, |process| {
        let slot = process
            .allocations
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(Error::OutOfMemory)?;

        task::with_task_space(process.task, |space| {
            space.map_physical_range(
                address,
                address,
                address + size as u32,
                PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
            )
        })?;

        *slot = Some(Allocation { address, size });
        Ok(())
    });

    match result {
        Ok(()) => Ok(address),
        Err(err) => {
            kfree(address as *mut u8);
            Err(err)
        }
    }
}

/// Frees a pointer previously returned by [`malloc`]. The mapping is
/// downgraded to read-only presence so that any later user write traps,
/// then the kernel blocks are released. Unknown pointers are ignored: user
/// programs must not be able to free arbitrary kernel memory.
pub fn free_allocation(pid: usize, address: u32) {
    let _ = with_process(pid, |process| {
        let slot = process
            .allocations
            .iter_mut()
            .find(|slot| matches!(slot.as_ref(), Some(a) if a.address == address));

        let Some(slot) = slot else {
            return Ok(());
        };
        let Some(allocation) = slot.take() else {
            return Ok(());
        };

        task::with_task_space(process.task, |space| {
            space.map_physical_range(
                allocation.address,
                allocation.address,
                allocation.address + allocation.size as u32,
                PageFlags::PRESENT | PageFlags::USER,
            )
        })?;

        kfree(allocation.address as *mut u8);
        Ok(())
    });
}

/// Reads the whole file and classifies it: ELF when the parser accepts it,
/// flat binary when the format validation rejects it. Any other error is
/// surfaced unchanged.
fn load_payload(filename: &str) -> Result<Payload> {
    match ElfFile::load(filename) {
        Ok(elf_file) => Ok(Payload::Elf(elf_file)),
        Err(Error::InvalidFormat) => load_binary_payload(filename),
        Err(err) => Err(err),
    }
}

/// Loads the raw bytes of `filename` for a flat-binary process.
fn load_binary_payload(filename: &str) -> Result<Payload> {
    let fd = fs::fopen(filename, "r")?;

    let result = (|| {
        let stat = fs::fstat(fd)?;
        let mut data = vec![0u8; stat.filesize as usize];
        fs::fseek(fd, 0, SeekWhence::Set)?;
        let read = fs::fread(&mut data, stat.filesize as usize, 1, fd)?;
        if read != 1 {
            return Err(Error::Io);
        }
        Ok(Payload::Binary { data })
    })();

    let _ = fs::fclose(fd);
    result
}

/// Builds the kernel copy of the argument block: `MAX_NUM_ARGS` user-space
/// pointers up front, then the NUL-terminated strings at a fixed stride.
/// The pointer slots hold the *user* addresses the strings will have once
/// the block is mapped at its fixed virtual address.
fn build_arg_block(args: &[String]) -> Result<Vec<u8>> {
    let mut block = vec![0u8; ARG_BLOCK_SIZE];
    let strings_base = MAX_NUM_ARGS * core::mem::size_of::<u32>();

    for (i, arg) in args.iter().enumerate() {
        if arg.len() >= MAX_COMMAND_ARG_LENGTH {
            return Err(Error::InvalidArg);
        }

        let string_offset = strings_base + i * MAX_COMMAND_ARG_LENGTH;
        block[string_offset..string_offset + arg.len()].copy_from_slice(arg.as_bytes());

        let user_address = COMMAND_LINE_ARGS_VIRTUAL_ADDRESS + string_offset as u32;
        block[i * 4..i * 4 + 4].copy_from_slice(&user_address.to_le_bytes());
    }

    Ok(block)
}

/// Places `argc` and the user-space argv pointer at the very top of the
/// stack memory. The initial `esp` is seeded two words below the stack top,
/// so the program finds `argc` at its stack base without the first push
/// clobbering it.
fn seed_stack_arguments(stack: &mut [u8], argc: u32) {
    let top = stack.len();
    stack[top - 4..].copy_from_slice(&argc.to_le_bytes());
    stack[top - 8..top - 4]
        .copy_from_slice(&COMMAND_LINE_ARGS_VIRTUAL_ADDRESS.to_le_bytes());
}

/// Maps the stack, the argument block and the executable image into the
/// process's task address space.
fn map_task_memory(process: &Process) -> Result<()> {
    task::with_task_space(process.task, |space| {
        let stack_physical = process.stack.as_ptr() as u32;
        space.map_physical_range(
            TASK_STACK_VIRTUAL_ADDRESS_END,
            stack_physical,
            stack_physical + TASK_STACK_SIZE as u32,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
        )?;

        let arg_block_physical = process.arg_block.as_ptr() as u32;
        space.map_physical_range(
            COMMAND_LINE_ARGS_VIRTUAL_ADDRESS,
            arg_block_physical,
            arg_block_physical + ARG_BLOCK_SIZE as u32,
            PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
        )?;

        match &process.payload {
            Payload::Binary { data } => {
                let physical = data.as_ptr() as u32;
                space.map_physical_range(
                    TASK_LOAD_VIRTUAL_ADDRESS,
                    physical,
                    physical + data.len() as u32,
                    PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
                )
            }
            Payload::Elf(elf_file) => {
                for phdr in elf_file.program_headers() {
                    if phdr.p_type != PT_LOAD {
                        continue;
                    }

                    let mut flags = PageFlags::PRESENT | PageFlags::USER;
                    if phdr.flags().contains(SegmentFlags::WRITE) {
                        flags |= PageFlags::WRITABLE;
                    }

                    let physical = elf_file.segment_address(&phdr);
                    space.map_physical_range(
                        align_down(phdr.p_vaddr),
                        align_down(physical),
                        align_up(physical + phdr.p_memsz),
                        flags,
                    )?;
                }
                Ok(())
            }
        }
    })
}

/// Seeds the task's registers for the first drop into Ring 3: entry point
/// from the payload, `esp` just below the argc/argv words.
fn seed_task_registers(process: &Process) -> Result<()> {
    let entry = match &process.payload {
        Payload::Binary { .. } => TASK_LOAD_VIRTUAL_ADDRESS,
        Payload::Elf(elf_file) => elf_file.entry(),
    };

    task::with_task_registers(process.task, |registers| {
        registers.ip = entry;
        registers.esp = TASK_STACK_VIRTUAL_ADDRESS - 8;
    })
}
