//! Tasks: the unit of execution the kernel schedules.
//!
//! Every process owns exactly one task. A task is its saved register frame,
//! its address space and its links in the circular task list. There is no
//! preemptive scheduler: a task runs until it traps, and the only switches
//! are [`exec`] (drop into Ring 3), `execve` and `exit`.
//!
//! The task list is an arena of slots with index links rather than a web of
//! pointers: removal is structural and nothing is ever aliased.

pub mod process;

use core::arch::{asm, naked_asm};

use conquer_once::spin::OnceCell;
use spin::Mutex;

use crate::config::{
    KERNEL_DATA_SELECTOR, MAX_PROCESSES, TASK_LOAD_VIRTUAL_ADDRESS, TASK_STACK_VIRTUAL_ADDRESS,
    USER_CODE_SELECTOR, USER_DATA_SELECTOR,
};
use crate::error::{Error, Result};
use crate::interrupts::InterruptFrame;
use crate::memory::allocator::{kfree, kzalloc};
use crate::memory::paging::{AddressSpace, PageFlags, PAGE_SIZE};

/// Index of a task in the arena.
pub type TaskId = usize;

/// One task per process at most.
const MAX_TASKS: usize = MAX_PROCESSES;

/// Initial `eflags` of a fresh task: bit 1 is the mandatory reserved bit,
/// bit 9 enables interrupts once the task is in Ring 3.
const INITIAL_EFLAGS: u32 = 0x202;

/// Hardware context of a suspended task.
///
/// The field order is the one [`enter_userland`] walks with fixed offsets;
/// it must not change independently of that stub.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Registers {
    /// Destination index register.        offset 0
    pub edi: u32,
    /// Source index register.            offset 4
    pub esi: u32,
    /// Stack base pointer.               offset 8
    pub ebp: u32,
    /// General register.                 offset 12
    pub ebx: u32,
    /// General register.                 offset 16
    pub edx: u32,
    /// General register.                 offset 20
    pub ecx: u32,
    /// General register.                 offset 24
    pub eax: u32,
    /// Instruction pointer.              offset 28
    pub ip: u32,
    /// Code segment.                     offset 32
    pub cs: u32,
    /// CPU flags.                        offset 36
    pub eflags: u32,
    /// Stack pointer.                    offset 40
    pub esp: u32,
    /// Stack segment.                    offset 44
    pub ss: u32,
}

impl Registers {
    /// The register state every fresh user task starts from.
    const fn user_default() -> Self {
        Self {
            edi: 0,
            esi: 0,
            ebp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            ip: TASK_LOAD_VIRTUAL_ADDRESS,
            cs: USER_CODE_SELECTOR as u32,
            eflags: INITIAL_EFLAGS,
            esp: TASK_STACK_VIRTUAL_ADDRESS,
            ss: USER_DATA_SELECTOR as u32,
        }
    }
}

/// A schedulable task.
pub struct Task {
    registers: Registers,
    address_space: AddressSpace,
    process_id: usize,
    next: TaskId,
    prev: TaskId,
}

struct TaskList {
    slots: [Option<Task>; MAX_TASKS],
    head: Option<TaskId>,
    current: Option<TaskId>,
}

static TASKS: Mutex<TaskList> = Mutex::new(TaskList {
    slots: [const { None }; MAX_TASKS],
    head: None,
    current: None,
});

/// The kernel's own address space: a full 4 GiB identity map built once at
/// boot and activated on every entry from Ring 3.
static KERNEL_SPACE: OnceCell<AddressSpace> = OnceCell::uninit();

/// Builds and activates the kernel address space, then turns paging on.
/// Called exactly once during boot.
///
/// # Errors
///
/// `OutOfMemory` when the page tables cannot be allocated.
///
/// # Panics
///
/// Panics when called a second time.
pub fn init_kernel_space() -> Result<()> {
    let space = AddressSpace::new(PageFlags::PRESENT | PageFlags::USER)?;
    space.activate();

    KERNEL_SPACE
        .try_init_once(|| space)
        .unwrap_or_else(|_| panic!("Kernel address space initialized twice."));

    crate::memory::paging::enable_paging();
    Ok(())
}

/// Activates the kernel address space.
///
/// # Panics
///
/// Panics before [`init_kernel_space`] has run; every caller is on a path
/// that only exists once paging is up.
pub fn activate_kernel_space() {
    KERNEL_SPACE
        .get()
        .unwrap_or_else(|| panic!("Kernel address space used before initialization."))
        .activate();
}

/// Loads `selector` into the four data segment registers.
fn load_data_segments(selector: u16) {
    // SAFETY:
    // Both selectors this is called with reference flat 4 GiB data
    // descriptors, so no effective address changes.
    unsafe {
        asm!(
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            in("ax") selector,
            options(nostack, preserves_flags),
        );
    }
}

/// Swaps in the kernel address space and kernel data segments. One half of
/// the kernel/user switch discipline; called on every entry from Ring 3.
/// Before paging is up (exceptions during early boot) only the segment
/// registers are touched.
pub fn swap_kernel_page_tables() {
    load_data_segments(KERNEL_DATA_SELECTOR);
    if let Some(space) = KERNEL_SPACE.get() {
        space.activate();
    }
}

/// Swaps the current task's address space and the user data segments back
/// in. The other half of the switch discipline; called right before the
/// return `iret`. Does nothing when no task is current (early boot).
pub fn swap_current_task_page_tables() {
    let directory = {
        let tasks = TASKS.lock();
        tasks.current.and_then(|id| {
            tasks.slots[id]
                .as_ref()
                .map(|task| task.address_space.directory_address())
        })
    };

    if let Some(directory) = directory {
        load_data_segments(USER_DATA_SELECTOR);
        load_page_directory(directory);
    }
}

/// Loads a raw page-directory address into `cr3`.
fn load_page_directory(directory: u32) {
    // SAFETY:
    // Directory addresses only come out of live AddressSpace values.
    unsafe {
        asm!("mov cr3, {}", in(reg) directory, options(nostack, preserves_flags));
    }
}

/// Creates a task for `process_id`: a fresh user address space and default
/// Ring 3 registers, linked at the tail of the circular list.
///
/// # Errors
///
/// `OutOfMemory` when no slot is free or the address space cannot be built.
pub fn new_task(process_id: usize) -> Result<TaskId> {
    let address_space = AddressSpace::new(PageFlags::PRESENT | PageFlags::USER)?;

    let mut tasks = TASKS.lock();
    let id = tasks
        .slots
        .iter()
        .position(Option::is_none)
        .ok_or(Error::OutOfMemory)?;

    let mut task = Task {
        registers: Registers::user_default(),
        address_space,
        process_id,
        next: id,
        prev: id,
    };

    match tasks.head {
        None => {
            tasks.head = Some(id);
            tasks.current = Some(id);
        }
        Some(head) => {
            // Insert at the tail: between head.prev and head.
            let tail = tasks.slots[head].as_ref().map_or(head, |h| h.prev);
            task.prev = tail;
            task.next = head;
            if let Some(tail_task) = tasks.slots[tail].as_mut() {
                tail_task.next = id;
            }
            if let Some(head_task) = tasks.slots[head].as_mut() {
                head_task.prev = id;
            }
        }
    }

    tasks.slots[id] = Some(task);
    Ok(id)
}

/// Unlinks and frees `id`. Returns the task that is current afterwards,
/// when any remains.
pub fn free_task(id: TaskId) -> Option<TaskId> {
    let mut tasks = TASKS.lock();

    let (prev, next) = match tasks.slots[id].as_ref() {
        Some(task) => (task.prev, task.next),
        None => return tasks.current,
    };

    if next == id {
        // Last task in the system.
        tasks.head = None;
        tasks.current = None;
    } else {
        if let Some(prev_task) = tasks.slots[prev].as_mut() {
            prev_task.next = next;
        }
        if let Some(next_task) = tasks.slots[next].as_mut() {
            next_task.prev = prev;
        }
        if tasks.head == Some(id) {
            tasks.head = Some(next);
        }
        if tasks.current == Some(id) {
            tasks.current = Some(next);
        }
    }

    // Dropping the task frees its address space; the kernel space is the
    // active one on every path that reaches here.
    tasks.slots[id] = None;
    tasks.current
}

/// The currently executing task, if any.
pub fn current() -> Option<TaskId> {
    TASKS.lock().current
}

/// The head of the task list, if any.
pub fn list_head() -> Option<TaskId> {
    TASKS.lock().head
}

/// The process owning the currently executing task.
pub fn current_process_id() -> Option<usize> {
    let tasks = TASKS.lock();
    let current = tasks.current?;
    tasks.slots[current].as_ref().map(|task| task.process_id)
}

/// Runs `f` against the task's address space. Used by the process loader to
/// map the executable, stack and argument block.
///
/// # Errors
///
/// `InvalidArg` when `id` names no live task, plus whatever `f` returns.
pub fn with_task_space<T>(
    id: TaskId,
    f: impl FnOnce(&mut AddressSpace) -> Result<T>,
) -> Result<T> {
    let mut tasks = TASKS.lock();
    let task = tasks
        .slots
        .get_mut(id)
        .and_then(Option::as_mut)
        .ok_or(Error::InvalidArg)?;
    f(&mut task.address_space)
}

/// Runs `f` against the task's saved registers.
///
/// # Errors
///
/// `InvalidArg` when `id` names no live task.
pub fn with_task_registers(id: TaskId, f: impl FnOnce(&mut Registers)) -> Result<()> {
    let mut tasks = TASKS.lock();
    let task = tasks
        .slots
        .get_mut(id)
        .and_then(Option::as_mut)
        .ok_or(Error::InvalidArg)?;
    f(&mut task.registers);
    Ok(())
}

/// Saves a trap frame into the current task.
///
/// Must be called exactly once per entry from Ring 3, before anything else
/// can clobber the frame; between this save and the matching `iret` the
/// saved frame is the canonical task state.
///
/// # Panics
///
/// Panics when no task is current: a Ring 3 trap without a current task
/// means the kernel has lost track of what it was running.
pub fn save_current_state(frame: &InterruptFrame) {
    let mut tasks = TASKS.lock();
    let current = tasks
        .current
        .unwrap_or_else(|| panic!("No current task to save state into."));
    let task = tasks.slots[current]
        .as_mut()
        .unwrap_or_else(|| panic!("Current task slot is empty."));

    task.registers.edi = frame.edi;
    task.registers.esi = frame.esi;
    task.registers.ebp = frame.ebp;
    task.registers.ebx = frame.ebx;
    task.registers.edx = frame.edx;
    task.registers.ecx = frame.ecx;
    task.registers.eax = frame.eax;
    task.registers.ip = frame.ip;
    task.registers.cs = frame.cs;
    task.registers.eflags = frame.eflags;
    task.registers.esp = frame.esp;
    task.registers.ss = frame.ss;
}

/// Reads the `index`-th 32-bit word from the current task's stack, as seen
/// through its saved `esp`. Index 0 is the word at the top of the stack.
///
/// Syscall handlers use this to fetch the arguments the user pushed before
/// `int 0x80`.
///
/// # Errors
///
/// `InvalidArg` when no task is current.
pub fn current_stack_item(index: usize) -> Result<u32> {
    let (esp, directory) = {
        let tasks = TASKS.lock();
        let current = tasks.current.ok_or(Error::InvalidArg)?;
        let task = tasks.slots[current].as_ref().ok_or(Error::InvalidArg)?;
        (task.registers.esp, task.address_space.directory_address())
    };

    // The word lives in the task's address space, so hop over there for
    // the read. Ring 0 code keeps running fine: the task tables identity-
    // map everything, just without user write access.
    load_page_directory(directory);

    // SAFETY:
    // The saved esp was captured from a running Ring 3 task; its stack is
    // mapped in the active address space.
    let value = unsafe {
        core::ptr::read_volatile((esp as *const u32).add(index))
    };

    activate_kernel_space();
    Ok(value)
}

/// Copies `dst.len()` bytes from `user_address` in the current task's
/// address space into `dst`, stopping early at a NUL byte. The remainder of
/// `dst` is zero-filled.
///
/// The kernel cannot read the user address directly: its own tables map
/// physical memory 1:1 while the task's map arbitrary virtual addresses. A
/// scratch buffer is temporarily mapped into the *task's* space at its own
/// (physical) address, the copy runs with the task's tables active, and the
/// borrowed page-table entry is restored exactly afterwards.
///
/// # Errors
///
/// `InvalidArg` when no task is current or `dst` is empty or a page or
/// larger; `OutOfMemory` when the scratch buffer cannot be allocated.
pub fn copy_string_from_user(user_address: u32, dst: &mut [u8]) -> Result<()> {
    if dst.is_empty() || dst.len() >= PAGE_SIZE {
        return Err(Error::InvalidArg);
    }

    let scratch = kzalloc(dst.len())?;
    let result = copy_through_scratch(user_address, scratch, dst.len(), true);

    if result.is_ok() {
        // SAFETY:
        // The scratch allocation is dst.len() bytes and now holds the
        // copied string.
        unsafe {
            dst.copy_from_slice(core::slice::from_raw_parts(scratch, dst.len()));
        }
    }

    kfree(scratch);
    result
}

/// Copies `dst.len()` raw bytes from `user_address` in the current task's
/// address space, with no NUL handling. Used for argv pointer arrays.
///
/// # Errors
///
/// Same as [`copy_string_from_user`].
pub fn copy_from_user(user_address: u32, dst: &mut [u8]) -> Result<()> {
    if dst.is_empty() || dst.len() >= PAGE_SIZE {
        return Err(Error::InvalidArg);
    }

    let scratch = kzalloc(dst.len())?;
    let result = copy_through_scratch(user_address, scratch, dst.len(), false);

    if result.is_ok() {
        // SAFETY:
        // The scratch allocation is dst.len() bytes and now holds the
        // copied bytes.
        unsafe {
            dst.copy_from_slice(core::slice::from_raw_parts(scratch, dst.len()));
        }
    }

    kfree(scratch);
    result
}

/// The shared-page copy: maps `scratch` into the current task's space at
/// its own address (saving the entry it displaces), activates the task's
/// tables, copies, then restores both the kernel tables and the borrowed
/// entry.
fn copy_through_scratch(
    user_address: u32,
    scratch: *mut u8,
    len: usize,
    stop_at_nul: bool,
) -> Result<()> {
    let mut tasks = TASKS.lock();
    let current = tasks.current.ok_or(Error::InvalidArg)?;
    let task = tasks.slots[current].as_mut().ok_or(Error::InvalidArg)?;

    let scratch_address = scratch as u32;
    let space = &mut task.address_space;

    // The scratch page will be remapped inside the task's tables; keep the
    // displaced entry so the task does not lose whatever was there.
    let saved_entry = space.entry(scratch_address)?;
    space.map_page(
        scratch_address,
        scratch_address,
        PageFlags::PRESENT | PageFlags::WRITABLE | PageFlags::USER,
    )?;

    space.activate();

    // SAFETY:
    // With the task's tables active, `user_address` resolves through the
    // task's mappings and `scratch` resolves to the same physical page the
    // kernel allocated (it was just mapped 1:1).
    unsafe {
        for i in 0..len {
            let byte = core::ptr::read_volatile((user_address as *const u8).add(i));
            scratch.add(i).write(byte);
            if stop_at_nul && byte == 0 {
                break;
            }
        }
    }

    activate_kernel_space();
    space.set_entry(scratch_address, saved_entry)?;
    Ok(())
}

/// Drops into Ring 3: makes `id` current, activates its address space and
/// `iret`s into its saved register state. Never returns.
///
/// The task must already be linked into the task list (which
/// `process::load` guarantees).
///
/// # Panics
///
/// Panics when `id` names no live task.
pub fn exec(id: TaskId) -> ! {
    let (registers, directory, process_id) = {
        let mut tasks = TASKS.lock();
        tasks.current = Some(id);
        let task = tasks.slots[id]
            .as_ref()
            .unwrap_or_else(|| panic!("exec of a task that does not exist."));
        (
            task.registers,
            task.address_space.directory_address(),
            task.process_id,
        )
    };

    process::set_current(process_id);
    load_data_segments(USER_DATA_SELECTOR);
    load_page_directory(directory);

    // SAFETY:
    // The registers were seeded (and later saved) with Ring 3 selectors and
    // a mapped stack and instruction pointer; the task's address space is
    // active. All locks were released above.
    unsafe {
        enter_userland(&registers);
    }
}

/// Re-enters the task that is currently scheduled, or panics when the task
/// list is empty. Tail of the `exit` path.
pub fn exec_current() -> ! {
    match current() {
        Some(id) => exec(id),
        None => panic!("No tasks left to run."),
    }
}

/// Builds an `iret` frame from the saved registers and drops to Ring 3.
///
/// # Safety
///
/// `registers` must describe a resumable Ring 3 context (user selectors,
/// mapped stack and code) and the matching address space must be active.
/// This function never returns; the kernel stack it ran on is simply
/// abandoned, to be reused from the top at the next trap.
#[unsafe(naked)]
unsafe extern "C" fn enter_userland(registers: &Registers) -> ! {
    // SAFETY:
    //
    // On entry (cdecl): [esp + 4] = pointer to the saved Registers.
    //
    // The stub builds the five-word iret frame (ss, esp, eflags, cs, eip)
    // from the saved state, reloads the data segments with the user
    // selector, restores the general-purpose registers, and irets. ebx is
    // the working base pointer and is restored last.
    unsafe {
        naked_asm!(
            "mov ebx, [esp + 4]",
            // iret frame, pushed innermost-last.
            "push dword ptr [ebx + 44]", // ss
            "push dword ptr [ebx + 40]", // esp
            "push dword ptr [ebx + 36]", // eflags
            "push dword ptr [ebx + 32]", // cs
            "push dword ptr [ebx + 28]", // eip
            // Data segments to user data; the stack segment comes from the
            // iret frame.
            "mov ax, [ebx + 44]",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            // General-purpose registers from the saved frame.
            "mov edi, [ebx + 0]",
            "mov esi, [ebx + 4]",
            "mov ebp, [ebx + 8]",
            "mov edx, [ebx + 16]",
            "mov ecx, [ebx + 20]",
            "mov eax, [ebx + 24]",
            "mov ebx, [ebx + 12]",
            "iretd",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_fresh_task_registers_target_ring3() {
        let registers = Registers::user_default();
        assert_eq!(registers.cs, USER_CODE_SELECTOR as u32, "User code selector.");
        assert_eq!(registers.ss, USER_DATA_SELECTOR as u32, "User data selector.");
        assert_eq!(registers.cs & 3, 3, "RPL must be 3.");
        assert_eq!(
            registers.eflags, 0x202,
            "Interrupts must come on with the first iret.",
        );
        assert_eq!(registers.ip, TASK_LOAD_VIRTUAL_ADDRESS, "Entry point.");
    }

    #[test_case]
    fn test_task_list_links_stay_circular() {
        let a = new_task(0).expect("task a");
        let b = new_task(1).expect("task b");
        let c = new_task(2).expect("task c");

        {
            let tasks = TASKS.lock();
            let ta = tasks.slots[a].as_ref().expect("a live");
            let tb = tasks.slots[b].as_ref().expect("b live");
            let tc = tasks.slots[c].as_ref().expect("c live");
            assert_eq!(ta.next, b, "a -> b");
            assert_eq!(tb.next, c, "b -> c");
            assert_eq!(tc.next, a, "c wraps to a");
            assert_eq!(ta.prev, c, "a wraps back to c");
        }

        // Removing the middle task relinks its neighbours.
        free_task(b);
        {
            let tasks = TASKS.lock();
            let ta = tasks.slots[a].as_ref().expect("a live");
            let tc = tasks.slots[c].as_ref().expect("c live");
            assert_eq!(ta.next, c, "a -> c after removal");
            assert_eq!(tc.prev, a, "c <- a after removal");
            assert!(tasks.slots[b].is_none(), "b slot is recycled");
        }

        free_task(a);
        free_task(c);
        assert!(current().is_none(), "Empty list has no current task.");
        assert!(list_head().is_none(), "Empty list has no head.");
    }

    #[test_case]
    fn test_removing_current_task_advances_current() {
        let a = new_task(0).expect("task a");
        let b = new_task(1).expect("task b");

        assert_eq!(current(), Some(a), "First task becomes current.");
        let now = free_task(a);
        assert_eq!(now, Some(b), "Removal advances to the next task.");
        assert_eq!(current(), Some(b));
        free_task(b);
    }
}
