//! The `int 0x80` kernel service interface.
//!
//! User programs push arguments on their own stack, load a command id into
//! `eax` and execute `int 0x80`. The naked wrapper captures the register
//! frame, the dispatcher swaps to the kernel address space, saves the
//! calling task's state, runs the command from a fixed-size table and
//! stores the result in the frame's `eax` slot, so the `popad` on the way
//! out hands it back to Ring 3.

pub mod heap;
pub mod io;
pub mod misc;
pub mod process;

use core::arch::naked_asm;

use spin::Mutex;

use crate::config::MAX_ISR80H_COMMANDS;
use crate::interrupts::InterruptFrame;
use crate::task;

/// A kernel routine user programs can invoke through `int 0x80`. The
/// returned value lands in the caller's `eax`.
pub type SyscallCommand = fn(&mut InterruptFrame) -> u32;

static COMMANDS: Mutex<[Option<SyscallCommand>; MAX_ISR80H_COMMANDS]> =
    Mutex::new([None; MAX_ISR80H_COMMANDS]);

/// Command ids of the registered syscalls.
#[derive(Debug, Clone, Copy)]
#[repr(u32)]
pub enum Command {
    /// Adds the two words on the caller's stack (wired-in self test).
    Sum = 0,
    /// Prints a NUL-terminated string from user memory.
    Print = 1,
    /// Pops one character from the caller's keyboard buffer.
    GetKey = 2,
    /// Prints a single character.
    PutChar = 3,
    /// Allocates user-writable memory.
    Malloc = 4,
    /// Frees memory previously returned by `Malloc`.
    Free = 5,
    /// Replaces the running image with a new program.
    Execve = 6,
    /// Terminates the calling process.
    Exit = 7,
}

/// Registers the full command set. Called once at boot.
pub fn register_commands() {
    register_command(Command::Sum as usize, misc::sum);
    register_command(Command::Print as usize, io::print);
    register_command(Command::GetKey as usize, io::get_key);
    register_command(Command::PutChar as usize, io::put_char);
    register_command(Command::Malloc as usize, heap::malloc);
    register_command(Command::Free as usize, heap::free);
    register_command(Command::Execve as usize, process::execve);
    register_command(Command::Exit as usize, process::exit);
}

/// Installs `command` at `command_id`.
///
/// # Panics
///
/// Panics on an out-of-range id or an attempt to overwrite an existing
/// command; both are kernel bugs, not runtime conditions.
pub fn register_command(command_id: usize, command: SyscallCommand) {
    let mut commands = COMMANDS.lock();
    let slot = commands
        .get_mut(command_id)
        .unwrap_or_else(|| panic!("Syscall command id out of bounds."));
    assert!(
        slot.is_none(),
        "Attempt to overwrite an existing syscall command."
    );
    *slot = Some(command);
}

/// Looks up and runs a command. Ids outside `0..MAX_ISR80H_COMMANDS` and
/// unregistered ids return 0 without entering any handler.
fn handle_command(command_id: u32, frame: &mut InterruptFrame) -> u32 {
    let command = {
        let commands = COMMANDS.lock();
        commands.get(command_id as usize).copied().flatten()
    };

    match command {
        Some(command) => command(frame),
        None => 0,
    }
}

/// The Rust half of the syscall path, called by [`syscall_entry`] with the
/// command id from `eax` and the captured frame.
extern "C" fn syscall_dispatch(command_id: u32, frame: &mut InterruptFrame) -> u32 {
    task::swap_kernel_page_tables();
    task::save_current_state(frame);

    let result = handle_command(command_id, frame);
    // `popad` on the way out restores eax from this slot, handing the
    // result to the caller.
    frame.eax = result;

    task::swap_current_task_page_tables();
    result
}

/// Naked entry for vector 0x80.
///
/// The CPU has already switched to the kernel stack from the TSS and
/// pushed the Ring 3 frame. Everything between `pushad` and `popad` runs
/// on the captured frame; the dispatcher writes the return value into the
/// frame's `eax` slot before the registers are restored.
#[unsafe(naked)]
unsafe extern "C" fn syscall_entry() {
    // SAFETY:
    // The stub matches the InterruptFrame layout: pushad captures the
    // general-purpose registers directly below the CPU frame, and the two
    // pushed words (frame pointer, command id) are popped before popad.
    unsafe {
        naked_asm!(
            "pushad",
            "push esp",
            "push eax",
            "call {dispatch}",
            "add esp, 8",
            "popad",
            "iretd",
            dispatch = sym syscall_dispatch,
        );
    }
}

/// Address of the naked entry stub, for the IDT builder.
#[must_use]
pub fn syscall_entry_address() -> u32 {
    syscall_entry as *const () as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_frame() -> InterruptFrame {
        InterruptFrame {
            edi: 0,
            esi: 0,
            ebp: 0,
            reserved_esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            ip: 0,
            cs: 0,
            eflags: 0,
            esp: 0,
            ss: 0,
        }
    }

    #[test_case]
    fn test_unknown_command_ids_return_zero() {
        let mut frame = empty_frame();
        assert_eq!(
            handle_command(MAX_ISR80H_COMMANDS as u32, &mut frame),
            0,
            "Out-of-range ids must not reach any handler.",
        );
        assert_eq!(
            handle_command(0xFFFF_FFFF, &mut frame),
            0,
            "Wildly out-of-range ids are equally harmless.",
        );
        assert_eq!(
            handle_command(MAX_ISR80H_COMMANDS as u32 - 1, &mut frame),
            0,
            "In-range but unregistered ids return zero.",
        );
    }

    #[test_case]
    fn test_registration_and_lookup() {
        fn answer(_frame: &mut InterruptFrame) -> u32 {
            42
        }

        // Use a high id that the boot-time set never claims.
        register_command(MAX_ISR80H_COMMANDS - 2, answer);
        let mut frame = empty_frame();
        assert_eq!(
            handle_command(MAX_ISR80H_COMMANDS as u32 - 2, &mut frame),
            42,
            "Registered commands must be reachable by id.",
        );
    }
}
