//! Process management syscalls.

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::{MAX_COMMAND_ARG_LENGTH, MAX_FILE_PATH_CHARS, MAX_NUM_ARGS};
use crate::error::Error;
use crate::interrupts::InterruptFrame;
use crate::task::{self, process};

/// Converts a NUL-terminated byte buffer to an owned string.
fn string_from_buffer(buffer: &[u8]) -> String {
    let length = buffer.iter().position(|&byte| byte == 0).unwrap_or(buffer.len());
    String::from_utf8_lossy(&buffer[..length]).into_owned()
}

/// Command 6: loads a new program and switches the current task to it.
///
/// The caller pushes, in reverse order: the filename pointer, the argv
/// pointer and argc. Both the argv array and the strings it points at live
/// in the caller's address space and are copied out before the old image
/// is left behind. On success this never returns; on failure the caller
/// receives a negative error code.
pub fn execve(_frame: &mut InterruptFrame) -> u32 {
    let (argc, argv_user, filename_user) = match (
        task::current_stack_item(0),
        task::current_stack_item(1),
        task::current_stack_item(2),
    ) {
        (Ok(argc), Ok(argv), Ok(filename)) => (argc as usize, argv, filename),
        _ => return Error::InvalidArg.code() as u32,
    };

    if argc > MAX_NUM_ARGS {
        return Error::InvalidArg.code() as u32;
    }

    let mut filename_buffer = [0u8; MAX_FILE_PATH_CHARS];
    if let Err(err) = task::copy_string_from_user(filename_user, &mut filename_buffer) {
        return err.code() as u32;
    }
    let filename = string_from_buffer(&filename_buffer);

    // First the argv pointer array, then each argument string it names.
    let mut args = Vec::with_capacity(argc);
    if argc > 0 {
        let mut pointer_bytes = [0u8; MAX_NUM_ARGS * 4];
        if let Err(err) = task::copy_from_user(argv_user, &mut pointer_bytes[..argc * 4]) {
            return err.code() as u32;
        }

        for i in 0..argc {
            let pointer = u32::from_le_bytes(
                pointer_bytes[i * 4..i * 4 + 4].try_into().unwrap_or([0; 4]),
            );

            let mut arg_buffer = [0u8; MAX_COMMAND_ARG_LENGTH];
            if let Err(err) = task::copy_string_from_user(pointer, &mut arg_buffer) {
                return err.code() as u32;
            }
            args.push(string_from_buffer(&arg_buffer));
        }
    }

    match process::load(&filename, &args) {
        Ok(pid) => {
            let task_id = process::with_process(pid, |proc| Ok(proc.task()));
            match task_id {
                Ok(task_id) => task::exec(task_id),
                Err(err) => err.code() as u32,
            }
        }
        Err(err) => err.code() as u32,
    }
}

/// Command 7: terminates the calling process and drops into the next
/// scheduled task. Panics when the last task exits; there is nothing left
/// to run.
pub fn exit(_frame: &mut InterruptFrame) -> u32 {
    let Some(pid) = task::current_process_id() else {
        return Error::InvalidArg.code() as u32;
    };

    process::terminate(pid);
    task::exec_current()
}
