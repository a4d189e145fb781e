//! Console and keyboard syscalls.

use crate::interrupts::InterruptFrame;
use crate::keyboard;
use crate::task;
use crate::vga_buffer;

/// Longest string `print` accepts, including the NUL.
const MAX_PRINT_LENGTH: usize = 1024;

/// Default VGA attribute for user output: white on black.
const DEFAULT_ATTRIBUTE: u8 = 15;

/// Command 1: prints the NUL-terminated string at the user address on the
/// caller's stack. Returns 0, or a negative error code when the string
/// cannot be copied out of the caller's address space.
pub fn print(_frame: &mut InterruptFrame) -> u32 {
    let user_address = match task::current_stack_item(0) {
        Ok(address) => address,
        Err(err) => return err.code() as u32,
    };

    let mut buffer = [0u8; MAX_PRINT_LENGTH];
    if let Err(err) = task::copy_string_from_user(user_address, &mut buffer) {
        return err.code() as u32;
    }

    let length = buffer.iter().position(|&byte| byte == 0).unwrap_or(buffer.len());
    for &byte in &buffer[..length] {
        vga_buffer::write_char_with_attribute(byte, DEFAULT_ATTRIBUTE);
    }
    0
}

/// Command 2: pops one character from the caller's keyboard buffer, or 0
/// when none is queued.
pub fn get_key(_frame: &mut InterruptFrame) -> u32 {
    u32::from(keyboard::pop())
}

/// Command 3: writes the character on the caller's stack to the console.
pub fn put_char(_frame: &mut InterruptFrame) -> u32 {
    let character = task::current_stack_item(0).unwrap_or(0) as u8;
    vga_buffer::write_char_with_attribute(character, DEFAULT_ATTRIBUTE);
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_get_key_is_zero_with_no_current_task() {
        // With no task running there is nothing to pop from.
        let mut frame = InterruptFrame {
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
        };
        assert_eq!(get_key(&mut frame), 0, "No input means key 0.");
    }
}
