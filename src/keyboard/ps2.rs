//! PS/2 keyboard driver.
//!
//! Talks to the Intel 8042 controller: enables the first port at init and
//! registers an interrupt handler that pulls raw set-1 scancodes off the
//! data port. Scancode-to-character decoding is delegated to the
//! `pc_keyboard` crate; decoded characters are queued into the current
//! process's keyboard buffer.

use lazy_static::lazy_static;
use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

use crate::interrupts;
use crate::io;
use crate::keyboard;

/// Command register of the 8042 controller.
const PS2_COMMAND_PORT: u16 = 0x64;

/// Data port scancodes are read from.
const PS2_DATA_PORT: u16 = 0x60;

/// Command enabling the first PS/2 port.
const PS2_COMMAND_ENABLE_FIRST_PORT: u8 = 0xAE;

/// Interrupt vector of IRQ 1 after the PIC remap.
const KEYBOARD_INTERRUPT: usize = 0x21;

lazy_static! {
    static ref KEYBOARD: Mutex<Keyboard<layouts::Us104Key, ScancodeSet1>> =
        Mutex::new(Keyboard::new(
            ScancodeSet1::new(),
            layouts::Us104Key,
            HandleControl::Ignore,
        ));
}

/// Enables the first controller port and hooks the keyboard IRQ.
pub fn init() {
    // SAFETY:
    // Writing the enable command to the 8042 command register is the
    // documented way to switch the first port on.
    unsafe {
        io::outb(PS2_COMMAND_PORT, PS2_COMMAND_ENABLE_FIRST_PORT);
    }

    if interrupts::register_interrupt_handler(KEYBOARD_INTERRUPT, handle_interrupt).is_err() {
        log::error!("failed to register the keyboard interrupt handler");
    }
}

/// IRQ 1 handler: drains one scancode from the controller.
fn handle_interrupt() {
    // SAFETY:
    // The data port read both fetches the scancode and acknowledges the
    // controller.
    let scancode = unsafe { io::inb(PS2_DATA_PORT) };
    push_scancode(scancode);
}

/// Decodes one raw scancode and, when it completes an ASCII keystroke,
/// queues it for the current process. Non-ASCII keys (arrows, function
/// keys) are ignored.
pub fn push_scancode(scancode: u8) {
    let mut decoder = KEYBOARD.lock();

    if let Ok(Some(key_event)) = decoder.add_byte(scancode) {
        if let Some(DecodedKey::Unicode(character)) = decoder.process_keyevent(key_event) {
            if character.is_ascii() {
                keyboard::push(character as u8);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_scancode_decoding_produces_ascii() {
        // 0x1E is 'a' pressed in scancode set 1.
        let mut decoder = KEYBOARD.lock();
        let event = decoder
            .add_byte(0x1E)
            .expect("valid scancode")
            .expect("complete key event");
        let decoded = decoder.process_keyevent(event);
        drop(decoder);

        assert!(
            matches!(decoded, Some(DecodedKey::Unicode('a'))),
            "Scancode 0x1E must decode to 'a'.",
        );

        // Release the key so later tests see a clean decoder state.
        let mut decoder = KEYBOARD.lock();
        let _ = decoder.add_byte(0x9E);
    }
}
