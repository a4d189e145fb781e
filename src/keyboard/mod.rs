//! Keyboard input.
//!
//! Keystrokes land in a per-process circular buffer. The interrupt side
//! pushes into the buffer of the *current process*; the `get_key` syscall
//! pops from the buffer of the *current task's* process. With a single CPU
//! and no preemption those are never mutated concurrently, so the ring is a
//! plain single-producer/single-consumer queue: the tail advances on push,
//! the head on pop, and `head == tail` means empty.

pub mod ps2;

use crate::config::KEYBOARD_BUFFER_SIZE;
use crate::task::{self, process};

/// Fixed-capacity character ring buffer.
pub struct KeyboardBuffer {
    buffer: [u8; KEYBOARD_BUFFER_SIZE],
    head: usize,
    tail: usize,
}

impl Default for KeyboardBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardBuffer {
    /// An empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: [0; KEYBOARD_BUFFER_SIZE],
            head: 0,
            tail: 0,
        }
    }

    /// Queues one character. Returns `false` when the buffer is full and
    /// the character was dropped; advancing the tail onto the head would
    /// make a full buffer indistinguishable from an empty one.
    pub fn push(&mut self, character: u8) -> bool {
        let next_tail = (self.tail + 1) % KEYBOARD_BUFFER_SIZE;
        if next_tail == self.head {
            return false;
        }

        self.buffer[self.tail] = character;
        self.tail = next_tail;
        true
    }

    /// Dequeues the oldest character, or `None` when the buffer is empty.
    pub fn pop(&mut self) -> Option<u8> {
        if self.head == self.tail {
            return None;
        }

        let character = self.buffer[self.head];
        self.head = (self.head + 1) % KEYBOARD_BUFFER_SIZE;
        Some(character)
    }

    /// Undoes the most recent push, used for line editing. Does nothing on
    /// an empty buffer.
    pub fn unpush(&mut self) {
        if self.tail == self.head {
            return;
        }
        self.tail = self.tail.checked_sub(1).unwrap_or(KEYBOARD_BUFFER_SIZE - 1);
    }
}

/// Queues `character` for the current process. Dropped (with a log entry)
/// when no process is current or its buffer is full.
pub fn push(character: u8) {
    let Some(pid) = process::current() else {
        return;
    };

    let result = process::with_process(pid, |proc| {
        if !proc.keyboard.push(character) {
            log::error!("keyboard buffer overflow for process {pid}");
        }
        Ok(())
    });
    let _ = result;
}

/// Pops one character from the current task's process, or 0 when none is
/// queued. Backs the `get_key` syscall.
pub fn pop() -> u8 {
    let Some(pid) = task::current_process_id() else {
        return 0;
    };

    process::with_process(pid, |proc| Ok(proc.keyboard.pop().unwrap_or(0))).unwrap_or(0)
}

/// Initializes the keyboard drivers. Just the PS/2 controller for now.
pub fn init() {
    ps2::init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_push_then_pop_round_trips() {
        let mut buffer = KeyboardBuffer::new();
        assert!(buffer.push(b'a'), "Push into an empty buffer succeeds.");
        assert!(buffer.push(b'b'), "Second push succeeds.");
        assert_eq!(buffer.pop(), Some(b'a'), "FIFO order.");
        assert_eq!(buffer.pop(), Some(b'b'), "FIFO order.");
        assert_eq!(buffer.pop(), None, "Drained buffer is empty.");
    }

    #[test_case]
    fn test_empty_means_head_equals_tail() {
        let mut buffer = KeyboardBuffer::new();
        assert_eq!(buffer.pop(), None, "A fresh buffer is empty, not full.");

        buffer.push(b'x');
        buffer.pop();
        assert_eq!(buffer.pop(), None, "head == tail is empty again.");
    }

    #[test_case]
    fn test_full_buffer_drops_the_push() {
        let mut buffer = KeyboardBuffer::new();
        for _ in 0..KEYBOARD_BUFFER_SIZE - 1 {
            assert!(buffer.push(b'x'), "Fills up to capacity minus one.");
        }
        assert!(
            !buffer.push(b'y'),
            "The push that would collide with the head is dropped.",
        );
        assert_eq!(buffer.pop(), Some(b'x'), "Queued data survives the drop.");
    }

    #[test_case]
    fn test_unpush_discards_the_newest_character() {
        let mut buffer = KeyboardBuffer::new();
        buffer.push(b'a');
        buffer.push(b'b');
        buffer.unpush();
        assert_eq!(buffer.pop(), Some(b'a'), "Oldest character remains.");
        assert_eq!(buffer.pop(), None, "The newest was discarded.");
    }

    #[test_case]
    fn test_ring_wraps_around() {
        let mut buffer = KeyboardBuffer::new();
        for round in 0..KEYBOARD_BUFFER_SIZE * 2 {
            assert!(buffer.push((round % 251) as u8), "Push must succeed.");
            assert_eq!(
                buffer.pop(),
                Some((round % 251) as u8),
                "Wrap-around must preserve order.",
            );
        }
    }
}
