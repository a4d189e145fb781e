//! VGA text-mode console.
//! It provides a safe interface to write to the VGA text buffer, including
//! the cursor-addressed writes and backspace handling that the console
//! syscalls rely on.

#![allow(unused_imports, reason = "Imports are used in test cases.")]
use core::fmt::Write;
use writer::WRITER;

mod buffer;
pub mod colors;
mod constants;
#[macro_use]
pub mod macros;
pub mod writer;

/// Clear the screen and home the cursor. Called once at boot before any
/// output happens.
pub fn initialize() {
    WRITER.lock().clear();
}

/// Write a single character at the cursor with the given VGA attribute byte.
pub fn write_char_with_attribute(byte: u8, attribute: u8) {
    WRITER
        .lock()
        .write_byte_with_color(byte, colors::ColorCode::from_attribute(attribute));
}

/// Test that printing many lines will not panic.
#[test_case]
fn test_when_printing_many_lines_should_not_panic() {
    for _ in 0..200 {
        println!("test many print output.");
    }
}

/// Test that a line a line will be printed on the screen.
/// # Panics
/// Fail if the line is not printed on the screen.
#[test_case]
fn test_when_printing_a_line_should_appear_in_vga_buffer() {
    let line = "Some line that fits on a single line";

    let mut writer = WRITER.lock();

    #[expect(
        clippy::uninlined_format_args,
        reason = "This is a test, we want to use format_args!"
    )]
    writeln!(writer, "\n{}", line).expect("Failed to write line to vga buffer.");
    let row = writer.row_position - 1;
    for (i, c) in line.chars().enumerate() {
        let screen_char = writer.buffer.chars[row][i].read();
        assert_eq!(
            char::from(screen_char.ascii_character),
            c,
            "Character mismatch at position {i}.",
        );
    }
}

/// Test that backspace erases the previously written character.
#[test_case]
fn test_when_backspacing_previous_cell_is_blanked() {
    let mut writer = WRITER.lock();

    writer.write_byte(b'\n');
    writer.write_byte(b'x');
    let row = writer.row_position;
    let col = writer.column_position - 1;
    writer.write_byte(0x08);

    let screen_char = writer.buffer.chars[row][col].read();
    assert_eq!(
        screen_char.ascii_character, b' ',
        "Backspace must blank the previous cell.",
    );
    assert_eq!(
        writer.column_position, col,
        "Backspace must move the cursor back by one.",
    );
}
