use crate::vga_buffer::{
    buffer::Buffer,
    colors::{Color, ColorCode},
};
use core::fmt;
use lazy_static::lazy_static;
use spin::Mutex;

use super::{
    buffer::ScreenChar,
    constants::{BACKSPACE, BUFFER_HEIGHT, BUFFER_WIDTH},
};

lazy_static! {
    /// Global instance of the VGA buffer writer.
    /// We use lazy_static to be able to dinamically initialize the color.
    pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
        row_position: 0,
        column_position: 0,
        color_code: ColorCode::new(Color::White, Color::Black),

        // SAFETY:
        // vga buffer adress should always exist.
        buffer: unsafe { &mut *(0xb8000 as *mut Buffer) },
    });
}

////////////////////////
//   Screen Writer    //
////////////////////////

/// Represent the writer that will write to the VGA buffer.
///
/// Unlike a teletype, the writer keeps a full `(row, column)` cursor: `\n`
/// advances the row, backspace (`0x08`) blanks the previous cell, and the
/// screen scrolls one row up when the cursor passes the bottom.
pub struct Writer {
    pub row_position: usize,
    pub column_position: usize,
    pub color_code: ColorCode,
    pub buffer: &'static mut Buffer,
}

impl Writer {
    /// Place a character at an explicit cell, bypassing the cursor.
    pub fn put_char(&mut self, row: usize, col: usize, byte: u8, color_code: ColorCode) {
        if row >= BUFFER_HEIGHT || col >= BUFFER_WIDTH {
            return;
        }

        self.buffer.chars[row][col].write(ScreenChar {
            ascii_character: byte,
            color_code,
        });
    }

    /// Write a byte at the cursor and advance it.
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            BACKSPACE => self.backspace(),
            character => {
                if self.column_position >= BUFFER_WIDTH {
                    self.new_line();
                }

                let row = self.row_position;
                let col = self.column_position;

                let color_code = self.color_code;
                self.buffer.chars[row][col].write(ScreenChar {
                    ascii_character: character,
                    color_code,
                });
                self.column_position += 1;
            }
        }
    }

    /// Write a string to the VGA buffer.
    pub fn write_string(&mut self, s: &str) {
        for byte in s.bytes() {
            match byte {
                // printable ASCII byte, newline or backspace
                0x20..=0x7e | b'\n' | BACKSPACE => self.write_byte(byte),
                // not part of printable ASCII range
                _ => self.write_byte(0xfe),
            }
        }
    }

    /// Write a single byte with an explicit attribute, leaving the default
    /// color untouched. Used by the `putchar` syscall.
    pub fn write_byte_with_color(&mut self, byte: u8, color_code: ColorCode) {
        let saved = self.color_code;
        self.color_code = color_code;
        self.write_byte(byte);
        self.color_code = saved;
    }

    /// Clear the whole screen and home the cursor.
    pub fn clear(&mut self) {
        for row in 0..BUFFER_HEIGHT {
            self.clear_row(row);
        }
        self.row_position = 0;
        self.column_position = 0;
    }

    /// Advance the cursor to the start of the next row, scrolling when the
    /// bottom of the screen is reached.
    fn new_line(&mut self) {
        self.column_position = 0;
        self.row_position += 1;

        if self.row_position >= BUFFER_HEIGHT {
            self.scroll_up();
            self.row_position = BUFFER_HEIGHT - 1;
        }
    }

    /// Blank the cell before the cursor and step the cursor back.
    fn backspace(&mut self) {
        if self.row_position == 0 && self.column_position == 0 {
            return;
        }

        if self.column_position == 0 {
            self.row_position -= 1;
            self.column_position = BUFFER_WIDTH;
        }
        self.column_position -= 1;

        let blank = ScreenChar {
            ascii_character: b' ',
            color_code: self.color_code,
        };
        self.buffer.chars[self.row_position][self.column_position].write(blank);
    }

    /// Move all characters one row up and clear the last row.
    fn scroll_up(&mut self) {
        for row in 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                let character = self.buffer.chars[row][col].read();
                self.buffer.chars[row - 1][col].write(character);
            }
        }
        self.clear_row(BUFFER_HEIGHT - 1);
    }

    /// Clear a row by filling it with blank characters.
    fn clear_row(&mut self, row: usize) {
        let blank = ScreenChar {
            ascii_character: b' ',
            color_code: self.color_code,
        };
        for col in 0..BUFFER_WIDTH {
            self.buffer.chars[row][col].write(blank);
        }
    }
}

impl fmt::Write for Writer {
    /// Implement the `write_str` function from the `fmt::Write` trait to be able to
    /// support the write! and writeln! macros.
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_string(s);
        Ok(())
    }
}
