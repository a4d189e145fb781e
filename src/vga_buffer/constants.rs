/// Number of text rows on the emulated VGA display.
pub const BUFFER_HEIGHT: usize = 20;

/// Number of text columns on the emulated VGA display.
pub const BUFFER_WIDTH: usize = 80;

/// ASCII code that the keyboard driver delivers for backspace.
pub const BACKSPACE: u8 = 0x08;
