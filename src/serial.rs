//! COM1 serial output, used for logging and for test reporting.

use core::fmt;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::io;

/// A 16550-compatible UART addressed through port I/O.
pub struct SerialPort {
    base: u16,
}

impl SerialPort {
    /// Creates a driver for the UART whose first register is at `base`.
    const fn new(base: u16) -> Self {
        Self { base }
    }

    /// Programs the UART: 38400 baud, 8 data bits, no parity, one stop bit,
    /// FIFOs enabled, interrupts disabled (the port is polled).
    fn init(&mut self) {
        // SAFETY:
        // All writes target registers of the UART at `base`, which is not
        // shared with any other driver.
        unsafe {
            io::outb(self.base + 1, 0x00); // Disable UART interrupts.
            io::outb(self.base + 3, 0x80); // Enable DLAB to set the divisor.
            io::outb(self.base, 0x03); // Divisor low byte: 38400 baud.
            io::outb(self.base + 1, 0x00); // Divisor high byte.
            io::outb(self.base + 3, 0x03); // 8 bits, no parity, one stop bit.
            io::outb(self.base + 2, 0xC7); // Enable and clear FIFOs.
            io::outb(self.base + 4, 0x0B); // DTR + RTS + OUT2.
        }
    }

    /// Busy-waits until the transmit holding register is empty, then sends
    /// one byte.
    fn send(&mut self, byte: u8) {
        // SAFETY:
        // Polling the line status register and writing the data register are
        // the documented transmit sequence for the 16550.
        unsafe {
            while io::inb(self.base + 5) & 0x20 == 0 {}
            io::outb(self.base, byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.send(byte);
        }
        Ok(())
    }
}

lazy_static! {
    /// The first serial port (COM1).
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut serial_port = SerialPort::new(0x3F8);
        serial_port.init();
        Mutex::new(serial_port)
    };
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    use core::fmt::Write;

    #[expect(
        clippy::expect_used,
        reason = "Serial port should be correctly initialized."
    )]
    SERIAL1
        .lock()
        .write_fmt(args)
        .expect("Failed to print on serial port.");
}

/// Print to host machine through serial port interface.
#[macro_export]
macro_rules! serial_print {
    ($($args:tt)*) => {
        $crate::serial::_print(format_args!($($args)*));
    };
}

/// Print to host machine through serial port interface a line.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($fmt:expr) => ($crate::serial_print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::serial_print!(
        concat!($fmt, "\n"), $($arg)*));
}
