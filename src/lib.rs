//! ConiferOS: a small 32-bit protected-mode x86 kernel written in Rust.
//! It boots from a FAT16-formatted ATA disk, manages memory with two-level
//! page tables, runs user programs in Ring 3 (flat binaries or ELF32) and
//! services them through an `int 0x80` trap gate.
//! This started as a learning project and still reads like one on purpose:
//! every subsystem is small enough to hold in your head at once.
//! Refer to the README.md file for more information about the features supported.

#![no_std]
#![cfg_attr(test, no_main)]
#![feature(custom_test_frameworks)]
#![feature(naked_functions)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

pub mod config;
pub mod disk;
pub mod error;
pub mod fs;
pub mod gdt;
pub mod interrupts;
pub mod io;
pub mod keyboard;
pub mod loader;
pub mod logger;
pub mod memory;
pub mod serial;
pub mod syscall;
pub mod task;
pub mod vga_buffer;

const QEMU_EXIT_PORT: u16 = 0xf4;

/// Brings the whole kernel up, in dependency order: console, GDT and TSS,
/// logging, the heap, filesystem drivers, disks, the IDT and PIC, the
/// keyboard, the kernel address space (which turns paging on) and finally
/// the syscall table. After this the kernel is ready to load and execute
/// user processes.
pub fn init() {
    vga_buffer::initialize();
    gdt::init();
    logger::init();
    memory::allocator::init();
    fs::init();
    disk::search_and_init();
    interrupts::init_idt();
    keyboard::init();

    if task::init_kernel_space().is_err() {
        panic!("Failed to build the kernel address space.");
    }

    syscall::register_commands();
    log::info!("kernel initialized");
}

/// Halts the CPU until the next interrupt, forever.
pub fn hlt_loop() -> ! {
    loop {
        // SAFETY:
        // `hlt` simply idles the CPU until the next interrupt.
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
        }
    }
}

/// Test entry point for cargo test.
#[cfg(test)]
#[unsafe(no_mangle)]
pub extern "C" fn _start() -> ! {
    // The in-kernel tests allocate freely; everything else they need is
    // initialized per test case.
    memory::allocator::init();
    test_main();

    #[expect(
        clippy::empty_loop,
        reason = "Infinite loop after the test main function is done."
    )]
    loop {}
}

/// Define possible exit code for qemu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    /// Define a successfull exit status
    Success = 0x10,
    /// Define a failure exit status
    Failure = 0x11,
}

/// Exit qemu with a specific exit code.
/// Connect to an IO Port to exit qemu.
/// The exit device is configured on the QEMU command line.
pub fn exit_qemu(exit_code: QemuExitCode) {
    // SAFETY:
    // The isa-debug-exit device reads one double word from the exit port.
    unsafe {
        io::outl(QEMU_EXIT_PORT, exit_code as u32);
    }
}

/// Panic handler for external (functional) tests.
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failure);

    #[expect(
        clippy::empty_loop,
        reason = "Endless loop if a test panics. It should not be possible as we exit_qemu before."
    )]
    loop {}
}

/// Custom test runner for `no_std` testing.
pub fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }

    exit_qemu(QemuExitCode::Success);
}

/// Panic handler for unit tests.
#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("[failed]\n");
    serial_println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failure);
    loop {}
}

/// Trait to generalize tests cases.
/// Encapsulate the prints
pub trait Testable {
    /// Function that encapsulate the test run function.
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        use core::any::type_name;

        serial_print!("{}...\t", type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}
