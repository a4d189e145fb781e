//! Test that should panic.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use conifer_os::config::MAX_ISR80H_COMMANDS;
use conifer_os::interrupts::InterruptFrame;
use conifer_os::{exit_qemu, serial_println, syscall, QemuExitCode};

/// Entry point for the test.
#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();

    #[expect(
        clippy::empty_loop,
        reason = "Infinite loop after the test main function is done."
    )]
    loop {}
}

/// Test runner for this test file.
pub fn test_runner(tests: &[&dyn Fn()]) {
    serial_println!("Running {} tests", tests.len());
    for test in tests {
        test();
        serial_println!("[test did not panic]");
        exit_qemu(QemuExitCode::Failure);
    }
    exit_qemu(QemuExitCode::Success);
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    serial_println!("[ok]");
    exit_qemu(QemuExitCode::Success);
    loop {}
}

fn stub_command(_frame: &mut InterruptFrame) -> u32 {
    0
}

/// Registering the same syscall command id twice must panic.
/// # Panics
/// Fail if the duplicate registration is accepted.
#[test_case]
fn duplicate_syscall_registration_panics() {
    serial_println!("should_panic::duplicate_syscall_registration_panics...\t");
    syscall::register_command(MAX_ISR80H_COMMANDS - 1, stub_command);
    syscall::register_command(MAX_ISR80H_COMMANDS - 1, stub_command);
}
