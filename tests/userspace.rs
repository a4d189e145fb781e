//! Integration test for the user-space layout.
//!
//! The Ring 3 side of the kernel is a contract between constants: the
//! fixed load address, the stack window below it, the argument block below
//! that, and the GDT selectors with their RPLs. A user program only runs
//! correctly when all of them line up, so this test pins them.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(conifer_os::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(missing_docs)]

use core::panic::PanicInfo;

use conifer_os::config::{
    COMMAND_LINE_ARGS_VIRTUAL_ADDRESS, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR,
    MAX_COMMAND_ARG_LENGTH, MAX_NUM_ARGS, TASK_LOAD_VIRTUAL_ADDRESS, TASK_STACK_SIZE,
    TASK_STACK_VIRTUAL_ADDRESS, TASK_STACK_VIRTUAL_ADDRESS_END, USER_CODE_SELECTOR,
    USER_DATA_SELECTOR,
};
use conifer_os::interrupts::SYSCALL_INTERRUPT;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    test_main();

    #[expect(
        clippy::empty_loop,
        reason = "Infinite loop after the test main function is done."
    )]
    loop {}
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    conifer_os::test_panic_handler(info)
}

/// Stack boundaries must be page-aligned and consistent.
#[test_case]
fn test_stack_window_is_consistent() {
    assert_eq!(
        TASK_STACK_VIRTUAL_ADDRESS_END + TASK_STACK_SIZE as u32,
        TASK_STACK_VIRTUAL_ADDRESS,
        "Stack end plus size must equal the stack top.",
    );
    assert_eq!(
        TASK_STACK_VIRTUAL_ADDRESS % 4096,
        0,
        "The stack top must be page-aligned.",
    );
    assert_eq!(
        TASK_STACK_VIRTUAL_ADDRESS_END % 4096,
        0,
        "The stack end must be page-aligned.",
    );
}

/// The executable, stack and argument block must not overlap.
#[test_case]
fn test_user_regions_do_not_overlap() {
    assert!(
        TASK_STACK_VIRTUAL_ADDRESS <= TASK_LOAD_VIRTUAL_ADDRESS,
        "The stack sits below the executable image.",
    );

    let arg_block_len = (MAX_NUM_ARGS * 4 + MAX_NUM_ARGS * MAX_COMMAND_ARG_LENGTH) as u32;
    assert!(
        COMMAND_LINE_ARGS_VIRTUAL_ADDRESS + arg_block_len <= TASK_STACK_VIRTUAL_ADDRESS_END,
        "The argument block sits below the stack window.",
    );
    assert_eq!(
        COMMAND_LINE_ARGS_VIRTUAL_ADDRESS % 4096,
        0,
        "The argument block must be page-aligned.",
    );
}

/// Selectors must match the GDT layout with the expected privilege levels.
#[test_case]
fn test_selectors_carry_the_expected_rpl() {
    assert_eq!(KERNEL_CODE_SELECTOR, 0x08, "Second GDT entry, RPL 0.");
    assert_eq!(KERNEL_DATA_SELECTOR, 0x10, "Third GDT entry, RPL 0.");
    assert_eq!(USER_CODE_SELECTOR, 0x1b, "Fourth GDT entry, RPL 3.");
    assert_eq!(USER_DATA_SELECTOR, 0x23, "Fifth GDT entry, RPL 3.");
    assert_eq!(USER_CODE_SELECTOR & 3, 3, "User code RPL must be 3.");
    assert_eq!(USER_DATA_SELECTOR & 3, 3, "User data RPL must be 3.");
}

/// The syscall vector is part of the user ABI and must never move.
#[test_case]
fn test_syscall_interrupt_index_is_0x80() {
    assert_eq!(
        SYSCALL_INTERRUPT, 0x80,
        "Syscall interrupt vector must be 0x80.",
    );
}
