//! Kernel entry point.
//!
//! The stage-2 loader leaves the CPU in 32-bit protected mode with a flat
//! provisional GDT and jumps here. After [`conifer_os::init`] the kernel
//! loads the first user program from the boot disk and drops into Ring 3;
//! from then on it is only ever entered again by trap, interrupt or
//! syscall.

#![feature(custom_test_frameworks)]
#![test_runner(conifer_os::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![no_std]
#![no_main]

use core::panic::PanicInfo;

use conifer_os::task::{self, process};
use conifer_os::{hlt_loop, println, serial_println};

////////////////////////
//     Entry point    //
////////////////////////

/// This function is the entry point, since the loader jumps to `_start`.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".text.start")]
pub extern "C" fn _start() -> ! {
    conifer_os::init();

    #[cfg(test)]
    test_main();

    kernel_main()
}

/// Loads the first user process and hands the CPU to it.
fn kernel_main() -> ! {
    println!("Welcome to ConiferOS");

    // Prefer the ELF shell; fall back to the flat-binary build of it.
    let pid = process::load("0:/shell.elf", &[])
        .or_else(|_| process::load("0:/shell.bin", &[]));

    match pid {
        Ok(_) => match task::list_head() {
            Some(task_id) => task::exec(task_id),
            None => panic!("Process loaded but no task is runnable."),
        },
        Err(err) => {
            log::error!("failed to load the initial process: {err:?}");
            hlt_loop()
        }
    }
}

////////////////////////
//    Panic handler   //
////////////////////////

/// This function is called on panic.
#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    println!("KERNEL PANIC: {info}");
    serial_println!("KERNEL PANIC: {}", info);
    hlt_loop()
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    conifer_os::test_panic_handler(info)
}
