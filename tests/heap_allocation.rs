//! Tests for the block-bitmap kernel heap in a `no_std` environment.
#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(conifer_os::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_assert_message)]
extern crate alloc;

use alloc::boxed::Box;
use alloc::vec::Vec;

use core::panic::PanicInfo;

use conifer_os::memory::allocator::{self, kfree, kmalloc};
use conifer_os::memory::heap::HEAP_BLOCK_SIZE;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    allocator::init();

    test_main();
    #[expect(clippy::empty_loop)]
    loop {}
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    conifer_os::test_panic_handler(info)
}

#[test_case]
fn when_creating_simple_allocation_then_memory_is_allocated() {
    let heap_value_1 = Box::new(41);
    let heap_value_2 = Box::new(42);

    assert_eq!(*heap_value_1, 41);
    assert_eq!(*heap_value_2, 42);
}

#[test_case]
fn when_creating_large_vec_then_memory_is_allocated() {
    let mut vec = Vec::new();
    for i in 0..1000u64 {
        vec.push(i);
    }
    assert_eq!(vec.iter().sum::<u64>(), (0..1000).sum());
}

#[test_case]
fn when_allocations_are_freed_then_blocks_are_reused() {
    // Boxes are dropped at the end of each round, so the same blocks must
    // be handed out again instead of leaking toward exhaustion.
    let first = Box::new(0u64);
    let first_address = core::ptr::from_ref(&*first) as usize;
    drop(first);

    for i in 0..10_000usize {
        let x = Box::new(i);
        assert_eq!(*x, i);
        assert_eq!(
            core::ptr::from_ref(&*x) as usize,
            first_address,
            "First fit must keep reusing the freed block.",
        );
    }
}

#[test_case]
fn when_freeing_first_fit_returns_the_same_address() {
    let p1 = kmalloc(50).expect("p1");
    let p2 = kmalloc(5000).expect("p2");
    let p3 = kmalloc(5600).expect("p3");

    assert_eq!(p2 as usize - p1 as usize, HEAP_BLOCK_SIZE);
    assert_eq!(p3 as usize - p2 as usize, 2 * HEAP_BLOCK_SIZE);

    kfree(p1);
    let p4 = kmalloc(50).expect("p4");
    assert_eq!(p4, p1, "A freed single block is the first fit for 50 bytes.");

    kfree(p2);
    kfree(p3);
    kfree(p4);
}

#[test_case]
fn when_allocating_all_addresses_are_block_aligned() {
    let sizes = [1usize, 17, 4096, 4097, 100_000];
    let mut held = [core::ptr::null_mut(); 5];

    for (slot, size) in sizes.iter().enumerate() {
        let ptr = kmalloc(*size).expect("alloc");
        assert_eq!(ptr as usize % HEAP_BLOCK_SIZE, 0);
        held[slot] = ptr;
    }
    for ptr in held {
        kfree(ptr);
    }
}
