//! Interrupt handling module
//! This module provides the implementation of the Interrupt Descriptor Table (IDT)
//! and the handlers for the interrupts.
//!
//! Every vector gets its own tiny naked stub that captures the full
//! register frame (`pushad`) and funnels into one generic dispatcher with
//! its vector number. The dispatcher swaps to the kernel address space,
//! saves the interrupted task's state when a handler is registered, runs
//! the handler, swaps the task's address space back in and acknowledges
//! the PIC. The syscall vector 0x80 bypasses this path: it has its own
//! wrapper in the `syscall` module and is the only gate callable from
//! Ring 3.

pub mod pic;

use core::arch::{asm, naked_asm};
use core::mem::size_of;

use lazy_static::lazy_static;
use spin::Mutex;

use crate::config::KERNEL_CODE_SELECTOR;
use crate::error::{Error, Result};
use crate::syscall;
use crate::task;

/// Number of IDT entries the kernel installs.
pub const TOTAL_INTERRUPTS: usize = 256;

/// Vector user programs call for kernel services.
pub const SYSCALL_INTERRUPT: usize = 0x80;

/// Gate attributes: present, DPL 0, 32-bit interrupt gate.
const GATE_KERNEL: u8 = 0x8E;

/// Gate attributes: present, DPL 3, 32-bit interrupt gate.
const GATE_USER: u8 = 0xEE;

/// The register frame captured on every interrupt entry.
///
/// The first eight fields mirror the `pushad` layout (lowest address
/// first); the rest is what the CPU pushed for a Ring 3 interrupt. `esp`
/// and `ss` hold the Ring 3 stack only when the CPU actually switched
/// stacks, i.e. when the interrupt arrived from user mode.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct InterruptFrame {
    /// Destination index register.
    pub edi: u32,
    /// Source index register.
    pub esi: u32,
    /// Stack base pointer.
    pub ebp: u32,
    /// Stack pointer before `pushad`; ignored on restore.
    pub reserved_esp: u32,
    /// General register.
    pub ebx: u32,
    /// General register.
    pub edx: u32,
    /// General register.
    pub ecx: u32,
    /// General register.
    pub eax: u32,
    /// Interrupted instruction pointer.
    pub ip: u32,
    /// Interrupted code segment.
    pub cs: u32,
    /// Interrupted CPU flags.
    pub eflags: u32,
    /// Ring 3 stack pointer at the time of the interrupt.
    pub esp: u32,
    /// Ring 3 stack segment at the time of the interrupt.
    pub ss: u32,
}

/// A routine the kernel runs in response to one interrupt vector.
pub type InterruptHandler = fn();

static INTERRUPT_HANDLERS: Mutex<[Option<InterruptHandler>; TOTAL_INTERRUPTS]> =
    Mutex::new([None; TOTAL_INTERRUPTS]);

/// One gate descriptor in the IDT.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            zero: 0,
            type_attr: 0,
            offset_high: 0,
        }
    }

    fn new(handler: u32, type_attr: u8) -> Self {
        Self {
            offset_low: (handler & 0xFFFF) as u16,
            selector: KERNEL_CODE_SELECTOR,
            zero: 0,
            type_attr,
            offset_high: (handler >> 16) as u16,
        }
    }
}

/// The operand of `lidt`: table size minus one, then the base address.
#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

lazy_static! {
    static ref IDT: [IdtEntry; TOTAL_INTERRUPTS] = {
        let mut idt = [IdtEntry::missing(); TOTAL_INTERRUPTS];

        for (vector, stub) in INTERRUPT_STUBS.iter().enumerate() {
            idt[vector] = IdtEntry::new(*stub as *const () as u32, GATE_KERNEL);
        }

        // The one gate user code may invoke directly.
        idt[SYSCALL_INTERRUPT] = IdtEntry::new(
            syscall::syscall_entry_address(),
            GATE_USER,
        );

        idt
    };
}

/// Remaps the PICs, loads the IDT and hooks the divide-by-zero handler.
pub fn init_idt() {
    pic::init();

    let pointer = IdtPointer {
        limit: (TOTAL_INTERRUPTS * size_of::<IdtEntry>() - 1) as u16,
        base: IDT.as_ptr() as u32,
    };

    // SAFETY:
    // The IDT is a static with a stable address and every entry points at a
    // valid stub.
    unsafe {
        asm!("lidt [{0}]", in(reg) &pointer, options(nostack, preserves_flags));
    }

    if register_interrupt_handler(0, divide_by_zero_handler).is_err() {
        panic!("Failed to register the divide-by-zero handler.");
    }
}

/// Registers `handler` to run when `vector` fires.
///
/// # Errors
///
/// `InvalidArg` for vectors outside the table.
pub fn register_interrupt_handler(vector: usize, handler: InterruptHandler) -> Result<()> {
    let mut handlers = INTERRUPT_HANDLERS.lock();
    let slot = handlers.get_mut(vector).ok_or(Error::InvalidArg)?;
    *slot = Some(handler);
    Ok(())
}

/// Vector 0: fatal by design.
fn divide_by_zero_handler() {
    panic!("Divide by zero error.");
}

/// Enables maskable interrupts.
pub fn enable() {
    // SAFETY:
    // The IDT must be loaded first; `init_idt` runs before any caller.
    unsafe {
        asm!("sti", options(nomem, nostack));
    }
}

/// Disables maskable interrupts.
pub fn disable() {
    // SAFETY:
    // Clearing the interrupt flag has no memory effects.
    unsafe {
        asm!("cli", options(nomem, nostack));
    }
}

/// The generic dispatcher every stub funnels into.
///
/// Entered with interrupts off (all gates are interrupt gates). The
/// interrupted task's state is saved before the handler can touch
/// anything, and the handler must never call `task::exec`.
extern "C" fn generic_interrupt_entry(vector: u32, frame: &mut InterruptFrame) {
    task::swap_kernel_page_tables();

    let handler = {
        let handlers = INTERRUPT_HANDLERS.lock();
        handlers.get(vector as usize).copied().flatten()
    };

    if let Some(handler) = handler {
        task::save_current_state(frame);
        handler();
    }

    task::swap_current_task_page_tables();
    pic::end_of_interrupt();
}

/// Builds the naked entry stub for one vector: capture the registers, hand
/// (vector, frame) to the dispatcher, restore and return.
macro_rules! interrupt_stub {
    ($vector:literal) => {{
        #[unsafe(naked)]
        unsafe extern "C" fn stub() {
            // SAFETY:
            // The stub preserves every register via pushad/popad and leaves
            // the stack exactly as the CPU built it before the iret.
            unsafe {
                naked_asm!(
                    "pushad",
                    "push esp",
                    "push {vector}",
                    "call {entry}",
                    "add esp, 8",
                    "popad",
                    "iretd",
                    vector = const $vector,
                    entry = sym generic_interrupt_entry,
                );
            }
        }
        stub
    }};
}

/// One entry stub per vector, indexed by vector number.
static INTERRUPT_STUBS: [unsafe extern "C" fn(); TOTAL_INTERRUPTS] = [
    interrupt_stub!(0), interrupt_stub!(1), interrupt_stub!(2), interrupt_stub!(3),
    interrupt_stub!(4), interrupt_stub!(5), interrupt_stub!(6), interrupt_stub!(7),
    interrupt_stub!(8), interrupt_stub!(9), interrupt_stub!(10), interrupt_stub!(11),
    interrupt_stub!(12), interrupt_stub!(13), interrupt_stub!(14), interrupt_stub!(15),
    interrupt_stub!(16), interrupt_stub!(17), interrupt_stub!(18), interrupt_stub!(19),
    interrupt_stub!(20), interrupt_stub!(21), interrupt_stub!(22), interrupt_stub!(23),
    interrupt_stub!(24), interrupt_stub!(25), interrupt_stub!(26), interrupt_stub!(27),
    interrupt_stub!(28), interrupt_stub!(29), interrupt_stub!(30), interrupt_stub!(31),
    interrupt_stub!(32), interrupt_stub!(33), interrupt_stub!(34), interrupt_stub!(35),
    interrupt_stub!(36), interrupt_stub!(37), interrupt_stub!(38), interrupt_stub!(39),
    interrupt_stub!(40), interrupt_stub!(41), interrupt_stub!(42), interrupt_stub!(43),
    interrupt_stub!(44), interrupt_stub!(45), interrupt_stub!(46), interrupt_stub!(47),
    interrupt_stub!(48), interrupt_stub!(49), interrupt_stub!(50), interrupt_stub!(51),
    interrupt_stub!(52), interrupt_stub!(53), interrupt_stub!(54), interrupt_stub!(55),
    interrupt_stub!(56), interrupt_stub!(57), interrupt_stub!(58), interrupt_stub!(59),
    interrupt_stub!(60), interrupt_stub!(61), interrupt_stub!(62), interrupt_stub!(63),
    interrupt_stub!(64), interrupt_stub!(65), interrupt_stub!(66), interrupt_stub!(67),
    interrupt_stub!(68), interrupt_stub!(69), interrupt_stub!(70), interrupt_stub!(71),
    interrupt_stub!(72), interrupt_stub!(73), interrupt_stub!(74), interrupt_stub!(75),
    interrupt_stub!(76), interrupt_stub!(77), interrupt_stub!(78), interrupt_stub!(79),
    interrupt_stub!(80), interrupt_stub!(81), interrupt_stub!(82), interrupt_stub!(83),
    interrupt_stub!(84), interrupt_stub!(85), interrupt_stub!(86), interrupt_stub!(87),
    interrupt_stub!(88), interrupt_stub!(89), interrupt_stub!(90), interrupt_stub!(91),
    interrupt_stub!(92), interrupt_stub!(93), interrupt_stub!(94), interrupt_stub!(95),
    interrupt_stub!(96), interrupt_stub!(97), interrupt_stub!(98), interrupt_stub!(99),
    interrupt_stub!(100), interrupt_stub!(101), interrupt_stub!(102), interrupt_stub!(103),
    interrupt_stub!(104), interrupt_stub!(105), interrupt_stub!(106), interrupt_stub!(107),
    interrupt_stub!(108), interrupt_stub!(109), interrupt_stub!(110), interrupt_stub!(111),
    interrupt_stub!(112), interrupt_stub!(113), interrupt_stub!(114), interrupt_stub!(115),
    interrupt_stub!(116), interrupt_stub!(117), interrupt_stub!(118), interrupt_stub!(119),
    interrupt_stub!(120), interrupt_stub!(121), interrupt_stub!(122), interrupt_stub!(123),
    interrupt_stub!(124), interrupt_stub!(125), interrupt_stub!(126), interrupt_stub!(127),
    interrupt_stub!(128), interrupt_stub!(129), interrupt_stub!(130), interrupt_stub!(131),
    interrupt_stub!(132), interrupt_stub!(133), interrupt_stub!(134), interrupt_stub!(135),
    interrupt_stub!(136), interrupt_stub!(137), interrupt_stub!(138), interrupt_stub!(139),
    interrupt_stub!(140), interrupt_stub!(141), interrupt_stub!(142), interrupt_stub!(143),
    interrupt_stub!(144), interrupt_stub!(145), interrupt_stub!(146), interrupt_stub!(147),
    interrupt_stub!(148), interrupt_stub!(149), interrupt_stub!(150), interrupt_stub!(151),
    interrupt_stub!(152), interrupt_stub!(153), interrupt_stub!(154), interrupt_stub!(155),
    interrupt_stub!(156), interrupt_stub!(157), interrupt_stub!(158), interrupt_stub!(159),
    interrupt_stub!(160), interrupt_stub!(161), interrupt_stub!(162), interrupt_stub!(163),
    interrupt_stub!(164), interrupt_stub!(165), interrupt_stub!(166), interrupt_stub!(167),
    interrupt_stub!(168), interrupt_stub!(169), interrupt_stub!(170), interrupt_stub!(171),
    interrupt_stub!(172), interrupt_stub!(173), interrupt_stub!(174), interrupt_stub!(175),
    interrupt_stub!(176), interrupt_stub!(177), interrupt_stub!(178), interrupt_stub!(179),
    interrupt_stub!(180), interrupt_stub!(181), interrupt_stub!(182), interrupt_stub!(183),
    interrupt_stub!(184), interrupt_stub!(185), interrupt_stub!(186), interrupt_stub!(187),
    interrupt_stub!(188), interrupt_stub!(189), interrupt_stub!(190), interrupt_stub!(191),
    interrupt_stub!(192), interrupt_stub!(193), interrupt_stub!(194), interrupt_stub!(195),
    interrupt_stub!(196), interrupt_stub!(197), interrupt_stub!(198), interrupt_stub!(199),
    interrupt_stub!(200), interrupt_stub!(201), interrupt_stub!(202), interrupt_stub!(203),
    interrupt_stub!(204), interrupt_stub!(205), interrupt_stub!(206), interrupt_stub!(207),
    interrupt_stub!(208), interrupt_stub!(209), interrupt_stub!(210), interrupt_stub!(211),
    interrupt_stub!(212), interrupt_stub!(213), interrupt_stub!(214), interrupt_stub!(215),
    interrupt_stub!(216), interrupt_stub!(217), interrupt_stub!(218), interrupt_stub!(219),
    interrupt_stub!(220), interrupt_stub!(221), interrupt_stub!(222), interrupt_stub!(223),
    interrupt_stub!(224), interrupt_stub!(225), interrupt_stub!(226), interrupt_stub!(227),
    interrupt_stub!(228), interrupt_stub!(229), interrupt_stub!(230), interrupt_stub!(231),
    interrupt_stub!(232), interrupt_stub!(233), interrupt_stub!(234), interrupt_stub!(235),
    interrupt_stub!(236), interrupt_stub!(237), interrupt_stub!(238), interrupt_stub!(239),
    interrupt_stub!(240), interrupt_stub!(241), interrupt_stub!(242), interrupt_stub!(243),
    interrupt_stub!(244), interrupt_stub!(245), interrupt_stub!(246), interrupt_stub!(247),
    interrupt_stub!(248), interrupt_stub!(249), interrupt_stub!(250), interrupt_stub!(251),
    interrupt_stub!(252), interrupt_stub!(253), interrupt_stub!(254), interrupt_stub!(255),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_gate_encoding_splits_the_handler_address() {
        let entry = IdtEntry::new(0x0012_3456, GATE_KERNEL);
        assert_eq!({ entry.offset_low }, 0x3456, "Low half of the offset.");
        assert_eq!({ entry.offset_high }, 0x0012, "High half of the offset.");
        assert_eq!(
            { entry.selector },
            KERNEL_CODE_SELECTOR,
            "Gates always target the kernel code segment.",
        );
    }

    #[test_case]
    fn test_syscall_gate_is_user_callable() {
        let entry = IDT[SYSCALL_INTERRUPT];
        assert_eq!({ entry.type_attr }, GATE_USER, "0x80 must carry DPL 3.");

        let other = IDT[0x21];
        assert_eq!({ other.type_attr }, GATE_KERNEL, "Other gates carry DPL 0.");
    }

    #[test_case]
    fn test_every_vector_has_a_stub() {
        for (vector, entry) in IDT.iter().enumerate() {
            let offset = u32::from({ entry.offset_low }) | u32::from({ entry.offset_high }) << 16;
            assert_ne!(offset, 0, "Vector {vector} must have a handler installed.");
        }
    }

    #[test_case]
    fn test_handler_registration_rejects_bad_vectors() {
        assert!(
            register_interrupt_handler(TOTAL_INTERRUPTS, || ()).is_err(),
            "Vectors outside the table must be rejected.",
        );
    }
}
