//! GDT and TSS initialization.
//! This module sets up the Global Descriptor Table (GDT) and the Task State Segment (TSS).
//! It includes both kernel and user mode segment descriptors to support Ring 3 execution.
//!
//! The stage-2 loader installs a provisional GDT so the CPU can reach the
//! kernel in protected mode; the kernel immediately replaces it with this
//! one, which adds the Ring 3 descriptors and the TSS.

use core::arch::asm;
use core::mem::size_of;

use lazy_static::lazy_static;

use crate::config::{
    KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, KERNEL_STACK_ADDRESS, TOTAL_GDT_SEGMENTS,
};

/// Limits that need more than 20 bits force a descriptor into page
/// granularity.
const MAX_20_BITS: u32 = 0xF_FFFF;

/// A segment descriptor before encoding: base, limit and the access byte.
struct SegmentDescriptor {
    base: u32,
    limit: u32,
    access: u8,
}

/// The wire format of a GDT entry: eight bytes with the base and limit
/// scattered across them.
#[derive(Clone, Copy)]
#[repr(transparent)]
struct RawDescriptor([u8; 8]);

impl RawDescriptor {
    const fn zero() -> Self {
        Self([0; 8])
    }
}

/// The 32-bit Task State Segment. Only `ss0`/`esp0` matter to this kernel:
/// they tell the CPU which stack to switch to when an interrupt arrives in
/// Ring 3.
#[derive(Clone, Copy)]
#[repr(C, packed)]
struct TaskStateSegment {
    link: u32,
    esp0: u32,
    ss0: u32,
    esp1: u32,
    ss1: u32,
    esp2: u32,
    ss2: u32,
    cr3: u32,
    eip: u32,
    eflags: u32,
    eax: u32,
    ecx: u32,
    edx: u32,
    ebx: u32,
    esp: u32,
    ebp: u32,
    esi: u32,
    edi: u32,
    es: u32,
    cs: u32,
    ss: u32,
    ds: u32,
    fs: u32,
    gs: u32,
    ldtr: u32,
    iopb: u32,
}

impl TaskStateSegment {
    const fn new() -> Self {
        Self {
            link: 0,
            esp0: KERNEL_STACK_ADDRESS,
            ss0: KERNEL_DATA_SELECTOR as u32,
            esp1: 0,
            ss1: 0,
            esp2: 0,
            ss2: 0,
            cr3: 0,
            eip: 0,
            eflags: 0,
            eax: 0,
            ecx: 0,
            edx: 0,
            ebx: 0,
            esp: 0,
            ebp: 0,
            esi: 0,
            edi: 0,
            es: 0,
            cs: 0,
            ss: 0,
            ds: 0,
            fs: 0,
            gs: 0,
            ldtr: 0,
            iopb: 0,
        }
    }
}

/// Index of the TSS descriptor within the GDT.
const TSS_GDT_INDEX: u16 = 5;

static TSS: TaskStateSegment = TaskStateSegment::new();

lazy_static! {
    /// The six descriptors: null, kernel code, kernel data, user code,
    /// user data, TSS. The access bytes follow the flat-model convention:
    /// `0x9A`/`0x92` for Ring 0 code/data, `0xF8`/`0xF2` for Ring 3
    /// code/data, `0xE9` for an available 32-bit TSS with DPL 3.
    static ref GDT: [RawDescriptor; TOTAL_GDT_SEGMENTS] = {
        let descriptors = [
            SegmentDescriptor { base: 0, limit: 0, access: 0x00 },
            SegmentDescriptor { base: 0, limit: 0xFFFF_FFFF, access: 0x9A },
            SegmentDescriptor { base: 0, limit: 0xFFFF_FFFF, access: 0x92 },
            SegmentDescriptor { base: 0, limit: 0xFFFF_FFFF, access: 0xF8 },
            SegmentDescriptor { base: 0, limit: 0xFFFF_FFFF, access: 0xF2 },
            SegmentDescriptor {
                base: core::ptr::addr_of!(TSS) as u32,
                limit: size_of::<TaskStateSegment>() as u32,
                access: 0xE9,
            },
        ];

        let mut gdt = [RawDescriptor::zero(); TOTAL_GDT_SEGMENTS];
        let mut i = 0;
        while i < TOTAL_GDT_SEGMENTS {
            gdt[i] = encode_descriptor(&descriptors[i]);
            i += 1;
        }
        gdt
    };
}

/// The operand of `lgdt`: table size minus one, then the linear base address.
#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// Encodes a structured descriptor into the scattered wire format.
///
/// Limits that do not fit in 20 bits are converted to page granularity; the
/// flat 4 GiB segments take this route (`0xFFFFFFFF >> 12` with G = 1).
fn encode_descriptor(source: &SegmentDescriptor) -> RawDescriptor {
    let mut limit = source.limit;

    // 0x40 = byte granularity with 32-bit default operand size.
    let mut flags: u8 = 0x40;

    if limit > MAX_20_BITS {
        assert!(
            limit & 0xFFF == 0xFFF,
            "Limit cannot be represented with page granularity."
        );
        limit >>= 12;
        // 1100 0000: G = 1 (4 KiB units), D/B = 1.
        flags = 0xC0;
    }

    let mut raw = [0u8; 8];
    raw[0] = (limit & 0xFF) as u8;
    raw[1] = ((limit >> 8) & 0xFF) as u8;
    raw[2] = (source.base & 0xFF) as u8;
    raw[3] = ((source.base >> 8) & 0xFF) as u8;
    raw[4] = ((source.base >> 16) & 0xFF) as u8;
    raw[5] = source.access;
    raw[6] = flags | ((limit >> 16) & 0x0F) as u8;
    raw[7] = ((source.base >> 24) & 0xFF) as u8;
    RawDescriptor(raw)
}

/// Loads the kernel GDT, reloads every segment register and installs the TSS.
pub fn init() {
    let pointer = GdtPointer {
        limit: (size_of::<[RawDescriptor; TOTAL_GDT_SEGMENTS]>() - 1) as u16,
        base: GDT.as_ptr() as u32,
    };

    // SAFETY:
    // The GDT is a static with a stable address and the descriptors encode a
    // flat model identical to the one currently live, so reloading the
    // segment registers does not change any effective address. The far
    // return reloads CS with the kernel code selector; the TSS descriptor
    // carries DPL 3, so the task register selector takes RPL 3 as well.
    unsafe {
        asm!(
            "lgdt [{pointer}]",
            "mov eax, {kernel_data}",
            "mov ds, ax",
            "mov es, ax",
            "mov fs, ax",
            "mov gs, ax",
            "mov ss, ax",
            "push {kernel_code}",
            "lea eax, [2f]",
            "push eax",
            "retf",
            "2:",
            "mov eax, {tss_selector}",
            "ltr ax",
            pointer = in(reg) &pointer,
            kernel_data = const KERNEL_DATA_SELECTOR as u32,
            kernel_code = const KERNEL_CODE_SELECTOR as u32,
            tss_selector = const (TSS_GDT_INDEX * 8 | 3) as u32,
            out("eax") _,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_flat_segment_is_page_granular() {
        let raw = encode_descriptor(&SegmentDescriptor {
            base: 0,
            limit: 0xFFFF_FFFF,
            access: 0x9A,
        });

        assert_eq!(raw.0[0], 0xFF, "Limit low byte must be 0xFF.");
        assert_eq!(raw.0[1], 0xFF, "Limit middle byte must be 0xFF.");
        assert_eq!(raw.0[5], 0x9A, "Access byte must be preserved.");
        assert_eq!(
            raw.0[6], 0xCF,
            "Flags must select page granularity with the top limit nibble set.",
        );
    }

    #[test_case]
    fn test_small_segment_keeps_byte_granularity() {
        let raw = encode_descriptor(&SegmentDescriptor {
            base: 0x0010_0000,
            limit: 0x68,
            access: 0xE9,
        });

        assert_eq!(raw.0[0], 0x68, "Limit low byte must match.");
        assert_eq!(raw.0[6], 0x40, "Byte granularity flags expected.");
        assert_eq!(raw.0[4], 0x10, "Base bits 16-23 must land in byte 4.");
    }
}
