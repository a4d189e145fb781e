//! ELF32 executable loading.
//!
//! Only statically linked `ET_EXEC` images are accepted: 32-bit class,
//! little-endian, with a program header table and an entry point equal to
//! the fixed task load address. The whole file is pulled into a kernel
//! buffer; `PT_LOAD` segments are later mapped out of that buffer into the
//! process address space, so their "physical" addresses are simply offsets
//! into it.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::mem::size_of;

use bitflags::bitflags;

use crate::config::TASK_LOAD_VIRTUAL_ADDRESS;
use crate::error::{Error, Result};
use crate::fs::{self, SeekWhence};

/// The four bytes every ELF file starts with.
const ELF_SIGNATURE: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Size of `e_ident`.
const EI_NIDENT: usize = 16;
/// Index of the class byte in `e_ident`.
const EI_CLASS: usize = 4;
/// Index of the data-encoding byte in `e_ident`.
const EI_DATA: usize = 5;

/// Invalid class.
const ELFCLASSNONE: u8 = 0;
/// 32-bit objects.
const ELFCLASS32: u8 = 1;

/// Invalid data encoding.
const ELFDATANONE: u8 = 0;
/// Two's complement little-endian.
const ELFDATA2LSB: u8 = 1;

/// Executable file type.
const ET_EXEC: u16 = 2;

/// Loadable segment type.
pub const PT_LOAD: u32 = 1;

bitflags! {
    /// Segment permission bits (`p_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// Executable segment.
        const EXECUTE = 0x01;
        /// Writable segment.
        const WRITE = 0x02;
        /// Readable segment.
        const READ = 0x04;
    }
}

/// The ELF32 file header.
#[derive(Clone, Copy)]
#[repr(C, packed)]
pub struct Elf32Ehdr {
    /// Identification bytes: signature, class, encoding, version, padding.
    pub e_ident: [u8; EI_NIDENT],
    /// Object file type.
    pub e_type: u16,
    /// Target architecture.
    pub e_machine: u16,
    /// Object file version.
    pub e_version: u32,
    /// Virtual address where execution starts.
    pub e_entry: u32,
    /// File offset of the program header table.
    pub e_phoff: u32,
    /// File offset of the section header table.
    pub e_shoff: u32,
    /// Processor-specific flags.
    pub e_flags: u32,
    /// Size of this header.
    pub e_ehsize: u16,
    /// Size of one program header table entry.
    pub e_phentsize: u16,
    /// Number of program header table entries.
    pub e_phnum: u16,
    /// Size of one section header table entry.
    pub e_shentsize: u16,
    /// Number of section header table entries.
    pub e_shnum: u16,
    /// Section header table index of the section name string table.
    pub e_shstrndx: u16,
}

/// One program header: describes a segment of the run-time image.
#[derive(Clone, Copy)]
#[repr(C, packed)]
pub struct Elf32Phdr {
    /// Segment type; only `PT_LOAD` is honored.
    pub p_type: u32,
    /// Offset of the segment's first byte in the file.
    pub p_offset: u32,
    /// Virtual address of the segment's first byte in memory.
    pub p_vaddr: u32,
    /// Physical address, where that is relevant. Ignored here.
    pub p_paddr: u32,
    /// Segment size in the file.
    pub p_filesz: u32,
    /// Segment size in memory.
    pub p_memsz: u32,
    /// Permission flags.
    pub p_flags: u32,
    /// Alignment constraint.
    pub p_align: u32,
}

impl Elf32Phdr {
    /// Permission flags as a typed set.
    #[must_use]
    pub fn flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.p_flags)
    }
}

/// An ELF executable loaded into a kernel buffer, with the covering virtual
/// range of its loadable segments.
pub struct ElfFile {
    filename: String,
    buffer: Vec<u8>,
    virtual_base: u32,
    virtual_end: u32,
}

impl ElfFile {
    /// Reads the file at `filename` and validates it as a loadable ELF32
    /// executable.
    ///
    /// # Errors
    ///
    /// `InvalidFormat` when the file is not an acceptable ELF image (the
    /// caller may then retry it as a flat binary); `InvalidArg` when it is
    /// valid ELF but its entry point is not the task load address; plus any
    /// VFS error while reading.
    pub fn load(filename: &str) -> Result<Self> {
        let fd = fs::fopen(filename, "r")?;
        let result = Self::load_from_descriptor(filename, fd);
        let _ = fs::fclose(fd);
        result
    }

    fn load_from_descriptor(filename: &str, fd: usize) -> Result<Self> {
        let stat = fs::fstat(fd)?;

        let mut buffer = vec![0u8; stat.filesize as usize];
        fs::fseek(fd, 0, SeekWhence::Set)?;
        let read = fs::fread(&mut buffer, stat.filesize as usize, 1, fd)?;
        if read != 1 {
            return Err(Error::Io);
        }

        let mut elf_file = Self {
            filename: String::from(filename),
            buffer,
            virtual_base: 0,
            virtual_end: 0,
        };
        elf_file.validate()?;
        elf_file.scan_load_segments();

        if elf_file.header().e_entry != TASK_LOAD_VIRTUAL_ADDRESS {
            // Accepted as ELF but not loadable at our fixed entry; this is
            // a hard failure rather than a binary downgrade.
            return Err(Error::InvalidArg);
        }

        Ok(elf_file)
    }

    /// Path the executable was loaded from.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The ELF header.
    ///
    /// The buffer is guaranteed long enough by [`validate`](Self::validate).
    #[must_use]
    pub fn header(&self) -> Elf32Ehdr {
        // SAFETY:
        // `validate` checked the buffer holds a full header; the packed
        // type has alignment 1 and no invalid bit patterns.
        unsafe { core::ptr::read_unaligned(self.buffer.as_ptr() as *const Elf32Ehdr) }
    }

    /// Virtual address of the first byte of the executable's entry code.
    #[must_use]
    pub fn entry(&self) -> u32 {
        self.header().e_entry
    }

    /// Program headers, in table order.
    pub fn program_headers(&self) -> impl Iterator<Item = Elf32Phdr> + '_ {
        let header = self.header();
        let table_offset = header.e_phoff as usize;
        let count = header.e_phnum as usize;

        (0..count).map(move |index| {
            let offset = table_offset + index * size_of::<Elf32Phdr>();

            // SAFETY:
            // `validate` checked that the whole table lies inside the
            // buffer; the packed type has alignment 1.
            unsafe {
                core::ptr::read_unaligned(
                    self.buffer.as_ptr().add(offset) as *const Elf32Phdr
                )
            }
        })
    }

    /// Address of a segment's bytes inside the kernel buffer. Because the
    /// kernel identity-maps physical memory, this doubles as the physical
    /// address the segment will be mapped from.
    #[must_use]
    pub fn segment_address(&self, phdr: &Elf32Phdr) -> u32 {
        self.buffer.as_ptr() as u32 + phdr.p_offset
    }

    /// Lowest virtual address covered by any loadable segment.
    #[must_use]
    pub const fn virtual_base(&self) -> u32 {
        self.virtual_base
    }

    /// One past the highest virtual address covered by any loadable
    /// segment's file data.
    #[must_use]
    pub const fn virtual_end(&self) -> u32 {
        self.virtual_end
    }

    /// Checks everything the loader relies on: signature, class, encoding,
    /// type, and a program header table that lies inside the file.
    fn validate(&self) -> Result<()> {
        if self.buffer.len() < size_of::<Elf32Ehdr>() {
            return Err(Error::InvalidFormat);
        }
        if self.buffer[..4] != ELF_SIGNATURE {
            return Err(Error::InvalidFormat);
        }

        let header = self.header();
        let class = header.e_ident[EI_CLASS];
        if class != ELFCLASSNONE && class != ELFCLASS32 {
            return Err(Error::InvalidFormat);
        }

        let encoding = header.e_ident[EI_DATA];
        if encoding != ELFDATANONE && encoding != ELFDATA2LSB {
            return Err(Error::InvalidFormat);
        }

        if header.e_type != ET_EXEC {
            return Err(Error::InvalidFormat);
        }
        if header.e_phoff == 0 {
            return Err(Error::InvalidFormat);
        }

        let table_end = header.e_phoff as usize
            + header.e_phnum as usize * size_of::<Elf32Phdr>();
        if table_end > self.buffer.len() {
            return Err(Error::InvalidFormat);
        }

        // Segment data must also lie inside the file.
        for phdr in self.program_headers() {
            if phdr.p_type != PT_LOAD {
                continue;
            }
            let segment_end = phdr.p_offset as usize + phdr.p_filesz as usize;
            if segment_end > self.buffer.len() {
                return Err(Error::InvalidFormat);
            }
        }

        Ok(())
    }

    /// Records the covering `[virtual_base, virtual_end)` range across all
    /// loadable segments. Segments of any other type are ignored.
    fn scan_load_segments(&mut self) {
        let mut base: Option<u32> = None;
        let mut end: Option<u32> = None;

        for phdr in self.program_headers() {
            if phdr.p_type != PT_LOAD {
                continue;
            }

            let segment_end = phdr.p_vaddr + phdr.p_filesz;
            base = Some(match base {
                Some(current) => current.min(phdr.p_vaddr),
                None => phdr.p_vaddr,
            });
            end = Some(match end {
                Some(current) => current.max(segment_end),
                None => segment_end,
            });
        }

        self.virtual_base = base.unwrap_or(0);
        self.virtual_end = end.unwrap_or(0);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn elf_from_bytes(buffer: Vec<u8>) -> Result<ElfFile> {
        let mut elf_file = ElfFile {
            filename: String::from("test"),
            buffer,
            virtual_base: 0,
            virtual_end: 0,
        };
        elf_file.validate()?;
        elf_file.scan_load_segments();
        Ok(elf_file)
    }

    #[test_case]
    fn test_valid_image_is_accepted() {
        let code = [0xCD, 0x80, 0xEB, 0xFE];
        let image = test_image::build(TASK_LOAD_VIRTUAL_ADDRESS, &code, 0x05);

        let elf_file = elf_from_bytes(image).expect("valid image rejected");
        assert_eq!(elf_file.entry(), TASK_LOAD_VIRTUAL_ADDRESS);
        assert_eq!(elf_file.virtual_base(), TASK_LOAD_VIRTUAL_ADDRESS);
        assert_eq!(
            elf_file.virtual_end(),
            TASK_LOAD_VIRTUAL_ADDRESS + code.len() as u32,
            "The covering range ends after the single segment.",
        );
    }

    #[test_case]
    fn test_loadable_segment_flags_decode() {
        let image = test_image::build(TASK_LOAD_VIRTUAL_ADDRESS, &[0x90], 0x05);
        let elf_file = elf_from_bytes(image).expect("valid image rejected");

        let phdr = elf_file
            .program_headers()
            .find(|phdr| phdr.p_type == PT_LOAD)
            .expect("one loadable segment expected");
        assert!(phdr.flags().contains(SegmentFlags::READ));
        assert!(phdr.flags().contains(SegmentFlags::EXECUTE));
        assert!(!phdr.flags().contains(SegmentFlags::WRITE));
    }

    #[test_case]
    fn test_bad_signature_is_invalid_format() {
        let mut image = test_image::build(TASK_LOAD_VIRTUAL_ADDRESS, &[0x90], 0x05);
        image[0] = 0x7E;
        assert!(
            matches!(elf_from_bytes(image), Err(Error::InvalidFormat)),
            "A wrong signature downgrades the file to a flat binary.",
        );
    }

    #[test_case]
    fn test_wrong_class_is_invalid_format() {
        let mut image = test_image::build(TASK_LOAD_VIRTUAL_ADDRESS, &[0x90], 0x05);
        image[EI_CLASS] = 2; // ELFCLASS64
        assert!(matches!(elf_from_bytes(image), Err(Error::InvalidFormat)));
    }

    #[test_case]
    fn test_truncated_image_is_invalid_format() {
        let image = test_image::build(TASK_LOAD_VIRTUAL_ADDRESS, &[0x90; 64], 0x05);
        let truncated = image[..image.len() - 32].to_vec();
        assert!(
            matches!(elf_from_bytes(truncated), Err(Error::InvalidFormat)),
            "Segments reaching past the file must be rejected.",
        );
    }

    #[test_case]
    fn test_non_executable_type_is_invalid_format() {
        let mut image = test_image::build(TASK_LOAD_VIRTUAL_ADDRESS, &[0x90], 0x05);
        image[16] = 1; // ET_REL
        assert!(matches!(elf_from_bytes(image), Err(Error::InvalidFormat)));
    }
}
