//! End-to-end test of the filesystem stack: path parser, VFS, FAT16 driver
//! and disk streamer, run against an in-memory FAT16 volume registered as
//! disk 0.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(conifer_os::test_runner)]
#![reexport_test_harness_main = "test_main"]
#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::panic::PanicInfo;

use conifer_os::disk::{self, Disk, DiskKind, SECTOR_SIZE};
use conifer_os::error::Error;
use conifer_os::fs::{self, FileStatFlags, SeekWhence};
use conifer_os::memory::allocator;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    allocator::init();
    fs::init();
    disk::insert(Disk::new(0, DiskKind::Ram(build_fat16_image())));
    fs::resolve(0).expect("the fixture volume must resolve as FAT16");

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

const HELLO_CONTENT: &[u8] = b"Hello World\n";

fn put_u16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_dir_entry(
    image: &mut [u8],
    offset: usize,
    name: &[u8; 11],
    attributes: u8,
    first_cluster: u16,
    filesize: u32,
) {
    image[offset..offset + 11].copy_from_slice(name);
    image[offset + 11] = attributes;
    put_u16(image, offset + 26, first_cluster);
    image[offset + 28..offset + 32].copy_from_slice(&filesize.to_le_bytes());
}

/// A minimal FAT16 volume: one reserved sector, two 4-sector FATs, a
/// 4-sector root directory (64 entries) and data from sector 13. It holds
/// `hello.txt` (cluster 2) and `bin/shell.bin` (directory cluster 3, file
/// cluster 4).
fn build_fat16_image() -> Vec<u8> {
    let mut image = vec![0u8; 20 * SECTOR_SIZE];

    put_u16(&mut image, 11, 512);
    image[13] = 1; // sectors per cluster
    put_u16(&mut image, 14, 1); // reserved sectors
    image[16] = 2; // FAT copies
    put_u16(&mut image, 17, 64); // root entries
    put_u16(&mut image, 19, 20); // total sectors
    image[21] = 0xF8; // media type
    put_u16(&mut image, 22, 4); // sectors per FAT
    image[36] = 0x80; // drive number
    image[38] = 0x29; // extended boot signature
    put_u16(&mut image, 510, 0xAA55);

    for fat_start in [SECTOR_SIZE, 5 * SECTOR_SIZE] {
        put_u16(&mut image, fat_start, 0xFFF8);
        put_u16(&mut image, fat_start + 2, 0xFFFF);
        put_u16(&mut image, fat_start + 4, 0xFFF8); // hello.txt
        put_u16(&mut image, fat_start + 6, 0xFFF8); // bin/
        put_u16(&mut image, fat_start + 8, 0xFFF8); // shell.bin
    }

    let root = 9 * SECTOR_SIZE;
    put_dir_entry(
        &mut image,
        root,
        b"HELLO   TXT",
        0x00,
        2,
        HELLO_CONTENT.len() as u32,
    );
    put_dir_entry(&mut image, root + 32, b"BIN        ", 0x10, 3, 0);

    let hello = 13 * SECTOR_SIZE;
    image[hello..hello + HELLO_CONTENT.len()].copy_from_slice(HELLO_CONTENT);

    let bin = 14 * SECTOR_SIZE;
    put_dir_entry(&mut image, bin, b"SHELL   BIN", 0x00, 4, 9);

    let shell = 15 * SECTOR_SIZE;
    image[shell..shell + 9].copy_from_slice(b"SHELLBIN\n");

    image
}

/// Boot-and-print scenario: open, seek, partial read, stat.
#[test_case]
fn test_open_seek_read_stat() {
    let fd = fs::fopen("0:/hello.txt", "r").expect("fopen failed");

    fs::fseek(fd, 5, SeekWhence::Set).expect("fseek failed");
    let mut buf = [0u8; 7];
    let items = fs::fread(&mut buf, 1, 7, fd).expect("fread failed");
    assert_eq!(items, 7, "Seven single-byte items expected.");
    assert_eq!(&buf, b" World\n", "Read must honor the seek position.");

    let stat = fs::fstat(fd).expect("fstat failed");
    assert_eq!(stat.filesize, 12, "hello.txt is 12 bytes.");
    assert!(!stat.flags.contains(FileStatFlags::READ_ONLY));

    fs::fclose(fd).expect("fclose failed");
}

/// Filenames are matched case-insensitively.
#[test_case]
fn test_open_is_case_insensitive() {
    let fd = fs::fopen("0:/HELLO.TXT", "r").expect("fopen failed");
    let mut buf = [0u8; 12];
    let items = fs::fread(&mut buf, 1, 12, fd).expect("fread failed");
    assert_eq!(items, 12);
    assert_eq!(&buf, HELLO_CONTENT);
    fs::fclose(fd).expect("fclose failed");
}

/// Paths resolve through subdirectories.
#[test_case]
fn test_open_through_subdirectory() {
    let fd = fs::fopen("0:/bin/shell.bin", "r").expect("fopen failed");
    let mut buf = [0u8; 9];
    let items = fs::fread(&mut buf, 1, 9, fd).expect("fread failed");
    assert_eq!(items, 9);
    assert_eq!(&buf, b"SHELLBIN\n");
    fs::fclose(fd).expect("fclose failed");
}

/// Relative paths never reach the filesystem.
#[test_case]
fn test_relative_path_is_rejected() {
    assert_eq!(
        fs::fopen("bin/shell.bin", "r"),
        Err(Error::BadPath),
        "Paths must be absolute.",
    );
}

/// Only mode "r" is supported by the FAT16 driver.
#[test_case]
fn test_write_mode_is_rejected() {
    assert_eq!(
        fs::fopen("0:/hello.txt", "w"),
        Err(Error::ReadOnly),
        "FAT16 is mounted read-only.",
    );
}

/// A missing file surfaces as an I/O error.
#[test_case]
fn test_missing_file_fails() {
    assert_eq!(
        fs::fopen("0:/nothere.txt", "r"),
        Err(Error::Io),
        "Unknown names must not open.",
    );
}

/// Descriptors are recycled after close.
#[test_case]
fn test_descriptors_are_recycled() {
    let fd1 = fs::fopen("0:/hello.txt", "r").expect("first open");
    fs::fclose(fd1).expect("close failed");
    let fd2 = fs::fopen("0:/hello.txt", "r").expect("second open");
    assert_eq!(fd1, fd2, "The lowest free slot is handed out again.");
    fs::fclose(fd2).expect("close failed");
}
