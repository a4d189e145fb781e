//! Disk access.
//!
//! Two kinds of disk are supported: the primary-master ATA drive driven by
//! PIO, and a RAM-backed disk used for fixtures and ramdisk-style images.
//! Both read whole 512-byte sectors; byte-granular access sits on top in
//! [`streamer`].

pub mod streamer;

use alloc::vec::Vec;

use spin::Mutex;

use crate::config::MAX_DISKS;
use crate::error::{Error, Result};
use crate::fs;
use crate::io;

/// Size of one disk sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// ATA command-block registers of the primary bus.
const ATA_DATA_PORT: u16 = 0x1F0;
const ATA_SECTOR_COUNT_PORT: u16 = 0x1F2;
const ATA_LBA_LOW_PORT: u16 = 0x1F3;
const ATA_LBA_MID_PORT: u16 = 0x1F4;
const ATA_LBA_HIGH_PORT: u16 = 0x1F5;
const ATA_DRIVE_PORT: u16 = 0x1F6;
const ATA_COMMAND_PORT: u16 = 0x1F7;

/// `READ SECTORS` PIO command.
const ATA_COMMAND_READ_SECTORS: u8 = 0x20;

/// Set when the drive has PIO data ready to transfer.
const ATA_STATUS_DRQ: u8 = 0x08;

/// Select the master drive in LBA mode.
const ATA_SELECT_MASTER_LBA: u8 = 0xE0;

/// What backs a disk.
pub enum DiskKind {
    /// The primary-master ATA drive, addressed through the legacy port
    /// range.
    Ata,
    /// An in-memory image. Reads copy out of the buffer.
    Ram(Vec<u8>),
}

/// A block device the kernel can read sectors from.
pub struct Disk {
    /// Index of the disk; doubles as the drive number in paths like `0:/`.
    pub id: u8,
    /// Sector size in bytes. Always [`SECTOR_SIZE`] for now.
    pub sector_size: usize,
    kind: DiskKind,
}

impl Disk {
    /// Creates a disk record backed by `kind`.
    #[must_use]
    pub const fn new(id: u8, kind: DiskKind) -> Self {
        Self {
            id,
            sector_size: SECTOR_SIZE,
            kind,
        }
    }

    /// Reads `count` sectors starting at `lba` into `buf`.
    ///
    /// # Errors
    ///
    /// `InvalidArg` when `buf` is too small, `Io` when the read runs past
    /// the end of a RAM image.
    pub fn read_sectors(&self, lba: usize, count: usize, buf: &mut [u8]) -> Result<()> {
        if buf.len() < count * SECTOR_SIZE {
            return Err(Error::InvalidArg);
        }

        match &self.kind {
            DiskKind::Ata => ata_read_sectors(lba, count, buf),
            DiskKind::Ram(image) => {
                let start = lba * SECTOR_SIZE;
                let end = start + count * SECTOR_SIZE;
                let source = image.get(start..end).ok_or(Error::Io)?;
                buf[..count * SECTOR_SIZE].copy_from_slice(source);
                Ok(())
            }
        }
    }
}

/// Reads sectors from the primary-master ATA drive with PIO.
///
/// The LBA is split across the four address registers with the master/LBA
/// select bits in the top nibble; after issuing `READ SECTORS` the status
/// register is polled for DRQ before each 256-word burst.
fn ata_read_sectors(lba: usize, count: usize, buf: &mut [u8]) -> Result<()> {
    // SAFETY:
    // The port sequence is the documented PIO read protocol for the primary
    // bus, and `buf` has been checked to hold `count` sectors.
    unsafe {
        io::outb(ATA_DRIVE_PORT, ((lba >> 24) as u8 & 0x0F) | ATA_SELECT_MASTER_LBA);
        io::outb(ATA_SECTOR_COUNT_PORT, count as u8);
        io::outb(ATA_LBA_LOW_PORT, (lba & 0xFF) as u8);
        io::outb(ATA_LBA_MID_PORT, ((lba >> 8) & 0xFF) as u8);
        io::outb(ATA_LBA_HIGH_PORT, ((lba >> 16) & 0xFF) as u8);
        io::outb(ATA_COMMAND_PORT, ATA_COMMAND_READ_SECTORS);

        for sector in 0..count {
            while io::inb(ATA_COMMAND_PORT) & ATA_STATUS_DRQ == 0 {}

            let words = buf.as_mut_ptr().add(sector * SECTOR_SIZE) as *mut u16;
            io::insw(ATA_DATA_PORT, words, SECTOR_SIZE / 2);
        }
    }
    Ok(())
}

static DISKS: Mutex<[Option<Disk>; MAX_DISKS]> = Mutex::new([const { None }; MAX_DISKS]);

/// Probes for disks and binds a filesystem to each one that a driver
/// recognizes. Must run after [`fs::init`].
pub fn search_and_init() {
    insert(Disk::new(0, DiskKind::Ata));

    match fs::resolve(0) {
        Ok(name) => log::info!("disk 0: mounted {name}"),
        Err(err) => log::warn!("disk 0: no filesystem bound ({err:?})"),
    }
}

/// Registers `disk`, replacing any previous disk with the same id.
pub fn insert(disk: Disk) {
    let mut disks = DISKS.lock();
    let slot = disk.id as usize;
    assert!(slot < MAX_DISKS, "Disk id out of range.");
    disks[slot] = Some(disk);
}

/// Runs `f` with the disk at `index`.
///
/// # Errors
///
/// `Io` when no disk with that index exists.
pub fn with_disk<T>(index: u8, f: impl FnOnce(&Disk) -> Result<T>) -> Result<T> {
    let disks = DISKS.lock();
    let disk = disks
        .get(index as usize)
        .and_then(Option::as_ref)
        .ok_or(Error::Io)?;
    f(disk)
}

/// Reads sectors from the disk at `index`. Convenience wrapper used by the
/// streamer.
///
/// # Errors
///
/// `Io` when the disk does not exist or the read fails.
pub fn read_sectors(index: u8, lba: usize, count: usize, buf: &mut [u8]) -> Result<()> {
    with_disk(index, |disk| disk.read_sectors(lba, count, buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test_case]
    fn test_ram_disk_reads_the_requested_sector() {
        let mut image = vec![0u8; SECTOR_SIZE * 4];
        image[SECTOR_SIZE] = 0xAB;
        image[SECTOR_SIZE * 2 - 1] = 0xCD;
        let disk = Disk::new(3, DiskKind::Ram(image));

        let mut buf = [0u8; SECTOR_SIZE];
        disk.read_sectors(1, 1, &mut buf).expect("read failed");
        assert_eq!(buf[0], 0xAB, "First byte of sector 1 expected.");
        assert_eq!(buf[SECTOR_SIZE - 1], 0xCD, "Last byte of sector 1 expected.");
    }

    #[test_case]
    fn test_ram_disk_rejects_reads_past_the_image() {
        let disk = Disk::new(3, DiskKind::Ram(vec![0u8; SECTOR_SIZE]));

        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(
            disk.read_sectors(1, 1, &mut buf),
            Err(Error::Io),
            "Reading past the image must fail.",
        );
    }

    #[test_case]
    fn test_short_buffer_is_rejected() {
        let disk = Disk::new(3, DiskKind::Ram(vec![0u8; SECTOR_SIZE * 2]));

        let mut buf = [0u8; SECTOR_SIZE];
        assert_eq!(
            disk.read_sectors(0, 2, &mut buf),
            Err(Error::InvalidArg),
            "The buffer must hold every requested sector.",
        );
    }
}
