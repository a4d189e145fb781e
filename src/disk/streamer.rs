//! Byte-granular disk access.
//!
//! A [`DiskStream`] is a cursor over a disk: seeking is pure arithmetic and
//! reading loads one sector at a time, copying out the slice the cursor
//! covers. Reads cross sector boundaries iteratively, so arbitrarily large
//! requests use constant stack.

use crate::disk::{self, SECTOR_SIZE};
use crate::error::Result;

/// A read cursor over one disk.
pub struct DiskStream {
    disk_id: u8,
    position: usize,
}

impl DiskStream {
    /// Opens a stream over the disk at `disk_index`, positioned at byte 0.
    ///
    /// # Errors
    ///
    /// `Io` when no such disk exists.
    pub fn new(disk_index: u8) -> Result<Self> {
        // Probe the disk now so a bad index fails at stream creation, not
        // on the first read.
        disk::with_disk(disk_index, |_| Ok(()))?;

        Ok(Self {
            disk_id: disk_index,
            position: 0,
        })
    }

    /// Repositions the cursor to the absolute byte offset `position`.
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// Current byte offset of the cursor.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Reads `out.len()` bytes at the cursor, advancing it.
    ///
    /// # Errors
    ///
    /// `Io` when a sector read fails; the cursor is left where the failure
    /// occurred.
    pub fn read(&mut self, out: &mut [u8]) -> Result<()> {
        let mut written = 0;
        let mut sector_buf = [0u8; SECTOR_SIZE];

        while written < out.len() {
            let sector = self.position / SECTOR_SIZE;
            let offset = self.position % SECTOR_SIZE;

            disk::read_sectors(self.disk_id, sector, 1, &mut sector_buf)?;

            let available = SECTOR_SIZE - offset;
            let wanted = out.len() - written;
            let to_copy = available.min(wanted);

            out[written..written + to_copy]
                .copy_from_slice(&sector_buf[offset..offset + to_copy]);

            written += to_copy;
            self.position += to_copy;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{Disk, DiskKind};
    use alloc::vec;

    /// Registers a RAM disk whose bytes count upward, so any offset's
    /// expected value is `offset % 256`.
    fn counting_disk(id: u8, sectors: usize) {
        let mut image = vec![0u8; sectors * SECTOR_SIZE];
        for (i, byte) in image.iter_mut().enumerate() {
            *byte = (i % 256) as u8;
        }
        disk::insert(Disk::new(id, DiskKind::Ram(image)));
    }

    #[test_case]
    fn test_read_within_one_sector() {
        counting_disk(2, 4);
        let mut stream = DiskStream::new(2).expect("stream creation failed");

        stream.seek(0x201);
        let mut buf = [0u8; 4];
        stream.read(&mut buf).expect("read failed");

        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04], "Bytes at 0x201 expected.");
        assert_eq!(stream.position(), 0x205, "Cursor must advance by the read.");
    }

    #[test_case]
    fn test_read_across_sector_boundary() {
        counting_disk(2, 4);
        let mut stream = DiskStream::new(2).expect("stream creation failed");

        stream.seek(SECTOR_SIZE - 2);
        let mut buf = [0u8; 4];
        stream.read(&mut buf).expect("read failed");

        assert_eq!(
            buf,
            [0xFE, 0xFF, 0x00, 0x01],
            "The read must stitch two sectors together.",
        );
    }

    #[test_case]
    fn test_large_read_spans_many_sectors() {
        counting_disk(2, 4);
        let mut stream = DiskStream::new(2).expect("stream creation failed");

        let mut buf = vec![0u8; SECTOR_SIZE * 3];
        stream.read(&mut buf).expect("read failed");

        for (i, byte) in buf.iter().enumerate() {
            assert_eq!(*byte, (i % 256) as u8, "Byte {i} mismatch.");
        }
    }

    #[test_case]
    fn test_read_past_disk_end_fails() {
        counting_disk(2, 4);
        let mut stream = DiskStream::new(2).expect("stream creation failed");

        stream.seek(SECTOR_SIZE * 4);
        let mut buf = [0u8; 1];
        assert!(stream.read(&mut buf).is_err(), "Read past the end must fail.");
    }
}
