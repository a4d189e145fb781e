//! The virtual filesystem layer.
//!
//! Concrete filesystem drivers implement [`FileSystem`]; the VFS keeps the
//! driver registry, binds a driver instance to each disk at mount time, and
//! hands out integer file descriptors whose operations are dispatched to
//! the bound driver. There are far fewer layers of abstraction here than in
//! the Linux VFS (no dentries, no inodes): a descriptor links straight to
//! the filesystem that owns the file.

pub mod fat16;
pub mod pparser;

use alloc::boxed::Box;
use alloc::string::String;
use core::any::Any;

use bitflags::bitflags;
use spin::Mutex;

use crate::config::{MAX_DISKS, MAX_FILESYSTEMS, MAX_OPEN_FILES};
use crate::disk;
use crate::error::{Error, Result};

/// Where a seek offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekWhence {
    /// From the start of the file.
    Set,
    /// From the current position.
    Cur,
    /// From the end of the file. No driver implements this yet.
    End,
}

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Read-only access.
    Read,
    /// Write access.
    Write,
    /// Append access.
    Append,
}

impl FileMode {
    /// Maps a C-style mode string to a mode: `"r"`, `"w"` or `"a"`.
    ///
    /// # Errors
    ///
    /// `InvalidArg` on anything else.
    pub fn from_mode_str(mode: &str) -> Result<Self> {
        match mode.as_bytes().first() {
            Some(b'r') => Ok(Self::Read),
            Some(b'w') => Ok(Self::Write),
            Some(b'a') => Ok(Self::Append),
            _ => Err(Error::InvalidArg),
        }
    }
}

bitflags! {
    /// Flag bits reported by [`FileStat`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileStatFlags: u32 {
        /// The file cannot be written.
        const READ_ONLY = 1 << 0;
    }
}

/// Metadata returned by `fstat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Attribute flags of the file.
    pub flags: FileStatFlags,
    /// File size in bytes.
    pub filesize: u32,
}

/// Driver-private state attached to an open file. Only the driver that
/// created it knows the concrete type.
pub type FsPrivate = Box<dyn Any + Send>;

/// A concrete filesystem bound to one disk.
///
/// `open` returns the driver's private per-file state; the other operations
/// receive it back. The VFS never looks inside.
pub trait FileSystem: Send {
    /// Short human-readable driver name.
    fn name(&self) -> &'static str;

    /// Opens the file at `parts` (path components below the root).
    ///
    /// # Errors
    ///
    /// `Io` when the path does not resolve, `ReadOnly` when `mode` asks for
    /// write access on a read-only filesystem.
    fn open(&mut self, parts: &[String], mode: FileMode) -> Result<FsPrivate>;

    /// Reads up to `count` items of `elem_size` bytes into `out`. Returns
    /// the number of whole items read, which is short at end of file.
    ///
    /// # Errors
    ///
    /// `Io` on unreadable clusters or sectors.
    fn read(
        &mut self,
        private: &mut FsPrivate,
        elem_size: usize,
        count: usize,
        out: &mut [u8],
    ) -> Result<usize>;

    /// Moves the file position.
    ///
    /// # Errors
    ///
    /// `Io` when the target lies beyond the file, `Unimplemented` for
    /// [`SeekWhence::End`].
    fn seek(&mut self, private: &mut FsPrivate, offset: usize, whence: SeekWhence) -> Result<()>;

    /// Reports file metadata.
    ///
    /// # Errors
    ///
    /// `InvalidArg` when `private` does not belong to this driver.
    fn stat(&mut self, private: &mut FsPrivate) -> Result<FileStat>;

    /// Releases the per-file state.
    fn close(&mut self, private: FsPrivate);
}

/// A driver entry: probes a disk and, when it recognizes the format,
/// returns a filesystem instance bound to that disk.
pub type ResolveFn = fn(disk_id: u8) -> Result<Box<dyn FileSystem>>;

static FILESYSTEMS: Mutex<[Option<ResolveFn>; MAX_FILESYSTEMS]> =
    Mutex::new([None; MAX_FILESYSTEMS]);

static MOUNTS: Mutex<[Option<Box<dyn FileSystem>>; MAX_DISKS]> =
    Mutex::new([const { None }; MAX_DISKS]);

/// One open file: the disk it lives on and the driver's per-file state.
struct FileDescriptor {
    disk_id: u8,
    private: FsPrivate,
}

static FILE_DESCRIPTORS: Mutex<[Option<FileDescriptor>; MAX_OPEN_FILES]> =
    Mutex::new([const { None }; MAX_OPEN_FILES]);

/// Registers the compile-time filesystem drivers. Called once at boot,
/// before any disk is probed.
pub fn init() {
    insert_filesystem(fat16::resolve);
}

/// Registers a filesystem driver.
///
/// # Panics
///
/// Panics when the driver table is full; a kernel that cannot register its
/// own drivers cannot run.
pub fn insert_filesystem(resolve: ResolveFn) {
    let mut filesystems = FILESYSTEMS.lock();
    let slot = filesystems
        .iter_mut()
        .find(|slot| slot.is_none())
        .unwrap_or_else(|| panic!("No free filesystem slots."));
    *slot = Some(resolve);
}

/// Finds a driver that accepts the disk and binds it.
///
/// # Errors
///
/// `UnrecognizedFs` when no registered driver accepts the disk.
pub fn resolve(disk_id: u8) -> Result<&'static str> {
    let resolvers: [Option<ResolveFn>; MAX_FILESYSTEMS] = *FILESYSTEMS.lock();

    for resolver in resolvers.into_iter().flatten() {
        if let Ok(filesystem) = resolver(disk_id) {
            let name = filesystem.name();
            let mut mounts = MOUNTS.lock();
            let slot = mounts
                .get_mut(disk_id as usize)
                .ok_or(Error::InvalidArg)?;
            *slot = Some(filesystem);
            return Ok(name);
        }
    }

    Err(Error::UnrecognizedFs)
}

/// Opens `filename` (an absolute path like `0:/hello.txt`) with the given
/// mode string and returns a file descriptor index.
///
/// # Errors
///
/// `BadPath` for malformed paths, `Io` for missing disks or unbound
/// filesystems, `InvalidArg` for unknown modes, `OutOfMemory` when the
/// descriptor table is full, plus anything the driver's `open` reports.
pub fn fopen(filename: &str, mode_str: &str) -> Result<usize> {
    let path = pparser::parse(filename)?;

    // The disk itself must exist and have a bound filesystem.
    disk::with_disk(path.drive_number, |_| Ok(()))?;

    let mode = FileMode::from_mode_str(mode_str)?;

    let private = {
        let mut mounts = MOUNTS.lock();
        let filesystem = mounts
            .get_mut(path.drive_number as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::Io)?;
        filesystem.open(&path.parts, mode)?
    };

    let mut descriptors = FILE_DESCRIPTORS.lock();
    let index = descriptors
        .iter()
        .position(Option::is_none)
        .ok_or(Error::OutOfMemory)?;
    descriptors[index] = Some(FileDescriptor {
        disk_id: path.drive_number,
        private,
    });
    Ok(index)
}

/// Reads `count` items of `elem_size` bytes from `fd` into `out`. Returns
/// the number of whole items read.
///
/// # Errors
///
/// `InvalidArg` for bad descriptors or zero-sized requests; otherwise
/// whatever the driver reports.
pub fn fread(out: &mut [u8], elem_size: usize, count: usize, fd: usize) -> Result<usize> {
    if elem_size == 0 || count == 0 {
        return Err(Error::InvalidArg);
    }

    let mut descriptors = FILE_DESCRIPTORS.lock();
    let descriptor = descriptors
        .get_mut(fd)
        .and_then(Option::as_mut)
        .ok_or(Error::InvalidArg)?;

    let mut mounts = MOUNTS.lock();
    let filesystem = mounts
        .get_mut(descriptor.disk_id as usize)
        .and_then(Option::as_mut)
        .ok_or(Error::Io)?;

    filesystem.read(&mut descriptor.private, elem_size, count, out)
}

/// Repositions the file offset of `fd`.
///
/// # Errors
///
/// `InvalidArg` for bad descriptors; otherwise whatever the driver reports.
pub fn fseek(fd: usize, offset: usize, whence: SeekWhence) -> Result<()> {
    let mut descriptors = FILE_DESCRIPTORS.lock();
    let descriptor = descriptors
        .get_mut(fd)
        .and_then(Option::as_mut)
        .ok_or(Error::InvalidArg)?;

    let mut mounts = MOUNTS.lock();
    let filesystem = mounts
        .get_mut(descriptor.disk_id as usize)
        .and_then(Option::as_mut)
        .ok_or(Error::Io)?;

    filesystem.seek(&mut descriptor.private, offset, whence)
}

/// Reports metadata for `fd`.
///
/// # Errors
///
/// `InvalidArg` for bad descriptors; otherwise whatever the driver reports.
pub fn fstat(fd: usize) -> Result<FileStat> {
    let mut descriptors = FILE_DESCRIPTORS.lock();
    let descriptor = descriptors
        .get_mut(fd)
        .and_then(Option::as_mut)
        .ok_or(Error::InvalidArg)?;

    let mut mounts = MOUNTS.lock();
    let filesystem = mounts
        .get_mut(descriptor.disk_id as usize)
        .and_then(Option::as_mut)
        .ok_or(Error::Io)?;

    filesystem.stat(&mut descriptor.private)
}

/// Closes `fd`, releasing the driver state and freeing the slot.
///
/// # Errors
///
/// `InvalidArg` for bad descriptors.
pub fn fclose(fd: usize) -> Result<()> {
    let mut descriptors = FILE_DESCRIPTORS.lock();
    let descriptor = descriptors
        .get_mut(fd)
        .ok_or(Error::InvalidArg)?
        .take()
        .ok_or(Error::InvalidArg)?;

    let mut mounts = MOUNTS.lock();
    if let Some(filesystem) = mounts
        .get_mut(descriptor.disk_id as usize)
        .and_then(Option::as_mut)
    {
        filesystem.close(descriptor.private);
    }
    Ok(())
}
