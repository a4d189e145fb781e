//! Kernel-wide error type.
//!
//! Leaf subsystems return an [`Error`] kind; the VFS and the process loader
//! surface them unchanged. At the syscall boundary the kind is converted to
//! the negative integer that user programs see in `eax`.

/// Everything that can go wrong in the kernel, short of a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Disk I/O failed or the disk was never initialized.
    Io,
    /// Mis-aligned address, malformed argument or unknown mode.
    InvalidArg,
    /// The heap or a fixed-size kernel table is exhausted.
    OutOfMemory,
    /// The path parser rejected the path format.
    BadPath,
    /// No filesystem driver accepted the disk.
    UnrecognizedFs,
    /// A write-capable open was requested on a read-only filesystem.
    ReadOnly,
    /// The operation is not implemented (e.g. `SEEK_END`).
    Unimplemented,
    /// The requested PID or descriptor slot is already occupied.
    SlotTaken,
    /// An executable failed format validation. For ELF files the caller may
    /// downgrade the file to a flat binary.
    InvalidFormat,
}

impl Error {
    /// Returns the negative integer code for the user-facing ABI.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Io => -1,
            Self::InvalidArg => -2,
            Self::OutOfMemory => -3,
            Self::BadPath => -4,
            Self::UnrecognizedFs => -5,
            Self::ReadOnly => -6,
            Self::Unimplemented => -7,
            Self::SlotTaken => -8,
            Self::InvalidFormat => -9,
        }
    }
}

/// Shorthand for results carrying a kernel [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::Error;

    #[test_case]
    fn test_error_codes_are_negative_and_distinct() {
        let codes = [
            Error::Io.code(),
            Error::InvalidArg.code(),
            Error::OutOfMemory.code(),
            Error::BadPath.code(),
            Error::UnrecognizedFs.code(),
            Error::ReadOnly.code(),
            Error::Unimplemented.code(),
            Error::SlotTaken.code(),
            Error::InvalidFormat.code(),
        ];

        for (i, code) in codes.iter().enumerate() {
            assert!(*code < 0, "Error codes must be negative.");
            for other in &codes[i + 1..] {
                assert_ne!(code, other, "Error codes must be distinct.");
            }
        }
    }
}
