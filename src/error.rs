//! Operation errors, tagged with their POSIX kind.
//!
//! Every fallible call in the crate returns [`Result`]. Errors are never
//! retried internally; an I/O error aborts the current operation and
//! whatever the device already committed stays committed.

use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A path component does not exist (`ENOENT`).
    NotFound,
    /// An intermediate path component is not a directory (`ENOTDIR`).
    NotDir,
    /// The operation needs a regular file but found a directory (`EISDIR`).
    IsDir,
    /// The name already exists in the parent directory (`EEXIST`).
    Exists,
    /// The directory still has entries (`ENOTEMPTY`).
    NotEmpty,
    /// Out of blocks, direct pointers, or directory slots (`ENOSPC`).
    NoSpace,
    /// Bad argument: block number out of range, write past EOF,
    /// truncate to a non-zero length, cross-directory rename (`EINVAL`).
    Invalid,
    /// The block device reported a failure (`EIO`).
    Io,
    /// The readdir filler refused further entries (`ENOMEM`).
    NoMemory,
}

impl Error {
    /// The conventional Linux errno constant for this kind. Host
    /// bindings negate it for the usual `-errno` return style.
    pub const fn errno(self) -> i32 {
        match self {
            Error::NotFound => 2,
            Error::Io => 5,
            Error::NoMemory => 12,
            Error::Exists => 17,
            Error::NotDir => 20,
            Error::IsDir => 21,
            Error::Invalid => 22,
            Error::NoSpace => 28,
            Error::NotEmpty => 39,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Error::NotFound => "no such file or directory",
            Error::NotDir => "not a directory",
            Error::IsDir => "is a directory",
            Error::Exists => "file exists",
            Error::NotEmpty => "directory not empty",
            Error::NoSpace => "no space left on device",
            Error::Invalid => "invalid argument",
            Error::Io => "input/output error",
            Error::NoMemory => "cannot allocate memory",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values() {
        assert_eq!(Error::NotFound.errno(), 2);
        assert_eq!(Error::Io.errno(), 5);
        assert_eq!(Error::Exists.errno(), 17);
        assert_eq!(Error::NotDir.errno(), 20);
        assert_eq!(Error::IsDir.errno(), 21);
        assert_eq!(Error::Invalid.errno(), 22);
        assert_eq!(Error::NoSpace.errno(), 28);
        assert_eq!(Error::NotEmpty.errno(), 39);
    }
}
