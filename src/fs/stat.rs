//! Attribute views handed to callers.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Inode number
    pub ino: u32,

    /// File type and permission bits
    pub mode: u32,

    /// Number of links; always 1, the format has no hard links
    pub nlink: u32,

    /// Owning user
    pub uid: u32,

    /// Owning group
    pub gid: u32,

    /// Size in bytes
    pub size: u64,

    /// Access time; mirrors `mtime`, the format does not track atime
    pub atime: u32,

    /// Modification time, seconds since the epoch
    pub mtime: u32,

    /// Change time; mirrors `mtime`
    pub ctime: u32,
}

/// Filesystem-wide statistics, `statvfs`-shaped. Fields the format has
/// no data for are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statvfs {
    pub bsize: u32,
    pub frsize: u32,
    pub blocks: u32,
    pub bfree: u32,
    pub bavail: u32,
    pub files: u32,
    pub ffree: u32,
    pub favail: u32,
    pub fsid: u32,
    pub flag: u32,
    pub namemax: u32,
}

/// Timestamps supplied to `utime`.
#[derive(Debug, Clone, Copy)]
pub struct Utimbuf {
    /// Ignored; the format does not track atime.
    pub actime: u32,
    pub modtime: u32,
}

/// The caller's identity, stamped onto freshly created inodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cred {
    pub uid: u32,
    pub gid: u32,
}
