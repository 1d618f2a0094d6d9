//! flatfs: a tiny user-space filesystem over a fixed-size block image.
//!
//! Four layers, leaves first:
//!   + Blocks: a validated device adapter and a bitmap allocator for
//!     raw 4 KiB disk blocks.
//!   + Files: inode reading, writing, metadata. An inode's number is
//!     the number of the block holding it; ten direct pointers index
//!     its content, so nothing grows past 40960 bytes.
//!   + Directories: inodes with special contents (a list of other
//!     inodes!), 32-byte entries, 128 per block.
//!   + Names: slash-delimited paths of at most ten components, each at
//!     most 27 bytes, resolved by walking directories from the root.
//!
//! [`FileSystem`] is the handle a host binding drives: mount (or
//! format) a [`BlockDevice`], then call the POSIX-shaped operations —
//! `getattr`, `readdir`, `create`, `mkdir`, `unlink`, `rmdir`,
//! `rename`, `chmod`, `utime`, `truncate`, `read`, `write`, `statfs` —
//! with plain path strings. Every operation returns a [`Result`] whose
//! error carries its POSIX kind; nothing panics across the operation
//! surface, and nothing is retried internally.
//!
//! There is no journal, no cache, and no locking: writes go straight to
//! the device, and operations are expected to arrive one at a time.

mod bio;
mod disk;
mod error;
mod fs;
mod param;

pub use bio::{Block, BlockDevice};
pub use disk::{FileDisk, MemDisk};
pub use error::{Error, Result};
pub use fs::{Cred, Dinode, FileMode, FileSystem, Stat, Statvfs, Utimbuf};
pub use param::{BSIZE, DIRSIZ, MAXFILE, NBLOCK, NDIRECT, NPATH};
