/// Block size in bytes. Every on-disk object occupies whole blocks.
pub const BSIZE: usize = 4096;

/// Default image size in blocks, used when formatting a fresh device.
pub const NBLOCK: u32 = 400;

/// Direct data block pointers per inode.
pub const NDIRECT: usize = 10;

/// Maximum file or directory size in bytes.
pub const MAXFILE: usize = NDIRECT * BSIZE;

/// Maximum useful file-name length. The on-disk name field is one byte
/// longer to hold the NUL terminator.
pub const DIRSIZ: usize = 27;

/// Maximum number of path components an operation looks at.
pub const NPATH: usize = 10;

/// Blocks reserved at the front of the image: superblock, bitmap, root.
pub const NMETA: u32 = 3;

/// root i-number; the root directory inode lives in block 2.
pub const ROOTINO: u32 = 2;
