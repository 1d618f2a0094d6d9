//! Block devices backed by memory and by an image file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::bio::BlockDevice;
use crate::error::{Error, Result};
use crate::param::BSIZE;

/// An image held entirely in memory. The device the test suites run on.
pub struct MemDisk {
    data: Vec<u8>,
}

impl MemDisk {
    pub fn new(nblocks: u32) -> Self {
        Self {
            data: vec![0; nblocks as usize * BSIZE],
        }
    }

    fn span(&self, lba: u32, nblks: u32) -> Result<(usize, usize)> {
        let start = lba as usize * BSIZE;
        let len = nblks as usize * BSIZE;
        if start + len > self.data.len() {
            return Err(Error::Io);
        }
        Ok((start, len))
    }
}

impl BlockDevice for MemDisk {
    fn block_read(&mut self, buf: &mut [u8], lba: u32, nblks: u32) -> Result<()> {
        let (start, len) = self.span(lba, nblks)?;
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(())
    }

    fn block_write(&mut self, buf: &[u8], lba: u32, nblks: u32) -> Result<()> {
        let (start, len) = self.span(lba, nblks)?;
        self.data[start..start + len].copy_from_slice(&buf[..len]);
        Ok(())
    }
}

/// An image file on the host filesystem. Writes go straight through to
/// the file so the image stays consistent across a clean shutdown.
pub struct FileDisk {
    file: File,
}

impl FileDisk {
    /// Open an existing image.
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }

    /// Create a zero-filled image of `nblocks` blocks, truncating any
    /// existing file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, nblocks: u32) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(nblocks as u64 * BSIZE as u64)?;
        Ok(Self { file })
    }

    fn seek_to(&mut self, lba: u32) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(lba as u64 * BSIZE as u64))
            .map_err(|err| {
                debug!("disk: seek to block {} failed: {}", lba, err);
                Error::Io
            })?;
        Ok(())
    }
}

impl BlockDevice for FileDisk {
    fn block_read(&mut self, buf: &mut [u8], lba: u32, nblks: u32) -> Result<()> {
        self.seek_to(lba)?;
        let len = nblks as usize * BSIZE;
        self.file.read_exact(&mut buf[..len]).map_err(|err| {
            debug!("disk: read of {} blocks at {} failed: {}", nblks, lba, err);
            Error::Io
        })
    }

    fn block_write(&mut self, buf: &[u8], lba: u32, nblks: u32) -> Result<()> {
        self.seek_to(lba)?;
        let len = nblks as usize * BSIZE;
        self.file.write_all(&buf[..len]).map_err(|err| {
            debug!("disk: write of {} blocks at {} failed: {}", nblks, lba, err);
            Error::Io
        })?;
        self.file.flush().map_err(|_| Error::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::ZERO_BLOCK;

    #[test]
    fn memdisk_bounds() {
        let mut disk = MemDisk::new(4);
        let mut buf = ZERO_BLOCK;
        assert!(disk.block_read(&mut buf, 3, 1).is_ok());
        assert_eq!(disk.block_read(&mut buf, 4, 1), Err(Error::Io));
        assert_eq!(disk.block_read(&mut buf, 3, 2), Err(Error::Io));
    }

    #[test]
    fn filedisk_persists() {
        let path = std::env::temp_dir().join(format!("flatfs-disk-{}.img", std::process::id()));
        {
            let mut disk = FileDisk::create(&path, 4).unwrap();
            let mut block = ZERO_BLOCK;
            block[17] = 0x42;
            disk.block_write(&block, 2, 1).unwrap();
        }
        {
            let mut disk = FileDisk::open(&path).unwrap();
            let mut block = ZERO_BLOCK;
            disk.block_read(&mut block, 2, 1).unwrap();
            assert_eq!(block[17], 0x42);
        }
        std::fs::remove_file(&path).unwrap();
    }
}
