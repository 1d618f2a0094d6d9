//! File system implementation.  Four layers:
//!   + Blocks: allocator for raw disk blocks.
//!   + Files: inode reading, writing, metadata.
//!   + Directories: inode with special contents (list of other inodes!)
//!   + Names: paths like /a/b/c for convenient naming.
//!
//! The disk image is a flat array of 4 KiB blocks: the superblock in
//! block 0, the free-block bitmap in block 1, the root directory inode
//! in block 2, and everything after that allocated on demand as inode
//! blocks or data blocks. An inode's number is the number of the block
//! it lives in.
//!
//! Execution is single-threaded and cooperative. Every operation runs
//! to completion and persists as it goes: the bitmap at each
//! allocation, data and directory blocks as they are filled, and the
//! inodes that reference them last, so nothing on the device ever
//! points at a block that is not accounted for, even if a later step
//! fails.

use std::time::{SystemTime, UNIX_EPOCH};

use itertools::{EitherOrBoth, Itertools};
use log::{debug, warn};

mod bitmap;
mod inode;
mod path;
mod stat;
mod superblock;

pub use inode::{Dinode, Dirent, FileMode, DIRENT_SIZE, DPB};
pub use path::{components, FileName};
pub use stat::{Cred, Stat, Statvfs, Utimbuf};
pub use superblock::Superblock;

use bitmap::Bitmap;

use crate::bio::{write_obj, Bio, BlockDevice, ZERO_BLOCK};
use crate::error::{Error, Result};
use crate::param::{BSIZE, DIRSIZ, MAXFILE, NBLOCK, NDIRECT, NMETA, ROOTINO};

const SUPERBLOCK_LBA: u32 = 0;
const BITMAP_LBA: u32 = 1;

/// Seconds since the epoch, as stored in inode timestamps.
fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as u32)
}

/// The filesystem handle: one mounted image. Owns the device, the
/// superblock copy, the in-memory bitmap, and a copy of the root inode
/// kept in sync by `write_inode`.
pub struct FileSystem<D> {
    pub(crate) bio: Bio<D>,
    superblock: Superblock,
    bitmap: Bitmap,
    pub(crate) root: Dinode,
}

impl<D: BlockDevice> FileSystem<D> {
    /// Mount the image on `dev`. If the device does not carry a usable
    /// filesystem (bad magic, bad size, root not a directory, or the
    /// metadata cannot be read), the device is formatted fresh instead.
    pub fn mount(dev: D) -> Result<Self> {
        let mut bio = Bio::new(dev);
        match Self::open(&mut bio) {
            Ok((superblock, bitmap, root)) => {
                debug!("mount: {} blocks", superblock.total_blocks);
                Ok(Self {
                    bio,
                    superblock,
                    bitmap,
                    root,
                })
            }
            Err(err) => {
                warn!("mount: no usable filesystem on device ({}), formatting", err);
                Self::mkfs(bio)
            }
        }
    }

    /// Format `dev` unconditionally and mount the fresh image.
    pub fn format(dev: D) -> Result<Self> {
        Self::mkfs(Bio::new(dev))
    }

    /// Unmount, handing the device back.
    pub fn into_device(self) -> D {
        self.bio.into_device()
    }

    fn open(bio: &mut Bio<D>) -> Result<(Superblock, Bitmap, Dinode)> {
        let superblock = Superblock::from_block(&bio.read_block(SUPERBLOCK_LBA)?)?;
        bio.set_total(superblock.total_blocks);
        let mut bitmap = Bitmap::from_block(bio.read_block(BITMAP_LBA)?);
        let root: Dinode = crate::bio::read_obj(&bio.read_block(ROOTINO)?, 0);
        if !root.is_dir() {
            return Err(Error::Invalid);
        }
        // The reserved blocks must be marked used no matter what the
        // image says.
        if (0..NMETA).any(|b| !bitmap.test(b)) {
            for b in 0..NMETA {
                bitmap.set(b);
            }
            bio.write_block(BITMAP_LBA, bitmap.as_block())?;
        }
        Ok((superblock, bitmap, root))
    }

    fn mkfs(mut bio: Bio<D>) -> Result<Self> {
        debug!("mkfs: formatting {} blocks", NBLOCK);
        let superblock = Superblock::new(NBLOCK);
        bio.set_total(NBLOCK);
        bio.write_block(SUPERBLOCK_LBA, &superblock.to_block())?;

        let bitmap = Bitmap::new();
        bio.write_block(BITMAP_LBA, bitmap.as_block())?;

        let t = now();
        let root = Dinode {
            uid: 0,
            gid: 0,
            mode: FileMode::DIR.bits() | 0o777,
            ctime: t,
            mtime: t,
            size: BSIZE as u32,
            ptrs: [0; NDIRECT],
        };
        let mut block = ZERO_BLOCK;
        write_obj(&mut block, 0, &root);
        bio.write_block(ROOTINO, &block)?;

        Ok(Self {
            bio,
            superblock,
            bitmap,
            root,
        })
    }

    /// Allocate a disk block: first fit, ascending from the first
    /// unreserved block. The bitmap is persisted before the block
    /// number is handed out.
    pub(crate) fn balloc(&mut self) -> Result<u32> {
        let b = match self.bitmap.alloc(self.superblock.total_blocks) {
            Some(b) => b,
            None => {
                warn!("balloc: out of blocks");
                return Err(Error::NoSpace);
            }
        };
        if let Err(err) = self.bio.write_block(BITMAP_LBA, self.bitmap.as_block()) {
            self.bitmap.clear(b);
            return Err(err);
        }
        Ok(b)
    }

    /// Free a disk block and persist the bitmap. Freeing an already
    /// free block is a no-op.
    pub(crate) fn bfree(&mut self, b: u32) -> Result<()> {
        if b >= self.superblock.total_blocks {
            return Err(Error::Invalid);
        }
        debug_assert!(b >= NMETA, "freeing a reserved block");
        if !self.bitmap.test(b) {
            return Ok(());
        }
        self.bitmap.clear(b);
        self.bio.write_block(BITMAP_LBA, self.bitmap.as_block())
    }

    /// Walk `parts` from the root, returning the final component's
    /// i-number. Zero components name the root itself.
    fn namei(&mut self, parts: &[&FileName]) -> Result<u32> {
        let mut inum = ROOTINO;
        for &name in parts {
            let dir = self.read_inode(inum)?;
            inum = self.dirlookup(&dir, name)?;
        }
        Ok(inum)
    }

    /// Resolve all but the last component, returning the parent's
    /// i-number and the leaf name. Fails on the root, which has no
    /// leaf.
    fn nameiparent<'s>(&mut self, parts: &'s [&'s FileName]) -> Result<(u32, &'s FileName)> {
        let (leaf, prefix) = parts.split_last().ok_or(Error::Invalid)?;
        let inum = self.namei(prefix)?;
        Ok((inum, *leaf))
    }

    /// File or directory attributes. The root is answered from the
    /// in-memory copy without touching the device.
    pub fn getattr(&mut self, path: &str) -> Result<Stat> {
        let parts = components(path);
        if parts.is_empty() {
            return Ok(self.root.stat(ROOTINO));
        }
        let inum = self.namei(&parts)?;
        Ok(self.read_inode(inum)?.stat(inum))
    }

    /// List a directory. `.` and `..` are synthesized first, carrying
    /// the directory's own attributes; stored entries follow in disk
    /// order. `filler` returning false stops the listing and surfaces
    /// as `NoMemory`, mirroring a full readdir buffer.
    pub fn readdir(
        &mut self,
        path: &str,
        filler: &mut dyn FnMut(&str, &Stat) -> bool,
    ) -> Result<()> {
        let inum = self.namei(&components(path))?;
        let dir = self.read_inode(inum)?;
        if !dir.is_dir() {
            return Err(Error::NotDir);
        }
        let dirstat = dir.stat(inum);
        if !filler(".", &dirstat) || !filler("..", &dirstat) {
            return Err(Error::NoMemory);
        }
        let done = self.dir_for_each(&dir, |fs, de| {
            let child = fs.read_inode(de.inum())?;
            let name = String::from_utf8_lossy(de.name().as_bytes());
            Ok(filler(&name, &child.stat(de.inum())))
        })?;
        if done {
            Ok(())
        } else {
            Err(Error::NoMemory)
        }
    }

    /// Create a regular file. `mode` is stored as supplied, so the
    /// caller provides the regular-file type bit; the owner comes from
    /// `cred`.
    pub fn create(&mut self, path: &str, mode: u32, cred: &Cred) -> Result<()> {
        let t = now();
        self.mknode(
            path,
            Dinode {
                uid: cred.uid,
                gid: cred.gid,
                mode,
                ctime: t,
                mtime: t,
                size: 0,
                ptrs: [0; NDIRECT],
            },
        )
    }

    /// Create a directory. Only the permission bits of `mode` are kept.
    /// A fresh directory reports size 4096 but holds no data block
    /// until its first entry is inserted.
    pub fn mkdir(&mut self, path: &str, mode: u32, cred: &Cred) -> Result<()> {
        let t = now();
        self.mknode(
            path,
            Dinode {
                uid: cred.uid,
                gid: cred.gid,
                mode: FileMode::DIR.bits() | (mode & FileMode::PERM.bits()),
                ctime: t,
                mtime: t,
                size: BSIZE as u32,
                ptrs: [0; NDIRECT],
            },
        )
    }

    /// Shared create/mkdir tail: allocate an inode block, persist the
    /// record, and link it into the parent. The allocation is undone if
    /// the record cannot be written or the parent is full; once the
    /// entry is in, a failing parent-inode write leaks the new inode
    /// (the entry on disk already references it, so freeing the block
    /// would be worse).
    fn mknode(&mut self, path: &str, ino: Dinode) -> Result<()> {
        let parts = components(path);
        let (parent_inum, leaf) = self.nameiparent(&parts)?;
        let mut parent = self.read_inode(parent_inum)?;
        match self.dirlookup(&parent, leaf) {
            Ok(_) => return Err(Error::Exists),
            Err(Error::NotFound) => {}
            Err(err) => return Err(err),
        }

        let inum = self.balloc()?;
        if let Err(err) = self.write_inode(inum, &ino) {
            let _ = self.bfree(inum);
            return Err(err);
        }
        if let Err(err) = self.dirlink(&mut parent, leaf, inum) {
            let _ = self.bfree(inum);
            return Err(err);
        }
        parent.touch(ino.mtime);
        self.write_inode(parent_inum, &parent)
    }

    /// Delete a file: drop its name from the parent, then free its data
    /// blocks and its inode block.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let parts = components(path);
        let (parent_inum, leaf) = self.nameiparent(&parts)?;
        let mut parent = self.read_inode(parent_inum)?;
        let inum = self.dirlookup(&parent, leaf)?;
        let mut ino = self.read_inode(inum)?;
        if ino.is_dir() {
            return Err(Error::IsDir);
        }
        self.dirremove(&parent, leaf)?;
        self.itrunc(&mut ino)?;
        self.bfree(inum)?;
        parent.touch(now());
        self.write_inode(parent_inum, &parent)
    }

    /// Remove an empty directory.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let parts = components(path);
        let (parent_inum, leaf) = self.nameiparent(&parts)?;
        let mut parent = self.read_inode(parent_inum)?;
        let inum = self.dirlookup(&parent, leaf)?;
        let mut ino = self.read_inode(inum)?;
        if !ino.is_dir() {
            return Err(Error::NotDir);
        }
        if !self.dir_is_empty(&ino)? {
            return Err(Error::NotEmpty);
        }
        self.dirremove(&parent, leaf)?;
        self.itrunc(&mut ino)?;
        self.bfree(inum)?;
        parent.touch(now());
        self.write_inode(parent_inum, &parent)
    }

    /// Rename within one directory. Both paths must have the same
    /// number of components and identical prefixes; the source entry's
    /// name is rewritten in place. Destination-exists is reported
    /// before a missing source.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let src = components(from);
        let dst = components(to);
        if src.is_empty() || dst.is_empty() {
            return Err(Error::Invalid);
        }
        for pair in src[..src.len() - 1]
            .iter()
            .zip_longest(dst[..dst.len() - 1].iter())
        {
            match pair {
                EitherOrBoth::Both(a, b) if a == b => {}
                _ => return Err(Error::Invalid),
            }
        }
        let (src_leaf, dst_leaf) = (src[src.len() - 1], dst[dst.len() - 1]);

        let parent_inum = self.namei(&src[..src.len() - 1])?;
        let mut parent = self.read_inode(parent_inum)?;
        match self.dirlookup(&parent, dst_leaf) {
            Ok(_) => return Err(Error::Exists),
            Err(Error::NotFound) => {}
            Err(err) => return Err(err),
        }
        self.dirrename(&parent, src_leaf, dst_leaf)?;
        parent.touch(now());
        self.write_inode(parent_inum, &parent)
    }

    /// Replace the permission bits, keeping the type bits.
    pub fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
        let inum = self.namei(&components(path))?;
        let mut ino = self.read_inode(inum)?;
        ino.mode = (ino.mode & FileMode::TYPE.bits()) | (mode & FileMode::PERM.bits());
        ino.ctime = now();
        self.write_inode(inum, &ino)
    }

    /// Set the modification time, or refresh it to the current time
    /// when no times are supplied.
    pub fn utime(&mut self, path: &str, times: Option<Utimbuf>) -> Result<()> {
        let inum = self.namei(&components(path))?;
        let mut ino = self.read_inode(inum)?;
        let t = match times {
            Some(ut) => ut.modtime,
            None => now(),
        };
        ino.touch(t);
        self.write_inode(inum, &ino)
    }

    /// Truncate a regular file. Only length 0 is supported; every data
    /// block is freed.
    pub fn truncate(&mut self, path: &str, len: u64) -> Result<()> {
        if len != 0 {
            return Err(Error::Invalid);
        }
        let inum = self.namei(&components(path))?;
        let mut ino = self.read_inode(inum)?;
        if ino.is_dir() {
            return Err(Error::IsDir);
        }
        self.itrunc(&mut ino)?;
        ino.touch(now());
        self.write_inode(inum, &ino)
    }

    /// Read up to `buf.len()` bytes at `offset`. Short counts only
    /// happen at end of file; reading at or past the end returns 0.
    pub fn read(&mut self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let inum = self.namei(&components(path))?;
        let ino = self.read_inode(inum)?;
        if ino.is_dir() {
            return Err(Error::IsDir);
        }
        self.read_at(&ino, offset, buf)
    }

    /// Write `buf` at `offset`. The file grows as needed up to the
    /// direct-pointer limit; writing past the current end (a hole) is
    /// rejected. Returns the full length on success.
    pub fn write(&mut self, path: &str, buf: &[u8], offset: u64) -> Result<usize> {
        let inum = self.namei(&components(path))?;
        let mut ino = self.read_inode(inum)?;
        if ino.is_dir() {
            return Err(Error::IsDir);
        }
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(Error::NoSpace)?;
        if end > MAXFILE as u64 {
            return Err(Error::NoSpace);
        }
        if offset > ino.size as u64 {
            return Err(Error::Invalid);
        }
        let n = self.write_at(&mut ino, offset, buf)?;
        ino.touch(now());
        self.write_inode(inum, &ino)?;
        Ok(n)
    }

    /// Filesystem statistics. Free counts come from the in-memory
    /// bitmap; fields the format has no data for are zero.
    pub fn statfs(&self) -> Statvfs {
        let total = self.superblock.total_blocks;
        let free = total - self.bitmap.used(total);
        Statvfs {
            bsize: BSIZE as u32,
            frsize: BSIZE as u32,
            blocks: total,
            bfree: free,
            bavail: free,
            namemax: DIRSIZ as u32,
            ..Statvfs::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::MemDisk;
    use std::collections::HashSet;

    fn fresh() -> FileSystem<MemDisk> {
        FileSystem::format(MemDisk::new(NBLOCK)).unwrap()
    }

    #[test]
    fn mkfs_lays_out_metadata() {
        let fs = fresh();
        let st = fs.statfs();
        assert_eq!(st.blocks, NBLOCK);
        assert_eq!(st.bfree, NBLOCK - NMETA);
        assert_eq!(st.bsize, BSIZE as u32);
        assert_eq!(st.namemax, DIRSIZ as u32);
        assert!(fs.root.is_dir());
        assert_eq!(fs.root.size, BSIZE as u32);
    }

    #[test]
    fn mount_reuses_an_existing_image() {
        let mut fs = fresh();
        fs.create("/keep", 0o100644, &Cred::default()).unwrap();
        fs.write("/keep", b"payload", 0).unwrap();
        let bfree = fs.statfs().bfree;

        let mut fs = FileSystem::mount(fs.into_device()).unwrap();
        assert_eq!(fs.statfs().bfree, bfree);
        let mut buf = [0u8; 16];
        assert_eq!(fs.read("/keep", &mut buf, 0).unwrap(), 7);
        assert_eq!(&buf[..7], b"payload");
    }

    #[test]
    fn mount_formats_a_blank_device() {
        let mut fs = FileSystem::mount(MemDisk::new(NBLOCK)).unwrap();
        assert_eq!(fs.statfs().bfree, NBLOCK - NMETA);
        assert!(fs.getattr("/").unwrap().mode & FileMode::DIR.bits() != 0);
    }

    #[test]
    fn mount_formats_over_garbage() {
        let mut fs = fresh();
        fs.create("/gone", 0o100644, &Cred::default()).unwrap();
        let mut dev = fs.into_device();
        // Clobber the superblock magic.
        dev.block_write(&ZERO_BLOCK, 0, 1).unwrap();
        let mut fs = FileSystem::mount(dev).unwrap();
        assert_eq!(fs.getattr("/gone"), Err(Error::NotFound));
        assert_eq!(fs.statfs().bfree, NBLOCK - NMETA);
    }

    #[test]
    fn mount_restores_reserved_bits() {
        let fs = fresh();
        let mut dev = fs.into_device();
        // Corrupt the bitmap so the reserved blocks look free.
        dev.block_write(&ZERO_BLOCK, 1, 1).unwrap();
        let fs = FileSystem::mount(dev).unwrap();
        assert!(fs.bitmap.test(0) && fs.bitmap.test(1) && fs.bitmap.test(2));
    }

    #[test]
    fn balloc_is_first_fit_and_persisted() {
        let mut fs = fresh();
        let a = fs.balloc().unwrap();
        let b = fs.balloc().unwrap();
        assert_eq!((a, b), (NMETA, NMETA + 1));
        fs.bfree(a).unwrap();
        assert_eq!(fs.balloc().unwrap(), a);

        // The bitmap mutations must have hit the device.
        let fs = FileSystem::mount(fs.into_device()).unwrap();
        assert_eq!(fs.statfs().bfree, NBLOCK - NMETA - 2);
    }

    #[test]
    fn bfree_rejects_out_of_range() {
        let mut fs = fresh();
        assert_eq!(fs.bfree(NBLOCK), Err(Error::Invalid));
    }

    /// Every block reachable from the root, namespace-walk style: inode
    /// blocks, directory blocks, file data blocks.
    fn reachable(fs: &mut FileSystem<MemDisk>, inum: u32, seen: &mut HashSet<u32>) {
        seen.insert(inum);
        let ino = fs.read_inode(inum).unwrap();
        for &p in ino.ptrs.iter().filter(|&&p| p != 0) {
            seen.insert(p);
        }
        if ino.is_dir() {
            let mut children = Vec::new();
            fs.dir_for_each(&ino, |_, de| {
                children.push(de.inum());
                Ok(true)
            })
            .unwrap();
            for child in children {
                reachable(fs, child, seen);
            }
        }
    }

    fn assert_bitmap_matches_namespace(fs: &mut FileSystem<MemDisk>) {
        let mut seen = HashSet::new();
        reachable(fs, ROOTINO, &mut seen);
        for b in 0..NMETA {
            assert!(fs.bitmap.test(b), "reserved block {} must be set", b);
        }
        for &b in &seen {
            assert!(fs.bitmap.test(b), "reachable block {} not marked used", b);
        }
        for b in NMETA..NBLOCK {
            if fs.bitmap.test(b) {
                assert!(seen.contains(&b), "used block {} unreachable from root", b);
            }
        }
    }

    #[test]
    fn namespace_and_bitmap_agree_across_operations() {
        let cred = Cred { uid: 500, gid: 500 };
        let mut fs = fresh();
        assert_bitmap_matches_namespace(&mut fs);

        fs.mkdir("/d", 0o755, &cred).unwrap();
        fs.create("/d/f", 0o100644, &cred).unwrap();
        fs.write("/d/f", &[7u8; 9000], 0).unwrap();
        fs.create("/top", 0o100600, &cred).unwrap();
        assert_bitmap_matches_namespace(&mut fs);

        fs.truncate("/d/f", 0).unwrap();
        assert_bitmap_matches_namespace(&mut fs);

        fs.unlink("/d/f").unwrap();
        fs.unlink("/top").unwrap();
        fs.rmdir("/d").unwrap();
        assert_bitmap_matches_namespace(&mut fs);
        // The root keeps the entry block its first insertion allocated.
        assert_eq!(fs.statfs().bfree, NBLOCK - NMETA - 1);
    }

    #[test]
    fn allocation_failures_leave_no_leaks() {
        let cred = Cred::default();
        let mut fs = fresh();
        let payload = vec![0x5a; crate::param::MAXFILE];
        // Exhaust the image with full-size files. Whichever step runs
        // out of blocks first, nothing may leak.
        let mut i = 0;
        loop {
            let path = format!("/f{}", i);
            match fs.create(&path, 0o100644, &cred) {
                Err(Error::NoSpace) => break,
                other => other.unwrap(),
            }
            match fs.write(&path, &payload, 0) {
                Ok(n) => assert_eq!(n, payload.len()),
                Err(Error::NoSpace) => break,
                Err(err) => panic!("unexpected error: {}", err),
            }
            i += 1;
        }
        assert_bitmap_matches_namespace(&mut fs);

        // Mop up the remaining blocks with empty files.
        let mut j = 0;
        loop {
            let path = format!("/g{}", j);
            match fs.create(&path, 0o100644, &cred) {
                Ok(()) => j += 1,
                Err(Error::NoSpace) => break,
                Err(err) => panic!("unexpected error: {}", err),
            }
        }
        assert_eq!(fs.statfs().bfree, 0);
        assert_bitmap_matches_namespace(&mut fs);
    }
}
