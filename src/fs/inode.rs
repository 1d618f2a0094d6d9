//! Inodes and directories.
//!
//! An inode describes a single unnamed file. The record holds metadata:
//! the file's mode, its owner, its size, its timestamps, and the list
//! of blocks holding the file's content.
//!
//! There is no inode table. Any block can hold an inode, and an inode
//! is identified by the number of the block it lives in, so allocating
//! an inode is the same operation as allocating a block. The record
//! sits at the start of its block; the remainder is zero.
//!
//! A directory is an inode whose data blocks are arrays of fixed-size
//! entries. Entries are a flag word carrying the in-use bit and the
//! child's i-number, followed by a NUL-terminated name. Removal only
//! clears the in-use bit, so valid slots may sit between invalid ones
//! and an emptied block stays attached to the directory until the
//! directory itself is destroyed.

use core::cmp;
use core::mem;

use bitflags::bitflags;
use itertools::Itertools;
use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use super::path::FileName;
use super::stat::Stat;
use super::FileSystem;
use crate::bio::{read_obj, write_obj, Block, BlockDevice, ZERO_BLOCK};
use crate::error::{Error, Result};
use crate::param::{BSIZE, DIRSIZ, NDIRECT, ROOTINO};

bitflags! {
    /// File-type and permission bits as stored in `Dinode::mode`.
    pub struct FileMode: u32 {
        /// Directory type bit.
        const DIR = 0o040000;
        /// Regular-file type bit.
        const REG = 0o100000;
        /// All type bits.
        const TYPE = 0o170000;
        /// Permission, setuid/setgid and sticky bits.
        const PERM = 0o007777;
    }
}

/// On-disk inode record.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, AsBytes, FromBytes)]
pub struct Dinode {
    /// Owning user
    pub uid: u32,

    /// Owning group
    pub gid: u32,

    /// File type and permission bits
    pub mode: u32,

    /// Creation time, seconds since the epoch
    pub ctime: u32,

    /// Modification time, seconds since the epoch
    pub mtime: u32,

    /// Size of file (bytes)
    pub size: u32,

    /// Direct data block addresses; 0 means unallocated
    pub ptrs: [u32; NDIRECT],
}

const_assert!(mem::size_of::<Dinode>() == 64);
const_assert!(mem::size_of::<Dinode>() <= BSIZE);

impl Dinode {
    pub fn is_dir(&self) -> bool {
        FileMode::from_bits_truncate(self.mode).contains(FileMode::DIR)
    }

    /// Set both timestamps. `getattr` reports `mtime` for every time
    /// field, so the distinction is only visible on disk.
    pub fn touch(&mut self, t: u32) {
        self.ctime = t;
        self.mtime = t;
    }

    /// The attribute view handed to callers. Every time field mirrors
    /// `mtime`; the format does not track atime, and there are no hard
    /// links.
    pub fn stat(&self, ino: u32) -> Stat {
        Stat {
            ino,
            mode: self.mode,
            nlink: 1,
            uid: self.uid,
            gid: self.gid,
            size: self.size as u64,
            atime: self.mtime,
            mtime: self.mtime,
            ctime: self.mtime,
        }
    }
}

/// dirent size
pub const DIRENT_SIZE: usize = mem::size_of::<Dirent>();

/// Dirents per block.
pub const DPB: usize = BSIZE / DIRENT_SIZE;

#[repr(C)]
#[derive(Clone, Copy, Default, AsBytes, FromBytes)]
pub struct Dirent {
    /// Bit 0 is the in-use flag; bits 1.. carry the child's i-number.
    /// This is the packing the C bitfield pair `valid:1, inode:31`
    /// produces on a little-endian machine.
    word: u32,
    name: [u8; DIRSIZ + 1],
}

const_assert!(mem::size_of::<Dirent>() == 32);
const_assert!(BSIZE % DIRENT_SIZE == 0);

impl Dirent {
    fn new(name: &FileName, inum: u32) -> Self {
        let mut de = Self {
            word: (inum << 1) | 1,
            name: [0; DIRSIZ + 1],
        };
        de.set_name(name);
        de
    }

    pub fn in_use(&self) -> bool {
        self.word & 1 != 0
    }

    pub fn inum(&self) -> u32 {
        self.word >> 1
    }

    /// Mark the slot invalid. The stale name and i-number stay behind.
    fn clear(&mut self) {
        self.word &= !1;
    }

    /// Fill in name. The name field is one byte longer than DIRSIZ, so
    /// there is always room for the NUL terminator.
    fn set_name(&mut self, name: &FileName) {
        let name = name.as_bytes();
        self.name[..name.len()].copy_from_slice(name);
        self.name[name.len()..].fill(0);
    }

    /// The slice up to the NUL terminator.
    pub fn name(&self) -> &FileName {
        let len = self.name.iter().position(|ch| *ch == 0).unwrap_or(DIRSIZ);
        FileName::new(&self.name[..len])
    }
}

fn dirent_at(block: &Block, slot: usize) -> Dirent {
    read_obj(block, slot * DIRENT_SIZE)
}

fn put_dirent(block: &mut Block, slot: usize, de: &Dirent) {
    write_obj(block, slot * DIRENT_SIZE, de)
}

fn dirents(block: &Block) -> impl Iterator<Item = Dirent> + '_ {
    (0..DPB).map(move |slot| dirent_at(block, slot))
}

impl<D: BlockDevice> FileSystem<D> {
    /// Read the inode record stored in block `inum`. The root is served
    /// from the in-memory copy.
    pub(crate) fn read_inode(&mut self, inum: u32) -> Result<Dinode> {
        if inum == ROOTINO {
            return Ok(self.root);
        }
        let block = self.bio.read_block(inum)?;
        Ok(read_obj(&block, 0))
    }

    /// Write the inode record into block `inum`, zero-padding the rest
    /// of the block. Keeps the root copy in sync.
    pub(crate) fn write_inode(&mut self, inum: u32, ino: &Dinode) -> Result<()> {
        let mut block = ZERO_BLOCK;
        write_obj(&mut block, 0, ino);
        self.bio.write_block(inum, &block)?;
        if inum == ROOTINO {
            self.root = *ino;
        }
        Ok(())
    }

    /// Look for an entry named `name` in a directory. Names compare
    /// byte-for-byte. Returns the child's i-number.
    pub(crate) fn dirlookup(&mut self, dir: &Dinode, name: &FileName) -> Result<u32> {
        if !dir.is_dir() {
            return Err(Error::NotDir);
        }
        for &lba in dir.ptrs.iter().filter(|&&p| p != 0) {
            let block = self.bio.read_block(lba)?;
            let found = dirents(&block).find(|de| de.in_use() && de.name() == name);
            if let Some(de) = found {
                return Ok(de.inum());
            }
        }
        Err(Error::NotFound)
    }

    /// Write a new directory entry (name, inum) into the directory.
    /// Reuses the first invalid slot of an allocated block; attaches a
    /// fresh block to the first unused pointer when every slot is
    /// taken. Mutates `dir` (pointers, size) but leaves persisting the
    /// directory's inode to the caller.
    pub(crate) fn dirlink(&mut self, dir: &mut Dinode, name: &FileName, inum: u32) -> Result<()> {
        match self.dirlookup(dir, name) {
            Ok(_) => return Err(Error::Exists),
            Err(Error::NotFound) => {}
            Err(err) => return Err(err),
        }

        for &lba in dir.ptrs.iter().filter(|&&p| p != 0) {
            let mut block = self.bio.read_block(lba)?;
            let found = dirents(&block).find_position(|de| !de.in_use());
            if let Some((slot, _)) = found {
                put_dirent(&mut block, slot, &Dirent::new(name, inum));
                return self.bio.write_block(lba, &block);
            }
        }

        let idx = match dir.ptrs.iter().position(|&p| p == 0) {
            Some(idx) => idx,
            None => return Err(Error::NoSpace),
        };
        let lba = self.balloc()?;
        let mut block = ZERO_BLOCK;
        put_dirent(&mut block, 0, &Dirent::new(name, inum));
        if let Err(err) = self.bio.write_block(lba, &block) {
            let _ = self.bfree(lba);
            return Err(err);
        }
        dir.ptrs[idx] = lba;
        let extent = ((idx + 1) * BSIZE) as u32;
        if extent > dir.size {
            dir.size = extent;
        }
        Ok(())
    }

    /// Remove the entry for `name` by clearing its in-use flag. The
    /// block is not compacted and stays attached even if it is now
    /// empty.
    pub(crate) fn dirremove(&mut self, dir: &Dinode, name: &FileName) -> Result<()> {
        if !dir.is_dir() {
            return Err(Error::NotDir);
        }
        for &lba in dir.ptrs.iter().filter(|&&p| p != 0) {
            let mut block = self.bio.read_block(lba)?;
            let found = dirents(&block).find_position(|de| de.in_use() && de.name() == name);
            if let Some((slot, mut de)) = found {
                de.clear();
                put_dirent(&mut block, slot, &de);
                return self.bio.write_block(lba, &block);
            }
        }
        Err(Error::NotFound)
    }

    /// Rewrite the name of the entry `from` to `to`, in place. The
    /// entry keeps its slot and its i-number.
    pub(crate) fn dirrename(
        &mut self,
        dir: &Dinode,
        from: &FileName,
        to: &FileName,
    ) -> Result<()> {
        if !dir.is_dir() {
            return Err(Error::NotDir);
        }
        for &lba in dir.ptrs.iter().filter(|&&p| p != 0) {
            let mut block = self.bio.read_block(lba)?;
            let found = dirents(&block).find_position(|de| de.in_use() && de.name() == from);
            if let Some((slot, mut de)) = found {
                de.set_name(to);
                put_dirent(&mut block, slot, &de);
                return self.bio.write_block(lba, &block);
            }
        }
        Err(Error::NotFound)
    }

    /// Is the directory empty? `.` and `..` are never stored, so any
    /// in-use slot counts.
    pub(crate) fn dir_is_empty(&mut self, dir: &Dinode) -> Result<bool> {
        if !dir.is_dir() {
            return Err(Error::NotDir);
        }
        for &lba in dir.ptrs.iter().filter(|&&p| p != 0) {
            let block = self.bio.read_block(lba)?;
            if dirents(&block).any(|de| de.in_use()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Call `f` on every in-use entry of the directory, in the
    /// block-then-slot order they sit on disk. `f` returning false
    /// stops the walk early.
    pub(crate) fn dir_for_each(
        &mut self,
        dir: &Dinode,
        mut f: impl FnMut(&mut Self, &Dirent) -> Result<bool>,
    ) -> Result<bool> {
        for &lba in dir.ptrs.iter().filter(|&&p| p != 0) {
            let block = self.bio.read_block(lba)?;
            for de in dirents(&block).filter(Dirent::in_use) {
                if !f(self, &de)? {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Copy file content into `dst` starting at byte `off`, stopping at
    /// end of file. Returns the number of bytes copied.
    pub(crate) fn read_at(&mut self, ino: &Dinode, off: u64, dst: &mut [u8]) -> Result<usize> {
        let size = ino.size as u64;
        if off >= size {
            return Ok(0);
        }
        let n = cmp::min(dst.len() as u64, size - off) as usize;
        let mut tot = 0;
        let mut pos = off as usize;
        while tot < n {
            let bn = pos / BSIZE;
            if bn >= NDIRECT {
                break;
            }
            let lba = ino.ptrs[bn];
            if lba == 0 {
                break;
            }
            let block = self.bio.read_block(lba)?;
            let begin = pos % BSIZE;
            let m = cmp::min(n - tot, BSIZE - begin);
            dst[tot..tot + m].copy_from_slice(&block[begin..begin + m]);
            tot += m;
            pos += m;
        }
        Ok(tot)
    }

    /// Overwrite the byte window `[off, off + src.len())` of the file,
    /// allocating (and zero-filling) any block the window needs, then
    /// read-modify-writing each block it touches. Extends `ino.size`
    /// but leaves persisting the inode to the caller; on failure the
    /// blocks this call allocated are freed again, so nothing leaks
    /// unless the device itself lies. The caller has already enforced
    /// the no-holes and capacity rules.
    pub(crate) fn write_at(&mut self, ino: &mut Dinode, off: u64, src: &[u8]) -> Result<usize> {
        let off = off as usize;
        let end = off + src.len();
        let mut fresh = [0usize; NDIRECT];
        let mut nfresh = 0;

        for bn in off / BSIZE..(end + BSIZE - 1) / BSIZE {
            if ino.ptrs[bn] != 0 {
                continue;
            }
            let lba = match self.balloc() {
                Ok(lba) => lba,
                Err(err) => {
                    self.unwind(ino, &fresh[..nfresh]);
                    return Err(err);
                }
            };
            if let Err(err) = self.bio.write_block(lba, &ZERO_BLOCK) {
                let _ = self.bfree(lba);
                self.unwind(ino, &fresh[..nfresh]);
                return Err(err);
            }
            ino.ptrs[bn] = lba;
            fresh[nfresh] = bn;
            nfresh += 1;
        }

        let mut tot = 0;
        let mut pos = off;
        while tot < src.len() {
            let lba = ino.ptrs[pos / BSIZE];
            let begin = pos % BSIZE;
            let m = cmp::min(src.len() - tot, BSIZE - begin);
            let res = self.bio.read_block(lba).and_then(|mut block| {
                block[begin..begin + m].copy_from_slice(&src[tot..tot + m]);
                self.bio.write_block(lba, &block)
            });
            if let Err(err) = res {
                self.unwind(ino, &fresh[..nfresh]);
                return Err(err);
            }
            tot += m;
            pos += m;
        }

        if end as u32 > ino.size {
            ino.size = end as u32;
        }
        Ok(tot)
    }

    /// Undo the allocations of a failed write.
    fn unwind(&mut self, ino: &mut Dinode, fresh: &[usize]) {
        for &bn in fresh {
            let _ = self.bfree(ino.ptrs[bn]);
            ino.ptrs[bn] = 0;
        }
    }

    /// Truncate the inode (discard contents): free every data block and
    /// zero the pointers. The caller persists the inode.
    pub(crate) fn itrunc(&mut self, ino: &mut Dinode) -> Result<()> {
        for p in ino.ptrs.iter_mut() {
            if *p != 0 {
                self.bfree(*p)?;
                *p = 0;
            }
        }
        ino.size = 0;
        Ok(())
    }
}
