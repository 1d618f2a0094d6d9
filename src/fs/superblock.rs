//! The superblock.
//!
//! Block 0 of the image. Written once at format time, read once at
//! mount; the rest of its block is zero.

use core::mem;

use static_assertions::const_assert;
use zerocopy::{AsBytes, FromBytes};

use crate::bio::{read_obj, write_obj, Block, ZERO_BLOCK};
use crate::error::{Error, Result};
use crate::param::{BSIZE, NMETA};

/// Must be the first word of block 0.
const FSMAGIC: u32 = 0x7461_6c66; // "flat"

#[repr(C)]
#[derive(Clone, Copy, Default, AsBytes, FromBytes, Debug, PartialEq, Eq)]
pub struct Superblock {
    /// Must be FSMAGIC.
    magic: u32,

    /// Size of the image in blocks.
    pub total_blocks: u32,
}

// The bitmap is a single block, so it can only track BSIZE * 8 blocks.
const_assert!(mem::size_of::<Superblock>() <= BSIZE);

impl Superblock {
    pub fn new(total_blocks: u32) -> Self {
        Self {
            magic: FSMAGIC,
            total_blocks,
        }
    }

    /// Decode block 0. Fails if the magic is wrong or the recorded size
    /// cannot describe a well-formed image.
    pub fn from_block(block: &Block) -> Result<Self> {
        let sb: Superblock = read_obj(block, 0);
        if sb.magic != FSMAGIC {
            return Err(Error::Invalid);
        }
        if sb.total_blocks <= NMETA || sb.total_blocks as usize > BSIZE * 8 {
            return Err(Error::Invalid);
        }
        Ok(sb)
    }

    /// Encode into a fresh block image.
    pub fn to_block(&self) -> Block {
        let mut block = ZERO_BLOCK;
        write_obj(&mut block, 0, self);
        block
    }
}
