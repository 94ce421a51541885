pub mod block;
pub mod callback;
pub mod directory;
pub mod engine;
pub mod holes;
pub mod superblock;

use std::io::Result;

use crate::io::aligned::page_round_up;
use crate::layout::block::{BlockReader, BlockWriter};

/// Opaque 64-bit block identifier. The tree layer assigns the ids; the
/// layout engine only stores them.
pub type Bid = u64;

/// Bit reserved by the tree layer to mark leaf nodes. The engine looks at it
/// purely for recovery accounting.
pub const LEAF_BID_FLAG: Bid = 1 << 63;

/// Whether a block id belongs to a leaf node.
pub fn is_leaf(bid: Bid) -> bool {
    bid & LEAF_BID_FLAG != 0
}

/// Serialized size of a [`BlockMeta`]: offset(8) + inflated(4) +
/// compressed(4) + crc(2).
pub const BLOCK_META_SIZE: usize = 18;

/// Persistent descriptor of a stored block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMeta {
    /// Absolute byte offset in the data file, always page-aligned.
    pub offset: u64,
    /// Logical payload size.
    pub inflated_size: u32,
    /// On-disk payload size before page rounding.
    pub compressed_size: u32,
    /// Checksum of the on-disk payload.
    pub crc: u16,
}

impl BlockMeta {
    /// Size of the file extent the block occupies.
    pub fn extent_size(&self) -> u64 {
        page_round_up(self.compressed_size as usize) as u64
    }

    pub fn write_to(&self, writer: &mut BlockWriter) {
        writer
            .write_u64(self.offset)
            .write_u32(self.inflated_size)
            .write_u32(self.compressed_size)
            .write_u16(self.crc);
    }

    pub fn read_from(reader: &BlockReader) -> Result<BlockMeta> {
        Ok(BlockMeta {
            offset: reader.read_u64()?,
            inflated_size: reader.read_u32()?,
            compressed_size: reader.read_u32()?,
            crc: reader.read_u16()?,
        })
    }
}
