use std::io::{Error, ErrorKind, Result};

use crate::io::aligned::PAGE_SIZE;
use crate::io::checksum::crc16;
use crate::io::compressor::CompressorType;
use crate::layout::block::{Block, BlockReader, BlockWriter};
use crate::layout::BlockMeta;

pub const MAGIC_NUMBER: u64 = 0x574C_4259_424C_4B31; // "WLBYBLK1" in ASCII

pub const MAJOR_VERSION: u8 = 1;
pub const MINOR_VERSION: u8 = 0;

/// On-disk footprint of one superblock copy. Two copies sit back to back at
/// the head of the data file.
pub const SUPER_BLOCK_SIZE: u64 = PAGE_SIZE as u64;

/// Root metadata record of the data file.
///
/// Serialized as `magic(8) | major(1) | minor(1) | compress(1) | has_index(1)
/// | [index_meta] | crc(2)`, zero-padded to [`SUPER_BLOCK_SIZE`].
#[derive(Debug, Clone, Copy)]
pub struct SuperBlock {
    pub magic_number: u64,
    pub major_version: u8,
    pub minor_version: u8,
    pub compress: CompressorType,
    /// Location of the persisted block directory, absent until the first
    /// index flush.
    pub index_block_meta: Option<BlockMeta>,
    /// Checksum of the encoded prefix, filled in while decoding.
    pub crc: u16,
}

impl SuperBlock {
    pub fn new(compress: CompressorType) -> SuperBlock {
        SuperBlock {
            magic_number: MAGIC_NUMBER,
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            compress,
            index_block_meta: None,
            crc: 0,
        }
    }

    /// Serializes the superblock into an empty page-sized block. The checksum
    /// is computed over the encoded prefix; the remainder of the page keeps
    /// the buffer's zero padding.
    pub fn encode(&self, block: &mut Block) {
        let mut writer = BlockWriter::new(block);
        writer
            .write_u64(self.magic_number)
            .write_u8(self.major_version)
            .write_u8(self.minor_version)
            .write_u8(self.compress.into());
        match &self.index_block_meta {
            Some(meta) => {
                writer.write_bool(true);
                meta.write_to(&mut writer);
            }
            None => {
                writer.write_bool(false);
            }
        }
        let crc = crc16(writer.written());
        writer.write_u16(crc);
    }

    /// Decodes and validates one superblock copy.
    pub fn decode(data: &[u8]) -> Result<SuperBlock> {
        let reader = BlockReader::new(data);

        let magic_number = reader.read_u64()?;
        if magic_number != MAGIC_NUMBER {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid magic number {:#018x}", magic_number),
            ));
        }

        let major_version = reader.read_u8()?;
        let minor_version = reader.read_u8()?;
        if major_version != MAJOR_VERSION {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("unsupported format version {}.{}", major_version, minor_version),
            ));
        }

        let compress = CompressorType::try_from(reader.read_u8()?)
            .map_err(|e| Error::new(ErrorKind::InvalidData, e))?;

        let index_block_meta = if reader.read_bool()? {
            Some(BlockMeta::read_from(&reader)?)
        } else {
            None
        };

        let prefix_len = reader.position();
        let crc = reader.read_u16()?;
        let computed = crc16(&data[..prefix_len]);
        if crc != computed {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("superblock checksum mismatch: expected {:#06x} was {:#06x}", crc, computed),
            ));
        }

        Ok(SuperBlock {
            magic_number,
            major_version,
            minor_version,
            compress,
            index_block_meta,
            crc,
        })
    }
}
