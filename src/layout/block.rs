use std::cell::Cell;
use std::io::{Error, ErrorKind, Result};

use crate::io::aligned::AlignedBuf;
use crate::io::ZeroCopy;

/// An in-memory block payload backed by a page-aligned buffer.
///
/// `size` is the logical payload length; `limit` is the capacity of the
/// backing buffer. Blocks handed to the write path must keep
/// `limit() == page_round_up(size())` so the buffer can be transferred to the
/// file as-is.
pub struct Block {
    buf: AlignedBuf,
    size: usize,
}

impl Block {
    /// Wraps an existing buffer holding `size` bytes of payload.
    pub fn new(buf: AlignedBuf, size: usize) -> Block {
        assert!(size <= buf.len(), "payload exceeds the backing buffer");
        Block { buf, size }
    }

    /// Allocates an empty block whose buffer holds `page_round_up(capacity)`
    /// bytes, ready to be filled through a [`BlockWriter`].
    pub fn with_capacity(capacity: usize) -> Block {
        Block { buf: AlignedBuf::alloc(capacity), size: 0 }
    }

    /// The payload bytes.
    pub fn buf(&self) -> &[u8] {
        &self.buf.as_slice()[..self.size]
    }

    /// Logical payload size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Capacity of the backing aligned buffer.
    pub fn limit(&self) -> usize {
        self.buf.capacity()
    }

    /// Releases the payload view and returns the backing buffer.
    pub(crate) fn into_buf(self) -> AlignedBuf {
        self.buf
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("size", &self.size)
            .field("limit", &self.limit())
            .finish()
    }
}

/// Appends fixed-width little-endian values to a block, growing its payload.
///
/// # Panics
/// All writers panic when the backing buffer would overflow: payload sizes
/// are computed before serialization, so an overflow is a bug.
pub struct BlockWriter<'a> {
    block: &'a mut Block,
}

impl<'a> BlockWriter<'a> {
    pub fn new(block: &'a mut Block) -> BlockWriter<'a> {
        BlockWriter { block }
    }

    fn put(&mut self, bytes: &[u8]) {
        let pos = self.block.size;
        assert!(
            pos + bytes.len() <= self.block.buf.len(),
            "block buffer overflow"
        );
        self.block.buf.as_mut_slice()[pos..pos + bytes.len()].copy_from_slice(bytes);
        self.block.size += bytes.len();
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.put(&[value]);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.put(&value.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.put(&value.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.put(&value.to_le_bytes());
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(value as u8)
    }

    pub fn write_slice(&mut self, value: &[u8]) -> &mut Self {
        self.put(value);
        self
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.block.size
    }

    /// The payload serialized so far.
    pub fn written(&self) -> &[u8] {
        self.block.buf()
    }
}

/// Reads fixed-width little-endian values from a byte slice, tracking its own
/// position.
pub struct BlockReader<'a> {
    data: &'a [u8],
    position: Cell<usize>,
}

impl<'a> BlockReader<'a> {
    pub fn new(data: &'a [u8]) -> BlockReader<'a> {
        BlockReader { data, position: Cell::new(0) }
    }

    fn advance(&self, len: usize) -> Result<usize> {
        let pos = self.position.get();
        if pos + len > self.data.len() {
            return Err(Error::new(ErrorKind::UnexpectedEof, "Unexpected EOF"));
        }
        self.position.set(pos + len);
        Ok(pos)
    }

    pub fn read_u8(&self) -> Result<u8> {
        let pos = self.advance(1)?;
        Ok(self.data[pos])
    }

    pub fn read_u16(&self) -> Result<u16> {
        let pos = self.advance(2)?;
        Ok(self.data.read_u16_le(pos))
    }

    pub fn read_u32(&self) -> Result<u32> {
        let pos = self.advance(4)?;
        Ok(self.data.read_u32_le(pos))
    }

    pub fn read_u64(&self) -> Result<u64> {
        let pos = self.advance(8)?;
        Ok(self.data.read_u64_le(pos))
    }

    pub fn read_bool(&self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(Error::new(
                ErrorKind::InvalidData,
                format!("Invalid boolean byte {}", b),
            )),
        }
    }

    pub fn read_slice(&self, len: usize) -> Result<&'a [u8]> {
        let pos = self.advance(len)?;
        Ok(&self.data[pos..pos + len])
    }

    pub fn position(&self) -> usize {
        self.position.get()
    }

    pub fn has_remaining(&self) -> bool {
        self.position.get() < self.data.len()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position.get()
    }
}
