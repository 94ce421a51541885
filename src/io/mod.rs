pub mod aligned;
pub mod async_file;
pub mod checksum;
pub mod compressor;

use std::ptr;

/// A trait for reading little-endian integers directly from byte slices
/// without additional allocations. These methods perform **zero-copy**
/// reads using `ptr::read_unaligned()`.
pub trait ZeroCopy {
    /// Reads a 16-bit little-endian unsigned integer (`u16`) from the given offset.
    ///
    /// # Panics
    /// - Panics if the offset is **out of bounds**.
    fn read_u16_le(&self, offset: usize) -> u16;

    /// Reads a 32-bit little-endian unsigned integer (`u32`) from the given offset.
    ///
    /// # Panics
    /// - Panics if the offset is **out of bounds**.
    fn read_u32_le(&self, offset: usize) -> u32;

    /// Reads a 64-bit little-endian unsigned integer (`u64`) from the given offset.
    ///
    /// # Panics
    /// - Panics if the offset is **out of bounds**.
    fn read_u64_le(&self, offset: usize) -> u64;
}

impl ZeroCopy for [u8] {
    #[inline(always)]
    fn read_u16_le(&self, offset: usize) -> u16 {
        assert!(
            offset + 2 <= self.len(),
            "Offset out of bounds: cannot read u16"
        );
        unsafe { ptr::read_unaligned(self.as_ptr().add(offset) as *const u16) }.to_le()
    }

    #[inline(always)]
    fn read_u32_le(&self, offset: usize) -> u32 {
        assert!(
            offset + 4 <= self.len(),
            "Offset out of bounds: cannot read u32"
        );
        unsafe { ptr::read_unaligned(self.as_ptr().add(offset) as *const u32) }.to_le()
    }

    #[inline(always)]
    fn read_u64_le(&self, offset: usize) -> u64 {
        assert!(
            offset + 8 <= self.len(),
            "Offset out of bounds: cannot read u64"
        );
        unsafe { ptr::read_unaligned(self.as_ptr().add(offset) as *const u64) }.to_le()
    }
}
