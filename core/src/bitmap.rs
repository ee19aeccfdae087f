//! Allocation bitmap over a `SectorStream` (spec §4.4). Grounded in
//! the teacher's `ext4_native::core::bitmap::Bitmap` (`set`/`clear`/
//! `is_set`/`find_contiguous_clear`), re-pointed from an in-memory
//! `Vec<u8>` at a stream-backed one and given NTFS's specific growth
//! and wraparound rules.

use crate::error::Result;
use crate::stream::SectorStream;
use log::trace;

/// Backing streams always grow in this many bytes at a time (Open
/// Question #3: the on-disk `$Bitmap` must stay 8-byte aligned after
/// extension).
const GROWTH_INCREMENT_BYTES: u64 = 8;

pub struct Bitmap<S> {
    stream: S,
}

impl<S: SectorStream> Bitmap<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    fn byte_len(&self) -> Result<u64> {
        self.stream.len()
    }

    fn ensure_capacity(&mut self, bit_index: u64) -> Result<()> {
        let needed_bytes = bit_index / 8 + 1;
        let current = self.byte_len()?;
        if needed_bytes > current {
            let rounded = needed_bytes.div_ceil(GROWTH_INCREMENT_BYTES) * GROWTH_INCREMENT_BYTES;
            self.stream.set_len(rounded)?;
        }
        Ok(())
    }

    fn read_byte(&mut self, byte_index: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        let n = self.stream.read_at(byte_index, &mut buf)?;
        Ok(if n == 1 { buf[0] } else { 0 })
    }

    fn write_byte(&mut self, byte_index: u64, value: u8) -> Result<()> {
        self.stream.write_at(byte_index, &[value])
    }

    pub fn is_present(&mut self, index: u64) -> Result<bool> {
        let byte_index = index / 8;
        if byte_index >= self.byte_len()? {
            return Ok(false);
        }
        let byte = self.read_byte(byte_index)?;
        Ok(byte & (1 << (index % 8)) != 0)
    }

    pub fn mark_present(&mut self, index: u64) -> Result<()> {
        self.ensure_capacity(index)?;
        let byte_index = index / 8;
        let byte = self.read_byte(byte_index)?;
        self.write_byte(byte_index, byte | (1 << (index % 8)))
    }

    pub fn mark_absent(&mut self, index: u64) -> Result<()> {
        let byte_index = index / 8;
        if byte_index >= self.byte_len()? {
            // Deallocation never shrinks the stream, and bits beyond
            // it already read as absent.
            return Ok(());
        }
        let byte = self.read_byte(byte_index)?;
        self.write_byte(byte_index, byte & !(1 << (index % 8)))
    }

    pub fn mark_range(&mut self, index: u64, count: u64) -> Result<()> {
        for i in index..index + count {
            self.mark_present(i)?;
        }
        Ok(())
    }

    pub fn clear_range(&mut self, index: u64, count: u64) -> Result<()> {
        for i in index..index + count {
            self.mark_absent(i)?;
        }
        Ok(())
    }

    /// Scan from `start_hint`, wrapping at `len_bits = byte_len * 8`,
    /// and return the first clear bit. The caller is responsible for
    /// not allocating beyond whatever maximum index the volume allows.
    pub fn allocate_first_available(&mut self, start_hint: u64) -> Result<u64> {
        let len_bits = (self.byte_len()?.max(GROWTH_INCREMENT_BYTES)) * 8;
        let start = if len_bits == 0 { 0 } else { start_hint % len_bits };

        for offset in 0..len_bits {
            let i = (start + offset) % len_bits;
            if !self.is_present(i)? {
                self.mark_present(i)?;
                trace!("allocated bitmap index {}", i);
                return Ok(i);
            }
        }

        // Every existing bit is set: grow by one increment and take
        // its first bit.
        let new_index = len_bits;
        self.mark_present(new_index)?;
        Ok(new_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::VecSectorStream;

    #[test]
    fn mark_and_query_round_trip() {
        let mut bm = Bitmap::new(VecSectorStream::new());
        bm.mark_present(10).unwrap();
        assert!(bm.is_present(10).unwrap());
        assert!(!bm.is_present(11).unwrap());
        bm.mark_absent(10).unwrap();
        assert!(!bm.is_present(10).unwrap());
    }

    #[test]
    fn stream_grows_in_eight_byte_increments() {
        let mut bm = Bitmap::new(VecSectorStream::new());
        bm.mark_present(0).unwrap();
        assert_eq!(bm.into_inner().len().unwrap(), GROWTH_INCREMENT_BYTES);
    }

    #[test]
    fn allocate_first_available_skips_set_bits() {
        let mut bm = Bitmap::new(VecSectorStream::new());
        bm.mark_present(0).unwrap();
        bm.mark_present(1).unwrap();
        let idx = bm.allocate_first_available(0).unwrap();
        assert_eq!(idx, 2);
    }

    #[test]
    fn deallocation_never_shrinks_stream() {
        let mut bm = Bitmap::new(VecSectorStream::new());
        bm.mark_present(40).unwrap();
        let len_before = bm.byte_len().unwrap();
        bm.mark_absent(40).unwrap();
        assert_eq!(bm.byte_len().unwrap(), len_before);
    }
}
