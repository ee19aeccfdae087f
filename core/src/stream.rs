//! The sector-stream contract (spec §3.1, §6): a seekable, length-bearing
//! byte pipe with optional sparse-extent reporting. Modeled after the
//! teacher's `FilesystemReader`/`FilesystemWriter` trait split
//! (`moses-filesystems`'s `device_writer.rs`), fused into one trait since
//! every stream in this workspace is opened for either role up front.

use crate::error::{Error, Result};
use crate::extent::StreamExtent;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// A byte-addressable block device, or a view over one.
///
/// Implementations own their own cursor; `read_at`/`write_at` seek and
/// transfer in one call so the trait stays object-safe and so callers
/// never have to interleave a `seek` with a `read`/`write` by hand.
pub trait SectorStream: Send {
    /// Logical length in bytes.
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Grow or shrink the stream. Shrinking drops any extents beyond
    /// the new length.
    fn set_len(&mut self, len: u64) -> Result<()>;

    fn can_read(&self) -> bool;
    fn can_write(&self) -> bool;

    /// Read up to `buf.len()` bytes starting at `offset`. Returns the
    /// number of bytes actually read (short only at end-of-stream).
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf` at `offset`, extending the stream if necessary.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Ranges that actually hold stored data; `None` means the whole
    /// stream should be treated as one valid extent (no sparseness
    /// tracked by this implementation).
    fn extents(&self) -> Option<Vec<StreamExtent>> {
        None
    }
}

/// A plain file, or a fixed-offset region of one, used as a raw
/// sector stream.
pub struct FileSectorStream {
    file: File,
    read_only: bool,
}

impl FileSectorStream {
    pub fn new(file: File, read_only: bool) -> Self {
        Self { file, read_only }
    }
}

impl SectorStream for FileSectorStream {
    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.file.set_len(len)?;
        Ok(())
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        !self.read_only
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match self.file.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let needed = offset + buf.len() as u64;
        if needed > self.len()? {
            self.file.set_len(needed)?;
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// An in-memory sector stream, used by tests and by `SnapshotStream`'s
/// overlay.
#[derive(Default)]
pub struct VecSectorStream {
    data: Vec<u8>,
    read_only: bool,
}

impl VecSectorStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: Vec<u8>) -> Self {
        Self { data, read_only: false }
    }

    pub fn read_only(data: Vec<u8>) -> Self {
        Self { data, read_only: true }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl SectorStream for VecSectorStream {
    fn len(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.data.resize(len as usize, 0);
        Ok(())
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        !self.read_only
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let offset = offset as usize;
        let needed = offset + buf.len();
        if needed > self.data.len() {
            self.data.resize(needed, 0);
        }
        self.data[offset..needed].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_stream_grows_on_write() {
        let mut s = VecSectorStream::new();
        s.write_at(10, b"hi").unwrap();
        assert_eq!(s.len().unwrap(), 12);
        let mut buf = [0u8; 2];
        s.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[test]
    fn vec_stream_short_read_at_eof() {
        let mut s = VecSectorStream::with_data(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        let n = s.read_at(1, &mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..2], &[2, 3]);
    }

    #[test]
    fn read_only_rejects_write() {
        let mut s = VecSectorStream::read_only(vec![0; 4]);
        assert!(s.write_at(0, b"x").is_err());
    }
}
