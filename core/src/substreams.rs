//! Composable `SectorStream` views (spec §2 row 3), generalizing the
//! cluster-run walk in the teacher's `ntfs::sparse::read_sparse_data`
//! into reusable adapters: a window into a parent stream, several
//! streams end to end, an always-zero stream, and a read-ahead cache.

use crate::error::Result;
use crate::stream::SectorStream;
use log::trace;

/// A fixed-length window into a parent stream, starting at `base`.
pub struct SubStream<S> {
    parent: S,
    base: u64,
    length: u64,
    can_write: bool,
}

impl<S: SectorStream> SubStream<S> {
    pub fn new(parent: S, base: u64, length: u64, can_write: bool) -> Self {
        Self { parent, base, length, can_write }
    }

    pub fn into_parent(self) -> S {
        self.parent
    }
}

impl<S: SectorStream> SectorStream for SubStream<S> {
    fn len(&self) -> Result<u64> {
        Ok(self.length)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.length = len;
        Ok(())
    }

    fn can_read(&self) -> bool {
        self.parent.can_read()
    }

    fn can_write(&self) -> bool {
        self.can_write && self.parent.can_write()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.length {
            return Ok(0);
        }
        let n = buf.len().min((self.length - offset) as usize);
        self.parent.read_at(self.base + offset, &mut buf[..n])
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        self.parent.write_at(self.base + offset, buf)?;
        self.length = self.length.max(offset + buf.len() as u64);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.parent.flush()
    }
}

/// Always-zero, fixed-length stream: the read path for a sparse
/// cluster or hole (spec §4.6 cluster-stream read path, case (c)).
pub struct ZeroStream {
    length: u64,
}

impl ZeroStream {
    pub fn new(length: u64) -> Self {
        Self { length }
    }
}

impl SectorStream for ZeroStream {
    fn len(&self) -> Result<u64> {
        Ok(self.length)
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.length = len;
        Ok(())
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        false
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.length {
            return Ok(0);
        }
        let n = buf.len().min((self.length - offset) as usize);
        buf[..n].fill(0);
        Ok(n)
    }

    fn write_at(&mut self, _offset: u64, _buf: &[u8]) -> Result<()> {
        Err(crate::error::Error::ReadOnly)
    }
}

/// Several streams end to end, presented as one linear stream. Used
/// to present a multi-extent attribute (or a compressed attribute's
/// decompressed cluster runs) as a single contiguous byte range.
pub struct ConcatStream<S> {
    parts: Vec<S>,
    offsets: Vec<u64>,
    total_len: u64,
}

impl<S: SectorStream> ConcatStream<S> {
    pub fn new(parts: Vec<S>) -> Result<Self> {
        let mut offsets = Vec::with_capacity(parts.len());
        let mut total = 0u64;
        for p in &parts {
            offsets.push(total);
            total += p.len()?;
        }
        Ok(Self { parts, offsets, total_len: total })
    }

    fn locate(&self, offset: u64) -> Option<(usize, u64)> {
        if offset >= self.total_len {
            return None;
        }
        let idx = match self.offsets.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Some((idx, offset - self.offsets[idx]))
    }
}

impl<S: SectorStream> SectorStream for ConcatStream<S> {
    fn len(&self) -> Result<u64> {
        Ok(self.total_len)
    }

    fn set_len(&mut self, _len: u64) -> Result<()> {
        Err(crate::error::Error::Unsupported("ConcatStream cannot be resized directly".into()))
    }

    fn can_read(&self) -> bool {
        self.parts.iter().all(|p| p.can_read())
    }

    fn can_write(&self) -> bool {
        self.parts.iter().all(|p| p.can_write())
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let Some((mut idx, mut local)) = self.locate(offset) else {
            return Ok(0);
        };
        let mut done = 0;
        while done < buf.len() && idx < self.parts.len() {
            let n = self.parts[idx].read_at(local, &mut buf[done..])?;
            if n == 0 {
                break;
            }
            done += n;
            idx += 1;
            local = 0;
        }
        Ok(done)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let Some((mut idx, mut local)) = self.locate(offset) else {
            return Err(crate::error::Error::InvalidFormat("write past ConcatStream end".into()));
        };
        let mut done = 0;
        while done < buf.len() {
            let part_len = self.parts[idx].len()?;
            let avail = (part_len - local) as usize;
            let n = avail.min(buf.len() - done);
            self.parts[idx].write_at(local, &buf[done..done + n])?;
            done += n;
            idx += 1;
            local = 0;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        for p in &mut self.parts {
            p.flush()?;
        }
        Ok(())
    }
}

/// Read-ahead / write-behind cache in front of another stream. Writes
/// are buffered per page and flushed on `flush()` or when a different
/// page is touched; this keeps small, scattered attribute-header
/// updates from round-tripping to the underlying device one byte run
/// at a time.
pub struct BufferedStream<S> {
    inner: S,
    page_size: u64,
    cached_page: Option<u64>,
    buffer: Vec<u8>,
    dirty: bool,
}

impl<S: SectorStream> BufferedStream<S> {
    pub fn new(inner: S, page_size: u64) -> Self {
        Self { inner, page_size, cached_page: None, buffer: vec![0; page_size as usize], dirty: false }
    }

    fn flush_page(&mut self) -> Result<()> {
        if self.dirty {
            if let Some(page) = self.cached_page {
                trace!("flushing buffered page {}", page);
                self.inner.write_at(page * self.page_size, &self.buffer)?;
            }
            self.dirty = false;
        }
        Ok(())
    }

    fn load_page(&mut self, page: u64) -> Result<()> {
        if self.cached_page == Some(page) {
            return Ok(());
        }
        self.flush_page()?;
        self.buffer.fill(0);
        self.inner.read_at(page * self.page_size, &mut self.buffer)?;
        self.cached_page = Some(page);
        Ok(())
    }
}

impl<S: SectorStream> SectorStream for BufferedStream<S> {
    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        self.flush_page()?;
        self.inner.set_len(len)
    }

    fn can_read(&self) -> bool {
        self.inner.can_read()
    }

    fn can_write(&self) -> bool {
        self.inner.can_write()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let page = pos / self.page_size;
            let page_off = (pos % self.page_size) as usize;
            self.load_page(page)?;
            let n = (buf.len() - done).min(self.buffer.len() - page_off);
            if n == 0 {
                break;
            }
            buf[done..done + n].copy_from_slice(&self.buffer[page_off..page_off + n]);
            done += n;
        }
        Ok(done)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let page = pos / self.page_size;
            let page_off = (pos % self.page_size) as usize;
            self.load_page(page)?;
            let n = (buf.len() - done).min(self.buffer.len() - page_off);
            self.buffer[page_off..page_off + n].copy_from_slice(&buf[done..done + n]);
            self.dirty = true;
            done += n;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_page()?;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::VecSectorStream;

    #[test]
    fn substream_is_windowed() {
        let parent = VecSectorStream::with_data(vec![0, 1, 2, 3, 4, 5, 6, 7]);
        let mut sub = SubStream::new(parent, 2, 4, true);
        let mut buf = [0u8; 4];
        sub.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [2, 3, 4, 5]);
    }

    #[test]
    fn zero_stream_reads_zero() {
        let mut z = ZeroStream::new(16);
        let mut buf = [0xFFu8; 8];
        z.read_at(4, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 8]);
    }

    #[test]
    fn concat_stream_spans_parts() {
        let parts = vec![
            VecSectorStream::with_data(vec![1, 2, 3]),
            VecSectorStream::with_data(vec![4, 5, 6]),
        ];
        let mut c = ConcatStream::new(parts).unwrap();
        assert_eq!(c.len().unwrap(), 6);
        let mut buf = [0u8; 4];
        c.read_at(2, &mut buf).unwrap();
        assert_eq!(buf, [3, 4, 5, 6]);
    }

    #[test]
    fn buffered_stream_round_trips() {
        let inner = VecSectorStream::with_data(vec![0; 4096 * 2]);
        let mut b = BufferedStream::new(inner, 4096);
        b.write_at(10, b"hello").unwrap();
        b.write_at(4100, b"world").unwrap();
        let mut buf = [0u8; 5];
        b.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        b.read_at(4100, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }
}
