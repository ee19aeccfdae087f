//! Copy-on-write snapshot overlay (spec §4.2). No teacher file builds
//! this exact state machine; it's modeled after the overlay-on-base
//! idea in `moses-filesystems`'s `ntfs::sparse` (an extent list layered
//! over a base file) and the dry-run/`enable_writes` gate in
//! `device_writer::WriteConfig`, which is where `FROZEN`'s
//! advisory-failure shape comes from.

use crate::error::{Error, Result};
use crate::extent::{self, StreamExtent};
use crate::stream::SectorStream;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Open,
    Snapshot,
}

/// `OPEN ─snapshot()→ SNAPSHOT ─revert()/forget()→ OPEN`, with an
/// orthogonal `freeze()/thaw()` that blocks mutation in either mode.
pub struct SnapshotStream<S> {
    base: S,
    mode: Mode,
    frozen: bool,
    overlay: Vec<u8>,
    overlay_extents: Vec<StreamExtent>,
    saved_cursor: u64,
}

impl<S: SectorStream> SnapshotStream<S> {
    pub fn new(base: S) -> Self {
        Self {
            base,
            mode: Mode::Open,
            frozen: false,
            overlay: Vec::new(),
            overlay_extents: Vec::new(),
            saved_cursor: 0,
        }
    }

    pub fn is_snapshotted(&self) -> bool {
        self.mode == Mode::Snapshot
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Begin diverting writes to the in-memory overlay.
    pub fn snapshot(&mut self, cursor: u64) {
        self.mode = Mode::Snapshot;
        self.saved_cursor = cursor;
    }

    /// Discard the overlay and go back to `OPEN`, restoring the saved
    /// cursor; the base is untouched.
    pub fn revert(&mut self) -> u64 {
        self.overlay.clear();
        self.overlay_extents.clear();
        self.mode = Mode::Open;
        self.saved_cursor
    }

    /// Write every overlay extent back to the base, in 8 KiB chunks,
    /// then discard the overlay. Best-effort: a failed chunk leaves
    /// the base partially updated, matching spec §4.2's contract.
    pub fn forget(&mut self) -> Result<()> {
        const CHUNK: u64 = 8192;
        for extent in self.overlay_extents.clone() {
            let mut done = 0u64;
            while done < extent.length {
                let n = CHUNK.min(extent.length - done);
                let src_off = (extent.offset + done) as usize;
                self.base.write_at(extent.offset + done, &self.overlay[src_off..src_off + n as usize])?;
                done += n;
            }
        }
        self.overlay.clear();
        self.overlay_extents.clear();
        self.mode = Mode::Open;
        debug!("snapshot overlay flushed to base");
        Ok(())
    }

    /// Advisory freeze: subsequent mutations fail until `thaw()`.
    /// Seeking (i.e. choosing an offset for the next read/write) is
    /// still permitted — only the mutation itself is rejected.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn thaw(&mut self) {
        self.frozen = false;
    }

    fn ensure_overlay_capacity(&mut self, end: u64) {
        if end as usize > self.overlay.len() {
            self.overlay.resize(end as usize, 0);
        }
    }
}

impl<S: SectorStream> SectorStream for SnapshotStream<S> {
    fn len(&self) -> Result<u64> {
        match self.mode {
            Mode::Open => self.base.len(),
            Mode::Snapshot => {
                let overlay_end = self.overlay_extents.iter().map(|e| e.end()).max().unwrap_or(0);
                Ok(self.base.len()?.max(overlay_end))
            }
        }
    }

    fn set_len(&mut self, len: u64) -> Result<()> {
        if self.frozen {
            return Err(Error::Frozen);
        }
        match self.mode {
            Mode::Open => self.base.set_len(len),
            Mode::Snapshot => {
                self.overlay_extents = extent::subtract(
                    &self.overlay_extents,
                    &[StreamExtent::new(len, u64::MAX - len)],
                );
                Ok(())
            }
        }
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        !self.frozen && self.base.can_write()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if self.mode == Mode::Open {
            return self.base.read_at(offset, buf);
        }

        let total_len = self.len()?;
        if offset >= total_len {
            return Ok(0);
        }
        let n = buf.len().min((total_len - offset) as usize);
        let buf = &mut buf[..n];
        buf.fill(0);

        let base_n = self.base.read_at(offset, buf).unwrap_or(0);
        let _ = base_n; // base bytes already landed in `buf`; overlay stamps over them below

        let want = StreamExtent::new(offset, n as u64);
        for region in extent::intersect(&self.overlay_extents, &[want]) {
            let rel = (region.offset - offset) as usize;
            let len = region.length as usize;
            let src = region.offset as usize;
            buf[rel..rel + len].copy_from_slice(&self.overlay[src..src + len]);
        }
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        if self.frozen {
            return Err(Error::Frozen);
        }
        match self.mode {
            Mode::Open => self.base.write_at(offset, buf),
            Mode::Snapshot => {
                let end = offset + buf.len() as u64;
                self.ensure_overlay_capacity(end);
                self.overlay[offset as usize..end as usize].copy_from_slice(buf);
                self.overlay_extents =
                    extent::union(&self.overlay_extents, &[StreamExtent::new(offset, buf.len() as u64)]);
                Ok(())
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        if self.mode == Mode::Open {
            self.base.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::VecSectorStream;

    #[test]
    fn reads_overlay_then_base() {
        let base = VecSectorStream::with_data(vec![1, 2, 3, 4]);
        let mut snap = SnapshotStream::new(base);
        snap.snapshot(0);
        snap.write_at(1, &[99]).unwrap();

        let mut buf = [0u8; 4];
        snap.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 99, 3, 4]);
    }

    #[test]
    fn revert_discards_overlay() {
        let base = VecSectorStream::with_data(vec![1, 2, 3, 4]);
        let mut snap = SnapshotStream::new(base);
        snap.snapshot(7);
        snap.write_at(0, &[0xFF]).unwrap();
        let cursor = snap.revert();
        assert_eq!(cursor, 7);

        let mut buf = [0u8; 1];
        snap.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [1]);
    }

    #[test]
    fn forget_flushes_to_base() {
        let base = VecSectorStream::with_data(vec![0; 4]);
        let mut snap = SnapshotStream::new(base);
        snap.snapshot(0);
        snap.write_at(0, &[9, 9, 9, 9]).unwrap();
        snap.forget().unwrap();
        assert!(!snap.is_snapshotted());

        let mut buf = [0u8; 4];
        snap.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [9, 9, 9, 9]);
    }

    #[test]
    fn frozen_rejects_writes_but_allows_reads() {
        let base = VecSectorStream::with_data(vec![1, 2, 3]);
        let mut snap = SnapshotStream::new(base);
        snap.freeze();
        assert!(snap.write_at(0, &[1]).is_err());
        let mut buf = [0u8; 1];
        assert!(snap.read_at(0, &mut buf).is_ok());
        snap.thaw();
        assert!(snap.write_at(0, &[1]).is_ok());
    }
}
