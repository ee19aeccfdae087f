//! Stream-extent algebra (spec §3.2, §4.1): set operations over
//! half-open `[offset, length)` ranges. No teacher file does this
//! directly; the closest analog is the sparse-range list in
//! `moses-filesystems`'s `ntfs::sparse::SparseInfo`, generalized here
//! into a total, associative algebra.

/// A half-open byte range `[offset, offset + length)`. `length` is
/// always nonzero; the empty range simply isn't representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StreamExtent {
    pub offset: u64,
    pub length: u64,
}

impl StreamExtent {
    /// Panics on a zero-length extent — construction rejects it per
    /// spec §4.1, since every list operation here assumes extents are
    /// never empty.
    pub fn new(offset: u64, length: u64) -> Self {
        assert!(length > 0, "StreamExtent length must be nonzero");
        Self { offset, length }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn overlaps(&self, other: &StreamExtent) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    pub fn is_adjacent(&self, other: &StreamExtent) -> bool {
        self.end() == other.offset || other.end() == self.offset
    }

    fn intersection(&self, other: &StreamExtent) -> Option<StreamExtent> {
        let start = self.offset.max(other.offset);
        let end = self.end().min(other.end());
        (start < end).then(|| StreamExtent::new(start, end - start))
    }
}

/// Sort and coalesce overlapping/adjacent extents into the canonical
/// normalized form every other function here expects and returns.
pub fn normalize(extents: &[StreamExtent]) -> Vec<StreamExtent> {
    let mut sorted: Vec<StreamExtent> = extents.to_vec();
    sorted.sort_by_key(|e| e.offset);

    let mut out: Vec<StreamExtent> = Vec::with_capacity(sorted.len());
    for e in sorted {
        if let Some(last) = out.last_mut() {
            if e.offset <= last.end() {
                let new_end = last.end().max(e.end());
                last.length = new_end - last.offset;
                continue;
            }
        }
        out.push(e);
    }
    out
}

/// `union(A, B)`: every byte covered by either input.
pub fn union(a: &[StreamExtent], b: &[StreamExtent]) -> Vec<StreamExtent> {
    let mut combined = Vec::with_capacity(a.len() + b.len());
    combined.extend_from_slice(a);
    combined.extend_from_slice(b);
    normalize(&combined)
}

/// `intersect(A, B)`: bytes covered by both inputs.
pub fn intersect(a: &[StreamExtent], b: &[StreamExtent]) -> Vec<StreamExtent> {
    let a = normalize(a);
    let b = normalize(b);
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if let Some(ix) = a[i].intersection(&b[j]) {
            out.push(ix);
        }
        if a[i].end() < b[j].end() {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// `subtract(A, B)`: bytes covered by `A` but not by `B`.
pub fn subtract(a: &[StreamExtent], b: &[StreamExtent]) -> Vec<StreamExtent> {
    let b = normalize(b);
    let mut out = Vec::new();
    for e in normalize(a) {
        let mut remaining = vec![e];
        for cut in &b {
            let mut next = Vec::new();
            for r in remaining {
                if !r.overlaps(cut) {
                    next.push(r);
                    continue;
                }
                if r.offset < cut.offset {
                    next.push(StreamExtent::new(r.offset, cut.offset - r.offset));
                }
                if cut.end() < r.end() {
                    next.push(StreamExtent::new(cut.end(), r.end() - cut.end()));
                }
            }
            remaining = next;
        }
        out.extend(remaining);
    }
    normalize(&out)
}

/// A `(block_index, block_count)` span fully-or-partially covered by
/// `extents` when the stream is divided into `block_size`-byte blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub block_index: u64,
    pub block_count: u64,
}

/// Block enumeration (spec §4.1): collapse a (possibly fragmented)
/// extent list into the set of blocks they touch, merging adjacent
/// blocks into a single range.
pub fn enumerate_blocks(extents: &[StreamExtent], block_size: u64) -> Vec<BlockRange> {
    assert!(block_size > 0);
    let mut out: Vec<BlockRange> = Vec::new();
    for e in normalize(extents) {
        let first_block = e.offset / block_size;
        let last_block = (e.end() - 1) / block_size;
        let count = last_block - first_block + 1;
        if let Some(last) = out.last_mut() {
            if first_block <= last.block_index + last.block_count {
                let new_end = (last.block_index + last.block_count).max(first_block + count);
                last.block_count = new_end - last.block_index;
                continue;
            }
        }
        out.push(BlockRange { block_index: first_block, block_count: count });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(offset: u64, length: u64) -> StreamExtent {
        StreamExtent::new(offset, length)
    }

    #[test]
    fn union_with_empty_is_identity() {
        let a = vec![e(0, 10), e(20, 5)];
        assert_eq!(union(&a, &[]), normalize(&a));
    }

    #[test]
    fn intersect_is_commutative_and_idempotent() {
        let a = vec![e(0, 10), e(20, 10)];
        let b = vec![e(5, 20)];
        assert_eq!(intersect(&a, &b), intersect(&b, &a));
        assert_eq!(intersect(&a, &a), normalize(&a));
    }

    #[test]
    fn subtract_self_is_empty() {
        let a = vec![e(0, 10), e(15, 5)];
        assert_eq!(subtract(&a, &a), Vec::<StreamExtent>::new());
    }

    #[test]
    fn subtract_union_roundtrip_is_subset() {
        let a = vec![e(0, 10)];
        let b = vec![e(20, 10)];
        let u = union(&a, &b);
        let back = subtract(&u, &b);
        for r in &back {
            assert!(a.iter().any(|x| x.offset <= r.offset && r.end() <= x.end()));
        }
    }

    #[test]
    fn overlapping_inputs_are_tolerated() {
        let a = vec![e(0, 10), e(5, 10)];
        assert_eq!(normalize(&a), vec![e(0, 15)]);
    }

    #[test]
    fn enumerate_blocks_merges_adjacent_extents() {
        let extents = vec![e(0, 512), e(512, 512)];
        let blocks = enumerate_blocks(&extents, 1024);
        assert_eq!(blocks, vec![BlockRange { block_index: 0, block_count: 1 }]);
    }

    #[test]
    fn enumerate_blocks_partial_coverage_counts_whole_block() {
        let extents = vec![e(100, 10)];
        let blocks = enumerate_blocks(&extents, 4096);
        assert_eq!(blocks, vec![BlockRange { block_index: 0, block_count: 1 }]);
    }
}
