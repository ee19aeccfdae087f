//! The B+-tree directory index: key ordering, lookup, and the full
//! insert/delete mutation algebra (spec §3.6, §4.7). The teacher's
//! `filesystems/src/families/ntfs/ntfs/index.rs` only ever walked a
//! parsed tree in on-disk order (`parse_index_root`,
//! `parse_index_allocation`, `parse_index_entries`) — insert, delete,
//! node division, predecessor splice, lift, and root demotion are
//! built fresh here, modeled as an in-memory arena B-tree keyed by the
//! index's collation rule, with the on-disk codec kept as a thin
//! encode/decode layer around it.

use crate::collation;
use crate::error::{Error, Result};
use crate::structures::{INDEX_ENTRY_END, INDEX_ENTRY_NODE};
use crate::upcase::UpperCaseTable;
use std::cmp::Ordering;

/// One key/value pair stored in the tree: an index key (the sort key,
/// e.g. an upper-cased filename) and the MFT reference it resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub file_reference: u64,
}

type NodeId = usize;

struct Node {
    entries: Vec<IndexEntry>,
    /// Empty for a leaf; otherwise `children.len() == entries.len() + 1`,
    /// with `children[i]` holding keys less than `entries[i].key` and
    /// the last child holding keys greater than all of them.
    children: Vec<NodeId>,
}

impl Node {
    fn leaf() -> Self {
        Self { entries: Vec::new(), children: Vec::new() }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A B-tree over arbitrary byte keys, ordered by one of the five NTFS
/// collation rules (spec §4.7). `order` bounds the number of entries
/// per node before it must divide; the default mirrors a directory
/// index block sized to hold a modest number of short filenames.
pub struct Index {
    pub collation_rule: u32,
    order: usize,
    nodes: Vec<Node>,
    root: NodeId,
}

const DEFAULT_ORDER: usize = 32;

impl Index {
    pub fn new(collation_rule: u32) -> Self {
        Self { collation_rule, order: DEFAULT_ORDER, nodes: vec![Node::leaf()], root: 0 }
    }

    pub fn with_order(collation_rule: u32, order: usize) -> Self {
        Self { collation_rule, order: order.max(3), nodes: vec![Node::leaf()], root: 0 }
    }

    fn compare(&self, a: &[u8], b: &[u8], upcase: &UpperCaseTable) -> Ordering {
        collation::compare(self.collation_rule, a, b, upcase)
    }

    fn alloc_node(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Find the MFT reference stored for `key`, if present.
    pub fn find(&self, key: &[u8], upcase: &UpperCaseTable) -> Option<u64> {
        let mut current = self.root;
        loop {
            let node = &self.nodes[current];
            match node.entries.binary_search_by(|e| self.compare(&e.key, key, upcase)) {
                Ok(i) => return Some(node.entries[i].file_reference),
                Err(i) => {
                    if node.is_leaf() {
                        return None;
                    }
                    current = node.children[i];
                }
            }
        }
    }

    /// In-order traversal: every entry in ascending key order (spec
    /// §4.7 "iterate" / "find_all").
    pub fn iterate(&self) -> Vec<IndexEntry> {
        let mut out = Vec::new();
        self.collect(self.root, &mut out);
        out
    }

    /// Collect every entry for which `probe` reports `Equal`, pruning
    /// subtrees `probe` rules out entirely (spec §4.7 "find_all"). The
    /// comparator must stay consistent with the tree's own collation
    /// order — it may be coarser than an exact-key match (e.g. probing
    /// `COLLATION_SECURITY_HASH`'s hash-then-id compound key by hash
    /// alone to find every entry sharing a hash), but it must still
    /// return `Less`/`Greater` in the same direction the tree is sorted
    /// or whole branches will be skipped incorrectly.
    pub fn find_all<F: Fn(&[u8]) -> Ordering>(&self, probe: F) -> Vec<IndexEntry> {
        let mut out = Vec::new();
        self.find_all_from(self.root, &probe, &mut out);
        out
    }

    fn find_all_from<F: Fn(&[u8]) -> Ordering>(&self, id: NodeId, probe: &F, out: &mut Vec<IndexEntry>) {
        let node = &self.nodes[id];
        let is_leaf = node.is_leaf();
        for (i, entry) in node.entries.iter().enumerate() {
            let ord = probe(&entry.key);
            if !is_leaf && ord != Ordering::Less {
                self.find_all_from(node.children[i], probe, out);
            }
            if ord == Ordering::Equal {
                out.push(entry.clone());
            }
        }
        if !is_leaf {
            let explore_last = match node.entries.last() {
                Some(e) => probe(&e.key) != Ordering::Greater,
                None => true,
            };
            if explore_last {
                self.find_all_from(*node.children.last().unwrap(), probe, out);
            }
        }
    }

    /// Replace `old_key`'s entry with `new_key`/`new_file_reference` in
    /// place (spec §4.7 "update_entry"). The on-disk entry occupies a
    /// fixed-width slot sized to the original key, so only a same-length
    /// key can be swapped in without reshaping the node; a size change
    /// must go through `remove` + `insert` instead.
    pub fn update(
        &mut self,
        old_key: &[u8],
        new_key: Vec<u8>,
        new_file_reference: u64,
        upcase: &UpperCaseTable,
    ) -> Result<()> {
        if new_key.len() != old_key.len() {
            return Err(Error::Unsupported(
                "index entry update changes key length; remove and insert instead".into(),
            ));
        }
        self.update_from(self.root, old_key, new_key, new_file_reference, upcase)
    }

    fn update_from(
        &mut self,
        id: NodeId,
        old_key: &[u8],
        new_key: Vec<u8>,
        new_file_reference: u64,
        upcase: &UpperCaseTable,
    ) -> Result<()> {
        match self.nodes[id].entries.binary_search_by(|e| self.compare(&e.key, old_key, upcase)) {
            Ok(i) => {
                self.nodes[id].entries[i] = IndexEntry { key: new_key, file_reference: new_file_reference };
                Ok(())
            }
            Err(i) => {
                if self.nodes[id].is_leaf() {
                    Err(Error::NotFound("index key not found".into()))
                } else {
                    let child = self.nodes[id].children[i];
                    self.update_from(child, old_key, new_key, new_file_reference, upcase)
                }
            }
        }
    }

    fn collect(&self, id: NodeId, out: &mut Vec<IndexEntry>) {
        let node = &self.nodes[id];
        if node.is_leaf() {
            out.extend(node.entries.iter().cloned());
            return;
        }
        for i in 0..node.entries.len() {
            self.collect(node.children[i], out);
            out.push(node.entries[i].clone());
        }
        self.collect(*node.children.last().unwrap(), out);
    }

    /// Insert or update `key`'s file reference (spec §4.7: size-change
    /// on update is handled by the caller via remove + insert, per the
    /// fixed on-disk key width assumption).
    pub fn insert(&mut self, key: Vec<u8>, file_reference: u64, upcase: &UpperCaseTable) {
        let root = self.root;
        if self.nodes[root].entries.len() == 2 * self.order - 1 {
            let new_root = self.alloc_node(Node { entries: Vec::new(), children: vec![root] });
            self.root = new_root;
            self.split_child(new_root, 0);
        }
        self.insert_non_full(self.root, IndexEntry { key, file_reference }, upcase);
    }

    /// Split an overfull child (`2*order - 1` entries) into two nodes
    /// of `order - 1` entries each, promoting the median entry into
    /// `parent` (spec §4.7 "node division").
    fn split_child(&mut self, parent: NodeId, child_index: usize) {
        let order = self.order;
        let child_id = self.nodes[parent].children[child_index];
        let (median, right_entries, right_children) = {
            let child = &mut self.nodes[child_id];
            let right_entries = child.entries.split_off(order); // order-1 entries
            let median = child.entries.pop().unwrap(); // the entry at index order-1
            let right_children = if child.is_leaf() { Vec::new() } else { child.children.split_off(order) };
            (median, right_entries, right_children)
        };
        let right_id = self.alloc_node(Node { entries: right_entries, children: right_children });

        let parent_node = &mut self.nodes[parent];
        parent_node.entries.insert(child_index, median);
        parent_node.children.insert(child_index + 1, right_id);
    }

    fn insert_non_full(&mut self, id: NodeId, entry: IndexEntry, upcase: &UpperCaseTable) {
        let is_leaf = self.nodes[id].is_leaf();
        let pos = match self.nodes[id].entries.binary_search_by(|e| self.compare(&e.key, &entry.key, upcase)) {
            Ok(i) => {
                // Key already present: update in place (spec §4.7 "update_entry").
                self.nodes[id].entries[i].file_reference = entry.file_reference;
                return;
            }
            Err(i) => i,
        };

        if is_leaf {
            self.nodes[id].entries.insert(pos, entry);
            return;
        }

        let mut child_index = pos;
        let child_id = self.nodes[id].children[child_index];
        if self.nodes[child_id].entries.len() == 2 * self.order - 1 {
            self.split_child(id, child_index);
            if self.compare(&self.nodes[id].entries[child_index].key, &entry.key, upcase) == Ordering::Less {
                child_index += 1;
            }
        }
        let child_id = self.nodes[id].children[child_index];
        self.insert_non_full(child_id, entry, upcase);
    }

    /// Remove `key`. Internal-node deletion splices in the in-order
    /// predecessor (spec §4.7 "predecessor splice"), and an undersized
    /// child is rebalanced by borrowing from a sibling or merging
    /// ("lift"); an emptied root is demoted to its sole child ("root
    /// demotion").
    pub fn remove(&mut self, key: &[u8], upcase: &UpperCaseTable) -> Result<()> {
        if !self.remove_from(self.root, key, upcase) {
            return Err(Error::NotFound("index key not found".into()));
        }
        if !self.nodes[self.root].is_leaf() && self.nodes[self.root].entries.is_empty() {
            self.root = self.nodes[self.root].children[0];
        }
        Ok(())
    }

    fn min_entries(&self) -> usize {
        self.order - 1
    }

    fn remove_from(&mut self, id: NodeId, key: &[u8], upcase: &UpperCaseTable) -> bool {
        let pos_result = self.nodes[id].entries.binary_search_by(|e| self.compare(&e.key, key, upcase));
        let is_leaf = self.nodes[id].is_leaf();

        match pos_result {
            Ok(pos) => {
                if is_leaf {
                    self.nodes[id].entries.remove(pos);
                } else {
                    let predecessor = self.max_entry(self.nodes[id].children[pos]);
                    self.nodes[id].entries[pos] = predecessor.clone();
                    self.remove_from(self.nodes[id].children[pos], &predecessor.key, upcase);
                    self.fix_underflow(id, pos);
                }
                true
            }
            Err(pos) => {
                if is_leaf {
                    return false;
                }
                let child = self.nodes[id].children[pos];
                let found = self.remove_from(child, key, upcase);
                if found {
                    self.fix_underflow(id, pos);
                }
                found
            }
        }
    }

    fn max_entry(&self, id: NodeId) -> IndexEntry {
        let node = &self.nodes[id];
        if node.is_leaf() {
            node.entries.last().cloned().expect("non-empty subtree")
        } else {
            self.max_entry(*node.children.last().unwrap())
        }
    }

    /// After a delete beneath `parent`'s child at `child_pos`, restore
    /// the B-tree minimum-occupancy invariant by borrowing from a
    /// sibling or merging with one.
    fn fix_underflow(&mut self, parent: NodeId, child_pos: usize) {
        let child_id = self.nodes[parent].children[child_pos];
        if self.nodes[child_id].entries.len() >= self.min_entries() {
            return;
        }

        let has_left = child_pos > 0;
        let has_right = child_pos + 1 < self.nodes[parent].children.len();

        if has_left {
            let left_id = self.nodes[parent].children[child_pos - 1];
            if self.nodes[left_id].entries.len() > self.min_entries() {
                self.borrow_from_left(parent, child_pos);
                return;
            }
        }
        if has_right {
            let right_id = self.nodes[parent].children[child_pos + 1];
            if self.nodes[right_id].entries.len() > self.min_entries() {
                self.borrow_from_right(parent, child_pos);
                return;
            }
        }
        if has_left {
            self.merge_children(parent, child_pos - 1);
        } else {
            self.merge_children(parent, child_pos);
        }
    }

    fn borrow_from_left(&mut self, parent: NodeId, child_pos: usize) {
        let left_id = self.nodes[parent].children[child_pos - 1];
        let child_id = self.nodes[parent].children[child_pos];
        let separator = self.nodes[parent].entries[child_pos - 1].clone();
        let borrowed = self.nodes[left_id].entries.pop().unwrap();
        self.nodes[parent].entries[child_pos - 1] = borrowed;
        self.nodes[child_id].entries.insert(0, separator);
        if !self.nodes[left_id].is_leaf() {
            let moved_child = self.nodes[left_id].children.pop().unwrap();
            self.nodes[child_id].children.insert(0, moved_child);
        }
    }

    fn borrow_from_right(&mut self, parent: NodeId, child_pos: usize) {
        let right_id = self.nodes[parent].children[child_pos + 1];
        let child_id = self.nodes[parent].children[child_pos];
        let separator = self.nodes[parent].entries[child_pos].clone();
        let borrowed = self.nodes[right_id].entries.remove(0);
        self.nodes[parent].entries[child_pos] = borrowed;
        self.nodes[child_id].entries.push(separator);
        if !self.nodes[right_id].is_leaf() {
            let moved_child = self.nodes[right_id].children.remove(0);
            self.nodes[child_id].children.push(moved_child);
        }
    }

    /// Merge `parent`'s child at `left_pos` with its right sibling,
    /// pulling down the separating key (spec §4.7 "lift").
    fn merge_children(&mut self, parent: NodeId, left_pos: usize) {
        let left_id = self.nodes[parent].children[left_pos];
        let right_id = self.nodes[parent].children[left_pos + 1];
        let separator = self.nodes[parent].entries.remove(left_pos);
        self.nodes[parent].children.remove(left_pos + 1);

        let mut right_entries = std::mem::take(&mut self.nodes[right_id].entries);
        let mut right_children = std::mem::take(&mut self.nodes[right_id].children);
        let left = &mut self.nodes[left_id];
        left.entries.push(separator);
        left.entries.append(&mut right_entries);
        left.children.append(&mut right_children);
    }

    pub fn len(&self) -> usize {
        self.iterate().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// On-disk index-entry layout, shared by `$INDEX_ROOT` and
/// `$INDEX_ALLOCATION` blocks (spec §3.6). Extends the teacher's
/// read-only `IndexEntryHeader` with a serializer.
pub fn encode_entry(file_reference: u64, key: &[u8], child_vcn: Option<u64>, is_end: bool) -> Vec<u8> {
    let key_length = if is_end { 0 } else { key.len() };
    let mut flags = 0u16;
    if child_vcn.is_some() {
        flags |= INDEX_ENTRY_NODE;
    }
    if is_end {
        flags |= INDEX_ENTRY_END;
    }

    let header_len = 16;
    let body_len = header_len + key_length;
    let aligned_len = body_len.div_ceil(8) * 8;
    let vcn_len = if child_vcn.is_some() { 8 } else { 0 };
    let total_len = (aligned_len + vcn_len).div_ceil(8) * 8;

    let mut out = vec![0u8; total_len];
    out[0..8].copy_from_slice(&file_reference.to_le_bytes());
    out[8..10].copy_from_slice(&(total_len as u16).to_le_bytes());
    out[10..12].copy_from_slice(&(key_length as u16).to_le_bytes());
    out[12..14].copy_from_slice(&flags.to_le_bytes());
    if !is_end {
        out[header_len..header_len + key_length].copy_from_slice(key);
    }
    if let Some(vcn) = child_vcn {
        out[total_len - 8..total_len].copy_from_slice(&vcn.to_le_bytes());
    }
    out
}

/// Decode one on-disk index entry, returning it and the byte length
/// consumed. `is_end` entries carry no key and no file reference.
pub fn decode_entry(data: &[u8]) -> Result<(Option<IndexEntry>, Option<u64>, usize)> {
    if data.len() < 16 {
        return Err(Error::InvalidFormat("index entry header truncated".into()));
    }
    let file_reference = u64::from_le_bytes(data[0..8].try_into().unwrap()) & 0x0000_FFFF_FFFF_FFFF;
    let length = u16::from_le_bytes(data[8..10].try_into().unwrap()) as usize;
    let key_length = u16::from_le_bytes(data[10..12].try_into().unwrap()) as usize;
    let flags = u16::from_le_bytes(data[12..14].try_into().unwrap());
    if length == 0 || length > data.len() {
        return Err(Error::InvalidFormat("index entry length out of bounds".into()));
    }

    let is_end = flags & INDEX_ENTRY_END != 0;
    let has_child = flags & INDEX_ENTRY_NODE != 0;

    let entry = if is_end {
        None
    } else {
        let key = data[16..16 + key_length].to_vec();
        Some(IndexEntry { key, file_reference })
    };
    let child_vcn = if has_child { Some(u64::from_le_bytes(data[length - 8..length].try_into().unwrap())) } else { None };

    Ok((entry, child_vcn, length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::COLLATION_UNSIGNED_LONG;

    fn key(n: u32) -> Vec<u8> {
        n.to_le_bytes().to_vec()
    }

    #[test]
    fn insert_and_find_round_trip() {
        let upcase = UpperCaseTable::identity();
        let mut index = Index::with_order(COLLATION_UNSIGNED_LONG, 3);
        for n in 0..50u32 {
            index.insert(key(n), n as u64 + 1000, &upcase);
        }
        for n in 0..50u32 {
            assert_eq!(index.find(&key(n), &upcase), Some(n as u64 + 1000));
        }
        assert_eq!(index.find(&key(999), &upcase), None);
    }

    #[test]
    fn iterate_returns_sorted_order() {
        let upcase = UpperCaseTable::identity();
        let mut index = Index::with_order(COLLATION_UNSIGNED_LONG, 3);
        for n in [5, 1, 9, 3, 7, 2, 8, 0, 4, 6] {
            index.insert(key(n), n as u64, &upcase);
        }
        let sorted: Vec<u32> = index.iterate().iter().map(|e| u32::from_le_bytes(e.key.clone().try_into().unwrap())).collect();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn update_in_place_does_not_duplicate() {
        let upcase = UpperCaseTable::identity();
        let mut index = Index::with_order(COLLATION_UNSIGNED_LONG, 3);
        index.insert(key(1), 100, &upcase);
        index.insert(key(1), 200, &upcase);
        assert_eq!(index.len(), 1);
        assert_eq!(index.find(&key(1), &upcase), Some(200));
    }

    #[test]
    fn remove_shrinks_tree_and_preserves_remaining_order() {
        let upcase = UpperCaseTable::identity();
        let mut index = Index::with_order(COLLATION_UNSIGNED_LONG, 3);
        for n in 0..30u32 {
            index.insert(key(n), n as u64, &upcase);
        }
        for n in (0..30u32).step_by(2) {
            index.remove(&key(n), &upcase).unwrap();
        }
        assert_eq!(index.len(), 15);
        for n in (1..30u32).step_by(2) {
            assert_eq!(index.find(&key(n), &upcase), Some(n as u64));
        }
        for n in (0..30u32).step_by(2) {
            assert_eq!(index.find(&key(n), &upcase), None);
        }
    }

    #[test]
    fn update_in_place_keeps_tree_shape() {
        let upcase = UpperCaseTable::identity();
        let mut index = Index::with_order(COLLATION_UNSIGNED_LONG, 3);
        for n in 0..30u32 {
            index.insert(key(n), n as u64, &upcase);
        }
        index.update(&key(15), key(15), 9999, &upcase).unwrap();
        assert_eq!(index.len(), 30);
        assert_eq!(index.find(&key(15), &upcase), Some(9999));
    }

    #[test]
    fn update_rejects_key_length_change() {
        let upcase = UpperCaseTable::identity();
        let mut index = Index::with_order(COLLATION_UNSIGNED_LONG, 3);
        index.insert(key(1), 1, &upcase);
        let longer_key = vec![1, 0, 0, 0, 0];
        assert!(index.update(&key(1), longer_key, 2, &upcase).is_err());
    }

    #[test]
    fn update_missing_key_errors() {
        let upcase = UpperCaseTable::identity();
        let mut index = Index::with_order(COLLATION_UNSIGNED_LONG, 3);
        index.insert(key(1), 1, &upcase);
        assert!(index.update(&key(2), key(2), 5, &upcase).is_err());
    }

    #[test]
    fn find_all_prunes_to_matching_subtrees() {
        let upcase = UpperCaseTable::identity();
        let mut index = Index::with_order(COLLATION_UNSIGNED_LONG, 3);
        for n in 0..50u32 {
            index.insert(key(n), n as u64, &upcase);
        }
        // Probe for the exact key 17, the same comparator `find` would use,
        // expressed as a closure to exercise the pruning path.
        let target = key(17);
        let matches = index.find_all(|k| {
            let n = u32::from_le_bytes(k.try_into().unwrap());
            n.cmp(&u32::from_le_bytes(target.clone().try_into().unwrap()))
        });
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].file_reference, 17);
    }

    #[test]
    fn find_all_returns_every_match_for_a_coarse_probe() {
        let upcase = UpperCaseTable::identity();
        let mut index = Index::with_order(COLLATION_UNSIGNED_LONG, 3);
        // Two entries sharing the same low 16 bits, like a compound
        // collation key probed by its first component only.
        index.insert(0x0000_0001u32.to_le_bytes().to_vec(), 1, &upcase);
        index.insert(0x0001_0001u32.to_le_bytes().to_vec(), 2, &upcase);
        index.insert(0x0000_0002u32.to_le_bytes().to_vec(), 3, &upcase);

        let matches = index.find_all(|k| {
            let n = u32::from_le_bytes(k.try_into().unwrap());
            (n & 0xFFFF).cmp(&1)
        });
        let mut refs: Vec<u64> = matches.iter().map(|e| e.file_reference).collect();
        refs.sort();
        assert_eq!(refs, vec![1, 2]);
    }

    #[test]
    fn remove_missing_key_errors() {
        let upcase = UpperCaseTable::identity();
        let mut index = Index::with_order(COLLATION_UNSIGNED_LONG, 3);
        index.insert(key(1), 1, &upcase);
        assert!(index.remove(&key(2), &upcase).is_err());
    }

    #[test]
    fn entry_codec_round_trips() {
        let encoded = encode_entry(42, &[1, 2, 3, 4], Some(99), false);
        let (entry, child_vcn, len) = decode_entry(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        assert_eq!(entry.unwrap(), IndexEntry { key: vec![1, 2, 3, 4], file_reference: 42 });
        assert_eq!(child_vcn, Some(99));
    }

    #[test]
    fn end_entry_codec_has_no_key() {
        let encoded = encode_entry(0, &[], None, true);
        let (entry, child_vcn, _) = decode_entry(&encoded).unwrap();
        assert!(entry.is_none());
        assert!(child_vcn.is_none());
    }
}
