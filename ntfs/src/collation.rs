//! Index key collators (spec §4.7). The teacher's
//! `filesystems/src/families/ntfs/ntfs/index.rs` only ever walked
//! indexes in on-disk order and never compared keys; these five rules
//! are built fresh from the `$INDEX_ROOT` collation-rule codes in
//! `structures.rs`.

use crate::structures::{
    COLLATION_BINARY, COLLATION_FILENAME, COLLATION_MULTIPLE_UNSIGNED_LONGS, COLLATION_SECURITY_HASH, COLLATION_SID,
    COLLATION_UNSIGNED_LONG,
};
use crate::upcase::UpperCaseTable;
use std::cmp::Ordering;

/// Compare two index keys under the given collation rule. `upcase` is
/// only consulted for `COLLATION_FILENAME`.
pub fn compare(rule: u32, a: &[u8], b: &[u8], upcase: &UpperCaseTable) -> Ordering {
    match rule {
        COLLATION_BINARY => a.cmp(b),
        COLLATION_UNSIGNED_LONG => compare_unsigned_long(a, b),
        COLLATION_MULTIPLE_UNSIGNED_LONGS => compare_multiple_unsigned_longs(a, b),
        COLLATION_SID => compare_sid(a, b),
        COLLATION_SECURITY_HASH => compare_security_hash(a, b),
        COLLATION_FILENAME => compare_filename(a, b, upcase),
        _ => a.cmp(b),
    }
}

fn read_u32_le(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn compare_unsigned_long(a: &[u8], b: &[u8]) -> Ordering {
    read_u32_le(a, 0).cmp(&read_u32_le(b, 0))
}

fn compare_multiple_unsigned_longs(a: &[u8], b: &[u8]) -> Ordering {
    let count = a.len().min(b.len()) / 4;
    for i in 0..count {
        let ord = read_u32_le(a, i * 4).cmp(&read_u32_le(b, i * 4));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    (a.len() / 4).cmp(&(b.len() / 4))
}

/// SID comparison: revision, then identifier-authority (6 bytes, big
/// endian), then sub-authorities in order.
fn compare_sid(a: &[u8], b: &[u8]) -> Ordering {
    if a.len() < 8 || b.len() < 8 {
        return a.cmp(b);
    }
    let revision_ord = a[0].cmp(&b[0]);
    if revision_ord != Ordering::Equal {
        return revision_ord;
    }
    let sub_count = a[1].min(b[1]) as usize;
    let authority_ord = a[2..8].cmp(&b[2..8]);
    if authority_ord != Ordering::Equal {
        return authority_ord;
    }
    for i in 0..sub_count {
        let offset = 8 + i * 4;
        if offset + 4 > a.len() || offset + 4 > b.len() {
            break;
        }
        let ord = read_u32_le(a, offset).cmp(&read_u32_le(b, offset));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a[1].cmp(&b[1])
}

/// `$SECURITY_DESCRIPTOR` index key: hash first, then security id.
fn compare_security_hash(a: &[u8], b: &[u8]) -> Ordering {
    if a.len() < 8 || b.len() < 8 {
        return a.cmp(b);
    }
    let hash_ord = read_u32_le(a, 0).cmp(&read_u32_le(b, 0));
    if hash_ord != Ordering::Equal {
        return hash_ord;
    }
    read_u32_le(a, 4).cmp(&read_u32_le(b, 4))
}

/// Filename collation: case-insensitive per-code-unit comparison of
/// the UTF-16LE name embedded in a `$FILE_NAME` index key (offset 0x42
/// within the attribute, name-length at 0x40, name starting at 0x42 —
/// callers pass just the name bytes).
fn compare_filename(a: &[u8], b: &[u8], upcase: &UpperCaseTable) -> Ordering {
    let a_units: Vec<u16> = a.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    let b_units: Vec<u16> = b.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    let a_upper = upcase.to_upper_utf16(&a_units);
    let b_upper = upcase.to_upper_utf16(&b_units);
    a_upper.cmp(&b_upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_bytes(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn filename_collation_is_case_insensitive() {
        let upcase = UpperCaseTable::identity();
        let a = name_bytes("file.txt");
        let b = name_bytes("FILE.TXT");
        assert_eq!(compare(COLLATION_FILENAME, &a, &b, &upcase), Ordering::Equal);
    }

    #[test]
    fn filename_collation_orders_lexicographically() {
        let upcase = UpperCaseTable::identity();
        let a = name_bytes("alpha");
        let b = name_bytes("beta");
        assert_eq!(compare(COLLATION_FILENAME, &a, &b, &upcase), Ordering::Less);
    }

    #[test]
    fn unsigned_long_collation_compares_numerically() {
        let upcase = UpperCaseTable::identity();
        let a = 5u32.to_le_bytes();
        let b = 10u32.to_le_bytes();
        assert_eq!(compare(COLLATION_UNSIGNED_LONG, &a, &b, &upcase), Ordering::Less);
    }

    #[test]
    fn multiple_unsigned_longs_compares_in_order() {
        let upcase = UpperCaseTable::identity();
        let mut a = 1u32.to_le_bytes().to_vec();
        a.extend(5u32.to_le_bytes());
        let mut b = 1u32.to_le_bytes().to_vec();
        b.extend(9u32.to_le_bytes());
        assert_eq!(compare(COLLATION_MULTIPLE_UNSIGNED_LONGS, &a, &b, &upcase), Ordering::Less);
    }
}
