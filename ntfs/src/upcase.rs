//! The `$UpCase` table: a 65536-entry per-code-unit uppercase mapping
//! used by the filename collation rule (spec §4.7, §4.8). NTFS ships
//! this table on disk rather than relying on the running OS's Unicode
//! tables, so two volumes collate identically regardless of locale.

use crate::error::{Error, Result};

pub const UPCASE_ENTRY_COUNT: usize = 65536;

#[derive(Debug, Clone)]
pub struct UpperCaseTable {
    table: Vec<u16>,
}

impl UpperCaseTable {
    /// Build from the raw `$UpCase` attribute data (a flat array of
    /// `u16` little-endian code units, one per possible code unit).
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < UPCASE_ENTRY_COUNT * 2 {
            return Err(Error::InvalidFormat(format!(
                "$UpCase too small: {} bytes, need {}",
                data.len(),
                UPCASE_ENTRY_COUNT * 2
            )));
        }
        let table = data[..UPCASE_ENTRY_COUNT * 2]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(Self { table })
    }

    /// Fall back to Rust's own Unicode uppercasing for code units with
    /// no on-disk table, used only when building a fresh volume.
    pub fn identity() -> Self {
        let table = (0..UPCASE_ENTRY_COUNT as u32)
            .map(|cu| char::from_u32(cu).map(|c| c.to_uppercase().next().unwrap_or(c)).map(|c| c as u16).unwrap_or(cu as u16))
            .collect();
        Self { table }
    }

    pub fn to_upper_unit(&self, unit: u16) -> u16 {
        self.table[unit as usize]
    }

    pub fn to_upper_utf16(&self, s: &[u16]) -> Vec<u16> {
        s.iter().map(|&u| self.to_upper_unit(u)).collect()
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.table.iter().flat_map(|u| u.to_le_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_table_upcases_ascii() {
        let table = UpperCaseTable::identity();
        let lower: Vec<u16> = "hello".encode_utf16().collect();
        let upper = table.to_upper_utf16(&lower);
        let as_string = String::from_utf16(&upper).unwrap();
        assert_eq!(as_string, "HELLO");
    }

    #[test]
    fn parse_round_trips_through_serialize() {
        let table = UpperCaseTable::identity();
        let bytes = table.serialize();
        let parsed = UpperCaseTable::parse(&bytes).unwrap();
        assert_eq!(parsed.to_upper_unit('a' as u16), 'A' as u16);
    }

    #[test]
    fn rejects_undersized_table() {
        assert!(UpperCaseTable::parse(&[0u8; 10]).is_err());
    }
}
