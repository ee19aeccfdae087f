//! Fix-up array handling and the MFT record header (spec §3.4, §6).
//! Grounded in the teacher's `formatters/src/ntfs/mft.rs::apply_fixup`,
//! generalized to also *write* a fix-up array (the teacher only reads)
//! and shared with index blocks, which use the identical USA scheme.

use crate::error::{Error, Result};
use crate::structures::{offsets, MFT_RECORD_BAD_SIGNATURE, MFT_RECORD_SIGNATURE};
use log::trace;

pub const SECTOR_SIZE: usize = 512;

/// Replace each sector's trailing 2 bytes with the saved USA values,
/// verifying the placeholder first (spec §3.4: "reading replaces them
/// with the saved values and verifies the placeholder matches").
/// A mismatch is `CorruptRecord` per spec §5's "Ordering guarantees".
pub fn apply_fixup(buffer: &mut [u8], usa_offset: u16, usa_count: u16) -> Result<()> {
    let usa_offset = usa_offset as usize;
    let usa_count = usa_count as usize;
    if usa_count == 0 {
        return Ok(());
    }
    if usa_offset + usa_count * 2 > buffer.len() {
        return Err(Error::CorruptRecord("update sequence array extends beyond buffer".into()));
    }

    let usn = [buffer[usa_offset], buffer[usa_offset + 1]];
    for i in 1..usa_count {
        let saved_offset = usa_offset + i * 2;
        let saved = [buffer[saved_offset], buffer[saved_offset + 1]];
        let sector_end = i * SECTOR_SIZE;
        if sector_end > buffer.len() {
            return Err(Error::CorruptRecord("fix-up sector beyond record".into()));
        }
        let placeholder = sector_end - 2;
        if buffer[placeholder] != usn[0] || buffer[placeholder + 1] != usn[1] {
            return Err(Error::CorruptRecord(format!(
                "fix-up mismatch at sector {i}: placeholder {:02X}{:02X} != usn {:02X}{:02X}",
                buffer[placeholder],
                buffer[placeholder + 1],
                usn[0],
                usn[1]
            )));
        }
        buffer[placeholder] = saved[0];
        buffer[placeholder + 1] = saved[1];
        trace!("fixed up sector {i} at offset {placeholder}");
    }
    Ok(())
}

/// Inverse of `apply_fixup`: stash each sector's trailing 2 bytes into
/// the USA and stamp the placeholder back in, ready to write to disk.
/// `usn` should be incremented by the caller on every write.
pub fn unapply_fixup(buffer: &mut [u8], usa_offset: u16, usa_count: u16, usn: u16) -> Result<()> {
    let usa_offset = usa_offset as usize;
    let usa_count = usa_count as usize;
    if usa_count == 0 {
        return Ok(());
    }
    if usa_offset + usa_count * 2 > buffer.len() {
        return Err(Error::CorruptRecord("update sequence array extends beyond buffer".into()));
    }

    let usn_bytes = usn.to_le_bytes();
    buffer[usa_offset] = usn_bytes[0];
    buffer[usa_offset + 1] = usn_bytes[1];

    for i in 1..usa_count {
        let sector_end = i * SECTOR_SIZE;
        if sector_end > buffer.len() {
            return Err(Error::CorruptRecord("fix-up sector beyond record".into()));
        }
        let placeholder = sector_end - 2;
        let saved_offset = usa_offset + i * 2;
        buffer[saved_offset] = buffer[placeholder];
        buffer[saved_offset + 1] = buffer[placeholder + 1];
        buffer[placeholder] = usn_bytes[0];
        buffer[placeholder + 1] = usn_bytes[1];
    }
    Ok(())
}

/// Parsed MFT record header (spec §3.4, §6 "File record header").
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub usa_offset: u16,
    pub usa_count: u16,
    pub lsn: u64,
    pub sequence_number: u16,
    pub link_count: u16,
    pub attrs_offset: u16,
    pub flags: u16,
    pub bytes_used: u32,
    pub bytes_allocated: u32,
    pub base_record: u64,
    pub next_attr_id: u16,
    pub record_number: u32,
}

impl RecordHeader {
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < offsets::HEADER_SIZE {
            return Err(Error::InvalidFormat("record shorter than header".into()));
        }
        let signature = &buffer[0..4];
        if signature != MFT_RECORD_SIGNATURE && signature != MFT_RECORD_BAD_SIGNATURE {
            return Err(Error::InvalidFormat(format!("bad MFT record signature {signature:?}")));
        }
        Ok(Self {
            usa_offset: u16::from_le_bytes(buffer[offsets::USA_OFFSET..offsets::USA_OFFSET + 2].try_into().unwrap()),
            usa_count: u16::from_le_bytes(buffer[offsets::USA_COUNT..offsets::USA_COUNT + 2].try_into().unwrap()),
            lsn: u64::from_le_bytes(buffer[offsets::LSN..offsets::LSN + 8].try_into().unwrap()),
            sequence_number: u16::from_le_bytes(
                buffer[offsets::SEQUENCE_NUMBER..offsets::SEQUENCE_NUMBER + 2].try_into().unwrap(),
            ),
            link_count: u16::from_le_bytes(buffer[offsets::LINK_COUNT..offsets::LINK_COUNT + 2].try_into().unwrap()),
            attrs_offset: u16::from_le_bytes(
                buffer[offsets::ATTRS_OFFSET..offsets::ATTRS_OFFSET + 2].try_into().unwrap(),
            ),
            flags: u16::from_le_bytes(buffer[offsets::FLAGS..offsets::FLAGS + 2].try_into().unwrap()),
            bytes_used: u32::from_le_bytes(buffer[offsets::BYTES_USED..offsets::BYTES_USED + 4].try_into().unwrap()),
            bytes_allocated: u32::from_le_bytes(
                buffer[offsets::BYTES_ALLOCATED..offsets::BYTES_ALLOCATED + 4].try_into().unwrap(),
            ),
            base_record: u64::from_le_bytes(
                buffer[offsets::BASE_RECORD..offsets::BASE_RECORD + 8].try_into().unwrap(),
            ),
            next_attr_id: u16::from_le_bytes(
                buffer[offsets::NEXT_ATTR_ID..offsets::NEXT_ATTR_ID + 2].try_into().unwrap(),
            ),
            record_number: u32::from_le_bytes(
                buffer[offsets::RECORD_NUMBER..offsets::RECORD_NUMBER + 4].try_into().unwrap(),
            ),
        })
    }

    pub fn write(&self, buffer: &mut [u8]) {
        buffer[0..4].copy_from_slice(MFT_RECORD_SIGNATURE);
        buffer[offsets::USA_OFFSET..offsets::USA_OFFSET + 2].copy_from_slice(&self.usa_offset.to_le_bytes());
        buffer[offsets::USA_COUNT..offsets::USA_COUNT + 2].copy_from_slice(&self.usa_count.to_le_bytes());
        buffer[offsets::LSN..offsets::LSN + 8].copy_from_slice(&self.lsn.to_le_bytes());
        buffer[offsets::SEQUENCE_NUMBER..offsets::SEQUENCE_NUMBER + 2]
            .copy_from_slice(&self.sequence_number.to_le_bytes());
        buffer[offsets::LINK_COUNT..offsets::LINK_COUNT + 2].copy_from_slice(&self.link_count.to_le_bytes());
        buffer[offsets::ATTRS_OFFSET..offsets::ATTRS_OFFSET + 2].copy_from_slice(&self.attrs_offset.to_le_bytes());
        buffer[offsets::FLAGS..offsets::FLAGS + 2].copy_from_slice(&self.flags.to_le_bytes());
        buffer[offsets::BYTES_USED..offsets::BYTES_USED + 4].copy_from_slice(&self.bytes_used.to_le_bytes());
        buffer[offsets::BYTES_ALLOCATED..offsets::BYTES_ALLOCATED + 4]
            .copy_from_slice(&self.bytes_allocated.to_le_bytes());
        buffer[offsets::BASE_RECORD..offsets::BASE_RECORD + 8].copy_from_slice(&self.base_record.to_le_bytes());
        buffer[offsets::NEXT_ATTR_ID..offsets::NEXT_ATTR_ID + 2].copy_from_slice(&self.next_attr_id.to_le_bytes());
        buffer[offsets::RECORD_NUMBER..offsets::RECORD_NUMBER + 4]
            .copy_from_slice(&self.record_number.to_le_bytes());
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & crate::structures::MFT_RECORD_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & crate::structures::MFT_RECORD_IS_DIRECTORY != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixup_round_trips() {
        let mut buffer = vec![0xABu8; 1024];
        let usa_offset = 48u16;
        let usa_count = 3u16; // 1 USN + one value per 512-byte sector
        // Stamp the placeholder USN at the end of each sector.
        buffer[510] = 0x01;
        buffer[511] = 0x00;
        buffer[1022] = 0x01;
        buffer[1023] = 0x00;
        buffer[usa_offset as usize] = 0x01;
        buffer[usa_offset as usize + 1] = 0x00;
        buffer[usa_offset as usize + 2] = 0xAB; // saved original byte
        buffer[usa_offset as usize + 3] = 0xAB;
        buffer[usa_offset as usize + 4] = 0xAB;
        buffer[usa_offset as usize + 5] = 0xAB;

        apply_fixup(&mut buffer, usa_offset, usa_count).unwrap();
        assert_eq!(buffer[510], 0xAB);
        assert_eq!(buffer[1022], 0xAB);
    }

    #[test]
    fn fixup_mismatch_is_corrupt_record() {
        let mut buffer = vec![0u8; 1024];
        buffer[510] = 0x99; // does not match USN below
        let usa_offset = 48u16;
        buffer[usa_offset as usize] = 0x01;
        buffer[usa_offset as usize + 1] = 0x00;
        assert!(apply_fixup(&mut buffer, usa_offset, 2).is_err());
    }

    #[test]
    fn apply_then_unapply_is_identity_on_logical_bytes() {
        let mut original = vec![0x42u8; 1024];
        let usa_offset = 48u16;
        let usa_count = 3u16;
        unapply_fixup(&mut original, usa_offset, usa_count, 7).unwrap();
        let mut roundtrip = original.clone();
        apply_fixup(&mut roundtrip, usa_offset, usa_count).unwrap();
        assert_eq!(roundtrip, vec![0x42u8; 1024]);
    }
}
