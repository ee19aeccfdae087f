//! The Master File Table: self-describing bootstrap, record cache,
//! allocation, and `$MFTMirr` mirroring (spec §3.3, §4.5). Grounded in
//! the teacher's `formatters/src/ntfs/mft.rs` (`MftRecord::parse`,
//! `MftReader::read_record`) for the record-read path and
//! `filesystems/src/ntfs/mft_writer.rs` (`MftRecordBuilder::build`)
//! for the write/fixup-stamping path, extended with the two-phase
//! bootstrap, allocation bitmap, and mirroring the teacher never did.

use crate::attributes::{self, Attribute, AttributeBody, ClusterMappedAttribute};
use crate::boot_sector::BiosParameterBlock;
use crate::data_runs::{self, CookedRun};
use crate::error::{Error, Result};
use crate::record::{self, RecordHeader};
use crate::structures::{
    self, ATTR_TYPE_BITMAP, ATTR_TYPE_DATA, ATTR_TYPE_END, MFT_FIRST_USER_RECORD, MFT_IDX_MFT, MFT_OVERFLOW_FIRST,
};
use ntfs_core::{Bitmap, SectorStream, VecSectorStream};
use std::collections::HashMap;

pub struct Mft<S: SectorStream> {
    volume: S,
    bpb: BiosParameterBlock,
    data: ClusterMappedAttribute,
    bitmap_attr: ClusterMappedAttribute,
    bitmap: Bitmap<VecSectorStream>,
    record_size: u32,
    record_count: u64,
    cache: HashMap<u64, Vec<u8>>,
    next_usn: u16,
}

fn to_cluster_mapped(attr: &Attribute, cluster_size: u64) -> Result<ClusterMappedAttribute> {
    match &attr.body {
        AttributeBody::NonResident(info) => Ok(ClusterMappedAttribute {
            runs: info.runs.clone(),
            cluster_size,
            compression_unit: info.compression_unit,
            data_size: info.data_size,
        }),
        AttributeBody::Resident { .. } => {
            Err(Error::InvalidFormat("expected non-resident $MFT attribute".into()))
        }
    }
}

impl<S: SectorStream> Mft<S> {
    /// Two-phase bootstrap (spec §4.5): read record 0 directly at the
    /// boot sector's `$MFT` offset (its own first record must be
    /// locatable without any attribute resolution), then re-resolve
    /// every further record read through its own `$DATA` attribute's
    /// cooked runs — nothing past the first record needs to be
    /// contiguous.
    pub fn bootstrap(mut volume: S, bpb: BiosParameterBlock) -> Result<Self> {
        let record_size = bpb.mft_record_size();
        let cluster_size = bpb.bytes_per_cluster() as u64;

        let mut raw = vec![0u8; record_size as usize];
        volume.read_at(bpb.mft_offset(), &mut raw)?;
        let header = RecordHeader::parse(&raw)?;
        record::apply_fixup(&mut raw, header.usa_offset, header.usa_count)?;

        let attrs = attributes::parse_all(&raw, header.attrs_offset as usize)?;
        let data_attr = attrs
            .iter()
            .find(|a| a.header.type_code == ATTR_TYPE_DATA)
            .ok_or_else(|| Error::CorruptRecord("$MFT record has no $DATA attribute".into()))?;
        let bitmap_attr_raw = attrs
            .iter()
            .find(|a| a.header.type_code == ATTR_TYPE_BITMAP)
            .ok_or_else(|| Error::CorruptRecord("$MFT record has no $Bitmap attribute".into()))?;

        let data = to_cluster_mapped(data_attr, cluster_size)?;
        let bitmap_attr = to_cluster_mapped(bitmap_attr_raw, cluster_size)?;
        let record_count = data.data_size / record_size as u64;

        let mut bitmap_bytes = vec![0u8; bitmap_attr.data_size as usize];
        bitmap_attr.read_at(&mut volume, 0, &mut bitmap_bytes)?;
        let bitmap = Bitmap::new(VecSectorStream::with_data(bitmap_bytes));

        let mut mft = Self {
            volume,
            bpb,
            data,
            bitmap_attr,
            bitmap,
            record_size,
            record_count,
            cache: HashMap::new(),
            next_usn: 1,
        };
        mft.cache.insert(MFT_IDX_MFT, raw);
        Ok(mft)
    }

    pub fn record_size(&self) -> u32 {
        self.record_size
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn volume_mut(&mut self) -> &mut S {
        &mut self.volume
    }

    /// Read and fix up one MFT record, caching it.
    pub fn read_record(&mut self, index: u64) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.get(&index) {
            return Ok(cached.clone());
        }
        if index >= self.record_count {
            return Err(Error::NotFound(format!("MFT record {index} beyond table of {}", self.record_count)));
        }
        let mut buf = vec![0u8; self.record_size as usize];
        self.data.read_at(&mut self.volume, index * self.record_size as u64, &mut buf)?;
        let header = RecordHeader::parse(&buf)?;
        record::apply_fixup(&mut buf, header.usa_offset, header.usa_count)?;
        self.cache.insert(index, buf.clone());
        Ok(buf)
    }

    pub fn record_header(&mut self, index: u64) -> Result<RecordHeader> {
        RecordHeader::parse(&self.read_record(index)?)
    }

    pub fn attributes(&mut self, index: u64) -> Result<Vec<Attribute>> {
        let data = self.read_record(index)?;
        let header = RecordHeader::parse(&data)?;
        attributes::parse_all(&data, header.attrs_offset as usize)
    }

    /// Write a fixed-up record back to the table, stamping a fresh USN
    /// and, for the first `MFT_OVERFLOW_FIRST` records, mirroring the
    /// write to `$MFTMirr` (spec §3.3).
    pub fn write_record(&mut self, index: u64, mut record_bytes: Vec<u8>) -> Result<()> {
        if record_bytes.len() != self.record_size as usize {
            return Err(Error::InvalidFormat("record buffer size mismatch".into()));
        }
        let mut header = RecordHeader::parse(&record_bytes)?;
        header.record_number = index as u32;
        header.write(&mut record_bytes);

        self.next_usn = self.next_usn.wrapping_add(1);
        if self.next_usn == 0 {
            self.next_usn = 1;
        }
        record::unapply_fixup(&mut record_bytes, header.usa_offset, header.usa_count, self.next_usn)?;

        self.data.write_at(&mut self.volume, index * self.record_size as u64, &record_bytes)?;
        if index < MFT_OVERFLOW_FIRST {
            let mirror_offset = self.bpb.mftmirr_offset() + index * self.record_size as u64;
            self.volume.write_at(mirror_offset, &record_bytes)?;
        }

        let mut cached = record_bytes;
        record::apply_fixup(&mut cached, header.usa_offset, header.usa_count)?;
        self.cache.insert(index, cached);
        Ok(())
    }

    /// Allocate a free record number from the existing table, falling
    /// back to the reserved overflow range (spec §4.5 "normal +
    /// overflow allocation"). Returns `Error::NoSpace` when both are
    /// exhausted; growing the table needs new backing clusters, which
    /// only `NtfsVolume` can allocate (it owns the volume-wide bitmap)
    /// — see `NtfsVolume::allocate_mft_record`, which catches that
    /// error, grows the table via `grow_with_run`, and retries.
    pub fn allocate_record(&mut self) -> Result<u64> {
        for candidate in MFT_FIRST_USER_RECORD..self.record_count {
            if !self.bitmap.is_present(candidate)? {
                self.bitmap.mark_present(candidate)?;
                self.flush_bitmap()?;
                return Ok(candidate);
            }
        }

        // The normal range is full. Records 12..=23 are reserved for
        // MFT overflow and drain from the top down, the opposite
        // direction of normal user growth, so a long-lived volume's
        // ordinary allocation pattern and its overflow pool don't race
        // for the same end of the range.
        let overflow_last = structures::MFT_OVERFLOW_LAST.min(self.record_count.saturating_sub(1));
        if overflow_last >= MFT_OVERFLOW_FIRST {
            for candidate in (MFT_OVERFLOW_FIRST..=overflow_last).rev() {
                if !self.bitmap.is_present(candidate)? {
                    self.bitmap.mark_present(candidate)?;
                    self.flush_bitmap()?;
                    return Ok(candidate);
                }
            }
        }

        Err(Error::NoSpace("MFT table has no free record; grow the table first".into()))
    }

    pub fn free_record(&mut self, index: u64) -> Result<()> {
        self.bitmap.mark_absent(index)?;
        self.cache.remove(&index);
        self.flush_bitmap()
    }

    fn flush_bitmap(&mut self) -> Result<()> {
        let bytes = self.bitmap.stream().as_slice().to_vec();
        self.bitmap_attr.write_at(&mut self.volume, 0, &bytes)
    }

    /// Highest VCN the `$DATA` attribute's run list already covers —
    /// the VCN a caller growing the table should allocate its next run
    /// starting from.
    pub(crate) fn covered_vcn(&self) -> u64 {
        self.data.covered_vcn()
    }

    /// Extend the table by one newly allocated cluster run (spec §4.5
    /// "table growth"): append `run` to `$DATA`'s run list, format
    /// every record slot the new clusters make room for as an empty
    /// FILE record, and persist both the new records and the `$DATA`
    /// attribute's updated run list/size fields back to record 0.
    /// `run` must start at `covered_vcn()` — the caller (`NtfsVolume`)
    /// allocates it from there.
    pub fn grow_with_run(&mut self, run: CookedRun) -> Result<()> {
        let cluster_size = self.bpb.bytes_per_cluster() as u64;
        let first_new_record = self.record_count;

        self.data.runs.push(run);
        self.data.data_size += run.length_clusters * cluster_size;
        let new_record_count = self.data.data_size / self.record_size as u64;

        self.flush_data_attribute()?;
        for index in first_new_record..new_record_count {
            let empty = format_empty_record(index, self.record_size);
            self.write_record(index, empty)?;
        }
        self.record_count = new_record_count;
        Ok(())
    }

    /// Rewrite record 0's `$DATA` attribute run list and size fields to
    /// match `self.data` (spec §4.5). Bounded by the attribute's
    /// existing on-disk slack; a run list that no longer fits is
    /// `Error::Fragmented`, same as a volume-wide fragmented allocation.
    fn flush_data_attribute(&mut self) -> Result<()> {
        let mut record0 = self.read_record(MFT_IDX_MFT)?;
        let header = RecordHeader::parse(&record0)?;
        rewrite_nonresident_runs(&mut record0, header.attrs_offset as usize, ATTR_TYPE_DATA, None, &self.data)?;
        self.write_record(MFT_IDX_MFT, record0)
    }
}

fn attribute_name_at(record: &[u8], offset: usize) -> Vec<u8> {
    let name_length = record[offset + 9] as usize;
    if name_length == 0 {
        return Vec::new();
    }
    let name_offset = u16::from_le_bytes(record[offset + 10..offset + 12].try_into().unwrap()) as usize;
    record[offset + name_offset..offset + name_offset + name_length * 2].to_vec()
}

/// Locate an attribute of `attr_type` within a record's attribute area,
/// returning its byte offset and on-disk record length. `name` narrows
/// the match to one attribute instance when a record can carry several
/// of the same type under different names (e.g. multiple `$DATA`
/// streams); `None` matches only an unnamed instance.
pub(crate) fn find_attribute(record: &[u8], first_offset: usize, attr_type: u32, name: Option<&str>) -> Result<(usize, u32)> {
    let target_name: Option<Vec<u8>> = name.map(|n| n.encode_utf16().flat_map(|u| u.to_le_bytes()).collect());
    let mut offset = first_offset;
    loop {
        if offset + 8 > record.len() {
            return Err(Error::CorruptRecord("attribute area truncated".into()));
        }
        let type_code = u32::from_le_bytes(record[offset..offset + 4].try_into().unwrap());
        if type_code == ATTR_TYPE_END {
            return Err(Error::NotFound(format!("record has no attribute of type {attr_type:#x} named {name:?}")));
        }
        let record_length = u32::from_le_bytes(record[offset + 4..offset + 8].try_into().unwrap());
        if type_code == attr_type {
            let matches = match &target_name {
                None => attribute_name_at(record, offset).is_empty(),
                Some(want) => &attribute_name_at(record, offset) == want,
            };
            if matches {
                return Ok((offset, record_length));
            }
        }
        offset += record_length as usize;
    }
}

/// Re-encode `attr`'s cooked run list into an existing non-resident
/// attribute's on-disk run-list area and refresh its size fields.
pub(crate) fn rewrite_nonresident_runs(
    record: &mut [u8],
    attrs_offset: usize,
    attr_type: u32,
    name: Option<&str>,
    attr: &ClusterMappedAttribute,
) -> Result<()> {
    let (offset, record_length) = find_attribute(record, attrs_offset, attr_type, name)?;
    let raw_runs: Vec<data_runs::DataRun> =
        attr.runs.iter().map(|r| data_runs::DataRun { lcn: r.lcn, length_clusters: r.length_clusters }).collect();
    let encoded = data_runs::encode(&raw_runs);

    let runs_offset = offset + attributes::NONRES_RUNS_OFFSET;
    let available = offset + record_length as usize - runs_offset;
    if encoded.len() > available {
        return Err(Error::Fragmented);
    }
    record[runs_offset..runs_offset + encoded.len()].copy_from_slice(&encoded);
    for b in &mut record[runs_offset + encoded.len()..offset + record_length as usize] {
        *b = 0;
    }

    let covered = attr.covered_vcn();
    let allocated_size = covered * attr.cluster_size;
    let last_vcn = covered.saturating_sub(1);
    record[offset + attributes::NONRES_LAST_VCN..offset + attributes::NONRES_LAST_VCN + 8]
        .copy_from_slice(&last_vcn.to_le_bytes());
    record[offset + attributes::NONRES_ALLOCATED_SIZE..offset + attributes::NONRES_ALLOCATED_SIZE + 8]
        .copy_from_slice(&allocated_size.to_le_bytes());
    record[offset + attributes::NONRES_DATA_SIZE..offset + attributes::NONRES_DATA_SIZE + 8]
        .copy_from_slice(&attr.data_size.to_le_bytes());
    record[offset + attributes::NONRES_INITIALIZED_SIZE..offset + attributes::NONRES_INITIALIZED_SIZE + 8]
        .copy_from_slice(&attr.data_size.to_le_bytes());
    Ok(())
}

/// Build a fresh, empty, in-use FILE record: header plus an immediate
/// `$END` marker, ready for a caller to append real attributes to.
fn format_empty_record(index: u64, record_size: u32) -> Vec<u8> {
    let mut record = vec![0u8; record_size as usize];
    record[0..4].copy_from_slice(structures::MFT_RECORD_SIGNATURE);

    let usa_count = (record_size as usize / record::SECTOR_SIZE) as u16 + 1;
    let usa_offset = structures::offsets::HEADER_SIZE as u16;
    let attrs_offset = (usa_offset as usize + usa_count as usize * 2).div_ceil(8) * 8;

    let header = RecordHeader {
        usa_offset,
        usa_count,
        lsn: 0,
        sequence_number: 1,
        link_count: 0,
        attrs_offset: attrs_offset as u16,
        flags: structures::MFT_RECORD_IN_USE,
        bytes_used: (attrs_offset + 4) as u32,
        bytes_allocated: record_size,
        base_record: 0,
        next_attr_id: 0,
        record_number: index as u32,
    };
    header.write(&mut record);
    record[attrs_offset..attrs_offset + 4].copy_from_slice(&ATTR_TYPE_END.to_le_bytes());
    record
}
