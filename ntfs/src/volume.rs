//! The `NtfsVolume` context: the one aggregate that owns the raw
//! stream (via the MFT), boot sector, volume-wide cluster bitmap, and
//! `$UpCase` table a mounted NTFS volume needs (spec §3.3). Grounded
//! in the teacher's `core/src/device.rs` aggregate-of-handles pattern
//! (`DeviceManager`'s device/info/partition bundle), adapted from a
//! multi-device registry to a single mounted volume, and in
//! `filesystems/src/ntfs/ops_rw.rs`'s `NtfsRwOps` (`reader`/`writer`
//! held side by side behind one options flag) for the read-only gate.

use crate::attributes::{AttributeBody, ClusterMappedAttribute};
use crate::boot_sector::BiosParameterBlock;
use crate::data_runs::CookedRun;
use crate::error::{Error, Result};
use crate::mft::Mft;
use crate::options::NtfsOptions;
use crate::structures::{ATTR_TYPE_DATA, MFT_IDX_BITMAP, MFT_IDX_UPCASE};
use crate::upcase::UpperCaseTable;
use ntfs_core::{Bitmap, SectorStream, VecSectorStream};
use log::info;

/// A mounted NTFS volume: the MFT, the volume-wide cluster allocation
/// bitmap (distinct from the MFT's own record bitmap), the `$UpCase`
/// collation table, and the options the volume was opened with.
pub struct NtfsVolume<S: SectorStream> {
    mft: Mft<S>,
    bpb: BiosParameterBlock,
    cluster_bitmap_attr: ClusterMappedAttribute,
    cluster_bitmap: Bitmap<VecSectorStream>,
    upcase: UpperCaseTable,
    options: NtfsOptions,
}

fn non_resident_data(attrs: &[crate::attributes::Attribute], cluster_size: u64) -> Result<ClusterMappedAttribute> {
    let data_attr = attrs
        .iter()
        .find(|a| a.header.type_code == ATTR_TYPE_DATA)
        .ok_or_else(|| Error::CorruptRecord("record has no $DATA attribute".into()))?;
    match &data_attr.body {
        AttributeBody::NonResident(info) => Ok(ClusterMappedAttribute {
            runs: info.runs.clone(),
            cluster_size,
            compression_unit: info.compression_unit,
            data_size: info.data_size,
        }),
        AttributeBody::Resident { .. } => Err(Error::InvalidFormat("expected non-resident $DATA".into())),
    }
}

impl<S: SectorStream> NtfsVolume<S> {
    /// Parse the boot sector, bootstrap the MFT through it, then load
    /// the two other singleton records every volume needs before any
    /// file lookup is possible: the cluster bitmap (record 6) and the
    /// upper-case table (record 10).
    pub fn open(mut volume: S, options: NtfsOptions) -> Result<Self> {
        let mut boot = vec![0u8; 512];
        volume.read_at(0, &mut boot)?;
        let bpb = BiosParameterBlock::parse(&boot)?;
        let cluster_size = bpb.bytes_per_cluster() as u64;

        let mut mft = Mft::bootstrap(volume, bpb)?;

        let bitmap_attrs = mft.attributes(MFT_IDX_BITMAP)?;
        let cluster_bitmap_attr = non_resident_data(&bitmap_attrs, cluster_size)?;
        let mut cluster_bitmap_bytes = vec![0u8; cluster_bitmap_attr.data_size as usize];
        cluster_bitmap_attr.read_at(mft.volume_mut(), 0, &mut cluster_bitmap_bytes)?;
        let cluster_bitmap = Bitmap::new(VecSectorStream::with_data(cluster_bitmap_bytes));

        let upcase_attrs = mft.attributes(MFT_IDX_UPCASE)?;
        let upcase_data_attr = upcase_attrs
            .iter()
            .find(|a| a.header.type_code == ATTR_TYPE_DATA)
            .ok_or_else(|| Error::CorruptRecord("$UpCase record has no $DATA attribute".into()))?;
        let upcase = match &upcase_data_attr.body {
            AttributeBody::Resident { value, .. } => UpperCaseTable::parse(value)?,
            AttributeBody::NonResident(info) => {
                let attr = ClusterMappedAttribute {
                    runs: info.runs.clone(),
                    cluster_size,
                    compression_unit: info.compression_unit,
                    data_size: info.data_size,
                };
                let mut bytes = vec![0u8; attr.data_size as usize];
                attr.read_at(mft.volume_mut(), 0, &mut bytes)?;
                UpperCaseTable::parse(&bytes)?
            }
        };

        info!(
            "mounted NTFS volume: {} total clusters, {}-byte records, read_only={}",
            bpb.volume_size() / cluster_size,
            mft.record_size(),
            options.read_only
        );

        Ok(Self { mft, bpb, cluster_bitmap_attr, cluster_bitmap, upcase, options })
    }

    pub fn bpb(&self) -> &BiosParameterBlock {
        &self.bpb
    }

    pub fn options(&self) -> &NtfsOptions {
        &self.options
    }

    pub fn upcase(&self) -> &UpperCaseTable {
        &self.upcase
    }

    pub fn mft(&self) -> &Mft<S> {
        &self.mft
    }

    pub fn mft_mut(&mut self) -> &mut Mft<S> {
        &mut self.mft
    }

    fn total_clusters(&self) -> u64 {
        self.bpb.volume_size() / self.bpb.bytes_per_cluster() as u64
    }

    /// Allocate `count` contiguous free clusters, returning one cooked
    /// run starting at `start_vcn` in the caller's attribute (spec
    /// §4.6 treats a fragmented allocation as the attribute's problem,
    /// not the allocator's — a caller needing more runs calls this
    /// repeatedly and appends).
    pub fn allocate_clusters(&mut self, start_vcn: u64, count: u64) -> Result<CookedRun> {
        if self.options.read_only {
            return Err(Error::ReadOnly);
        }
        let total = self.total_clusters();
        let mut run_start = None;
        let mut run_len = 0u64;
        for lcn in 0..total {
            if !self.cluster_bitmap.is_present(lcn)? {
                if run_start.is_none() {
                    run_start = Some(lcn);
                }
                run_len += 1;
                if run_len == count {
                    let start = run_start.unwrap();
                    for i in start..start + count {
                        self.cluster_bitmap.mark_present(i)?;
                    }
                    self.flush_cluster_bitmap()?;
                    return Ok(CookedRun { start_vcn, length_clusters: count, lcn: Some(start) });
                }
            } else {
                run_start = None;
                run_len = 0;
            }
        }
        Err(Error::NoSpace(format!("no {count} contiguous free clusters")))
    }

    /// Allocate a free MFT record, growing the table by one cluster's
    /// worth of new records when it's full (spec §4.5). Tries the
    /// table's own free-slot scan first; only on `Error::NoSpace` does
    /// it reach for the volume-wide cluster bitmap, since `Mft` has no
    /// access to it (it owns only its own `$DATA`/`$Bitmap`
    /// attributes, not the whole `NtfsVolume`). Each step borrows
    /// `self`/`self.mft` in turn rather than simultaneously, which is
    /// what lets this avoid passing an allocator closure that would
    /// need to capture `self` while `self.mft` is already borrowed.
    pub fn allocate_mft_record(&mut self) -> Result<u64> {
        match self.mft.allocate_record() {
            Ok(index) => return Ok(index),
            Err(Error::NoSpace(_)) => {}
            Err(e) => return Err(e),
        }
        let start_vcn = self.mft.covered_vcn();
        let run = self.allocate_clusters(start_vcn, 1)?;
        self.mft.grow_with_run(run)?;
        self.mft.allocate_record()
    }

    pub fn free_clusters(&mut self, run: &CookedRun) -> Result<()> {
        if self.options.read_only {
            return Err(Error::ReadOnly);
        }
        if let Some(lcn) = run.lcn {
            for i in lcn..lcn + run.length_clusters {
                self.cluster_bitmap.mark_absent(i)?;
            }
            self.flush_cluster_bitmap()?;
        }
        Ok(())
    }

    fn flush_cluster_bitmap(&mut self) -> Result<()> {
        let bytes = self.cluster_bitmap.stream().as_slice().to_vec();
        self.cluster_bitmap_attr.write_at(self.mft.volume_mut(), 0, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::{self, ATTR_TYPE_BITMAP};

    fn empty_record(record_size: u32) -> Vec<u8> {
        let mut record = vec![0u8; record_size as usize];
        record[0..4].copy_from_slice(b"FILE");
        record[structures::offsets::USA_OFFSET..structures::offsets::USA_OFFSET + 2]
            .copy_from_slice(&48u16.to_le_bytes());
        record[structures::offsets::USA_COUNT..structures::offsets::USA_COUNT + 2].copy_from_slice(&1u16.to_le_bytes());
        record[structures::offsets::ATTRS_OFFSET..structures::offsets::ATTRS_OFFSET + 2]
            .copy_from_slice(&56u16.to_le_bytes());
        record[structures::offsets::FLAGS..structures::offsets::FLAGS + 2]
            .copy_from_slice(&structures::MFT_RECORD_IN_USE.to_le_bytes());
        record[56..60].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        record
    }

    fn non_resident_record(record_size: u32, attr_type: u32, runs: &[u8], data_size: u64) -> Vec<u8> {
        let mut record = empty_record(record_size);
        let offset = 56usize;
        let attr_len = 64 + runs.len();
        let attr_len_aligned = attr_len.div_ceil(8) * 8;
        record[offset..offset + 4].copy_from_slice(&attr_type.to_le_bytes());
        record[offset + 4..offset + 8].copy_from_slice(&(attr_len_aligned as u32).to_le_bytes());
        record[offset + 8] = 1; // non-resident
        record[offset + 0x20..offset + 0x22].copy_from_slice(&64u16.to_le_bytes()); // runs offset
        record[offset + 0x28..offset + 0x30].copy_from_slice(&data_size.to_le_bytes()); // allocated size
        record[offset + 0x30..offset + 0x38].copy_from_slice(&data_size.to_le_bytes()); // data size
        record[offset + 0x38..offset + 0x40].copy_from_slice(&data_size.to_le_bytes()); // initialized size
        record[offset + 64..offset + 64 + runs.len()].copy_from_slice(runs);
        record[offset + attr_len_aligned..offset + attr_len_aligned + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        record
    }

    fn double_attr_record(record_size: u32, first: (u32, &[u8], u64), second: (u32, &[u8], u64)) -> Vec<u8> {
        let mut record = empty_record(record_size);
        let mut offset = 56usize;
        for (attr_type, runs, data_size) in [first, second] {
            let attr_len = 64 + runs.len();
            let attr_len_aligned = attr_len.div_ceil(8) * 8;
            record[offset..offset + 4].copy_from_slice(&attr_type.to_le_bytes());
            record[offset + 4..offset + 8].copy_from_slice(&(attr_len_aligned as u32).to_le_bytes());
            record[offset + 8] = 1;
            record[offset + 0x20..offset + 0x22].copy_from_slice(&64u16.to_le_bytes());
            record[offset + 0x28..offset + 0x30].copy_from_slice(&data_size.to_le_bytes());
            record[offset + 0x30..offset + 0x38].copy_from_slice(&data_size.to_le_bytes());
            record[offset + 0x38..offset + 0x40].copy_from_slice(&data_size.to_le_bytes());
            record[offset + 64..offset + 64 + runs.len()].copy_from_slice(runs);
            offset += attr_len_aligned;
        }
        record[offset..offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        record
    }

    /// 64 clusters total (4096 bytes each): LCN 10..17 the MFT table
    /// (32 records), LCN 18 the MFT's own record bitmap, LCN 19 the
    /// volume cluster bitmap, LCN 20..51 the `$UpCase` table (exactly
    /// 65536 entries * 2 bytes = 131072 bytes = 32 clusters).
    fn sample_volume() -> (VecSectorStream, BiosParameterBlock) {
        let cluster_size = 4096u64;
        let record_size = 1024u32;

        let mft_data_runs = [0x11u8, 0x08, 0x0A, 0x00]; // 8 clusters @ LCN 10
        let mft_bitmap_runs = [0x11u8, 0x01, 0x12, 0x00]; // 1 cluster @ LCN 18
        let mft_data_size = 8 * cluster_size;

        let record0 = double_attr_record(
            record_size,
            (ATTR_TYPE_DATA, &mft_data_runs, mft_data_size),
            (ATTR_TYPE_BITMAP, &mft_bitmap_runs, 8),
        );

        let cluster_bitmap_runs = [0x11u8, 0x01, 0x13, 0x00]; // 1 cluster @ LCN 19
        let record6 = non_resident_record(record_size, ATTR_TYPE_DATA, &cluster_bitmap_runs, 8);

        let upcase_runs = [0x11u8, 0x20, 0x14, 0x00]; // 32 clusters @ LCN 20
        let upcase_bytes = UpperCaseTable::identity().serialize();
        let record10 = non_resident_record(record_size, ATTR_TYPE_DATA, &upcase_runs, upcase_bytes.len() as u64);

        let mut volume = VecSectorStream::new();
        let mft_lcn = 10u64;
        for i in 0..32u64 {
            let record = match i {
                0 => record0.clone(),
                6 => record6.clone(),
                10 => record10.clone(),
                _ => empty_record(record_size),
            };
            volume.write_at(mft_lcn * cluster_size + i * record_size as u64, &record).unwrap();
        }
        volume.write_at(20 * cluster_size, &upcase_bytes).unwrap();

        let mut boot = vec![0u8; 512];
        boot[0x03..0x0B].copy_from_slice(structures::NTFS_OEM_ID);
        boot[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        boot[0x0D] = 8; // sectors/cluster -> 4096 bytes/cluster
        boot[0x28..0x30].copy_from_slice(&(64u64 * 8).to_le_bytes()); // 64 clusters worth of sectors
        boot[0x30..0x38].copy_from_slice(&mft_lcn.to_le_bytes());
        boot[0x38..0x40].copy_from_slice(&4u64.to_le_bytes());
        boot[0x40] = 0xF6; // -10 => 1024-byte records
        boot[0x44] = 0xF6;
        boot[0x1FE..0x200].copy_from_slice(&0xAA55u16.to_le_bytes());

        let bpb = BiosParameterBlock::parse(&boot).unwrap();
        (volume, bpb)
    }

    #[test]
    fn open_loads_cluster_bitmap_and_upcase_table() {
        let (volume, bpb) = sample_volume();
        let ntfs_volume = NtfsVolume::open(volume, NtfsOptions::default()).unwrap();
        assert_eq!(ntfs_volume.bpb().bytes_per_cluster(), bpb.bytes_per_cluster());
        assert_eq!(ntfs_volume.upcase().to_upper_unit('a' as u16), 'A' as u16);
    }

    #[test]
    fn allocate_then_free_clusters_round_trips() {
        let (volume, _bpb) = sample_volume();
        let mut ntfs_volume = NtfsVolume::open(volume, NtfsOptions::default()).unwrap();
        let run = ntfs_volume.allocate_clusters(0, 3).unwrap();
        assert_eq!(run.length_clusters, 3);
        assert!(run.lcn.is_some());
        ntfs_volume.free_clusters(&run).unwrap();
        let run2 = ntfs_volume.allocate_clusters(0, 3).unwrap();
        assert_eq!(run2.lcn, run.lcn);
    }

    #[test]
    fn allocate_clusters_rejects_on_read_only_volume() {
        let (volume, _bpb) = sample_volume();
        let mut options = NtfsOptions::default();
        options.read_only = true;
        let mut ntfs_volume = NtfsVolume::open(volume, options).unwrap();
        assert!(ntfs_volume.allocate_clusters(0, 1).is_err());
    }

    #[test]
    fn allocate_mft_record_grows_table_once_both_ranges_are_full() {
        let (volume, _bpb) = sample_volume();
        let mut ntfs_volume = NtfsVolume::open(volume, NtfsOptions::default()).unwrap();
        // Drain the 8 normal slots and the 12 reserved overflow slots.
        for _ in 0..(8 + 12) {
            ntfs_volume.allocate_mft_record().unwrap();
        }
        let before = ntfs_volume.mft().record_count();
        let grown = ntfs_volume.allocate_mft_record().unwrap();
        assert_eq!(grown, before);
        assert!(ntfs_volume.mft().record_count() > before);
    }
}
