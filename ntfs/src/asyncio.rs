//! Async surface over `NtfsVolume` (spec §5, §9 "Async is a surface
//! concern — suspend only at the awaited I/O primitive"). Mirrors
//! `ntfs_core::asyncio::AsyncSectorStream` exactly: the volume lives
//! behind a blocking `Mutex`, every call is one `spawn_blocking`, no
//! task graph or executor of our own.

use crate::error::{Error, Result};
use crate::file::File;
use crate::options::NtfsOptions;
use crate::structures::unix_secs_to_filetime;
use crate::timestamps::FileTimes;
use crate::volume::NtfsVolume;
use ntfs_core::SectorStream;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_filetime() -> u64 {
    let unix_secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
    unix_secs_to_filetime(unix_secs)
}

/// An async-friendly handle to a mounted volume. Cloning shares the
/// same underlying `NtfsVolume`; callers that need serialized access
/// across tasks get it for free from the mutex.
#[derive(Clone)]
pub struct AsyncNtfsVolume<S> {
    inner: Arc<Mutex<NtfsVolume<S>>>,
}

impl<S: SectorStream + Send + 'static> AsyncNtfsVolume<S> {
    pub async fn open(volume: S, options: NtfsOptions) -> Result<Self> {
        tokio::task::spawn_blocking(move || NtfsVolume::open(volume, options))
            .await
            .map_err(join_error)?
            .map(|volume| Self { inner: Arc::new(Mutex::new(volume)) })
    }

    pub async fn file_times(&self, mft_reference: u64) -> Result<FileTimes> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut volume = inner.lock().unwrap();
            Ok(File::open(&mut volume, mft_reference)?.times)
        })
        .await
        .map_err(join_error)?
    }

    /// Reads through `File::read_stream`, so a writable volume still
    /// bumps and persists `accessed` even on a pure read (spec §4.8).
    pub async fn read_file(&self, mft_reference: u64, stream_name: String, offset: u64, len: usize) -> Result<Vec<u8>> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut volume = inner.lock().unwrap();
            let mut file = File::open(&mut volume, mft_reference)?;
            file.stream(&stream_name)
                .ok_or_else(|| Error::NotFound(format!("no {stream_name:?} stream on record {mft_reference}")))?
                .seek(offset);
            let mut buf = vec![0u8; len];
            let n = file.read_stream(&mut volume, &stream_name, now_filetime(), &mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
        .map_err(join_error)?
    }

    /// Writes `data` at `offset` into the named stream through
    /// `File::write_stream` (spec §9: committed on success, warned-
    /// but-not-rolled-back if the transaction guard drops early).
    pub async fn write_file(&self, mft_reference: u64, stream_name: String, offset: u64, data: Vec<u8>) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut volume = inner.lock().unwrap();
            let mut file = File::open(&mut volume, mft_reference)?;
            file.stream(&stream_name)
                .ok_or_else(|| Error::NotFound(format!("no {stream_name:?} stream on record {mft_reference}")))?
                .seek(offset);
            file.write_stream(&mut volume, &stream_name, now_filetime(), &data)
        })
        .await
        .map_err(join_error)?
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::{self, ATTR_TYPE_BITMAP, ATTR_TYPE_DATA, ATTR_TYPE_FILE_NAME, ATTR_TYPE_STANDARD_INFORMATION};
    use crate::upcase::UpperCaseTable;
    use ntfs_core::VecSectorStream;

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
        record[structures::offsets::LINK_COUNT..structures::offsets::LINK_COUNT + 2].copy_from_slice(&1u16.to_le_bytes());
        record[56..60].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        record
    }

    fn non_resident_attr(record: &mut [u8], offset: usize, attr_type: u32, runs: &[u8], data_size: u64) -> usize {
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
        offset + attr_len_aligned
    }

    fn push_resident_attr(record: &mut [u8], offset: usize, attr_type: u32, value: &[u8]) -> usize {
        let value_offset = 24usize;
        let attr_len = value_offset + value.len();
        let attr_len_aligned = attr_len.div_ceil(8) * 8;
        record[offset..offset + 4].copy_from_slice(&attr_type.to_le_bytes());
        record[offset + 4..offset + 8].copy_from_slice(&(attr_len_aligned as u32).to_le_bytes());
        record[offset + 8] = 0;
        record[offset + 0x10..offset + 0x14].copy_from_slice(&(value.len() as u32).to_le_bytes());
        record[offset + 0x14..offset + 0x16].copy_from_slice(&(value_offset as u16).to_le_bytes());
        record[offset + value_offset..offset + value_offset + value.len()].copy_from_slice(value);
        offset + attr_len_aligned
    }

    fn sample_standard_information(created: u64, modified: u64) -> Vec<u8> {
        let mut value = vec![0u8; 0x30];
        value[0x00..0x08].copy_from_slice(&created.to_le_bytes());
        value[0x08..0x10].copy_from_slice(&modified.to_le_bytes());
        value[0x10..0x18].copy_from_slice(&modified.to_le_bytes());
        value[0x18..0x20].copy_from_slice(&created.to_le_bytes());
        value
    }

    fn sample_file_name_value(parent_reference: u64, name: &str) -> Vec<u8> {
        let units: Vec<u8> = name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        let mut value = vec![0u8; 0x42 + units.len()];
        value[0..8].copy_from_slice(&parent_reference.to_le_bytes());
        value[0x40] = name.encode_utf16().count() as u8;
        value[0x41] = 1; // Win32 namespace
        value[0x42..].copy_from_slice(&units);
        value
    }

    /// The same synthetic 64-cluster volume as `file.rs`'s test
    /// harness, with one user record at index 24.
    async fn sample_volume() -> VecSectorStream {
        let cluster_size = 4096u64;
        let record_size = 1024u32;

        let mut record0 = empty_record(record_size);
        let mft_data_runs = [0x11u8, 0x08, 0x0A, 0x00];
        let mft_bitmap_runs = [0x11u8, 0x01, 0x12, 0x00];
        let mut offset = non_resident_attr(&mut record0, 56, ATTR_TYPE_DATA, &mft_data_runs, 8 * cluster_size);
        offset = non_resident_attr(&mut record0, offset, ATTR_TYPE_BITMAP, &mft_bitmap_runs, 8);
        record0[offset..offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

        let cluster_bitmap_runs = [0x11u8, 0x01, 0x13, 0x00];
        let mut record6 = empty_record(record_size);
        let offset = non_resident_attr(&mut record6, 56, ATTR_TYPE_DATA, &cluster_bitmap_runs, 8);
        record6[offset..offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

        let upcase_runs = [0x11u8, 0x20, 0x14, 0x00];
        let upcase_bytes = UpperCaseTable::identity().serialize();
        let mut record10 = empty_record(record_size);
        let offset = non_resident_attr(&mut record10, 56, ATTR_TYPE_DATA, &upcase_runs, upcase_bytes.len() as u64);
        record10[offset..offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

        let mut record24 = empty_record(record_size);
        let standard_info = sample_standard_information(100, 200);
        let file_name = sample_file_name_value(structures::MFT_IDX_ROOT, "test.txt");
        let data = b"hello async".to_vec();
        let mut offset = push_resident_attr(&mut record24, 56, ATTR_TYPE_STANDARD_INFORMATION, &standard_info);
        offset = push_resident_attr(&mut record24, offset, ATTR_TYPE_FILE_NAME, &file_name);
        offset = push_resident_attr(&mut record24, offset, ATTR_TYPE_DATA, &data);
        record24[offset..offset + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());

        let mut volume = VecSectorStream::new();
        let mft_lcn = 10u64;
        for i in 0..32u64 {
            let record = match i {
                0 => record0.clone(),
                6 => record6.clone(),
                10 => record10.clone(),
                24 => record24.clone(),
                _ => empty_record(record_size),
            };
            volume.write_at(mft_lcn * cluster_size + i * record_size as u64, &record).unwrap();
        }
        volume.write_at(20 * cluster_size, &upcase_bytes).unwrap();

        let mut boot = vec![0u8; 512];
        boot[0x03..0x0B].copy_from_slice(structures::NTFS_OEM_ID);
        boot[0x0B..0x0D].copy_from_slice(&512u16.to_le_bytes());
        boot[0x0D] = 8;
        boot[0x28..0x30].copy_from_slice(&(64u64 * 8).to_le_bytes());
        boot[0x30..0x38].copy_from_slice(&mft_lcn.to_le_bytes());
        boot[0x38..0x40].copy_from_slice(&4u64.to_le_bytes());
        boot[0x40] = 0xF6;
        boot[0x44] = 0xF6;
        boot[0x1FE..0x200].copy_from_slice(&0xAA55u16.to_le_bytes());
        volume.write_at(0, &boot).unwrap();

        volume
    }

    #[tokio::test]
    async fn reads_a_resident_stream_asynchronously() {
        let volume = sample_volume().await;
        let async_volume = AsyncNtfsVolume::open(volume, NtfsOptions::default()).await.unwrap();
        let data = async_volume.read_file(24, String::new(), 0, 11).await.unwrap();
        assert_eq!(&data, b"hello async");
    }

    #[tokio::test]
    async fn writes_then_reads_back_asynchronously() {
        let volume = sample_volume().await;
        let async_volume = AsyncNtfsVolume::open(volume, NtfsOptions::default()).await.unwrap();
        async_volume.write_file(24, String::new(), 6, b"NTFS!!".to_vec()).await.unwrap();
        let data = async_volume.read_file(24, String::new(), 0, 12).await.unwrap();
        assert_eq!(&data, b"hello NTFS!!");
    }

    #[tokio::test]
    async fn write_rejected_on_read_only_volume() {
        let volume = sample_volume().await;
        let mut options = NtfsOptions::default();
        options.read_only = true;
        let async_volume = AsyncNtfsVolume::open(volume, options).await.unwrap();
        assert!(async_volume.write_file(24, String::new(), 0, b"x".to_vec()).await.is_err());
    }
}
