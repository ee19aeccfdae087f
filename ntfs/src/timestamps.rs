//! `$STANDARD_INFORMATION` timestamp fields and their update rules on
//! file operations (spec §4.8). FILETIME conversion itself lives in
//! `structures.rs`; this module holds the semantics of which fields
//! change on which operation, which the teacher never modeled (its MFT
//! writer only ever stamped all four fields identically at creation).

use crate::structures::{filetime_to_unix_secs, unix_secs_to_filetime};

/// The four `$STANDARD_INFORMATION` / `$FILE_NAME` timestamps, held as
/// raw FILETIME values so repeated round-trips never lose precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimes {
    pub created: u64,
    pub modified: u64,
    pub mft_modified: u64,
    pub accessed: u64,
}

impl FileTimes {
    pub fn new_at(now: u64) -> Self {
        Self { created: now, modified: now, mft_modified: now, accessed: now }
    }

    pub fn created_unix(&self) -> i64 {
        filetime_to_unix_secs(self.created)
    }

    pub fn modified_unix(&self) -> i64 {
        filetime_to_unix_secs(self.modified)
    }

    pub fn accessed_unix(&self) -> i64 {
        filetime_to_unix_secs(self.accessed)
    }

    /// A file's data content was written: bumps `modified`,
    /// `mft_modified`, and `accessed` (a write implies the file was
    /// touched), leaves `created` untouched.
    pub fn on_data_write(&mut self, now: u64) {
        self.modified = now;
        self.mft_modified = now;
        self.accessed = now;
    }

    /// Any attribute other than file data changed (rename, security,
    /// resize of a different stream): bumps only `mft_modified`.
    pub fn on_metadata_change(&mut self, now: u64) {
        self.mft_modified = now;
    }

    /// The file was opened for read: bumps `accessed` only, and only
    /// this is ever skipped by `NtfsOptions` to avoid a metadata write
    /// on every read (spec §4.8 "access time updates are best-effort").
    pub fn on_read(&mut self, now: u64) {
        self.accessed = now;
    }

    pub fn from_unix_secs(created: i64, modified: i64, accessed: i64) -> Self {
        let created = unix_secs_to_filetime(created);
        let modified = unix_secs_to_filetime(modified);
        let accessed = unix_secs_to_filetime(accessed);
        Self { created, modified, mft_modified: modified, accessed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_write_bumps_modified_mft_modified_and_accessed() {
        let mut times = FileTimes::new_at(1000);
        times.on_data_write(2000);
        assert_eq!(times.created, 1000);
        assert_eq!(times.accessed, 2000);
        assert_eq!(times.modified, 2000);
        assert_eq!(times.mft_modified, 2000);
    }

    #[test]
    fn metadata_change_bumps_only_mft_modified() {
        let mut times = FileTimes::new_at(1000);
        times.on_metadata_change(2000);
        assert_eq!(times.modified, 1000);
        assert_eq!(times.mft_modified, 2000);
    }

    #[test]
    fn read_bumps_only_accessed() {
        let mut times = FileTimes::new_at(1000);
        times.on_read(2000);
        assert_eq!(times.modified, 1000);
        assert_eq!(times.accessed, 2000);
    }
}
