//! Mount-time behavior flags (spec §3.3, §9). Grounded in the
//! teacher's `core/src/filesystem.rs` (`FormatOptions`: a serde'd
//! struct with a hand-written `Default`), repurposed from format-time
//! options to volume-open-time options.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NtfsOptions {
    /// Reject every mutating operation up front (spec §4.6, §4.8).
    pub read_only: bool,
    /// Verify a file reference's sequence number against the MFT
    /// record's own before trusting a cached lookup (spec §4.5).
    pub safe_sequence_number_checks: bool,
    /// Suppress the short 8.3 `FILE_NAME` namespace entries from
    /// directory listings (spec §8 scenario 4).
    pub hide_dos_file_names: bool,
    /// Trust the size embedded in a directory's `$FILE_NAME` index
    /// entry instead of opening the target record's own attribute,
    /// trading accuracy after an out-of-band write for listing speed.
    pub file_length_from_directory_entries: bool,
}

impl Default for NtfsOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            safe_sequence_number_checks: true,
            hide_dos_file_names: true,
            file_length_from_directory_entries: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_favor_safety_over_speed() {
        let opts = NtfsOptions::default();
        assert!(!opts.read_only);
        assert!(opts.safe_sequence_number_checks);
        assert!(!opts.file_length_from_directory_entries);
    }

    #[test]
    fn read_only_overrides_other_defaults() {
        let opts = NtfsOptions { read_only: true, ..NtfsOptions::default() };
        assert!(opts.read_only);
        assert!(opts.hide_dos_file_names);
    }
}
