use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    #[error("volume is read-only")]
    ReadOnly,

    #[error("no space available: {0}")]
    NoSpace(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("MFT too fragmented to allocate an overflow record")]
    Fragmented,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Stream(#[from] ntfs_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
