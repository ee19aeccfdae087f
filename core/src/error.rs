use thiserror::Error;

/// Error taxonomy for the block/stream layer (spec §7).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("corrupt metadata: {0}")]
    CorruptMetadata(String),

    #[error("stream is read-only")]
    ReadOnly,

    #[error("no space available: {0}")]
    NoSpace(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("stream is frozen")]
    Frozen,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
