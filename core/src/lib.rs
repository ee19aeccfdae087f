//! Generic block/stream layer shared by every on-disk format this
//! workspace can parse. Nothing in here knows about NTFS.

pub mod bitmap;
pub mod error;
pub mod extent;
pub mod lznt1;
pub mod snapshot;
pub mod stream;
pub mod substreams;

#[cfg(feature = "async")]
pub mod asyncio;

pub use bitmap::Bitmap;
pub use error::Error;
pub use extent::StreamExtent;
pub use snapshot::SnapshotStream;
pub use stream::{FileSectorStream, SectorStream, VecSectorStream};
pub use substreams::{BufferedStream, ConcatStream, SubStream, ZeroStream};
