//! Thin async surface over the synchronous `SectorStream` (spec §5,
//! §9 "Async is a surface concern"). One `spawn_blocking` per call;
//! no task graph, no executor of our own. Grounded in the workspace's
//! pre-existing `tokio` dependency (`core/Cargo.toml` in the teacher
//! already pulled in the full `tokio` feature set for its device I/O).

use crate::error::{Error, Result};
use crate::stream::SectorStream;
use std::sync::{Arc, Mutex};

/// An async-friendly handle to a `SectorStream` living behind a
/// blocking mutex; every operation suspends only at the
/// `spawn_blocking` await point and preserves the ordering guarantees
/// of the synchronous trait (spec §5).
#[derive(Clone)]
pub struct AsyncSectorStream<S> {
    inner: Arc<Mutex<S>>,
}

impl<S: SectorStream + 'static> AsyncSectorStream<S> {
    pub fn new(stream: S) -> Self {
        Self { inner: Arc::new(Mutex::new(stream)) }
    }

    pub async fn len(&self) -> Result<u64> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.lock().unwrap().len())
            .await
            .map_err(join_error)?
    }

    pub async fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            let n = inner.lock().unwrap().read_at(offset, &mut buf)?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
        .map_err(join_error)?
    }

    pub async fn write_at(&self, offset: u64, buf: Vec<u8>) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.lock().unwrap().write_at(offset, &buf))
            .await
            .map_err(join_error)?
    }

    pub async fn flush(&self) -> Result<()> {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || inner.lock().unwrap().flush())
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
    use crate::stream::VecSectorStream;

    #[tokio::test]
    async fn async_round_trip() {
        let stream = AsyncSectorStream::new(VecSectorStream::new());
        stream.write_at(0, b"hello".to_vec()).await.unwrap();
        let data = stream.read_at(0, 5).await.unwrap();
        assert_eq!(data, b"hello");
    }
}
