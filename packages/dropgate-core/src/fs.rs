//! # File-Backed Sources and Sinks
//!
//! Thin `tokio::fs` wrappers implementing the [`Source`] and [`Sink`]
//! seams over real files. The transfer core never touches the filesystem
//! directly; front-ends hand these in.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::io::{Sink, Source};

// ============================================================================
// FILE SOURCE
// ============================================================================

/// Read-only file [`Source`] for an outgoing transfer.
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    /// Open `path` and capture its current length.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())
            .await
            .map_err(|e| Error::SourceFailure(e.to_string()))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| Error::SourceFailure(e.to_string()))?
            .len();
        Ok(Self { file, len })
    }
}

#[async_trait]
impl Source for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::SourceFailure(e.to_string()))?;
        let mut buf = vec![0u8; len];
        self.file
            .read_exact(&mut buf)
            .await
            .map_err(|e| Error::SourceFailure(e.to_string()))?;
        Ok(Bytes::from(buf))
    }
}

// ============================================================================
// FILE SINK
// ============================================================================

/// File [`Sink`] for an incoming transfer or an archive stream.
pub struct FileSink {
    file: File,
}

impl FileSink {
    /// Create (or truncate) the file at `path`.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path.as_ref())
            .await
            .map_err(|e| Error::SinkFailure(e.to_string()))?;
        Ok(Self { file })
    }

    /// Open an existing file at `path` for a resumed transfer, keeping
    /// its current contents.
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(path.as_ref())
            .await
            .map_err(|e| Error::SinkFailure(e.to_string()))?;
        Ok(Self { file })
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn allocate(&mut self, size: u64) -> Result<()> {
        self.file
            .set_len(size)
            .await
            .map_err(|e| Error::SinkFailure(e.to_string()))
    }

    async fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Error::SinkFailure(e.to_string()))?;
        self.file
            .write_all(bytes)
            .await
            .map_err(|e| Error::SinkFailure(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| Error::SinkFailure(e.to_string()))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| Error::SinkFailure(e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_source_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let mut source = FileSource::open(&path).await.unwrap();
        assert_eq!(source.len(), 10);
        assert_eq!(source.read_at(3, 4).await.unwrap().as_ref(), b"3456");
    }

    #[tokio::test]
    async fn test_file_sink_writes_at_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        let mut sink = FileSink::create(&path).await.unwrap();
        sink.allocate(11).await.unwrap();
        sink.write(6, b"world").await.unwrap();
        sink.write(0, b"hello ").await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let err = FileSource::open("/nonexistent/definitely-missing").await;
        assert!(matches!(err, Err(Error::SourceFailure(_))));
    }
}
