//! # Byte Collaborator Seams
//!
//! The [`Sink`] and [`Source`] traits are the seams between the core and
//! the embedding application: the receiver writes reassembled bytes into a
//! `Sink`, the archive writer emits its record stream into a `Sink`, and
//! the sender reads payload bytes out of a `Source`. File-backed
//! implementations live in [`crate::fs`]; the in-memory implementations
//! here back the tests and small in-process transfers.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

// ============================================================================
// TRAITS
// ============================================================================

/// Consumer of transfer (or archive) output bytes.
///
/// Writes carry an absolute byte offset so a resumed session can land
/// bytes at the position the metadata declared rather than wherever the
/// stream happens to be.
#[async_trait]
pub trait Sink: Send {
    /// Reserve capacity for the declared total size.
    ///
    /// Called once, before the first write, when the total is known
    /// (for a transfer: when `meta` arrives). The default is a no-op.
    async fn allocate(&mut self, _size: u64) -> Result<()> {
        Ok(())
    }

    /// Write `bytes` at the absolute `offset`.
    async fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Flush and release the sink.
    async fn close(&mut self) -> Result<()>;
}

/// Producer of the payload bytes a sender transmits.
#[async_trait]
pub trait Source: Send {
    /// Total payload size in bytes.
    fn len(&self) -> u64;

    /// Whether the payload is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// The caller never asks for a range beyond [`Self::len`]; a short
    /// read is a [`Error::SourceFailure`].
    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes>;
}

// ============================================================================
// IN-MEMORY IMPLEMENTATIONS
// ============================================================================

/// Growable in-memory [`Sink`].
///
/// Clones share the same buffer, so a test can keep a handle while the
/// receiver owns the sink.
#[derive(Clone, Default)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink pre-filled with `data` (e.g. the partial bytes of an
    /// interrupted transfer being resumed).
    pub fn with_contents(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
        }
    }

    /// Snapshot of the bytes written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().expect("sink lock poisoned").clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn allocate(&mut self, size: u64) -> Result<()> {
        let mut data = self.data.lock().expect("sink lock poisoned");
        let current_len = data.len() as u64;
        data.reserve(size.saturating_sub(current_len) as usize);
        Ok(())
    }

    async fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.lock().expect("sink lock poisoned");
        let offset = offset as usize;
        let end = offset + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-memory [`Source`] over a byte buffer.
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    /// Wrap a byte buffer as a source.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait]
impl Source for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        let start = offset as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(Error::SourceFailure(format!(
                "read of {}..{} beyond source length {}",
                start,
                end,
                self.data.len()
            )));
        }
        Ok(self.data.slice(start..end))
    }
}

// ============================================================================
// TESTS
// ============================================================================
