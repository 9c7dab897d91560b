//! # Streaming Archive Writer
//!
//! Multiplexes many files into a single store-mode ZIP byte stream,
//! emitted through a [`Sink`] without buffering file bodies.
//!
//! ## Lifecycle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     STREAMING ARCHIVE WRITER                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  start_file(name) ──► local file header (sizes deferred, GP bit 3)     │
//! │  write_chunk(b)   ──► raw stored bytes (CRC accumulated on the fly)    │
//! │  end_file()       ──► data descriptor (crc, sizes)                     │
//! │       │                                                                 │
//! │       └── repeat per entry; exactly one entry open at a time           │
//! │                                                                         │
//! │  finalize()       ──► central directory + end-of-central-directory     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every emission awaits the sink before the next one is produced, so the
//! sink observes bytes in strict emission order and a slow sink stalls the
//! producer instead of growing an internal queue. A sink error is fatal:
//! the writer parks in a failed state and every later call returns
//! [`Error::ArchiveFailed`].
//!
//! Classic (non-ZIP64) records only: entries and the archive itself are
//! bounded at 4 GiB, enforced as [`Error::EntryTooLarge`].

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{Datelike, Timelike};

use crate::error::{Error, Result};
use crate::io::Sink;

// ============================================================================
// ZIP RECORD CONSTANTS
// ============================================================================

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIR_SIG: u32 = 0x0605_4b50;

/// Version 2.0: store method + data descriptors.
const VERSION_NEEDED: u16 = 20;
/// Made-by: UNIX host (3), PKZIP 2.0.
const VERSION_MADE_BY: u16 = (3 << 8) | 20;
/// General-purpose flags: bit 3 (sizes in trailing descriptor, unknown at
/// entry start) and bit 11 (UTF-8 names).
const GP_FLAGS: u16 = 0x0808;
/// Compression method 0: stored, no compression.
const METHOD_STORE: u16 = 0;
/// `-rw-r--r--` in the upper (UNIX) half of the external attributes.
const EXTERNAL_ATTRS: u32 = 0o100_644 << 16;

/// Classic-format ceiling for entry sizes and record offsets.
const CLASSIC_LIMIT: u64 = u32::MAX as u64;

// ============================================================================
// WRITER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    /// No entry open; ready for `start_file` or `finalize`.
    Idle,
    /// An entry is accepting chunks.
    EntryOpen,
    /// Central directory written; terminal success.
    Finalized,
    /// A sink error occurred; terminal failure.
    Failed,
}

/// A closed entry awaiting its central-directory record.
struct EntryRecord {
    name: String,
    crc: u32,
    size: u64,
    header_offset: u64,
}

/// The entry currently accepting chunks.
struct OpenEntry {
    name: String,
    header_offset: u64,
    crc: crc32fast::Hasher,
    size: u64,
}

/// Streaming store-mode ZIP writer over a [`Sink`].
pub struct ArchiveWriter<S: Sink> {
    sink: S,
    state: WriterState,
    /// Bytes emitted so far; doubles as the next record's offset.
    offset: u64,
    entries: Vec<EntryRecord>,
    current: Option<OpenEntry>,
    dos_time: u16,
    dos_date: u16,
}

impl<S: Sink> ArchiveWriter<S> {
    /// Create a writer emitting into `sink`, stamping entries with the
    /// current wall-clock time.
    pub fn new(sink: S) -> Self {
        let now = chrono::Utc::now();
        let (dos_time, dos_date) = dos_timestamp(&now);
        Self::with_timestamp(sink, dos_time, dos_date)
    }

    fn with_timestamp(sink: S, dos_time: u16, dos_date: u16) -> Self {
        Self {
            sink,
            state: WriterState::Idle,
            offset: 0,
            entries: Vec::new(),
            current: None,
            dos_time,
            dos_date,
        }
    }

    /// Open a new entry named `name`.
    pub async fn start_file(&mut self, name: &str) -> Result<()> {
        self.check_open_state()?;
        if self.state == WriterState::EntryOpen {
            return Err(Error::EntryAlreadyOpen);
        }
        if self.offset > CLASSIC_LIMIT {
            self.state = WriterState::Failed;
            return Err(Error::EntryTooLarge { size: self.offset });
        }

        let header_offset = self.offset;
        let header = local_file_header(name, self.dos_time, self.dos_date);
        self.emit(header).await?;

        tracing::debug!(name, header_offset, "archive entry opened");
        self.current = Some(OpenEntry {
            name: name.to_string(),
            header_offset,
            crc: crc32fast::Hasher::new(),
            size: 0,
        });
        self.state = WriterState::EntryOpen;
        Ok(())
    }

    /// Append `bytes` to the open entry.
    pub async fn write_chunk(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_open_state()?;
        if self.state != WriterState::EntryOpen {
            return Err(Error::NoEntryOpen);
        }

        let entry = self.current.as_mut().expect("entry open without record");
        let new_size = entry.size + bytes.len() as u64;
        if new_size > CLASSIC_LIMIT {
            self.state = WriterState::Failed;
            return Err(Error::EntryTooLarge { size: new_size });
        }
        entry.crc.update(bytes);
        entry.size = new_size;

        let chunk = Bytes::copy_from_slice(bytes);
        self.emit(chunk).await
    }

    /// Close the open entry, emitting its data descriptor.
    pub async fn end_file(&mut self) -> Result<()> {
        self.check_open_state()?;
        if self.state != WriterState::EntryOpen {
            return Err(Error::NoEntryOpen);
        }

        let entry = self.current.take().expect("entry open without record");
        let crc = entry.crc.finalize();
        let descriptor = data_descriptor(crc, entry.size);
        // Restore state before the fallible emit so a failure parks the
        // writer in Failed, not in a half-open entry.
        self.state = WriterState::Idle;
        self.emit(descriptor).await?;

        tracing::debug!(name = %entry.name, size = entry.size, crc, "archive entry closed");
        self.entries.push(EntryRecord {
            name: entry.name,
            crc,
            size: entry.size,
            header_offset: entry.header_offset,
        });
        Ok(())
    }

    /// Write the central directory and complete the archive.
    ///
    /// Idempotent after the first success. Fails if an entry is still
    /// open.
    pub async fn finalize(&mut self) -> Result<()> {
        match self.state {
            WriterState::Failed => return Err(Error::ArchiveFailed),
            WriterState::Finalized => return Ok(()),
            WriterState::EntryOpen => return Err(Error::EntryStillOpen),
            WriterState::Idle => {}
        }

        let cd_offset = self.offset;
        let mut directory = BytesMut::new();
        for entry in &self.entries {
            directory.extend_from_slice(&central_header(
                entry,
                self.dos_time,
                self.dos_date,
            ));
        }
        let cd_size = directory.len() as u64;
        directory.extend_from_slice(&end_of_central_directory(
            self.entries.len(),
            cd_size,
            cd_offset,
        ));
        self.emit(directory.freeze()).await?;

        if let Err(e) = self.sink.close().await {
            self.state = WriterState::Failed;
            return Err(e);
        }

        tracing::debug!(entries = self.entries.len(), bytes = self.offset, "archive finalized");
        self.state = WriterState::Finalized;
        Ok(())
    }

    /// Number of entries closed so far.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Bytes emitted to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    fn check_open_state(&self) -> Result<()> {
        match self.state {
            WriterState::Failed => Err(Error::ArchiveFailed),
            WriterState::Finalized => Err(Error::ArchiveFinalized),
            _ => Ok(()),
        }
    }

    /// Deliver one record to the sink, awaiting it before returning so
    /// emissions stay ordered and backpressured.
    async fn emit(&mut self, bytes: Bytes) -> Result<()> {
        let len = bytes.len() as u64;
        match self.sink.write(self.offset, &bytes).await {
            Ok(()) => {
                self.offset += len;
                Ok(())
            }
            Err(e) => {
                self.state = WriterState::Failed;
                Err(e)
            }
        }
    }
}

// ============================================================================
// RECORD ENCODING
// ============================================================================

fn local_file_header(name: &str, dos_time: u16, dos_date: u16) -> Bytes {
    let name = name.as_bytes();
    let mut buf = BytesMut::with_capacity(30 + name.len());
    buf.put_u32_le(LOCAL_HEADER_SIG);
    buf.put_u16_le(VERSION_NEEDED);
    buf.put_u16_le(GP_FLAGS);
    buf.put_u16_le(METHOD_STORE);
    buf.put_u16_le(dos_time);
    buf.put_u16_le(dos_date);
    buf.put_u32_le(0); // crc: deferred to the data descriptor
    buf.put_u32_le(0); // compressed size: deferred
    buf.put_u32_le(0); // uncompressed size: deferred
    buf.put_u16_le(name.len() as u16);
    buf.put_u16_le(0); // extra field length
    buf.put_slice(name);
    buf.freeze()
}

fn data_descriptor(crc: u32, size: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_u32_le(DATA_DESCRIPTOR_SIG);
    buf.put_u32_le(crc);
    buf.put_u32_le(size as u32); // compressed == uncompressed in store mode
    buf.put_u32_le(size as u32);
    buf.freeze()
}

fn central_header(entry: &EntryRecord, dos_time: u16, dos_date: u16) -> Bytes {
    let name = entry.name.as_bytes();
    let mut buf = BytesMut::with_capacity(46 + name.len());
    buf.put_u32_le(CENTRAL_HEADER_SIG);
    buf.put_u16_le(VERSION_MADE_BY);
    buf.put_u16_le(VERSION_NEEDED);
    buf.put_u16_le(GP_FLAGS);
    buf.put_u16_le(METHOD_STORE);
    buf.put_u16_le(dos_time);
    buf.put_u16_le(dos_date);
    buf.put_u32_le(entry.crc);
    buf.put_u32_le(entry.size as u32);
    buf.put_u32_le(entry.size as u32);
    buf.put_u16_le(name.len() as u16);
    buf.put_u16_le(0); // extra field length
    buf.put_u16_le(0); // comment length
    buf.put_u16_le(0); // disk number start
    buf.put_u16_le(0); // internal attributes
    buf.put_u32_le(EXTERNAL_ATTRS);
    buf.put_u32_le(entry.header_offset as u32);
    buf.put_slice(name);
    buf.freeze()
}

fn end_of_central_directory(entries: usize, cd_size: u64, cd_offset: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(22);
    buf.put_u32_le(END_OF_CENTRAL_DIR_SIG);
    buf.put_u16_le(0); // this disk
    buf.put_u16_le(0); // disk with the central directory
    buf.put_u16_le(entries as u16);
    buf.put_u16_le(entries as u16);
    buf.put_u32_le(cd_size as u32);
    buf.put_u32_le(cd_offset as u32);
    buf.put_u16_le(0); // comment length
    buf.freeze()
}

/// MS-DOS timestamp encoding (2-second resolution, 1980 epoch).
fn dos_timestamp(now: &chrono::DateTime<chrono::Utc>) -> (u16, u16) {
    let year = now.year();
    if year < 1980 {
        return (0, (1 << 5) | 1); // 1980-01-01 00:00:00
    }
    let time = ((now.hour() as u16) << 11)
        | ((now.minute() as u16) << 5)
        | (now.second() as u16 / 2);
    let date = (((year - 1980) as u16) << 9)
        | ((now.month() as u16) << 5)
        | (now.day() as u16);
    (time, date)
}

// ============================================================================
// TESTS
// ============================================================================
