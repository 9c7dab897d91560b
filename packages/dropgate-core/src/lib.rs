//! # Dropgate Core
//!
//! A cross-platform peer-to-peer file-transfer library: a versioned wire
//! protocol with flow control, retry, and resume semantics; a streaming
//! archive writer for multi-file transfers; and a bundled integrity
//! hash.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       DROPGATE CORE MODULES                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────────────────┐   ┌──────────────────────────────┐   │
//! │  │          Transfer            │   │          Archive             │   │
//! │  │                              │   │                              │   │
//! │  │ - Sender / Receiver tasks    │   │ - Streaming store-mode ZIP   │   │
//! │  │ - Windowed chunking + acks   │   │ - begin/write/end/finalize   │   │
//! │  │ - Heartbeat, resume, cancel  │   │ - In-order awaited sink      │   │
//! │  └──────┬────────────┬──────────┘   └──────────────┬───────────────┘   │
//! │         │            │                             │                   │
//! │         ▼            ▼                             ▼                   │
//! │  ┌─────────────┐  ┌─────────────┐   ┌─────────────────────────────┐   │
//! │  │  Channel    │  │  Integrity  │   │       Sink / Source         │   │
//! │  │             │  │             │   │                             │   │
//! │  │ - WebSocket │  │ - SHA-256   │   │ - Memory (tests, loopback)  │   │
//! │  │ - In-memory │  │   (bundled) │   │ - Files (tokio::fs)         │   │
//! │  └─────────────┘  └─────────────┘   └─────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flow at a sender: application → [`archive`] (multi-file case) →
//! [`transfer`] chunker → channel. At a receiver: channel → [`transfer`]
//! reassembler → optional [`integrity`] digest → sink. The archive
//! writer and the protocol are independent; either can be driven without
//! the other.
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`transfer`] - The P2P transfer protocol (sender/receiver tasks)
//! - [`archive`] - Streaming store-mode ZIP writer
//! - [`integrity`] - Bundled FIPS 180-4 SHA-256
//! - [`io`] - Sink/Source collaborator seams + in-memory implementations
//! - [`fs`] - File-backed sources and sinks
//! - [`net`] - Bundled WebSocket channel
//! - [`time`] - Wall-clock helpers

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod archive;
pub mod error;
pub mod fs;
pub mod integrity;
pub mod io;
pub mod net;
/// Wall-clock time utilities.
pub mod time;
pub mod transfer;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use archive::ArchiveWriter;
pub use error::{Error, Result};
pub use transfer::{
    memory_channel, new_session_id, CancelHandle, Channel, ControlMessage, FileMeta, Frame,
    Receiver, Sender, TransferConfig, TransferEvent, TransferOutcome, CHUNK_SIZE,
    PROTOCOL_VERSION, WINDOW_MAX,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of Dropgate Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_exported_constants() {
        assert_eq!(PROTOCOL_VERSION, 2);
        assert_eq!(CHUNK_SIZE, 65_536);
        assert_eq!(WINDOW_MAX, 32);
    }
}
