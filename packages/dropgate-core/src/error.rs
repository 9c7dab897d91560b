//! # Error Handling
//!
//! This module provides the error types for Dropgate Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Protocol Errors                                                   │
//! │  │   ├── ProtocolMismatch      - hello versions differ                 │
//! │  │   ├── MalformedFrame        - unparseable or out-of-state frame     │
//! │  │   ├── Incomplete            - fewer bytes delivered than declared   │
//! │  │   ├── Timeout               - end-ack or heartbeat deadline missed  │
//! │  │   ├── ResumeRejected        - sender refused to resume the session  │
//! │  │   └── Remote                - peer reported a fatal error frame     │
//! │  │                                                                      │
//! │  ├── Channel Errors                                                    │
//! │  │   ├── ChannelClosed         - transport closed mid-session          │
//! │  │   └── Channel               - transport-level send/recv failure     │
//! │  │                                                                      │
//! │  ├── Collaborator Errors                                               │
//! │  │   ├── SinkFailure           - receiver/archive sink I/O failure     │
//! │  │   └── SourceFailure         - sender source I/O failure             │
//! │  │                                                                      │
//! │  ├── Archive Errors                                                    │
//! │  │   ├── EntryAlreadyOpen      - start_file while an entry is open     │
//! │  │   ├── NoEntryOpen           - write_chunk/end_file without entry    │
//! │  │   ├── EntryStillOpen        - finalize with an entry open           │
//! │  │   ├── ArchiveFinalized      - writer already finalized              │
//! │  │   ├── ArchiveFailed         - writer is in a terminal failed state  │
//! │  │   └── EntryTooLarge         - entry exceeds the classic ZIP bound   │
//! │  │                                                                      │
//! │  └── Cancelled                 - cooperative terminal outcome          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fatal protocol errors map to a wire code via [`Error::wire_code`]; the
//! session emits one final `error` control frame carrying that code before
//! closing the channel.

use thiserror::Error;

/// Result type alias for Dropgate Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Dropgate Core
///
/// All errors are categorized by subsystem. The protocol recovers locally
/// only from transient ack delay (flow-control wait) and a lost end-ack
/// (retry); every kind below is a terminal outcome for its session.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The peers announced different protocol versions
    #[error("protocol version mismatch: ours is {ours}, peer announced {theirs}")]
    ProtocolMismatch {
        /// Our protocol version
        ours: u32,
        /// The version the peer announced in its `hello`
        theirs: u32,
    },

    /// A frame could not be parsed, or arrived in a state that forbids it
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Transfer ended with fewer bytes delivered than the metadata declared
    #[error("incomplete transfer: received {received} of {expected} bytes")]
    Incomplete {
        /// Bytes actually delivered to the sink
        received: u64,
        /// Bytes the metadata declared
        expected: u64,
    },

    /// A protocol deadline (end-ack retry ladder, heartbeat) was exhausted
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The sender refused to resume the session
    #[error("resume rejected: {0}")]
    ResumeRejected(String),

    /// The peer reported a fatal error frame
    #[error("peer error{}: {message}", .code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Remote {
        /// Human-readable message from the peer
        message: String,
        /// Optional machine-readable code from the peer
        code: Option<String>,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// The underlying message channel closed mid-session
    #[error("channel closed")]
    ChannelClosed,

    /// Transport-level send/recv failure
    #[error("channel error: {0}")]
    Channel(String),

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// The receiving sink (or archive sink) failed
    #[error("sink failure: {0}")]
    SinkFailure(String),

    /// The sending source failed
    #[error("source failure: {0}")]
    SourceFailure(String),

    // ========================================================================
    // Archive Writer Errors
    // ========================================================================
    /// `start_file` was called while another entry is still open
    #[error("an archive entry is already open")]
    EntryAlreadyOpen,

    /// `write_chunk` or `end_file` was called with no open entry
    #[error("no archive entry is open")]
    NoEntryOpen,

    /// `finalize` was called while an entry is still open
    #[error("cannot finalize the archive while an entry is open")]
    EntryStillOpen,

    /// The archive writer has already been finalized
    #[error("the archive writer has been finalized")]
    ArchiveFinalized,

    /// A previous sink failure left the archive writer unusable
    #[error("the archive writer is in a failed state")]
    ArchiveFailed,

    /// An entry (or the archive offset) exceeded the classic ZIP 32-bit bound
    #[error("archive entry too large for the classic ZIP format: {size} bytes")]
    EntryTooLarge {
        /// The offending size or offset
        size: u64,
    },

    // ========================================================================
    // Terminal Outcomes
    // ========================================================================
    /// The transfer was cancelled cooperatively by either peer
    #[error("transfer cancelled{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Cancelled {
        /// Optional reason carried on the `cancelled` frame
        reason: Option<String>,
    },

    // ========================================================================
    // Internal Errors
    // ========================================================================
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Wire code carried on the outgoing `error` frame, if this kind
    /// warrants notifying the peer before closing.
    ///
    /// Local-only failures (source/sink I/O, our own timeouts) return
    /// `None`; the channel is simply closed.
    pub fn wire_code(&self) -> Option<&'static str> {
        match self {
            Error::ProtocolMismatch { .. } => Some(crate::transfer::message::code::PROTOCOL_MISMATCH),
            Error::MalformedFrame(_) => Some(crate::transfer::message::code::MALFORMED),
            Error::Incomplete { .. } => Some(crate::transfer::message::code::INCOMPLETE),
            _ => None,
        }
    }

    /// Whether this error represents a cooperative cancellation rather
    /// than a genuine failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
