//! # P2P Transfer Protocol
//!
//! A versioned, message-oriented transfer protocol between a *sender*
//! and a *receiver* peer over an ordered, reliable, bidirectional
//! channel.
//!
//! ## Transfer Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      TRANSFER PROTOCOL (v2)                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Sender                              Receiver                          │
//! │  ──────                              ────────                          │
//! │                                                                         │
//! │  1. hello ────────────────────────►                                    │
//! │     (version, session id)            2. hello (echoed id)             │
//! │                           ◄────────                                    │
//! │  3. meta ─────────────────────────►                                    │
//! │     (name, size, mime)               4. allocate sink                  │
//! │                           ◄──────── 5. ready   (or resume)            │
//! │                                                                         │
//! │  6. chunk + binary frame ─────────►                                    │
//! │     (seq, offset, size)              7. write sink, ack               │
//! │                           ◄──────── 8. chunk_ack (seq, received)      │
//! │                                                                         │
//! │  9. Repeat 6-8, at most WINDOW_MAX chunks unacknowledged              │
//! │                                                                         │
//! │  10. end ─────────────────────────►                                    │
//! │      (retried ×3, 15 s apart)        11. verify received == total     │
//! │                           ◄──────── 12. end_ack ×3, 100 ms apart      │
//! │                                                                         │
//! │  Either side, any time: ping/pong · cancelled · error                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One session per channel, one cooperative task per session, no state
//! shared across sessions. The embedding supplies the channel (see
//! [`crate::net`] for the bundled WebSocket one), the sender's
//! [`Source`](crate::io::Source), and the receiver's
//! [`Sink`](crate::io::Sink).

pub mod channel;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod session;

pub use channel::{memory_channel, Channel, Frame, MemoryChannel};
pub use message::ControlMessage;
pub use receiver::Receiver;
pub use sender::Sender;
pub use session::{
    new_session_id, CancelHandle, FileMeta, ReceiverState, SenderState, SpeedTracker,
    TransferConfig, TransferEvent, TransferOutcome, Window, CHUNK_SIZE, CLOSE_GRACE,
    END_ACK_RETRIES, END_ACK_RETRY_DELAY, END_ACK_TIMEOUT, HEARTBEAT_INTERVAL,
    MISSED_HEARTBEATS, PROTOCOL_VERSION, WINDOW_MAX,
};

// ============================================================================
// TESTS
// ============================================================================
