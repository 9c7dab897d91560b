//! # Wire Messages
//!
//! The control-frame catalogue for the transfer protocol. Every control
//! frame is a UTF-8 JSON object tagged by a `t` discriminator field with
//! camelCase payload fields; field names and string values are
//! case-sensitive and byte-exact on the wire.
//!
//! Binary chunk payloads are not messages: a binary frame is valid only
//! immediately after a `chunk` control frame, and its length must equal
//! that frame's declared `size`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Machine-readable codes carried on `error` frames.
pub mod code {
    /// The peers announced different protocol versions.
    pub const PROTOCOL_MISMATCH: &str = "PROTOCOL_MISMATCH";
    /// Unknown `t`, missing field, stray or mis-sized binary frame.
    pub const MALFORMED: &str = "MALFORMED";
    /// `end` arrived with fewer bytes delivered than the metadata declared.
    pub const INCOMPLETE: &str = "INCOMPLETE";
}

/// Control messages exchanged between peers during a transfer.
///
/// Serialized as JSON with a `t` tag, e.g.
/// `{"t":"hello","protocolVersion":2,"sessionId":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Version announce, emitted by both peers on channel open.
    #[serde(rename_all = "camelCase")]
    Hello {
        /// The announcing peer's protocol version.
        protocol_version: u32,
        /// Session identifier; chosen by the sender, echoed by the
        /// receiver, with the sender's value authoritative.
        session_id: String,
    },

    /// File metadata, sender → receiver.
    #[serde(rename_all = "camelCase")]
    Meta {
        /// Session this metadata belongs to.
        session_id: String,
        /// File name as presented to the receiver.
        name: String,
        /// Total payload size in bytes.
        size: u64,
        /// MIME type hint.
        mime: String,
    },

    /// Receiver is ready; begin transferring.
    Ready,

    /// Header for exactly one binary frame that follows immediately.
    Chunk {
        /// Sequence number, monotonically increasing from 0.
        seq: u64,
        /// Absolute byte offset of this chunk within the payload.
        offset: u64,
        /// Byte length of the following binary frame.
        size: u32,
        /// Total payload size in bytes.
        total: u64,
    },

    /// Acknowledges a chunk, receiver → sender.
    ChunkAck {
        /// The acknowledged sequence number. Cumulative in effect: every
        /// chunk with a lower sequence number is implicitly acknowledged.
        seq: u64,
        /// The receiver's monotonic delivered-bytes watermark.
        received: u64,
    },

    /// All payload bytes have been emitted, sender → receiver.
    End {
        /// Retry counter; absent on the first attempt (read as 1).
        #[serde(skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
    },

    /// Transfer verified complete, receiver → sender.
    EndAck {
        /// Bytes the receiver delivered to its sink.
        received: u64,
        /// Bytes the metadata declared.
        total: u64,
    },

    /// Heartbeat probe; either direction.
    Ping {
        /// Sender's wall-clock milliseconds, echoed in the `pong`.
        timestamp: i64,
    },

    /// Heartbeat reply echoing the probe's timestamp.
    Pong {
        /// The `ping`'s original timestamp.
        timestamp: i64,
    },

    /// Fatal error notification; either direction.
    Error {
        /// Human-readable description.
        message: String,
        /// Optional machine-readable code (see [`code`]).
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Cooperative cancel; either direction.
    Cancelled {
        /// Optional reason shown to the other peer.
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// Request to resume a broken session, receiver → sender, emitted in
    /// place of `ready` after a reconnect handshake.
    #[serde(rename_all = "camelCase")]
    Resume {
        /// The session being resumed.
        session_id: String,
        /// Bytes the receiver has already delivered to its sink.
        received_bytes: u64,
    },

    /// Answer to a `resume` request, sender → receiver.
    #[serde(rename_all = "camelCase")]
    ResumeAck {
        /// Offset the sender will restart from; ≤ `receivedBytes` and
        /// aligned to a chunk boundary as the sender recorded it.
        resume_from_offset: u64,
        /// Whether the sender accepted the resume.
        accepted: bool,
    },
}

impl ControlMessage {
    /// The wire tag of this message, for diagnostics.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Meta { .. } => "meta",
            Self::Ready => "ready",
            Self::Chunk { .. } => "chunk",
            Self::ChunkAck { .. } => "chunk_ack",
            Self::End { .. } => "end",
            Self::EndAck { .. } => "end_ack",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
            Self::Cancelled { .. } => "cancelled",
            Self::Resume { .. } => "resume",
            Self::ResumeAck { .. } => "resume_ack",
        }
    }
}

/// Encode a control message to its wire text.
pub fn encode(msg: &ControlMessage) -> Result<String> {
    serde_json::to_string(msg).map_err(Error::from)
}

/// Decode a control message from wire text.
///
/// An unknown `t` or a missing field is a [`Error::MalformedFrame`], not
/// a serialization error: it is the peer's bytes that are wrong.
pub fn decode(text: &str) -> Result<ControlMessage> {
    serde_json::from_str(text).map_err(|e| Error::MalformedFrame(e.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_wire_format() {
        let msg = ControlMessage::Hello {
            protocol_version: 2,
            session_id: "sess-1".into(),
        };
        assert_eq!(
            encode(&msg).unwrap(),
            r#"{"t":"hello","protocolVersion":2,"sessionId":"sess-1"}"#
        );
    }

    #[test]
    fn test_meta_wire_format() {
        let msg = ControlMessage::Meta {
            session_id: "sess-1".into(),
            name: "report.pdf".into(),
            size: 1048576,
            mime: "application/pdf".into(),
        };
        assert_eq!(
            encode(&msg).unwrap(),
            r#"{"t":"meta","sessionId":"sess-1","name":"report.pdf","size":1048576,"mime":"application/pdf"}"#
        );
    }

    #[test]
    fn test_ready_wire_format() {
        assert_eq!(encode(&ControlMessage::Ready).unwrap(), r#"{"t":"ready"}"#);
    }

    #[test]
    fn test_chunk_and_ack_wire_format() {
        let chunk = ControlMessage::Chunk {
            seq: 0,
            offset: 0,
            size: 2,
            total: 3,
        };
        assert_eq!(
            encode(&chunk).unwrap(),
            r#"{"t":"chunk","seq":0,"offset":0,"size":2,"total":3}"#
        );

        let ack = ControlMessage::ChunkAck { seq: 0, received: 2 };
        assert_eq!(
            encode(&ack).unwrap(),
            r#"{"t":"chunk_ack","seq":0,"received":2}"#
        );
    }

    #[test]
    fn test_end_attempt_omitted_when_absent() {
        assert_eq!(
            encode(&ControlMessage::End { attempt: None }).unwrap(),
            r#"{"t":"end"}"#
        );
        assert_eq!(
            encode(&ControlMessage::End { attempt: Some(2) }).unwrap(),
            r#"{"t":"end","attempt":2}"#
        );

        // Absence round-trips as None (the state machine reads it as 1)
        let decoded = decode(r#"{"t":"end"}"#).unwrap();
        assert_eq!(decoded, ControlMessage::End { attempt: None });
    }

    #[test]
    fn test_resume_wire_format() {
        let msg = ControlMessage::Resume {
            session_id: "sess-X".into(),
            received_bytes: 524288,
        };
        assert_eq!(
            encode(&msg).unwrap(),
            r#"{"t":"resume","sessionId":"sess-X","receivedBytes":524288}"#
        );

        let ack = ControlMessage::ResumeAck {
            resume_from_offset: 524288,
            accepted: true,
        };
        assert_eq!(
            encode(&ack).unwrap(),
            r#"{"t":"resume_ack","resumeFromOffset":524288,"accepted":true}"#
        );
    }

    #[test]
    fn test_optional_fields_skipped() {
        assert_eq!(
            encode(&ControlMessage::Cancelled { reason: None }).unwrap(),
            r#"{"t":"cancelled"}"#
        );
        assert_eq!(
            encode(&ControlMessage::Error {
                message: "boom".into(),
                code: Some(code::INCOMPLETE.into()),
            })
            .unwrap(),
            r#"{"t":"error","message":"boom","code":"INCOMPLETE"}"#
        );
    }

    #[test]
    fn test_round_trip_all_variants() {
        let messages = vec![
            ControlMessage::Hello { protocol_version: 2, session_id: "s".into() },
            ControlMessage::Meta {
                session_id: "s".into(),
                name: "f".into(),
                size: 9,
                mime: "application/octet-stream".into(),
            },
            ControlMessage::Ready,
            ControlMessage::Chunk { seq: 3, offset: 196608, size: 65536, total: 262144 },
            ControlMessage::ChunkAck { seq: 3, received: 262144 },
            ControlMessage::End { attempt: Some(3) },
            ControlMessage::EndAck { received: 262144, total: 262144 },
            ControlMessage::Ping { timestamp: 1700000000000 },
            ControlMessage::Pong { timestamp: 1700000000000 },
            ControlMessage::Error { message: "m".into(), code: None },
            ControlMessage::Cancelled { reason: Some("user".into()) },
            ControlMessage::Resume { session_id: "s".into(), received_bytes: 1 },
            ControlMessage::ResumeAck { resume_from_offset: 0, accepted: false },
        ];
        for msg in messages {
            let text = encode(&msg).unwrap();
            assert_eq!(decode(&text).unwrap(), msg, "round trip of {}", msg.tag());
        }
    }

    #[test]
    fn test_unknown_tag_is_malformed() {
        let err = decode(r#"{"t":"warp_speed"}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let err = decode(r#"{"t":"hello","protocolVersion":2}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));

        let err = decode(r#"{"t":"chunk","seq":0,"offset":0,"total":3}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[test]
    fn test_not_json_is_malformed() {
        assert!(matches!(decode("not json"), Err(Error::MalformedFrame(_))));
    }
}
