//! # Channel Seam
//!
//! The transfer protocol runs atop an ordered, reliable, bidirectional
//! message channel carrying two frame kinds: UTF-8 JSON control frames
//! and opaque binary frames. The embedding supplies the transport; the
//! protocol only sees the [`Channel`] trait.
//!
//! [`memory_channel`] provides an in-process duplex pair. Control frames
//! cross it as their JSON wire text, not as Rust values, so every frame
//! a test or loopback transfer exchanges passes through the real codec.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::message::{self, ControlMessage};
use crate::error::{Error, Result};

/// One inbound frame from the peer.
#[derive(Debug)]
pub enum Frame {
    /// A parsed control frame.
    Control(ControlMessage),
    /// A raw binary payload frame.
    Binary(Bytes),
}

/// Ordered, reliable, bidirectional message transport.
///
/// In-order delivery within each direction is assumed; closure must
/// surface as `Ok(None)` from [`recv`](Self::recv) on the remote side.
#[async_trait]
pub trait Channel: Send {
    /// Send one control frame.
    async fn send_control(&mut self, msg: &ControlMessage) -> Result<()>;

    /// Send one binary frame.
    async fn send_binary(&mut self, bytes: Bytes) -> Result<()>;

    /// Receive the next frame; `Ok(None)` once the peer has closed and
    /// all in-flight frames are drained.
    async fn recv(&mut self) -> Result<Option<Frame>>;

    /// Close our sending half. Frames already in flight still reach the
    /// peer.
    async fn close(&mut self) -> Result<()>;
}

// ============================================================================
// IN-MEMORY CHANNEL
// ============================================================================

/// A frame as it travels between the two halves: text, exactly as it
/// would appear on a real wire.
#[derive(Debug)]
enum WireFrame {
    Text(String),
    Binary(Bytes),
}

/// One endpoint of an in-process duplex channel.
pub struct MemoryChannel {
    tx: Option<mpsc::Sender<WireFrame>>,
    rx: mpsc::Receiver<WireFrame>,
}

/// Create a connected pair of in-process channel endpoints.
///
/// `capacity` bounds each direction; a full direction backpressures the
/// sending side exactly like a congested socket.
pub fn memory_channel(capacity: usize) -> (MemoryChannel, MemoryChannel) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (
        MemoryChannel { tx: Some(a_tx), rx: a_rx },
        MemoryChannel { tx: Some(b_tx), rx: b_rx },
    )
}

impl MemoryChannel {
    async fn send_wire(&mut self, frame: WireFrame) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::ChannelClosed)?;
        tx.send(frame).await.map_err(|_| Error::ChannelClosed)
    }

    /// Inject raw wire text, bypassing the encoder. Lets tests exercise
    /// the malformed-frame paths a well-behaved peer can never produce.
    #[cfg(test)]
    pub(crate) async fn send_raw_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.send_wire(WireFrame::Text(text.into())).await
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn send_control(&mut self, msg: &ControlMessage) -> Result<()> {
        let text = message::encode(msg)?;
        self.send_wire(WireFrame::Text(text)).await
    }

    async fn send_binary(&mut self, bytes: Bytes) -> Result<()> {
        self.send_wire(WireFrame::Binary(bytes)).await
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        match self.rx.recv().await {
            Some(WireFrame::Text(text)) => Ok(Some(Frame::Control(message::decode(&text)?))),
            Some(WireFrame::Binary(bytes)) => Ok(Some(Frame::Binary(bytes))),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_control_frames_round_trip_through_wire_text() {
        let (mut a, mut b) = memory_channel(8);
        a.send_control(&ControlMessage::Ready).await.unwrap();
        match b.recv().await.unwrap() {
            Some(Frame::Control(ControlMessage::Ready)) => {}
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_binary_frames_pass_through() {
        let (mut a, mut b) = memory_channel(8);
        a.send_binary(Bytes::from_static(b"\x00\x01\x02")).await.unwrap();
        match b.recv().await.unwrap() {
            Some(Frame::Binary(bytes)) => assert_eq!(bytes.as_ref(), b"\x00\x01\x02"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ordering_preserved_across_frame_kinds() {
        let (mut a, mut b) = memory_channel(8);
        a.send_control(&ControlMessage::Chunk { seq: 0, offset: 0, size: 1, total: 1 })
            .await
            .unwrap();
        a.send_binary(Bytes::from_static(b"x")).await.unwrap();
        a.send_control(&ControlMessage::End { attempt: None }).await.unwrap();

        assert!(matches!(
            b.recv().await.unwrap(),
            Some(Frame::Control(ControlMessage::Chunk { .. }))
        ));
        assert!(matches!(b.recv().await.unwrap(), Some(Frame::Binary(_))));
        assert!(matches!(
            b.recv().await.unwrap(),
            Some(Frame::Control(ControlMessage::End { .. }))
        ));
    }

    #[tokio::test]
    async fn test_close_drains_then_signals() {
        let (mut a, mut b) = memory_channel(8);
        a.send_control(&ControlMessage::Ready).await.unwrap();
        a.close().await.unwrap();

        // The in-flight frame still arrives, then the closure surfaces
        assert!(matches!(b.recv().await.unwrap(), Some(Frame::Control(_))));
        assert!(b.recv().await.unwrap().is_none());

        // Sending into a closed channel fails
        assert!(matches!(
            a.send_control(&ControlMessage::Ready).await,
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_malformed_wire_text_surfaces_on_recv() {
        let (mut a, mut b) = memory_channel(8);
        a.send_raw_text(r#"{"t":"no_such_tag"}"#).await.unwrap();
        assert!(matches!(b.recv().await, Err(Error::MalformedFrame(_))));
    }
}
