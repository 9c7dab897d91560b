//! # WebSocket Channel
//!
//! The bundled [`Channel`] implementation: control frames travel as
//! WebSocket text messages carrying their JSON encoding, chunk payloads
//! as WebSocket binary messages. WebSocket framing already provides the
//! ordering, reliability, and close signal the protocol assumes from a
//! channel, so this adapter is a thin mapping.
//!
//! Embedders with their own transport (WebRTC data channels, pipes)
//! implement [`Channel`] against it instead; nothing in the transfer
//! core depends on this module.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{Error, Result};
use crate::transfer::channel::{Channel, Frame};
use crate::transfer::message::{self, ControlMessage};

/// A [`Channel`] over a WebSocket stream.
pub struct WsChannel<S> {
    inner: WebSocketStream<S>,
}

impl WsChannel<MaybeTlsStream<TcpStream>> {
    /// Dial `url` (e.g. `ws://192.168.1.20:7350`) and wrap the
    /// connection.
    pub async fn connect(url: &str) -> Result<Self> {
        let (inner, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;
        tracing::debug!(url, "websocket channel connected");
        Ok(Self { inner })
    }
}

impl WsChannel<TcpStream> {
    /// Accept an inbound TCP connection as a WebSocket channel.
    pub async fn accept(stream: TcpStream) -> Result<Self> {
        let inner = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::Channel(e.to_string()))?;
        tracing::debug!("websocket channel accepted");
        Ok(Self { inner })
    }
}

#[async_trait]
impl<S> Channel for WsChannel<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn send_control(&mut self, msg: &ControlMessage) -> Result<()> {
        let text = message::encode(msg)?;
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }

    async fn send_binary(&mut self, bytes: Bytes) -> Result<()> {
        self.inner
            .send(Message::Binary(bytes.to_vec()))
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Frame::Control(message::decode(&text)?)))
                }
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(Some(Frame::Binary(Bytes::from(bytes))))
                }
                // Transport-level keepalives are not protocol frames
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(Error::Channel(e.to_string())),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inner
            .close(None)
            .await
            .map_err(|e| Error::Channel(e.to_string()))
    }
}

// ============================================================================
// TESTS
// ============================================================================
