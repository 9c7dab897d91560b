//! # Sender State Machine
//!
//! Drives one outgoing transfer session over a [`Channel`], reading
//! payload bytes from a [`Source`].
//!
//! ```text
//! AwaitingHello ──hello──► AwaitingReady ──ready/resume──► Sending
//!                                                             │
//!                                       all bytes emitted ────┘
//!                                                             ▼
//!                          Done ◄──end_ack── AwaitingEndAck (end ×3, 15 s)
//! ```
//!
//! The whole session is one cooperative task: every transition happens in
//! response to an incoming frame, a freed window slot, or a timer, and
//! transitions are serialised by construction.

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval};

use super::channel::{Channel, Frame};
use super::message::ControlMessage;
use super::session::{
    cancel_channel, CancelHandle, CancelState, EventBus, FileMeta, Heartbeat, SenderState,
    SpeedTracker, TransferConfig, TransferEvent, TransferOutcome, Window, PROTOCOL_VERSION,
};
use crate::error::{Error, Result};
use crate::io::Source;
use crate::time;

/// One event the session task can wake on.
enum Step {
    Frame(Option<Frame>),
    Tick,
    Deadline,
    Cancel,
}

/// Sender half of one transfer session.
pub struct Sender<C: Channel, S: Source> {
    channel: C,
    source: S,
    meta: FileMeta,
    session_id: String,
    config: TransferConfig,
    state: SenderState,
    window: Window,
    speed: SpeedTracker,
    events: EventBus,
    cancel_handle: CancelHandle,
    cancel_rx: watch::Receiver<CancelState>,
    heartbeat: Heartbeat,
}

impl<C: Channel, S: Source> Sender<C, S> {
    /// Create a sender with the default configuration.
    ///
    /// `meta.size` must equal `source.len()`; the chunker partitions
    /// exactly the declared byte range.
    pub fn new(channel: C, source: S, meta: FileMeta, session_id: impl Into<String>) -> Self {
        Self::with_config(channel, source, meta, session_id, TransferConfig::default())
    }

    /// Create a sender with an explicit configuration.
    pub fn with_config(
        channel: C,
        source: S,
        meta: FileMeta,
        session_id: impl Into<String>,
        config: TransferConfig,
    ) -> Self {
        let (cancel_handle, cancel_rx) = cancel_channel();
        let window = Window::new(config.window_max);
        let heartbeat = Heartbeat::new(config.heartbeat_interval, config.missed_heartbeats);
        Self {
            channel,
            source,
            meta,
            session_id: session_id.into(),
            config,
            state: SenderState::AwaitingHello,
            window,
            speed: SpeedTracker::default(),
            events: EventBus::default(),
            cancel_handle,
            cancel_rx,
            heartbeat,
        }
    }

    /// Handle for cancelling this session from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel_handle.clone()
    }

    /// Subscribe to progress events.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<TransferEvent> {
        self.events.subscribed()
    }

    /// Current session state.
    pub fn state(&self) -> SenderState {
        self.state
    }

    /// Run the session to a terminal state.
    ///
    /// Returns the outcome on `Done`; any other terminal state surfaces
    /// as the corresponding [`Error`]. The channel is closed on every
    /// path.
    pub async fn run(mut self) -> Result<TransferOutcome> {
        tracing::info!(
            session = %self.session_id,
            name = %self.meta.name,
            size = self.meta.size,
            "sender session starting"
        );
        let result = self.drive().await;
        match result {
            Ok(bytes) => {
                self.state = SenderState::Done;
                self.events.emit(TransferEvent::Completed {
                    session_id: self.session_id.clone(),
                    bytes,
                });
                let _ = self.channel.close().await;
                tracing::info!(session = %self.session_id, bytes, "sender session complete");
                Ok(TransferOutcome {
                    session_id: self.session_id,
                    bytes,
                    digest: None,
                })
            }
            Err(err) => {
                if let Error::Cancelled { reason } = &err {
                    self.state = SenderState::Cancelled;
                    self.events.emit(TransferEvent::Cancelled {
                        session_id: self.session_id.clone(),
                        reason: reason.clone(),
                    });
                    tracing::info!(session = %self.session_id, "sender session cancelled");
                } else {
                    self.state = SenderState::Failed;
                    if let Some(code) = err.wire_code() {
                        let _ = self
                            .channel
                            .send_control(&ControlMessage::Error {
                                message: err.to_string(),
                                code: Some(code.into()),
                            })
                            .await;
                    }
                    self.events.emit(TransferEvent::Failed {
                        session_id: self.session_id.clone(),
                        error: err.to_string(),
                    });
                    tracing::warn!(session = %self.session_id, error = %err, "sender session failed");
                }
                let _ = self.channel.close().await;
                Err(err)
            }
        }
    }

    // ── Session phases ──────────────────────────────────────────────────

    async fn drive(&mut self) -> Result<u64> {
        let mut ticker = interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        self.heartbeat.touch();

        // Handshake: announce, then require an exactly-equal version back
        self.send(ControlMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            session_id: self.session_id.clone(),
        })
        .await?;

        self.state = SenderState::AwaitingHello;
        match self.next_control(&mut ticker).await? {
            ControlMessage::Hello {
                protocol_version,
                session_id,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(Error::ProtocolMismatch {
                        ours: PROTOCOL_VERSION,
                        theirs: protocol_version,
                    });
                }
                if session_id != self.session_id {
                    // The sender's id is authoritative; note the echo drift
                    tracing::warn!(
                        session = %self.session_id,
                        echoed = %session_id,
                        "peer echoed a different session id"
                    );
                }
            }
            other => {
                return Err(Error::MalformedFrame(format!(
                    "expected hello, got {}",
                    other.tag()
                )))
            }
        }

        self.send(ControlMessage::Meta {
            session_id: self.session_id.clone(),
            name: self.meta.name.clone(),
            size: self.meta.size,
            mime: self.meta.mime.clone(),
        })
        .await?;

        self.state = SenderState::AwaitingReady;
        let start = match self.next_control(&mut ticker).await? {
            ControlMessage::Ready => 0,
            ControlMessage::Resume {
                session_id,
                received_bytes,
            } => self.answer_resume(session_id, received_bytes).await?,
            other => {
                return Err(Error::MalformedFrame(format!(
                    "expected ready or resume, got {}",
                    other.tag()
                )))
            }
        };

        self.events.emit(TransferEvent::Started {
            session_id: self.session_id.clone(),
            meta: self.meta.clone(),
        });

        self.state = SenderState::Sending;
        self.send_chunks(start, &mut ticker).await?;

        self.state = SenderState::AwaitingEndAck;
        self.await_end_ack(&mut ticker).await?;
        Ok(self.meta.size)
    }

    /// Validate a resume request and answer it.
    ///
    /// The restart offset is the requested byte count aligned down to a
    /// chunk boundary as this sender records chunks.
    async fn answer_resume(&mut self, session_id: String, received_bytes: u64) -> Result<u64> {
        if session_id != self.session_id || received_bytes > self.meta.size {
            self.send(ControlMessage::ResumeAck {
                resume_from_offset: 0,
                accepted: false,
            })
            .await?;
            return Err(Error::ResumeRejected(format!(
                "session {} with {} received bytes does not match this session",
                session_id, received_bytes
            )));
        }

        let chunk_size = self.config.chunk_size as u64;
        let offset = received_bytes - (received_bytes % chunk_size);
        self.send(ControlMessage::ResumeAck {
            resume_from_offset: offset,
            accepted: true,
        })
        .await?;
        tracing::info!(session = %self.session_id, offset, "resuming transfer");
        Ok(offset)
    }

    /// The windowed chunk loop: fill the window, then wait for acks.
    async fn send_chunks(&mut self, start: u64, ticker: &mut Interval) -> Result<()> {
        let total = self.meta.size;
        let chunk_size = self.config.chunk_size as u64;
        let mut offset = start;
        let mut seq = start / chunk_size;
        let mut acked = start;
        let mut last_progress = Instant::now();

        while offset < total {
            while self.window.has_room() && offset < total {
                let len = chunk_size.min(total - offset) as usize;
                let body = self.source.read_at(offset, len).await?;
                if body.len() != len {
                    return Err(Error::SourceFailure(format!(
                        "short read: wanted {} bytes at offset {}, got {}",
                        len,
                        offset,
                        body.len()
                    )));
                }
                // A chunk header and its payload are adjacent on the
                // wire; nothing else is sent between them.
                self.send(ControlMessage::Chunk {
                    seq,
                    offset,
                    size: len as u32,
                    total,
                })
                .await?;
                self.channel.send_binary(body).await?;
                self.window.mark_sent(seq);
                tracing::trace!(seq, offset, len, "chunk emitted");
                seq += 1;
                offset += len as u64;
            }

            if offset >= total {
                break;
            }

            // Window full: stall until an ack frees a slot
            match self.next_control(ticker).await? {
                ControlMessage::ChunkAck { seq, received } => {
                    self.on_chunk_ack(seq, received, &mut acked, &mut last_progress);
                }
                other => {
                    return Err(Error::MalformedFrame(format!(
                        "unexpected {} while sending",
                        other.tag()
                    )))
                }
            }
        }
        Ok(())
    }

    fn on_chunk_ack(
        &mut self,
        seq: u64,
        received: u64,
        acked: &mut u64,
        last_progress: &mut Instant,
    ) {
        let freed = self.window.on_ack(seq);
        if freed == 0 {
            return;
        }
        let delta = received.saturating_sub(*acked);
        *acked = (*acked).max(received);
        let elapsed_ms = last_progress.elapsed().as_millis().max(1) as u64;
        *last_progress = Instant::now();
        self.speed.record(delta as usize, elapsed_ms);
        self.events.emit(TransferEvent::Progress {
            session_id: self.session_id.clone(),
            bytes_transferred: *acked,
            total_bytes: self.meta.size,
            speed_bps: self.speed.speed_bps(),
        });
    }

    /// Emit `end` and wait out the ack retry ladder.
    async fn await_end_ack(&mut self, ticker: &mut Interval) -> Result<()> {
        // The first attempt carries no counter; retries are numbered
        let mut attempt = 1u32;
        self.send(ControlMessage::End { attempt: None }).await?;
        let mut deadline = Instant::now() + self.config.end_ack_timeout;

        loop {
            let step = tokio::select! {
                frame = self.channel.recv() => Step::Frame(frame?),
                _ = tokio::time::sleep_until(deadline) => Step::Deadline,
                _ = ticker.tick() => Step::Tick,
                _ = self.cancel_rx.changed() => Step::Cancel,
            };

            match step {
                Step::Frame(None) => return self.drain_for_end_ack().await,
                Step::Frame(Some(Frame::Binary(_))) => {
                    return Err(Error::MalformedFrame(
                        "binary frame while awaiting end_ack".into(),
                    ))
                }
                Step::Frame(Some(Frame::Control(msg))) => {
                    self.heartbeat.touch();
                    match msg {
                        ControlMessage::EndAck { received, total } => {
                            return self.check_end_ack(received, total);
                        }
                        ControlMessage::ChunkAck { seq, .. } => {
                            // Stragglers from the tail of the window
                            self.window.on_ack(seq);
                        }
                        ControlMessage::Ping { timestamp } => {
                            self.send(ControlMessage::Pong { timestamp }).await?;
                        }
                        ControlMessage::Pong { .. } => {}
                        ControlMessage::Error { message, code } => {
                            return Err(Error::Remote { message, code })
                        }
                        ControlMessage::Cancelled { reason } => {
                            return Err(Error::Cancelled { reason })
                        }
                        other => {
                            return Err(Error::MalformedFrame(format!(
                                "unexpected {} while awaiting end_ack",
                                other.tag()
                            )))
                        }
                    }
                }
                Step::Deadline => {
                    if attempt >= self.config.end_ack_retries {
                        return Err(Error::Timeout("end_ack".into()));
                    }
                    attempt += 1;
                    tracing::debug!(session = %self.session_id, attempt, "re-emitting end");
                    self.send(ControlMessage::End {
                        attempt: Some(attempt),
                    })
                    .await?;
                    deadline = Instant::now() + self.config.end_ack_timeout;
                }
                Step::Tick => self.heartbeat_tick().await?,
                Step::Cancel => return self.local_cancel().await,
            }
        }
    }

    /// After channel closure, drain buffered frames for up to the close
    /// grace period in case the final `end_ack` is among them.
    async fn drain_for_end_ack(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.close_grace;
        loop {
            match tokio::time::timeout_at(deadline, self.channel.recv()).await {
                Err(_) => return Err(Error::ChannelClosed),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(None)) => return Err(Error::ChannelClosed),
                Ok(Ok(Some(Frame::Control(ControlMessage::EndAck { received, total })))) => {
                    return self.check_end_ack(received, total);
                }
                Ok(Ok(Some(frame))) => {
                    let tag = match &frame {
                        Frame::Control(msg) => msg.tag(),
                        Frame::Binary(_) => "binary",
                    };
                    tracing::debug!(tag, "ignoring out-of-state frame during close grace");
                }
            }
        }
    }

    fn check_end_ack(&self, received: u64, total: u64) -> Result<()> {
        if received == total && total == self.meta.size {
            Ok(())
        } else {
            Err(Error::Incomplete {
                received,
                expected: self.meta.size,
            })
        }
    }

    // ── Shared event pump ───────────────────────────────────────────────

    /// Wait for the next non-housekeeping control frame, servicing
    /// heartbeats, peer errors, and cancellation along the way.
    async fn next_control(&mut self, ticker: &mut Interval) -> Result<ControlMessage> {
        loop {
            let step = tokio::select! {
                frame = self.channel.recv() => Step::Frame(frame?),
                _ = ticker.tick() => Step::Tick,
                _ = self.cancel_rx.changed() => Step::Cancel,
            };

            match step {
                Step::Frame(None) => return Err(Error::ChannelClosed),
                Step::Frame(Some(Frame::Binary(_))) => {
                    return Err(Error::MalformedFrame(
                        "binary frame without a preceding chunk header".into(),
                    ))
                }
                Step::Frame(Some(Frame::Control(msg))) => {
                    self.heartbeat.touch();
                    match msg {
                        ControlMessage::Ping { timestamp } => {
                            self.send(ControlMessage::Pong { timestamp }).await?;
                        }
                        ControlMessage::Pong { .. } => {}
                        ControlMessage::Error { message, code } => {
                            return Err(Error::Remote { message, code })
                        }
                        ControlMessage::Cancelled { reason } => {
                            return Err(Error::Cancelled { reason })
                        }
                        other => return Ok(other),
                    }
                }
                Step::Tick => self.heartbeat_tick().await?,
                Step::Deadline => unreachable!("no deadline armed here"),
                Step::Cancel => return self.local_cancel().await,
            }
        }
    }

    /// On each idle interval: fail if the peer has gone quiet past its
    /// deadline, otherwise probe it.
    async fn heartbeat_tick(&mut self) -> Result<()> {
        if !self.heartbeat.is_alive() {
            return Err(Error::Timeout("heartbeat".into()));
        }
        self.send(ControlMessage::Ping {
            timestamp: time::now_millis(),
        })
        .await
    }

    /// Best-effort `cancelled` frame, then surface the cancellation.
    async fn local_cancel<T>(&mut self) -> Result<T> {
        let reason = self.cancel_rx.borrow().reason.clone();
        let _ = self
            .channel
            .send_control(&ControlMessage::Cancelled {
                reason: reason.clone(),
            })
            .await;
        Err(Error::Cancelled { reason })
    }

    async fn send(&mut self, msg: ControlMessage) -> Result<()> {
        tracing::trace!(tag = msg.tag(), "control frame out");
        self.channel.send_control(&msg).await
    }
}
