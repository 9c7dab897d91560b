//! # Receiver State Machine
//!
//! Drives one incoming transfer session over a [`Channel`], delivering
//! reassembled bytes into a [`Sink`].
//!
//! ```text
//! AwaitingHello ──hello──► AwaitingMeta ──meta──► Receiving
//!                                                     │
//!                          end, received == total ────┘
//!                                                     ▼
//!                              Done ◄── Completing (end_ack ×3, 100 ms)
//! ```
//!
//! Each `chunk` header is followed by exactly one binary frame of the
//! declared size; anything else between them is a protocol error. The
//! receiver's `received` watermark is monotonic, so re-sent chunks after
//! a resume are acknowledged without double counting.

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval};

use super::channel::{Channel, Frame};
use super::message::ControlMessage;
use super::session::{
    cancel_channel, CancelHandle, CancelState, EventBus, FileMeta, Heartbeat, ReceiverState,
    SpeedTracker, TransferConfig, TransferEvent, TransferOutcome, PROTOCOL_VERSION,
};
use crate::error::{Error, Result};
use crate::integrity;
use crate::io::Sink;
use crate::time;

/// One event the session task can wake on.
enum Step {
    Recv(Result<Option<Frame>>),
    Tick,
    Delay,
    Cancel,
}

/// Receiver half of one transfer session.
pub struct Receiver<C: Channel, S: Sink> {
    channel: C,
    sink: S,
    config: TransferConfig,
    state: ReceiverState,
    /// When resuming: bytes already delivered to the sink by a previous
    /// session.
    resume_bytes: Option<u64>,
    session_id: Option<String>,
    /// Monotonic delivered-bytes watermark.
    received: u64,
    speed: SpeedTracker,
    events: EventBus,
    cancel_handle: CancelHandle,
    cancel_rx: watch::Receiver<CancelState>,
    heartbeat: Heartbeat,
    /// Running digest of sequentially delivered bytes, when enabled.
    hasher: Option<integrity::Sha256>,
    hashed: u64,
}

impl<C: Channel, S: Sink> Receiver<C, S> {
    /// Create a receiver with the default configuration.
    pub fn new(channel: C, sink: S) -> Self {
        Self::with_config(channel, sink, TransferConfig::default())
    }

    /// Create a receiver with an explicit configuration.
    pub fn with_config(channel: C, sink: S, config: TransferConfig) -> Self {
        let (cancel_handle, cancel_rx) = cancel_channel();
        let heartbeat = Heartbeat::new(config.heartbeat_interval, config.missed_heartbeats);
        Self {
            channel,
            sink,
            config,
            state: ReceiverState::AwaitingHello,
            resume_bytes: None,
            session_id: None,
            received: 0,
            speed: SpeedTracker::default(),
            events: EventBus::default(),
            cancel_handle,
            cancel_rx,
            heartbeat,
            hasher: None,
            hashed: 0,
        }
    }

    /// Ask the sender to resume a broken session instead of starting
    /// from scratch. `received_bytes` is how much a previous session
    /// already delivered to this sink.
    pub fn resume_from(mut self, received_bytes: u64) -> Self {
        self.resume_bytes = Some(received_bytes);
        self
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
    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Run the session to a terminal state.
    ///
    /// On `Done`, the outcome carries the delivered byte count and, when
    /// integrity checking was on and delivery was strictly sequential,
    /// the hex SHA-256 of the payload.
    pub async fn run(mut self) -> Result<TransferOutcome> {
        tracing::info!(resume = ?self.resume_bytes, "receiver session starting");
        let result = self.drive().await;
        let session_id = self.session_id.clone().unwrap_or_default();
        match result {
            Ok((bytes, digest)) => {
                self.state = ReceiverState::Done;
                self.events.emit(TransferEvent::Completed {
                    session_id: session_id.clone(),
                    bytes,
                });
                let _ = self.channel.close().await;
                tracing::info!(session = %session_id, bytes, "receiver session complete");
                Ok(TransferOutcome {
                    session_id,
                    bytes,
                    digest,
                })
            }
            Err(err) => {
                if let Error::Cancelled { reason } = &err {
                    self.state = ReceiverState::Cancelled;
                    self.events.emit(TransferEvent::Cancelled {
                        session_id: session_id.clone(),
                        reason: reason.clone(),
                    });
                    tracing::info!(session = %session_id, "receiver session cancelled");
                } else {
                    self.state = ReceiverState::Failed;
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
                        session_id: session_id.clone(),
                        error: err.to_string(),
                    });
                    tracing::warn!(session = %session_id, error = %err, "receiver session failed");
                }
                let _ = self.channel.close().await;
                // Awaited writes have drained; release the sink at a
                // consistent byte boundary.
                let _ = self.sink.close().await;
                Err(err)
            }
        }
    }

    // ── Session phases ──────────────────────────────────────────────────

    async fn drive(&mut self) -> Result<(u64, Option<String>)> {
        let mut ticker = interval_at(
            Instant::now() + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        self.heartbeat.touch();

        // Handshake: the sender speaks first; we echo its session id
        self.state = ReceiverState::AwaitingHello;
        let session_id = match self.next_control(&mut ticker).await? {
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
                self.send(ControlMessage::Hello {
                    protocol_version: PROTOCOL_VERSION,
                    session_id: session_id.clone(),
                })
                .await?;
                session_id
            }
            other => {
                return Err(Error::MalformedFrame(format!(
                    "expected hello, got {}",
                    other.tag()
                )))
            }
        };
        self.session_id = Some(session_id.clone());

        // Metadata, then sink allocation at the declared size
        self.state = ReceiverState::AwaitingMeta;
        let meta = match self.next_control(&mut ticker).await? {
            ControlMessage::Meta {
                session_id: meta_session,
                name,
                size,
                mime,
            } => {
                if meta_session != session_id {
                    return Err(Error::MalformedFrame(format!(
                        "meta for session {} on session {}",
                        meta_session, session_id
                    )));
                }
                FileMeta { name, size, mime }
            }
            other => {
                return Err(Error::MalformedFrame(format!(
                    "expected meta, got {}",
                    other.tag()
                )))
            }
        };
        self.sink.allocate(meta.size).await?;

        // Follow-up: ready for a fresh transfer, resume for a broken one
        match self.resume_bytes {
            Some(received_bytes) => {
                self.send(ControlMessage::Resume {
                    session_id: session_id.clone(),
                    received_bytes,
                })
                .await?;
                match self.next_control(&mut ticker).await? {
                    ControlMessage::ResumeAck {
                        resume_from_offset,
                        accepted,
                    } => {
                        if !accepted {
                            return Err(Error::ResumeRejected(
                                "sender refused to resume the session".into(),
                            ));
                        }
                        if resume_from_offset > received_bytes {
                            return Err(Error::MalformedFrame(format!(
                                "resume offset {} beyond the {} bytes we reported",
                                resume_from_offset, received_bytes
                            )));
                        }
                        // Discard any partial chunk beyond the agreed
                        // offset; the sender re-sends from there.
                        self.received = resume_from_offset;
                        tracing::info!(
                            session = %session_id,
                            offset = resume_from_offset,
                            "resuming transfer"
                        );
                    }
                    other => {
                        return Err(Error::MalformedFrame(format!(
                            "expected resume_ack, got {}",
                            other.tag()
                        )))
                    }
                }
            }
            None => {
                if self.config.verify_integrity {
                    self.hasher = Some(integrity::Sha256::new());
                }
                self.send(ControlMessage::Ready).await?;
            }
        }

        self.events.emit(TransferEvent::Started {
            session_id: session_id.clone(),
            meta: meta.clone(),
        });

        // Chunk loop
        self.state = ReceiverState::Receiving;
        self.receive_chunks(meta.size, &mut ticker).await?;

        // All bytes verified: hand the sender its confirmation
        self.state = ReceiverState::Completing;
        self.complete(meta.size, &mut ticker).await?;

        self.sink.close().await?;
        let digest = match self.hasher.take() {
            Some(hasher) if self.hashed == meta.size => Some(hex::encode(hasher.finalize())),
            _ => None,
        };
        Ok((meta.size, digest))
    }

    /// The reassembly loop: header, payload, sink write, ack.
    async fn receive_chunks(&mut self, total: u64, ticker: &mut Interval) -> Result<()> {
        let mut last_progress = Instant::now();
        loop {
            match self.next_control(ticker).await? {
                ControlMessage::Chunk {
                    seq,
                    offset,
                    size,
                    total: declared_total,
                } => {
                    if declared_total != total {
                        return Err(Error::MalformedFrame(format!(
                            "chunk declares total {} but metadata declared {}",
                            declared_total, total
                        )));
                    }
                    let body = self.recv_binary(size as usize, ticker).await?;
                    self.sink.write(offset, &body).await?;

                    if let Some(hasher) = self.hasher.as_mut() {
                        if offset == self.hashed {
                            hasher.update(&body);
                            self.hashed += body.len() as u64;
                        } else {
                            // Out-of-sequence delivery; the digest no
                            // longer covers the payload
                            self.hasher = None;
                        }
                    }

                    self.received = self.received.max(offset + size as u64);
                    self.send(ControlMessage::ChunkAck {
                        seq,
                        received: self.received,
                    })
                    .await?;
                    tracing::trace!(seq, offset, size, received = self.received, "chunk delivered");

                    let elapsed_ms = last_progress.elapsed().as_millis().max(1) as u64;
                    last_progress = Instant::now();
                    self.speed.record(size as usize, elapsed_ms);
                    let session_id = self.session_id.clone().unwrap_or_default();
                    self.events.emit(TransferEvent::Progress {
                        session_id,
                        bytes_transferred: self.received,
                        total_bytes: total,
                        speed_bps: self.speed.speed_bps(),
                    });
                }
                ControlMessage::End { attempt } => {
                    tracing::debug!(attempt = attempt.unwrap_or(1), "end received");
                    if self.received != total {
                        return Err(Error::Incomplete {
                            received: self.received,
                            expected: total,
                        });
                    }
                    return Ok(());
                }
                other => {
                    return Err(Error::MalformedFrame(format!(
                        "unexpected {} while receiving",
                        other.tag()
                    )))
                }
            }
        }
    }

    /// Await the binary payload announced by a `chunk` header.
    ///
    /// Nothing may come between a header and its payload; a control
    /// frame here, or a payload of the wrong size, is fatal.
    async fn recv_binary(&mut self, expected: usize, ticker: &mut Interval) -> Result<Bytes> {
        loop {
            let step = tokio::select! {
                frame = self.channel.recv() => Step::Recv(frame),
                _ = ticker.tick() => Step::Tick,
                _ = self.cancel_rx.changed() => Step::Cancel,
            };

            match step {
                Step::Recv(frame) => match frame? {
                    Some(Frame::Binary(body)) => {
                        if body.len() != expected {
                            return Err(Error::MalformedFrame(format!(
                                "binary frame of {} bytes after a header declaring {}",
                                body.len(),
                                expected
                            )));
                        }
                        self.heartbeat.touch();
                        return Ok(body);
                    }
                    Some(Frame::Control(msg)) => {
                        return Err(Error::MalformedFrame(format!(
                            "{} frame between a chunk header and its payload",
                            msg.tag()
                        )))
                    }
                    None => return Err(Error::ChannelClosed),
                },
                Step::Tick => self.heartbeat_tick().await?,
                Step::Delay => unreachable!("no delay armed here"),
                Step::Cancel => return self.local_cancel().await,
            }
        }
    }

    /// Emit `end_ack` up to the retry count, spaced out so a closing
    /// channel can lose one without stranding the sender; any duplicate
    /// `end` earns a fresh `end_ack`.
    async fn complete(&mut self, total: u64, _ticker: &mut Interval) -> Result<()> {
        let mut emitted = 1u32;
        self.send(ControlMessage::EndAck {
            received: self.received,
            total,
        })
        .await?;

        loop {
            let step = tokio::select! {
                _ = tokio::time::sleep(self.config.end_ack_retry_delay) => Step::Delay,
                frame = self.channel.recv() => Step::Recv(frame),
                _ = self.cancel_rx.changed() => Step::Cancel,
            };

            match step {
                Step::Delay => {
                    if emitted >= self.config.end_ack_retries {
                        return Ok(());
                    }
                    emitted += 1;
                    self.send(ControlMessage::EndAck {
                        received: self.received,
                        total,
                    })
                    .await?;
                }
                Step::Recv(Ok(Some(Frame::Control(msg)))) => match msg {
                    // A duplicate end means our earlier end_ack was lost
                    ControlMessage::End { attempt } => {
                        tracing::debug!(attempt = attempt.unwrap_or(1), "duplicate end; re-acking");
                        self.send(ControlMessage::EndAck {
                            received: self.received,
                            total,
                        })
                        .await?;
                    }
                    ControlMessage::Ping { timestamp } => {
                        self.send(ControlMessage::Pong { timestamp }).await?;
                    }
                    ControlMessage::Cancelled { reason } => {
                        return Err(Error::Cancelled { reason })
                    }
                    other => {
                        tracing::debug!(tag = other.tag(), "ignoring out-of-state frame while completing");
                    }
                },
                Step::Recv(Ok(Some(Frame::Binary(_)))) => {
                    tracing::debug!("ignoring stray binary frame while completing");
                }
                // The sender heard an end_ack and went away; we are done
                Step::Recv(Ok(None)) => return Ok(()),
                Step::Recv(Err(err)) => {
                    tracing::debug!(error = %err, "channel error while completing");
                    return Ok(());
                }
                Step::Tick => unreachable!("no ticker armed here"),
                Step::Cancel => return self.local_cancel().await,
            }
        }
    }

    // ── Shared event pump ───────────────────────────────────────────────

    /// Wait for the next non-housekeeping control frame, servicing
    /// heartbeats, peer errors, and cancellation along the way.
    async fn next_control(&mut self, ticker: &mut Interval) -> Result<ControlMessage> {
        loop {
            let step = tokio::select! {
                frame = self.channel.recv() => Step::Recv(frame),
                _ = ticker.tick() => Step::Tick,
                _ = self.cancel_rx.changed() => Step::Cancel,
            };

            match step {
                Step::Recv(frame) => match frame? {
                    None => return Err(Error::ChannelClosed),
                    Some(Frame::Binary(_)) => {
                        return Err(Error::MalformedFrame(
                            "binary frame without a preceding chunk header".into(),
                        ))
                    }
                    Some(Frame::Control(msg)) => {
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
                },
                Step::Tick => self.heartbeat_tick().await?,
                Step::Delay => unreachable!("no delay armed here"),
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
