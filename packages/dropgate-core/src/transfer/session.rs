//! # Session Types
//!
//! Protocol constants, per-session state, and the supporting machinery
//! shared by the sender and receiver state machines: the sliding window,
//! heartbeat bookkeeping, speed tracking, application-facing events, and
//! cooperative cancellation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

// ============================================================================
// PROTOCOL CONSTANTS
// ============================================================================

/// Wire protocol version. Versions must be exactly equal to interoperate.
pub const PROTOCOL_VERSION: u32 = 2;

/// Default chunk size in bytes. The final chunk of a payload may be
/// smaller.
pub const CHUNK_SIZE: usize = 65_536;

/// Default bound on chunks sent but not yet acknowledged.
pub const WINDOW_MAX: u32 = 32;

/// How long the sender waits for `end_ack` before retrying `end`.
pub const END_ACK_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Total `end` attempts before the sender gives up.
pub const END_ACK_RETRIES: u32 = 3;

/// Spacing between the receiver's repeated `end_ack` emissions.
pub const END_ACK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How long a peer keeps draining the channel after closure, waiting for
/// a final expected control frame.
pub const CLOSE_GRACE: Duration = Duration::from_millis(2_000);

/// Idle heartbeat cadence.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5_000);

/// Missed heartbeat intervals tolerated before the channel is declared
/// broken.
pub const MISSED_HEARTBEATS: u32 = 2;

/// Generate an opaque session identifier.
///
/// The embedding may substitute any generator (short codes, etc.); the
/// protocol treats the id as an opaque string.
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tunables for one transfer session.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Chunk size in bytes.
    pub chunk_size: usize,
    /// Maximum unacknowledged chunks in flight.
    pub window_max: u32,
    /// Per-attempt `end_ack` wait.
    pub end_ack_timeout: Duration,
    /// Total `end` attempts.
    pub end_ack_retries: u32,
    /// Spacing between the receiver's `end_ack` re-emissions.
    pub end_ack_retry_delay: Duration,
    /// Post-closure drain window.
    pub close_grace: Duration,
    /// Idle heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Missed intervals tolerated before failing.
    pub missed_heartbeats: u32,
    /// Whether the receiver keeps a running SHA-256 of sequentially
    /// delivered bytes.
    pub verify_integrity: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            window_max: WINDOW_MAX,
            end_ack_timeout: END_ACK_TIMEOUT,
            end_ack_retries: END_ACK_RETRIES,
            end_ack_retry_delay: END_ACK_RETRY_DELAY,
            close_grace: CLOSE_GRACE,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            missed_heartbeats: MISSED_HEARTBEATS,
            verify_integrity: false,
        }
    }
}

// ============================================================================
// FILE METADATA
// ============================================================================

/// Metadata for the payload of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    /// File name as presented to the receiver.
    pub name: String,
    /// Total payload size in bytes.
    pub size: u64,
    /// MIME type hint.
    pub mime: String,
}

impl FileMeta {
    /// Metadata with the generic binary MIME type.
    pub fn binary(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            mime: "application/octet-stream".into(),
        }
    }
}

// ============================================================================
// STATE MACHINES
// ============================================================================

/// Sender-side session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Waiting for the peer's `hello`.
    AwaitingHello,
    /// Metadata sent; waiting for `ready` (or `resume`).
    AwaitingReady,
    /// Chunk loop running.
    Sending,
    /// All bytes emitted; waiting for `end_ack`.
    AwaitingEndAck,
    /// Transfer verified complete.
    Done,
    /// Terminal failure.
    Failed,
    /// Cooperatively cancelled.
    Cancelled,
}

/// Receiver-side session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Waiting for the sender's `hello`.
    AwaitingHello,
    /// Hello exchanged; waiting for `meta`.
    AwaitingMeta,
    /// Chunk loop running.
    Receiving,
    /// All bytes verified; emitting `end_ack`s.
    Completing,
    /// Transfer complete.
    Done,
    /// Terminal failure.
    Failed,
    /// Cooperatively cancelled.
    Cancelled,
}

impl SenderState {
    /// Whether the session has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl ReceiverState {
    /// Whether the session has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

// ============================================================================
// SLIDING WINDOW
// ============================================================================

/// Fixed-size sliding window over unacknowledged chunk sequence numbers.
///
/// Acks are cumulative: acknowledging sequence `n` releases every
/// in-flight chunk with sequence ≤ `n`.
#[derive(Debug)]
pub struct Window {
    max: u32,
    in_flight: VecDeque<u64>,
}

impl Window {
    /// Create a window admitting at most `max` unacknowledged chunks.
    pub fn new(max: u32) -> Self {
        Self {
            max,
            in_flight: VecDeque::with_capacity(max as usize),
        }
    }

    /// Whether another chunk may be sent.
    pub fn has_room(&self) -> bool {
        (self.in_flight.len() as u32) < self.max
    }

    /// Number of chunks currently unacknowledged.
    pub fn in_flight(&self) -> u32 {
        self.in_flight.len() as u32
    }

    /// Whether every sent chunk has been acknowledged.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Record that chunk `seq` was sent.
    pub fn mark_sent(&mut self, seq: u64) {
        debug_assert!(self.has_room(), "window overfilled");
        self.in_flight.push_back(seq);
    }

    /// Apply a cumulative ack for `seq`; returns how many chunks it
    /// released.
    pub fn on_ack(&mut self, seq: u64) -> usize {
        let mut freed = 0;
        while matches!(self.in_flight.front(), Some(&front) if front <= seq) {
            self.in_flight.pop_front();
            freed += 1;
        }
        freed
    }
}

// ============================================================================
// HEARTBEAT
// ============================================================================

/// Liveness bookkeeping for one channel direction.
///
/// Any inbound frame counts as life; the deadline only matters across
/// idle stretches, which is when `ping`s flow.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    deadline: Duration,
    last_seen: Instant,
}

impl Heartbeat {
    pub(crate) fn new(interval: Duration, missed: u32) -> Self {
        Self {
            deadline: interval * missed,
            last_seen: Instant::now(),
        }
    }

    /// Note inbound traffic.
    pub(crate) fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Whether the peer is still within its deadline.
    pub(crate) fn is_alive(&self) -> bool {
        self.last_seen.elapsed() <= self.deadline
    }
}

// ============================================================================
// SPEED TRACKER (rolling average over recent chunks)
// ============================================================================

/// Tracks transfer speed using a rolling window of recent chunk timings.
#[derive(Debug, Clone)]
pub struct SpeedTracker {
    /// Recent chunk sizes and their transfer times (bytes, elapsed_ms).
    samples: VecDeque<(usize, u64)>,
    /// Maximum number of samples to keep.
    max_samples: usize,
}

impl SpeedTracker {
    /// Create a new speed tracker with a rolling window.
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a chunk transfer timing.
    pub fn record(&mut self, chunk_bytes: usize, elapsed_ms: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back((chunk_bytes, elapsed_ms));
    }

    /// Calculate the current speed in bytes per second.
    pub fn speed_bps(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let total_bytes: u64 = self.samples.iter().map(|(b, _)| *b as u64).sum();
        let total_ms: u64 = self.samples.iter().map(|(_, ms)| *ms).sum();
        if total_ms == 0 {
            return 0;
        }
        (total_bytes * 1000) / total_ms
    }
}

impl Default for SpeedTracker {
    fn default() -> Self {
        Self::new(10)
    }
}

// ============================================================================
// EVENTS (emitted to the application layer)
// ============================================================================

/// Events emitted by a running session for the UI/application layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    /// Handshake and metadata exchange completed; the chunk loop begins.
    Started {
        /// Session identifier.
        session_id: String,
        /// Payload metadata.
        meta: FileMeta,
    },

    /// Transfer progress update.
    Progress {
        /// Session identifier.
        session_id: String,
        /// Bytes acknowledged (sender) or delivered (receiver) so far.
        bytes_transferred: u64,
        /// Total payload bytes.
        total_bytes: u64,
        /// Rolling transfer speed in bytes per second.
        speed_bps: u64,
    },

    /// Transfer completed successfully.
    Completed {
        /// Session identifier.
        session_id: String,
        /// Total bytes moved.
        bytes: u64,
    },

    /// Transfer failed.
    Failed {
        /// Session identifier.
        session_id: String,
        /// Human-readable failure description.
        error: String,
    },

    /// Transfer was cancelled by either peer.
    Cancelled {
        /// Session identifier.
        session_id: String,
        /// Optional reason.
        reason: Option<String>,
    },
}

/// Internal fan-out of [`TransferEvent`]s to an optional subscriber.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    tx: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl EventBus {
    /// Create a subscribed bus, returning the receiving half.
    pub(crate) fn subscribed(&mut self) -> mpsc::UnboundedReceiver<TransferEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        rx
    }

    /// Emit an event; a dropped or absent subscriber is fine.
    pub(crate) fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

// ============================================================================
// CANCELLATION
// ============================================================================

/// Cancellation flag shared between a session task and its handle.
#[derive(Debug, Clone, Default)]
pub(crate) struct CancelState {
    pub(crate) cancelled: bool,
    pub(crate) reason: Option<String>,
}

/// Handle for cooperatively cancelling a running session.
///
/// Cloneable and usable from any task; the session emits a `cancelled`
/// frame (best effort), abandons pending chunks, and releases itself.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<CancelState>>,
}

impl CancelHandle {
    /// Request cancellation with an optional reason.
    pub fn cancel(&self, reason: Option<String>) {
        let _ = self.tx.send(CancelState {
            cancelled: true,
            reason,
        });
    }
}

/// Create a connected (handle, signal) pair.
pub(crate) fn cancel_channel() -> (CancelHandle, watch::Receiver<CancelState>) {
    let (tx, rx) = watch::channel(CancelState::default());
    (CancelHandle { tx: Arc::new(tx) }, rx)
}

// ============================================================================
// OUTCOME
// ============================================================================

/// The result of a successfully completed session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Session identifier.
    pub session_id: String,
    /// Total payload bytes moved.
    pub bytes: u64,
    /// Hex SHA-256 of the delivered payload, when the receiver hashed a
    /// complete sequential delivery (`None` on the sender, after a
    /// resume, or when integrity checking is off).
    pub digest: Option<String>,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_states_terminal() {
        assert!(!SenderState::AwaitingHello.is_terminal());
        assert!(!SenderState::Sending.is_terminal());
        assert!(!SenderState::AwaitingEndAck.is_terminal());
        assert!(SenderState::Done.is_terminal());
        assert!(SenderState::Failed.is_terminal());
        assert!(SenderState::Cancelled.is_terminal());

        assert!(!ReceiverState::Receiving.is_terminal());
        assert!(!ReceiverState::Completing.is_terminal());
        assert!(ReceiverState::Done.is_terminal());
        assert!(ReceiverState::Cancelled.is_terminal());
    }

    #[test]
    fn test_window_bound() {
        let mut window = Window::new(2);
        assert!(window.has_room());
        window.mark_sent(0);
        window.mark_sent(1);
        assert!(!window.has_room());
        assert_eq!(window.in_flight(), 2);

        window.on_ack(0);
        assert!(window.has_room());
        assert_eq!(window.in_flight(), 1);
    }

    #[test]
    fn test_window_cumulative_ack() {
        let mut window = Window::new(8);
        for seq in 0..5 {
            window.mark_sent(seq);
        }
        // Acking seq 3 releases 0..=3 in one step
        assert_eq!(window.on_ack(3), 4);
        assert_eq!(window.in_flight(), 1);
        // Stale ack releases nothing
        assert_eq!(window.on_ack(2), 0);
        assert_eq!(window.on_ack(4), 1);
        assert!(window.is_empty());
    }

    #[test]
    fn test_speed_tracker_rolls() {
        let mut tracker = SpeedTracker::new(2);
        tracker.record(1000, 100);
        assert_eq!(tracker.speed_bps(), 10_000);
        tracker.record(1000, 100);
        tracker.record(3000, 100);
        // First sample rolled out: (1000 + 3000) bytes over 200 ms
        assert_eq!(tracker.speed_bps(), 20_000);
    }

    #[test]
    fn test_speed_tracker_empty_and_zero_time() {
        let mut tracker = SpeedTracker::default();
        assert_eq!(tracker.speed_bps(), 0);
        tracker.record(100, 0);
        assert_eq!(tracker.speed_bps(), 0);
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
    }

    #[tokio::test]
    async fn test_cancel_channel_signals() {
        let (handle, mut rx) = cancel_channel();
        assert!(!rx.borrow().cancelled);
        handle.cancel(Some("user request".into()));
        rx.changed().await.unwrap();
        let state = rx.borrow().clone();
        assert!(state.cancelled);
        assert_eq!(state.reason.as_deref(), Some("user request"));
    }

    #[test]
    fn test_event_serialization() {
        let event = TransferEvent::Progress {
            session_id: "s".into(),
            bytes_transferred: 512,
            total_bytes: 1024,
            speed_bps: 100,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"progress\""));
        assert!(json.contains("\"bytes_transferred\":512"));
    }
}
