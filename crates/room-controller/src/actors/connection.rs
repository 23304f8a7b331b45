//! Per-connection plumbing.
//!
//! A [`ConnectionHandle`] is what the hub stores: a bounded outbound queue,
//! a cancellation token, and an inbound-activity clock. The matching writer
//! task ([`spawn_writer`]) drains the queue into the socket.
//!
//! # Lifecycle
//!
//! 1. The boundary layer creates the handle and spawns the writer
//! 2. The room actor registers the handle in its hub
//! 3. Cancellation (close, supersession, eviction, teardown) stops both the
//!    writer and the signal relay reading from the socket

use crate::protocol::{CloseCode, ServerEvent};
use futures_util::{Sink, SinkExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default outbound queue size per connection.
pub const CONNECTION_CHANNEL_BUFFER: usize = 200;

/// A frame queued for a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame, shared across broadcast recipients.
    Text(Arc<str>),
    /// Transport-level keepalive probe.
    Probe,
    /// Close the socket with a code; always the last frame written.
    Close(CloseCode),
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Queue full, the peer is not keeping up.
    Full,
    /// Writer gone or connection already closed.
    Closed,
}

struct Inner {
    connection_id: String,
    participant_id: String,
    sender: mpsc::Sender<Outbound>,
    cancel_token: CancellationToken,
    opened_at: Instant,
    /// Milliseconds after `opened_at` of the last inbound frame.
    last_seen_ms: AtomicU64,
    closed: AtomicBool,
}

/// Cloneable handle to one live client connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connection_id", &self.inner.connection_id)
            .field("participant_id", &self.inner.participant_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer drains.
    #[must_use]
    pub fn new(
        participant_id: impl Into<String>,
        cancel_token: CancellationToken,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        Self::with_capacity(participant_id, cancel_token, CONNECTION_CHANNEL_BUFFER)
    }

    /// Create a handle with a specific outbound queue size.
    #[must_use]
    pub fn with_capacity(
        participant_id: impl Into<String>,
        cancel_token: CancellationToken,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            inner: Arc::new(Inner {
                connection_id: Uuid::new_v4().to_string(),
                participant_id: participant_id.into(),
                sender,
                cancel_token,
                opened_at: Instant::now(),
                last_seen_ms: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        };
        (handle, receiver)
    }

    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    #[must_use]
    pub fn participant_id(&self) -> &str {
        &self.inner.participant_id
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryFailure`] if the queue is full or the connection
    /// is closed.
    pub fn try_deliver(&self, frame: Outbound) -> Result<(), DeliveryFailure> {
        if self.is_closed() {
            return Err(DeliveryFailure::Closed);
        }
        self.inner.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }

    /// Serialize and queue a server event.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryFailure::Closed`] if serialization fails or the
    /// connection is closed, [`DeliveryFailure::Full`] if the queue is full.
    pub fn send_event(&self, event: &ServerEvent) -> Result<(), DeliveryFailure> {
        let text = event.to_text().map_err(|e| {
            warn!(target: "rc.hub", kind = event.kind(), error = %e, "Failed to serialize event");
            DeliveryFailure::Closed
        })?;
        self.try_deliver(Outbound::Text(Arc::from(text)))
    }

    /// Close with a code. Idempotent: only the first call queues a close
    /// frame.
    pub fn close(&self, code: CloseCode) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.inner.sender.try_send(Outbound::Close(code)).is_err() {
            debug!(
                target: "rc.hub",
                connection_id = %self.inner.connection_id,
                code = code.as_u16(),
                "Close frame not queued, cancelling directly"
            );
        }
        self.inner.cancel_token.cancel();
    }

    /// Tear down without a close frame.
    pub fn abort(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.cancel_token.is_cancelled()
    }

    /// Resolves when the connection is closed or cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel_token.cancelled()
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        let elapsed = Instant::now().saturating_duration_since(self.inner.opened_at);
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.inner.last_seen_ms.fetch_max(millis, Ordering::Relaxed);
    }

    /// Time since the last inbound activity (or since open).
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        let last_seen = self.inner.opened_at
            + Duration::from_millis(self.inner.last_seen_ms.load(Ordering::Relaxed));
        now.saturating_duration_since(last_seen)
    }

    /// Whether two handles refer to the same underlying connection.
    #[must_use]
    pub fn same_connection(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Spawn the writer task for a connection.
///
/// Frames are written in queue order. A `Close` frame is written last; the
/// writer then closes the sink and cancels the connection so the reader
/// side stops as well.
pub fn spawn_writer<S>(
    connection: ConnectionHandle,
    mut receiver: mpsc::Receiver<Outbound>,
    mut sink: S,
) -> JoinHandle<()>
where
    S: Sink<Outbound> + Unpin + Send + 'static,
    S::Error: fmt::Display,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                frame = receiver.recv() => {
                    let Some(frame) = frame else { break };
                    let is_close = matches!(frame, Outbound::Close(_));
                    if let Err(e) = sink.send(frame).await {
                        debug!(
                            target: "rc.ws",
                            connection_id = %connection.connection_id(),
                            error = %e,
                            "Socket write failed"
                        );
                        break;
                    }
                    if is_close {
                        break;
                    }
                }

                () = connection.cancelled() => break,
            }
        }

        let _ = sink.close().await;
        connection.abort();
    })
}
