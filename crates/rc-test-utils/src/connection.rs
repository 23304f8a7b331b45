//! In-process stand-in for a client socket.
//!
//! A [`TestConnection`] owns a [`ConnectionHandle`] and the receiver its
//! writer would drain, so tests read exactly the frames a client would see.

use room_controller::actors::{ConnectionHandle, Outbound};
use room_controller::protocol::CloseCode;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How long to wait for an expected frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection handle plus its outbound queue.
pub struct TestConnection {
    handle: ConnectionHandle,
    receiver: mpsc::Receiver<Outbound>,
}

impl TestConnection {
    #[must_use]
    pub fn new(participant_id: impl Into<String>) -> Self {
        let (handle, receiver) = ConnectionHandle::new(participant_id, CancellationToken::new());
        Self { handle, receiver }
    }

    /// Connection with a small outbound queue, for backpressure tests.
    #[must_use]
    pub fn with_capacity(participant_id: impl Into<String>, capacity: usize) -> Self {
        let (handle, receiver) =
            ConnectionHandle::with_capacity(participant_id, CancellationToken::new(), capacity);
        Self { handle, receiver }
    }

    /// A clone of the handle, for registering with a room.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Next queued frame of any kind.
    ///
    /// # Panics
    ///
    /// Panics if no frame arrives within [`FRAME_TIMEOUT`].
    pub async fn next_frame(&mut self) -> Outbound {
        tokio::time::timeout(FRAME_TIMEOUT, self.receiver.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound queue closed")
    }

    /// Next text frame parsed as JSON, skipping keepalive probes.
    ///
    /// # Panics
    ///
    /// Panics on timeout, on a close frame, or on invalid JSON.
    pub async fn next_event(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                Outbound::Text(text) => {
                    return serde_json::from_str(&text).expect("frame is not JSON");
                }
                Outbound::Probe => {}
                Outbound::Close(code) => {
                    panic!("expected event, got close {}", code.as_u16());
                }
            }
        }
    }

    /// Next event, asserting its `type`.
    ///
    /// # Panics
    ///
    /// Panics if the next event has a different type.
    pub async fn expect_event(&mut self, kind: &str) -> Value {
        let event = self.next_event().await;
        assert_eq!(event["type"], kind, "unexpected event: {event}");
        event
    }

    /// Assert nothing is queued right now.
    ///
    /// # Panics
    ///
    /// Panics if a frame is waiting.
    pub async fn expect_no_frame(&mut self) {
        tokio::task::yield_now().await;
        if let Ok(frame) = self.receiver.try_recv() {
            panic!("expected no frame, got {frame:?}");
        }
    }

    /// Skip events until a close frame arrives and assert its code.
    ///
    /// # Panics
    ///
    /// Panics on timeout or a different code.
    pub async fn expect_close(&mut self, expected: CloseCode) {
        loop {
            if let Outbound::Close(code) = self.next_frame().await {
                assert_eq!(code, expected, "unexpected close code");
                return;
            }
        }
    }

    /// Discard everything currently queued.
    pub fn drain(&mut self) {
        while self.receiver.try_recv().is_ok() {}
    }

    /// Simulate inbound activity.
    pub fn touch(&self) {
        self.handle.touch();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}
