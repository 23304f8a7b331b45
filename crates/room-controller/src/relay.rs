//! Signal Relay: the per-connection receive loop.
//!
//! Classifies each inbound frame and dispatches it:
//!
//! | Frame | Action |
//! |-------|--------|
//! | `ping` | `pong` straight back on the same connection |
//! | `speaking_status` | room-wide `speaking_status` event |
//! | `offer` / `answer` / `ice_candidate` | stamped with `from`, unicast to `to` |
//! | anything else | forwarded verbatim to the rest of the room |
//!
//! Malformed frames are dropped without closing the connection. When the
//! loop ends for any reason the connection is unregistered from its room.

use crate::actors::{ConnectionHandle, RoomActorHandle};
use crate::observability::metrics as prom;
use crate::protocol::{classify, stamp_sender, InboundMessage, ServerEvent};
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Transport-neutral inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    /// Transport-level ping or pong; counts as activity only.
    Keepalive,
    /// Binary payloads are not part of the protocol.
    Binary,
    Close,
}

/// Why the receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// Peer sent a close frame.
    PeerClosed,
    /// Inbound stream ended or errored.
    StreamEnded,
    /// Server side closed the connection.
    Cancelled,
}

/// Receive loop for one connection.
pub struct SignalRelay {
    room: RoomActorHandle,
    connection: ConnectionHandle,
}

impl SignalRelay {
    #[must_use]
    pub fn new(room: RoomActorHandle, connection: ConnectionHandle) -> Self {
        Self { room, connection }
    }

    /// Run until the peer goes away or the connection is closed.
    #[instrument(
        skip_all,
        name = "rc.relay",
        fields(
            room_id = %self.room.room_id(),
            participant_id = %self.connection.participant_id(),
        )
    )]
    pub async fn run<S, E>(self, mut inbound: S) -> RelayExit
    where
        S: Stream<Item = Result<InboundFrame, E>> + Unpin,
        E: fmt::Display,
    {
        let exit = loop {
            tokio::select! {
                biased;

                () = self.connection.cancelled() => break RelayExit::Cancelled,

                frame = inbound.next() => {
                    match frame {
                        Some(Ok(InboundFrame::Close)) => break RelayExit::PeerClosed,
                        Some(Ok(frame)) => {
                            self.connection.touch();
                            if let InboundFrame::Text(text) = frame {
                                self.dispatch(text).await;
                            }
                        }
                        Some(Err(e)) => {
                            debug!(target: "rc.relay", error = %e, "Inbound stream error");
                            break RelayExit::StreamEnded;
                        }
                        None => break RelayExit::StreamEnded,
                    }
                }
            }
        };

        let participant_id = self.connection.participant_id().to_string();
        let connection_id = self.connection.connection_id().to_string();
        match self.room.disconnect(participant_id, connection_id).await {
            Ok(announced) => {
                debug!(target: "rc.relay", ?exit, announced, "Connection unregistered");
            }
            Err(e) => {
                // Room already gone
                debug!(target: "rc.relay", ?exit, error = %e, "Unregister skipped");
            }
        }
        self.connection.abort();
        exit
    }

    async fn dispatch(&self, text: String) {
        let Some(message) = classify(&text) else {
            debug!(target: "rc.relay", "Dropping malformed frame");
            return;
        };

        let participant_id = self.connection.participant_id().to_string();
        let connection_id = self.connection.connection_id().to_string();

        let result = match message {
            InboundMessage::Ping => {
                let _ = self.connection.send_event(&ServerEvent::Pong);
                Ok(())
            }
            InboundMessage::SpeakingStatus { is_speaking } => {
                self.room
                    .speaking(participant_id, connection_id, is_speaking)
                    .await
            }
            InboundMessage::Signal { kind, to, frame } => {
                let stamped = match stamp_sender(frame, &participant_id) {
                    Ok(stamped) => stamped,
                    Err(e) => {
                        warn!(target: "rc.relay", error = %e, "Failed to re-encode signal");
                        return;
                    }
                };
                match self
                    .room
                    .relay_signal(participant_id, connection_id, to, stamped)
                    .await
                {
                    Ok(true) => {
                        prom::record_signal_relayed(kind.as_str());
                        Ok(())
                    }
                    Ok(false) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            InboundMessage::Passthrough => {
                self.room
                    .passthrough(participant_id, connection_id, Arc::from(text))
                    .await
            }
        };

        if let Err(e) = result {
            debug!(target: "rc.relay", error = %e, "Room unavailable, frame dropped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, Outbound, RoomActor, RoomSeed};
    use crate::config::RoomPolicy;
    use crate::store::{MemoryRoomStore, RoomRecord};
    use common::types::{unix_now, Identity};
    use serde_json::Value;
    use std::convert::Infallible;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn spawn_room() -> RoomActorHandle {
        let record = RoomRecord {
            id: "relay001".to_string(),
            name: "Relay".to_string(),
            password: None,
            creator_id: "alice".to_string(),
            creator_name: "alice".to_string(),
            max_participants: 4,
            requires_password: false,
            has_waiting_room: false,
            is_active: true,
            created_at: unix_now(),
            updated_at: unix_now(),
        };
        RoomActor::spawn(
            RoomSeed::new(record),
            Arc::new(MemoryRoomStore::new()),
            RoomPolicy::default(),
            CancellationToken::new(),
            ActorMetrics::new(),
        )
        .0
    }

    async fn member(
        room: &RoomActorHandle,
        id: &str,
    ) -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
        room.join(Identity::new(id, id), id.to_string(), None)
            .await
            .unwrap();
        let (conn, rx) = ConnectionHandle::new(id, CancellationToken::new());
        room.connect(conn.clone()).await.unwrap();
        (conn, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) {
        while rx.try_recv().is_ok() {}
    }

    fn text_of(frame: Outbound) -> Value {
        match frame {
            Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
            other => unreachable!("expected text, got {other:?}"),
        }
    }

    fn frames(items: &[&str]) -> impl Stream<Item = Result<InboundFrame, Infallible>> + Unpin {
        let owned: Vec<Result<InboundFrame, Infallible>> = items
            .iter()
            .map(|s| Ok(InboundFrame::Text((*s).to_string())))
            .collect();
        futures_util::stream::iter(owned)
    }

    #[tokio::test]
    async fn test_ping_gets_pong_and_stream_end_unregisters() {
        let room = spawn_room();
        let (alice, mut alice_rx) = member(&room, "alice").await;
        let (_bob, mut bob_rx) = member(&room, "bob").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let exit = SignalRelay::new(room.clone(), alice.clone())
            .run(frames(&[r#"{"type":"ping"}"#, "not json", r#"{"no":"type"}"#]))
            .await;
        assert_eq!(exit, RelayExit::StreamEnded);

        assert_eq!(text_of(alice_rx.recv().await.unwrap())["type"], "pong");
        let left = text_of(bob_rx.recv().await.unwrap());
        assert_eq!(left["type"], "user_left");
        assert_eq!(left["participantId"], "alice");
        assert!(alice.is_closed());
    }

    #[tokio::test]
    async fn test_signal_is_stamped_and_unicast() {
        let room = spawn_room();
        let (alice, mut alice_rx) = member(&room, "alice").await;
        let (_bob, mut bob_rx) = member(&room, "bob").await;
        let (_carol, mut carol_rx) = member(&room, "carol").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_rx);

        SignalRelay::new(room.clone(), alice)
            .run(frames(&[
                r#"{"type":"webrtc_offer","to":"bob","from":"mallory","sdp":"v=0"}"#,
            ]))
            .await;

        let offer = text_of(bob_rx.recv().await.unwrap());
        assert_eq!(offer["type"], "webrtc_offer");
        assert_eq!(offer["from"], "alice");
        assert_eq!(offer["sdp"], "v=0");
        // Carol sees only alice leaving
        assert_eq!(text_of(carol_rx.recv().await.unwrap())["type"], "user_left");
    }

    #[tokio::test]
    async fn test_passthrough_is_verbatim_and_skips_sender() {
        let room = spawn_room();
        let (alice, mut alice_rx) = member(&room, "alice").await;
        let (_bob, mut bob_rx) = member(&room, "bob").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        let raw = r#"{"type":"chat",  "body":"hi"}"#;
        SignalRelay::new(room.clone(), alice)
            .run(frames(&[raw, r#"{"type":"speaking","isSpeaking":true}"#]))
            .await;

        assert_eq!(bob_rx.recv().await.unwrap(), Outbound::Text(Arc::from(raw)));
        let speaking = text_of(bob_rx.recv().await.unwrap());
        assert_eq!(speaking["type"], "speaking_status");
        assert_eq!(speaking["isSpeaking"], true);
        assert_eq!(text_of(alice_rx.recv().await.unwrap())["type"], "speaking_status");
    }

    #[tokio::test]
    async fn test_close_frame_and_cancellation() {
        let room = spawn_room();
        let (alice, _alice_rx) = member(&room, "alice").await;
        let closing = futures_util::stream::iter(vec![Ok::<_, Infallible>(InboundFrame::Close)]);
        let exit = SignalRelay::new(room.clone(), alice).run(closing).await;
        assert_eq!(exit, RelayExit::PeerClosed);

        let (bob, _bob_rx) = member(&room, "bob").await;
        bob.close(crate::protocol::CloseCode::Normal);
        let exit = SignalRelay::new(room.clone(), bob)
            .run(futures_util::stream::pending::<Result<InboundFrame, Infallible>>())
            .await;
        assert_eq!(exit, RelayExit::Cancelled);
    }
}
