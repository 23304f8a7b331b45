//! WebSocket upgrade route: `GET /ws/:room_id?token=...`.
//!
//! The socket is upgraded before authentication so that every failure can
//! be reported with a close code the client understands. Each socket gets
//! a writer task draining its outbound queue and a [`SignalRelay`] reading
//! inbound frames.

use crate::actors::{spawn_writer, ConnectionHandle, Outbound};
use crate::http::AppState;
use crate::protocol::CloseCode;
use crate::relay::{InboundFrame, SignalRelay};
use crate::session::authenticate;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures_util::{future, SinkExt, StreamExt};
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: Option<String>,
}

/// Accept the upgrade and hand the socket to [`serve_socket`].
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(params): Query<WsParams>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state, room_id, params.token))
}

/// Convert a queued frame into a WebSocket message.
#[must_use]
pub fn to_message(frame: Outbound) -> Message {
    match frame {
        Outbound::Text(text) => Message::Text(text.to_string()),
        Outbound::Probe => Message::Ping(Vec::new()),
        Outbound::Close(code) => Message::Close(Some(CloseFrame {
            code: code.as_u16(),
            reason: Cow::Borrowed(code.reason()),
        })),
    }
}

/// Convert a WebSocket message into a transport-neutral frame.
#[must_use]
pub fn to_frame(message: Message) -> InboundFrame {
    match message {
        Message::Text(text) => InboundFrame::Text(text),
        Message::Binary(_) => InboundFrame::Binary,
        Message::Ping(_) | Message::Pong(_) => InboundFrame::Keepalive,
        Message::Close(_) => InboundFrame::Close,
    }
}

#[instrument(skip_all, name = "rc.ws", fields(room_id = %room_id))]
async fn serve_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    room_id: String,
    token: Option<String>,
) {
    let (sink, stream) = socket.split();
    let sink = sink.with(|frame: Outbound| future::ready(Ok::<_, axum::Error>(to_message(frame))));

    let identity = match authenticate(state.sessions.as_ref(), token.as_deref()).await {
        Ok(identity) => identity,
        Err(e) => {
            debug!(target: "rc.ws", error = %e, "Rejecting unauthenticated socket");
            let (connection, outbound) = ConnectionHandle::new("anonymous", CancellationToken::new());
            let writer = spawn_writer(connection.clone(), outbound, sink);
            close_and_wait(&connection, e.close_code(), writer).await;
            return;
        }
    };

    let (connection, outbound) =
        ConnectionHandle::new(identity.user_id.clone(), CancellationToken::new());
    let writer = spawn_writer(connection.clone(), outbound, sink);

    let (room, outcome) = match state.coordinator.connect(&room_id, connection.clone()).await {
        Ok(registered) => registered,
        Err(e) => {
            debug!(
                target: "rc.ws",
                user_id = %identity.user_id,
                error = %e,
                "Connection refused"
            );
            close_and_wait(&connection, e.close_code(), writer).await;
            return;
        }
    };
    if let Some(previous) = outcome.superseded {
        previous.close(CloseCode::Superseded);
    }

    info!(
        target: "rc.ws",
        user_id = %identity.user_id,
        connection_id = %connection.connection_id(),
        lane = ?outcome.lane,
        "Connection registered"
    );

    let inbound = stream.map(|message| message.map(to_frame));
    let exit = SignalRelay::new(room, connection.clone())
        .run(inbound)
        .await;

    if let Err(e) = writer.await {
        debug!(target: "rc.ws", error = %e, "Writer task failed");
    }
    info!(
        target: "rc.ws",
        user_id = %identity.user_id,
        connection_id = %connection.connection_id(),
        ?exit,
        "Connection closed"
    );
}

async fn close_and_wait(connection: &ConnectionHandle, code: CloseCode, writer: JoinHandle<()>) {
    connection.close(code);
    if let Err(e) = writer.await {
        debug!(target: "rc.ws", error = %e, "Writer task failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_to_message() {
        assert_eq!(
            to_message(Outbound::Text(Arc::from("{\"type\":\"pong\"}"))),
            Message::Text("{\"type\":\"pong\"}".to_string())
        );
        assert_eq!(to_message(Outbound::Probe), Message::Ping(Vec::new()));
        match to_message(Outbound::Close(CloseCode::Superseded)) {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, 4006);
                assert_eq!(frame.reason, CloseCode::Superseded.reason());
            }
            other => unreachable!("expected close frame, got {other:?}"),
        }
    }

    #[test]
    fn test_message_to_frame() {
        assert_eq!(
            to_frame(Message::Text("hi".to_string())),
            InboundFrame::Text("hi".to_string())
        );
        assert_eq!(to_frame(Message::Pong(Vec::new())), InboundFrame::Keepalive);
        assert_eq!(to_frame(Message::Binary(vec![1, 2])), InboundFrame::Binary);
        assert_eq!(to_frame(Message::Close(None)), InboundFrame::Close);
    }
}
