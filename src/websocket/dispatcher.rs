//! Per-frame protocol handling for an open connection

use std::sync::Arc;

use crate::connection_manager::{is_valid_room_name, ConnectionHandle};
use crate::relay::Relay;

use super::message::{InboundFrame, ServerMessage};

/// What the read loop should do after a frame was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Continue,
    /// A reply to the sender could not be queued in time
    Close,
}

impl Dispatch {
    fn from_sent(sent: bool) -> Self {
        if sent {
            Dispatch::Continue
        } else {
            Dispatch::Close
        }
    }
}

/// Handle one decoded text frame from `handle`
#[tracing::instrument(
    name = "ws.dispatch",
    skip(relay, handle, frame),
    fields(connection_id = %handle.id)
)]
pub async fn dispatch(relay: &Relay, handle: &Arc<ConnectionHandle>, frame: InboundFrame) -> Dispatch {
    match frame {
        InboundFrame::Join { room } => {
            let room = room.unwrap_or_else(|| relay.default_room().to_string());
            handle_join(relay, handle, room).await
        }
        InboundFrame::Chat { content, room } => handle_chat(relay, handle, content, room).await,
        InboundFrame::Unknown { kind } => {
            tracing::debug!(
                connection_id = %handle.id,
                kind = ?kind,
                "Ignoring frame with unknown type"
            );
            Dispatch::Continue
        }
    }
}

/// Reply to a binary frame
pub async fn reject_binary(relay: &Relay, handle: &ConnectionHandle) -> Dispatch {
    let error = ServerMessage::error("UNSUPPORTED_FORMAT", "Binary messages are not supported");
    Dispatch::from_sent(relay.send_direct(handle, error).await)
}

#[tracing::instrument(
    name = "ws.join",
    skip(relay, handle),
    fields(connection_id = %handle.id)
)]
async fn handle_join(relay: &Relay, handle: &Arc<ConnectionHandle>, room: String) -> Dispatch {
    if !is_valid_room_name(&room) {
        tracing::warn!(connection_id = %handle.id, room = %room, "Invalid room name");
        let error = ServerMessage::error("INVALID_ROOM", format!("Invalid room name: {}", room));
        return Dispatch::from_sent(relay.send_direct(handle, error).await);
    }

    let Some(outcome) = relay.join(handle, &room) else {
        return Dispatch::Close;
    };

    tracing::info!(
        connection_id = %handle.id,
        room = %room,
        previous = ?outcome.previous,
        members = outcome.members.len(),
        "Joined room"
    );

    let replied = relay
        .send_direct(handle, ServerMessage::room_users(outcome.members))
        .await;

    if let Some(previous) = outcome.previous {
        relay
            .broadcast(&previous, &ServerMessage::user_left(handle.id), Some(handle.id))
            .await;
    }

    relay
        .broadcast(&room, &ServerMessage::user_joined(handle.id), Some(handle.id))
        .await;

    Dispatch::from_sent(replied)
}

#[tracing::instrument(
    name = "ws.chat",
    skip(relay, handle, content, room),
    fields(connection_id = %handle.id, content_len = content.len())
)]
async fn handle_chat(
    relay: &Relay,
    handle: &Arc<ConnectionHandle>,
    content: String,
    room: Option<String>,
) -> Dispatch {
    let target = chat_target(relay, handle, room);

    if !relay.send_direct(handle, ServerMessage::echo(content.clone())).await {
        return Dispatch::Close;
    }

    let report = relay
        .broadcast(&target, &ServerMessage::chat(handle.id, content), None)
        .await;

    tracing::debug!(
        connection_id = %handle.id,
        room = %target,
        delivered = report.delivered,
        failed = report.failed,
        "Chat message relayed"
    );

    if report.evicted.contains(&handle.id) {
        Dispatch::Close
    } else {
        Dispatch::Continue
    }
}

/// Current room if assigned, else the frame's room when valid, else the default
fn chat_target(relay: &Relay, handle: &ConnectionHandle, requested: Option<String>) -> String {
    if let Some(current) = relay.rooms().room_of(handle.id) {
        return current;
    }
    requested
        .filter(|r| is_valid_room_name(r))
        .unwrap_or_else(|| relay.default_room().to_string())
}

/// Remove a closing connection and tell its room. Returns the room it left,
/// or `None` when it was in no room or was already removed by an eviction.
#[tracing::instrument(name = "ws.teardown", skip(relay, handle), fields(connection_id = %handle.id))]
pub async fn teardown(relay: &Relay, handle: &ConnectionHandle) -> Option<String> {
    let room = relay.disconnect(handle)?;

    relay
        .broadcast(&room, &ServerMessage::user_left(handle.id), None)
        .await;

    Some(room)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::connection_manager::{Registry, RoomTable};
    use crate::fanout::LocalFanout;
    use crate::websocket::OutboundMessage;

    fn relay() -> Relay {
        Relay::new(
            Arc::new(Registry::new()),
            Arc::new(RoomTable::with_rooms(["general", "support", "random"])),
            Arc::new(LocalFanout::new("test")),
            Duration::from_millis(100),
            "general",
        )
    }

    fn connect(relay: &Relay) -> (Arc<ConnectionHandle>, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = relay.registry().register(tx);
        handle.mark_open();
        (handle, rx)
    }

    fn next(rx: &mut mpsc::Receiver<OutboundMessage>) -> serde_json::Value {
        let text = rx.try_recv().unwrap().to_json().unwrap().unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_join_defaults_to_general_and_lists_self() {
        let relay = relay();
        let (a, mut rx) = connect(&relay);

        dispatch(&relay, &a, InboundFrame::Join { room: None }).await;

        let reply = next(&mut rx);
        assert_eq!(reply["type"], "room_users");
        assert_eq!(reply["users"], serde_json::json!([a.id.to_string()]));
        assert_eq!(relay.rooms().room_of(a.id).as_deref(), Some("general"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_announces_to_others_only() {
        let relay = relay();
        let (a, mut a_rx) = connect(&relay);
        let (b, mut b_rx) = connect(&relay);

        dispatch(&relay, &a, InboundFrame::Join { room: Some("support".into()) }).await;
        let _ = next(&mut a_rx);

        dispatch(&relay, &b, InboundFrame::Join { room: Some("support".into()) }).await;
        let b_reply = next(&mut b_rx);
        assert_eq!(b_reply["type"], "room_users");
        assert_eq!(b_reply["users"].as_array().unwrap().len(), 2);

        let joined = next(&mut a_rx);
        assert_eq!(joined["type"], "user_joined");
        assert_eq!(joined["userId"], b.id.to_string());
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_switching_rooms_announces_departure() {
        let relay = relay();
        let (a, mut a_rx) = connect(&relay);
        let (b, mut b_rx) = connect(&relay);

        dispatch(&relay, &a, InboundFrame::Join { room: None }).await;
        dispatch(&relay, &b, InboundFrame::Join { room: None }).await;
        while a_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}

        dispatch(&relay, &b, InboundFrame::Join { room: Some("random".into()) }).await;

        let left = next(&mut a_rx);
        assert_eq!(left["type"], "user_left");
        assert_eq!(left["userId"], b.id.to_string());
        assert_eq!(relay.rooms().members("general"), vec![a.id]);
    }

    #[tokio::test]
    async fn test_invalid_room_is_rejected() {
        let relay = relay();
        let (a, mut rx) = connect(&relay);

        dispatch(&relay, &a, InboundFrame::Join { room: Some("bad room!".into()) }).await;

        let reply = next(&mut rx);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["code"], "INVALID_ROOM");
        assert!(relay.rooms().room_of(a.id).is_none());
    }

    #[tokio::test]
    async fn test_chat_echoes_then_broadcasts() {
        let relay = relay();
        let (a, mut rx) = connect(&relay);
        dispatch(&relay, &a, InboundFrame::Join { room: None }).await;
        let _ = next(&mut rx);

        dispatch(
            &relay,
            &a,
            InboundFrame::Chat { content: "hi".into(), room: None },
        )
        .await;

        let echo = next(&mut rx);
        assert_eq!(echo["type"], "message");
        assert_eq!(echo["sender"], "server");
        assert_eq!(echo["content"], "hi");

        let copy = next(&mut rx);
        assert_eq!(copy["sender"], a.id.to_string());
        assert_eq!(copy["content"], "hi");
    }

    #[tokio::test]
    async fn test_chat_without_room_uses_requested_room() {
        let relay = relay();
        let (a, _a_rx) = connect(&relay);
        let (b, mut b_rx) = connect(&relay);
        dispatch(&relay, &b, InboundFrame::Join { room: Some("support".into()) }).await;
        let _ = next(&mut b_rx);

        dispatch(
            &relay,
            &a,
            InboundFrame::Chat { content: "anyone?".into(), room: Some("support".into()) },
        )
        .await;

        let copy = next(&mut b_rx);
        assert_eq!(copy["sender"], a.id.to_string());
    }

    #[tokio::test]
    async fn test_unknown_frame_gets_no_reply() {
        let relay = relay();
        let (a, mut rx) = connect(&relay);

        dispatch(&relay, &a, InboundFrame::Unknown { kind: Some("typing".into()) }).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_binary_frame_is_rejected() {
        let relay = relay();
        let (a, mut rx) = connect(&relay);

        assert_eq!(reject_binary(&relay, &a).await, Dispatch::Continue);

        let reply = next(&mut rx);
        assert_eq!(reply["code"], "UNSUPPORTED_FORMAT");
    }

    #[tokio::test]
    async fn test_stalled_reader_is_closed_instead_of_blocking() {
        let relay = relay();
        let (tx, _rx) = mpsc::channel(1);
        let a = relay.registry().register(tx);
        a.mark_open();
        a.send(ServerMessage::echo("backlog")).await.unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            dispatch(&relay, &a, InboundFrame::Chat { content: "x".into(), room: None }),
        )
        .await
        .expect("dispatch should be bounded by the send timeout");
        assert_eq!(outcome, Dispatch::Close);

        let outcome = tokio::time::timeout(Duration::from_secs(3), reject_binary(&relay, &a))
            .await
            .expect("binary reply should be bounded by the send timeout");
        assert_eq!(outcome, Dispatch::Close);
    }

    #[tokio::test]
    async fn test_join_refused_after_close_began() {
        let relay = relay();
        let (a, mut rx) = connect(&relay);
        a.begin_close();

        let outcome = dispatch(&relay, &a, InboundFrame::Join { room: None }).await;

        assert_eq!(outcome, Dispatch::Close);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_teardown_announces_once() {
        let relay = relay();
        let (a, _a_rx) = connect(&relay);
        let (b, mut b_rx) = connect(&relay);
        dispatch(&relay, &a, InboundFrame::Join { room: None }).await;
        dispatch(&relay, &b, InboundFrame::Join { room: None }).await;
        while b_rx.try_recv().is_ok() {}

        assert_eq!(teardown(&relay, &a).await.as_deref(), Some("general"));
        assert_eq!(teardown(&relay, &a).await, None);

        let left = next(&mut b_rx);
        assert_eq!(left["type"], "user_left");
        assert!(b_rx.try_recv().is_err());
        assert_eq!(relay.registry().len(), 1);
    }
}
