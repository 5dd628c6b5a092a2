use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection_manager::ConnectionHandle;
use crate::server::AppState;

use super::dispatcher::{dispatch, reject_binary, teardown, Dispatch};
use super::message::{InboundFrame, OutboundMessage, ServerMessage};

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let max_message_size = state.settings.websocket.max_message_size;
    let connection_tasks = state.connection_tasks.clone();

    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| connection_tasks.track_future(handle_socket(socket, state)))
}

/// Why the read loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientClosed,
    TransportError,
    WriterStopped,
    ReplyFailed,
    Evicted,
    Shutdown,
}

/// Handle an established WebSocket connection
#[tracing::instrument(name = "ws.connection", skip(socket, state), fields(otel.kind = "server"))]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let relay = state.relay.clone();
    let ws_config = &state.settings.websocket;
    let connection_start = std::time::Instant::now();
    let mut shutdown_rx = state.shutdown_tx.subscribe();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(ws_config.channel_buffer_size);
    let handle = relay.registry().register(tx);
    let connection_id = handle.id;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Single writer per socket: drains the queue until it closes or a Close is requested
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Some(Ok(t)) => t,
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
                None => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let ack = ServerMessage::connected(connection_id, state.instance_name.to_string());
    if !relay.send_direct(&handle, ack).await || !handle.mark_open() {
        tracing::warn!(connection_id = %connection_id, "Connection closed before it opened");
    }

    tracing::info!(connection_id = %connection_id, "WebSocket connection established");

    let reason = loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break CloseReason::Shutdown,
            _ = handle.close_requested() => break CloseReason::Evicted,
            _ = &mut send_task => break CloseReason::WriterStopped,
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        if let Some(reason) = process_message(msg, &state, &handle).await {
                            break reason;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                        break CloseReason::TransportError;
                    }
                    None => break CloseReason::ClientClosed,
                }
            }
        }
    };

    let room = teardown(&relay, &handle).await;

    // Stop the writer, giving it a bounded window to flush and send a close frame
    if !send_task.is_finished() {
        handle.request_close_frame();
        let close_timeout = Duration::from_millis(state.settings.websocket.close_timeout_ms);
        if tokio::time::timeout(close_timeout, &mut send_task).await.is_err() {
            tracing::debug!(connection_id = %connection_id, "Writer did not finish in time, aborting");
            send_task.abort();
        }
    }
    handle.mark_closed();

    tracing::info!(
        connection_id = %connection_id,
        reason = ?reason,
        room = ?room,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Process a received WebSocket message.
/// Returns the reason to stop when the connection should be closed.
async fn process_message(
    msg: Message,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
) -> Option<CloseReason> {
    let outcome = match msg {
        Message::Text(text) => {
            handle.update_activity();
            let frame = InboundFrame::decode(text.as_str());
            dispatch(&state.relay, handle, frame).await
        }
        Message::Binary(_) => {
            handle.update_activity();
            reject_binary(&state.relay, handle).await
        }
        Message::Ping(_) | Message::Pong(_) => {
            // Axum answers pings itself
            handle.update_activity();
            Dispatch::Continue
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            return Some(CloseReason::ClientClosed);
        }
    };

    match outcome {
        Dispatch::Continue => None,
        Dispatch::Close => {
            tracing::warn!(connection_id = %handle.id, "Closing connection, reply could not be queued");
            Some(CloseReason::ReplyFailed)
        }
    }
}
