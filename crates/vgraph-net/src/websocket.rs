//! ---
//! vg_section: "05-networking-external-interfaces"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "WebSocket pump between one listener and the broadcast hub."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use vgraph_common::config::HubConfig;
use vgraph_core::ListenerConnection;

use crate::rest::ApiState;

pub(crate) async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        match state.controller.hub().connect().await {
            Ok(listener) => listener_loop(socket, listener, &state.transport).await,
            Err(err) => {
                warn!(error = %err, "rejecting listener");
                let _ = socket.send(Message::Close(None)).await;
            }
        }
    })
}

/// Forward hub samples to the socket until either side goes away.
///
/// A write that errors or exceeds `write_timeout` ends the listener.
async fn listener_loop(
    mut socket: WebSocket,
    mut listener: ListenerConnection,
    transport: &HubConfig,
) {
    let listener_id = listener.id();

    loop {
        tokio::select! {
            sample = listener.recv() => {
                let Some(sample) = sample else {
                    debug!(listener_id, "listener dropped by hub");
                    break;
                };
                let text = match serde_json::to_string(&*sample) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(listener_id, error = %err, "failed to serialise sample");
                        continue;
                    }
                };
                if !send_bounded(&mut socket, Message::Text(text), transport, listener_id).await {
                    break;
                }
            }
            message = socket.recv() => {
                let Some(Ok(message)) = message else {
                    break;
                };
                match message {
                    Message::Ping(payload) => {
                        if !send_bounded(&mut socket, Message::Pong(payload), transport, listener_id).await {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                    frame @ (Message::Text(_) | Message::Binary(_)) => {
                        if transport.echo_inbound {
                            if !send_bounded(&mut socket, frame, transport, listener_id).await {
                                break;
                            }
                        } else {
                            trace!(listener_id, "ignoring inbound listener frame");
                        }
                    }
                }
            }
        }
    }

    listener.disconnect();
}

async fn send_bounded(
    socket: &mut WebSocket,
    message: Message,
    transport: &HubConfig,
    listener_id: u64,
) -> bool {
    match timeout(transport.write_timeout, socket.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            debug!(listener_id, error = %err, "listener write failed");
            false
        }
        Err(_) => {
            warn!(
                listener_id,
                timeout_ms = transport.write_timeout.as_millis() as u64,
                "listener write timed out"
            );
            false
        }
    }
}
