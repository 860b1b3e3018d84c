//! Status push transports: Socket.IO namespace `/` and a plain WebSocket at `/ws`.
//!
//! Both bind through [`ClientConnection`]; an unauthenticated peer is simply
//! dropped.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use socketioxide::extract::{SocketRef, TryData};
use socketioxide::SocketIo;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use super::session_from_headers;
use crate::connection::ClientConnection;
use crate::error::ConnectError;
use crate::multiplexer::StatusFrame;
use crate::security::log_socket_rejected;
use crate::session::SessionHandle;
use crate::state::AppState;

pub const STATUS_EVENT: &str = "status";

/// Socket.IO handshake payload
#[derive(Debug, Deserialize)]
pub struct SocketAuth {
    pub session: Option<String>,
}

pub fn register_socketio(io: &SocketIo, state: Arc<AppState>) {
    io.ns(
        "/",
        move |socket: SocketRef, TryData(auth): TryData<SocketAuth>| {
            let state = state.clone();
            async move { on_socketio_connect(socket, auth.ok(), state).await }
        },
    );
}

async fn on_socketio_connect(socket: SocketRef, auth: Option<SocketAuth>, state: Arc<AppState>) {
    // Registered before binding so a peer leaving mid-bind is never missed
    let gone = Arc::new(Notify::new());
    let notify = gone.clone();
    socket.on_disconnect(move |socket: SocketRef| {
        info!("Socket.IO client {} disconnected", socket.id);
        notify.notify_one();
    });

    let session = auth
        .and_then(|auth| auth.session)
        .map(|raw| SessionHandle::from(raw.as_str()))
        .or_else(|| session_from_headers(&socket.req_parts().headers));

    let mut connection = ClientConnection::new(state.multiplexer.clone());
    let frames = match connection
        .bind_until(
            &state.sessions,
            session.as_ref(),
            state.config.server.status_buffer,
            gone.notified(),
        )
        .await
    {
        Ok(frames) => frames,
        Err(ConnectError::Cancelled) => {
            debug!("Socket.IO client {} left while binding", socket.id);
            return;
        }
        Err(e) => {
            log_socket_rejected(&socket.id.to_string(), "socket.io");
            debug!("Socket.IO client {} refused: {}", socket.id, e);
            socket.disconnect().ok();
            return;
        }
    };

    if !socket.connected() {
        connection.close();
        return;
    }

    info!("Socket.IO client {} connected as {}", socket.id, connection.id());
    tokio::spawn(forward_to_socketio(socket, connection, frames, gone));
}

async fn forward_to_socketio(
    socket: SocketRef,
    mut connection: ClientConnection,
    mut frames: mpsc::Receiver<StatusFrame>,
    gone: Arc<Notify>,
) {
    loop {
        tokio::select! {
            () = gone.notified() => break,
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = socket.emit(STATUS_EVENT, &*frame) {
                    if !socket.connected() {
                        break;
                    }
                    warn!("Dropped status frame for Socket.IO client {}: {}", socket.id, e);
                }
            }
        }
    }
    connection.close();
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let session = session_from_headers(&headers);
    ws.on_upgrade(move |socket| handle_websocket(socket, state, session))
}

async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, session: Option<SessionHandle>) {
    let mut connection = ClientConnection::new(state.multiplexer.clone());
    let mut frames = match connection
        .bind(
            &state.sessions,
            session.as_ref(),
            state.config.server.status_buffer,
        )
        .await
    {
        Ok(frames) => frames,
        Err(e) => {
            log_socket_rejected(&connection.id().to_string(), "websocket");
            debug!("WebSocket connection {} refused: {}", connection.id(), e);
            return;
        }
    };

    info!("WebSocket connection {} bound", connection.id());
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&*frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode status frame: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!("WebSocket connection {} errored: {}", connection.id(), e);
                    break;
                }
                // Browsers have nothing to say on this channel
                Some(Ok(_)) => {}
            }
        }
    }

    info!("WebSocket connection {} closed", connection.id());
    connection.close();
}
