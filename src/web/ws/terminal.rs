//! Terminal WebSocket handler.
//!
//! One websocket is one [`Session`]. The read side dispatches JSON client
//! messages; a writer task drains the session's outbound queue and sends
//! keepalive pings.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::directory::Directory;
use crate::server::{ConnectRequest, Credentials, Session, SessionManager};

use super::messages::{ClientMessage, ServerMessage};

/// State for the terminal WebSocket handler.
#[derive(Clone)]
pub struct TerminalWsState {
    /// Bridge configuration.
    pub config: Arc<Config>,
    /// Approved endpoint directory.
    pub directory: Arc<Directory>,
    /// Live sessions.
    pub sessions: SessionManager,
}

impl TerminalWsState {
    /// Create a new terminal WebSocket state.
    pub fn new(config: Arc<Config>, directory: Arc<Directory>, sessions: SessionManager) -> Self {
        Self {
            config,
            directory,
            sessions,
        }
    }
}

/// WebSocket terminal handler.
///
/// GET /ws
pub async fn terminal_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<TerminalWsState>>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
) -> Response {
    tracing::info!("WebSocket connection from {}", peer_addr);
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer_addr))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<TerminalWsState>, peer_addr: SocketAddr) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let errors = tx.clone();

    let session = Session::new(
        peer_addr,
        Arc::clone(&state.config),
        Arc::clone(&state.directory),
        tx,
    );
    state.sessions.register(&session).await;
    tracing::debug!("WebSocket session started: {}", session.id());

    let ping_interval = Duration::from_secs(state.config.server.ping_interval_secs);
    let writer = tokio::spawn(write_loop(
        ws_sender,
        rx,
        session.closed(),
        Arc::clone(&session),
        ping_interval,
    ));

    // Any frame, pongs included, refreshes the deadline.
    let read_timeout = Duration::from_secs(state.config.server.client_read_timeout_secs);
    let mut closed = session.closed();
    loop {
        let next = tokio::select! {
            next = tokio::time::timeout(read_timeout, ws_receiver.next()) => next,
            _ = closed.changed() => break,
        };

        let msg = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                tracing::debug!("WebSocket error: {}", e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::info!("WebSocket read timed out: {}", session.id());
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Disconnect) => {
                    tracing::debug!("Disconnect requested: {}", session.id());
                    break;
                }
                Ok(client_msg) => handle_client_message(&session, client_msg).await,
                Err(e) => {
                    tracing::debug!("Failed to parse client message: {}", e);
                    let _ = errors.send(ServerMessage::error("Invalid message format"));
                }
            },
            Message::Close(_) => {
                tracing::debug!("WebSocket closed by client: {}", session.id());
                break;
            }
            _ => {}
        }
    }

    session.shutdown();
    state.sessions.unregister(session.id()).await;
    let _ = writer.await;
    tracing::debug!("WebSocket session ended: {}", session.id());
}

/// Dispatch a client message to the session.
async fn handle_client_message(session: &Arc<Session>, msg: ClientMessage) {
    match msg {
        ClientMessage::Connect {
            host,
            port,
            protocol,
            charset,
            username,
            password,
        } => {
            let request = ConnectRequest {
                host,
                port,
                protocol,
                charset,
                credentials: username.map(|username| Credentials {
                    username,
                    password: password.unwrap_or_default(),
                }),
            };
            // Dialing must not block keystrokes or a disconnect.
            let session = Arc::clone(session);
            tokio::spawn(async move { session.connect(request).await });
        }
        ClientMessage::ConnectToEndpoint { id } => {
            let session = Arc::clone(session);
            tokio::spawn(async move { session.connect_to_endpoint(&id, None).await });
        }
        ClientMessage::ListEndpoints => session.list_endpoints().await,
        ClientMessage::Data { data } => session.send_input(&data),
        ClientMessage::Resize { cols, rows } => session.resize(cols, rows),
        ClientMessage::SetCharset { charset } => session.set_charset(&charset),
        ClientMessage::CancelDownload => session.cancel_download(),
        ClientMessage::Disconnect => session.shutdown(),
    }
}

/// Drain the outbound queue into the socket and send keepalive pings.
async fn write_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
    mut closed: watch::Receiver<bool>,
    session: Arc<Session>,
    ping_interval: Duration,
) {
    let mut ticker = tokio::time::interval(ping_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                if send_message(&mut ws_sender, &msg).await.is_err() {
                    schedule_shutdown(&session);
                    break;
                }
            }
            _ = ticker.tick() => {
                if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                    schedule_shutdown(&session);
                    break;
                }
            }
            _ = closed.changed() => {
                // Flush what the shutdown queued, e.g. a final `disconnected`.
                while let Ok(msg) = rx.try_recv() {
                    if send_message(&mut ws_sender, &msg).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    let _ = ws_sender.close().await;
}

async fn send_message(
    ws_sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => ws_sender.send(Message::Text(json)).await,
        Err(e) => {
            tracing::warn!("Failed to serialize server message: {}", e);
            Ok(())
        }
    }
}

/// A failed browser write ends the session. Shutdown runs on its own task
/// so it never contends with a caller that holds the session lock.
fn schedule_shutdown(session: &Arc<Session>) {
    tracing::debug!("WebSocket write failed: {}", session.id());
    let session = Arc::clone(session);
    tokio::spawn(async move { session.shutdown() });
}
