//! Browser session orchestration.
//!
//! A [`Session`] owns one browser connection and at most one remote BBS
//! connection at a time. All per-session state sits behind a single mutex
//! that is only held for short state updates and channel sends, never
//! across a network or process await.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::remote::{dial_ssh, dial_telnet, Credentials, Protocol, RemoteLink};
use super::telnet::{escape_iac, naws_payload, TelnetFilter, TerminalIdentity};
use crate::config::Config;
use crate::directory::Directory;
use crate::terminal::{
    encode_input, Charset, DisplayOutput, DisplayPipeline, PipelineOptions, TerminalSize,
};
use crate::web::ws::ServerMessage;
use crate::zmodem::{
    LrzszReceiver, ReceiverOptions, SuppressWindow, TransferEvent, TransferHandler,
};

/// How long a closing connection may take to send what is still queued.
const WRITE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No remote connection.
    #[default]
    Idle,
    /// Dial in progress.
    Connecting,
    /// Relaying between browser and remote.
    Streaming,
    /// Tearing down the remote connection.
    Disconnecting,
}

/// A request to connect to a remote BBS.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Host name.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Requested charset; the approved entry's charset when absent.
    pub charset: Option<String>,
    /// SSH login.
    pub credentials: Option<Credentials>,
}

/// Resolved connection target.
struct Target {
    host: String,
    port: u16,
    protocol: Protocol,
    charset: Charset,
    credentials: Credentials,
}

/// Handles to a live remote connection.
struct RemoteHandles {
    protocol: Protocol,
    writer: mpsc::UnboundedSender<Vec<u8>>,
    resize: Option<mpsc::UnboundedSender<TerminalSize>>,
    drain: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl RemoteHandles {
    /// Stop reading and close the write side once queued bytes, such as a
    /// transfer cancel sequence, have gone out.
    fn close(self) {
        let RemoteHandles { writer, drain, tasks, .. } = self;
        drop(writer);
        for task in tasks {
            task.abort();
        }
        tokio::spawn(async move {
            let mut drain = drain;
            if tokio::time::timeout(WRITE_DRAIN_TIMEOUT, &mut drain).await.is_err() {
                drain.abort();
            }
        });
    }
}

struct Inner {
    state: SessionState,
    pipeline: DisplayPipeline,
    telnet: Option<TelnetFilter>,
    remote: Option<RemoteHandles>,
    remote_label: Option<String>,
    transfer: Option<Box<dyn TransferHandler>>,
    suppress: SuppressWindow,
    flush_pending: bool,
    generation: u64,
    closed: bool,
}

/// Information about a session for external queries.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session ID.
    pub id: Uuid,
    /// Browser address.
    pub peer_addr: SocketAddr,
    /// Current state.
    pub state: SessionState,
    /// Active charset.
    pub charset: Charset,
    /// Remote target, `protocol://host:port`, while connected.
    pub remote: Option<String>,
    /// When the browser connected.
    pub connected_at: Instant,
}

/// One browser terminal session.
pub struct Session {
    id: Uuid,
    peer_addr: SocketAddr,
    connected_at: Instant,
    config: Arc<Config>,
    directory: Arc<Directory>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    inner: Mutex<Inner>,
    shutdown_tx: watch::Sender<bool>,
}

impl Session {
    /// Create a session. Messages for the browser go to `outbound`.
    pub fn new(
        peer_addr: SocketAddr,
        config: Arc<Config>,
        directory: Arc<Directory>,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Arc<Self> {
        let charset = config
            .terminal
            .default_charset
            .parse::<Charset>()
            .unwrap_or_else(|e| {
                warn!("{}; using {}", e, Charset::Cp437);
                Charset::Cp437
            });
        let pipeline = DisplayPipeline::new(
            charset,
            PipelineOptions::from(&config.terminal),
            Instant::now(),
        );
        let suppress = SuppressWindow::new(Duration::from_secs(config.terminal.suppress_window_secs));
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            id: Uuid::new_v4(),
            peer_addr,
            connected_at: Instant::now(),
            config,
            directory,
            outbound,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                pipeline,
                telnet: None,
                remote: None,
                remote_label: None,
                transfer: None,
                suppress,
                flush_pending: false,
                generation: 0,
                closed: false,
            }),
            shutdown_tx,
        })
    }

    /// Session ID.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Browser address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Active charset.
    pub fn charset(&self) -> Charset {
        self.lock().pipeline.charset()
    }

    /// Current terminal size.
    pub fn size(&self) -> TerminalSize {
        self.lock().pipeline.size()
    }

    /// Whether [`Session::shutdown`] has run.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Receiver that flips to `true` when the session shuts down.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Snapshot for the session registry.
    pub fn info(&self) -> SessionInfo {
        let inner = self.lock();
        SessionInfo {
            id: self.id,
            peer_addr: self.peer_addr,
            state: inner.state,
            charset: inner.pipeline.charset(),
            remote: inner.remote_label.clone(),
            connected_at: self.connected_at,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            debug!("Session {}: browser channel closed", self.id);
        }
    }

    /// Connect to a host, subject to the approved directory.
    pub async fn connect(self: &Arc<Self>, request: ConnectRequest) {
        if self.lock().state != SessionState::Idle {
            self.send(ServerMessage::error("Already connected"));
            return;
        }

        let endpoint = match self
            .directory
            .authorize(&request.host, request.port, request.protocol)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.send(ServerMessage::error(e.to_string()));
                return;
            }
        };

        let charset = match request.charset.as_deref() {
            Some(name) => match name.parse::<Charset>() {
                Ok(charset) => charset,
                Err(e) => {
                    self.send(ServerMessage::error(e));
                    return;
                }
            },
            None => endpoint.charset,
        };

        self.open(Target {
            host: request.host,
            port: request.port,
            protocol: request.protocol,
            charset,
            credentials: request.credentials.unwrap_or_default(),
        })
        .await;
    }

    /// Connect to a directory entry by id.
    pub async fn connect_to_endpoint(self: &Arc<Self>, id: &str, credentials: Option<Credentials>) {
        if self.lock().state != SessionState::Idle {
            self.send(ServerMessage::error("Already connected"));
            return;
        }

        let endpoint = match self.directory.find(id).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                self.send(ServerMessage::error(e.to_string()));
                return;
            }
        };
        info!(
            "Session {}: connecting to directory entry {} ({})",
            self.id, endpoint.id, endpoint.name
        );

        self.open(Target {
            host: endpoint.host,
            port: endpoint.port,
            protocol: endpoint.protocol,
            charset: endpoint.charset,
            credentials: credentials.unwrap_or_default(),
        })
        .await;
    }

    /// Send the approved directory to the browser.
    pub async fn list_endpoints(&self) {
        let entries = self.directory.entries().await;
        self.send(ServerMessage::Endpoints { entries });
    }

    async fn open(self: &Arc<Self>, target: Target) {
        let (generation, size) = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            if inner.state != SessionState::Idle {
                drop(inner);
                self.send(ServerMessage::error("Already connected"));
                return;
            }
            inner.state = SessionState::Connecting;
            inner.generation += 1;
            let switch = inner.pipeline.set_charset(target.charset, Instant::now());
            (inner.generation, switch.size)
        };

        info!(
            "Session {}: dialing {}://{}:{} ({})",
            self.id, target.protocol, target.host, target.port, target.charset
        );
        let connect_timeout = Duration::from_secs(self.config.remote.connect_timeout_secs);
        let dialed = match target.protocol {
            Protocol::Telnet => dial_telnet(&target.host, target.port, connect_timeout).await,
            Protocol::Ssh => {
                dial_ssh(
                    &target.host,
                    target.port,
                    &target.credentials,
                    &self.config.remote.ssh_term,
                    size,
                    connect_timeout,
                )
                .await
            }
        };

        let link = match dialed {
            Ok(link) => link,
            Err(e) => {
                warn!("Session {}: connect failed: {}", self.id, e);
                {
                    let mut inner = self.lock();
                    if inner.generation == generation && inner.state == SessionState::Connecting {
                        inner.state = SessionState::Idle;
                    }
                }
                self.send(ServerMessage::error(e.to_string()));
                return;
            }
        };

        let RemoteLink {
            protocol,
            inbound,
            writer,
            resize,
            drain,
            mut tasks,
        } = link;

        let mut inner = self.lock();
        if inner.closed || inner.generation != generation {
            debug!("Session {}: dropping stale connection", self.id);
            drain.abort();
            for task in tasks {
                task.abort();
            }
            return;
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<TransferEvent>();
        let outbound = self.outbound.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if outbound.send(ServerMessage::from(event)).is_err() {
                    break;
                }
            }
        }));

        let telnet = protocol == Protocol::Telnet;
        inner.telnet = telnet.then(TelnetFilter::new);
        inner.transfer = if telnet && self.config.transfer.enabled {
            let receiver: Box<dyn TransferHandler> = Box::new(LrzszReceiver::new(
                ReceiverOptions::from(&self.config.transfer),
                writer.clone(),
                events_tx,
            ));
            Some(receiver)
        } else {
            None
        };
        inner.suppress.close();
        inner.flush_pending = false;
        // Output before the stream starts is not part of the preamble.
        inner.pipeline.set_charset(target.charset, Instant::now());
        inner.remote_label = Some(format!("{}://{}:{}", protocol, target.host, target.port));
        inner.state = SessionState::Streaming;

        self.send(ServerMessage::Connected {
            message: format!("Connected to {}:{}", target.host, target.port),
        });

        let session = Arc::clone(self);
        tasks.push(tokio::spawn(session.read_loop(inbound, generation)));
        inner.remote = Some(RemoteHandles {
            protocol,
            writer,
            resize,
            drain,
            tasks,
        });
    }

    async fn read_loop(self: Arc<Self>, mut inbound: mpsc::Receiver<Vec<u8>>, generation: u64) {
        let read_timeout = Duration::from_secs(self.config.remote.read_timeout_secs);
        loop {
            match tokio::time::timeout(read_timeout, inbound.recv()).await {
                Ok(Some(chunk)) => self.handle_chunk(generation, &chunk),
                Ok(None) => {
                    info!("Session {}: remote closed the connection", self.id);
                    break;
                }
                Err(_) => {
                    warn!("Session {}: remote read timed out", self.id);
                    break;
                }
            }
        }
        self.disconnect_remote(generation);
    }

    fn handle_chunk(self: &Arc<Self>, generation: u64, chunk: &[u8]) {
        let now = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.closed || inner.generation != generation {
            return;
        }
        let Some(writer) = inner.remote.as_ref().map(|r| r.writer.clone()) else {
            return;
        };

        let clean = match inner.telnet.as_mut() {
            Some(filter) => {
                let identity = TerminalIdentity {
                    terminal_type: inner.pipeline.charset().terminal_type(),
                    size: inner.pipeline.size(),
                };
                let filtered = filter.filter(chunk, &identity);
                if !filtered.replies.is_empty() {
                    let _ = writer.send(filtered.replies);
                }
                filtered.data
            }
            None => chunk.to_vec(),
        };

        let (data, consumed) = match inner.transfer.as_mut() {
            Some(transfer) => transfer.process_data(&clean),
            None => (clean, false),
        };
        if consumed {
            inner.suppress.close();
        } else {
            if inner.suppress.observe(&data, now) {
                debug!("Session {}: transfer announced, holding output", self.id);
            }
            if inner.suppress.is_open(now) {
                return;
            }
        }
        if data.is_empty() {
            return;
        }

        let out = inner.pipeline.process(&data, now);
        if let Some(charset) = out.charset_changed {
            info!("Session {}: remote switched charset to {}", self.id, charset);
        }
        self.emit(&writer, out);
        self.schedule_preamble_flush(inner, generation);
    }

    fn emit(&self, writer: &mpsc::UnboundedSender<Vec<u8>>, out: DisplayOutput) {
        if !out.replies.is_empty() {
            let _ = writer.send(out.replies);
        }
        for payload in out.music {
            self.send(ServerMessage::Music { payload });
        }
        if !out.display.is_empty() {
            self.send(ServerMessage::data(&out.display));
        }
    }

    fn schedule_preamble_flush(self: &Arc<Self>, inner: &mut Inner, generation: u64) {
        if inner.flush_pending {
            return;
        }
        let Some(deadline) = inner.pipeline.preamble_deadline() else {
            return;
        };
        inner.flush_pending = true;

        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
            session.flush_preamble(generation);
        });
    }

    fn flush_preamble(self: &Arc<Self>, generation: u64) {
        let mut guard = self.lock();
        let inner = &mut *guard;
        if inner.closed || inner.generation != generation {
            return;
        }
        inner.flush_pending = false;
        let Some(writer) = inner.remote.as_ref().map(|r| r.writer.clone()) else {
            return;
        };

        if let Some(out) = inner.pipeline.expire_preamble(Instant::now()) {
            debug!("Session {}: preamble time limit reached", self.id);
            self.emit(&writer, out);
        }
        // Re-armed by a charset switch, possibly one in the released bytes.
        self.schedule_preamble_flush(inner, generation);
    }

    /// Send browser keystrokes to the remote.
    pub fn send_input(&self, data: &str) {
        let inner = self.lock();
        let Some(remote) = inner.remote.as_ref() else {
            return;
        };
        let mut bytes = encode_input(data, inner.pipeline.charset());
        if remote.protocol == Protocol::Telnet {
            bytes = escape_iac(&bytes);
        }
        if remote.writer.send(bytes).is_err() {
            debug!("Session {}: remote writer closed", self.id);
        }
    }

    /// Apply a browser resize.
    ///
    /// SSH sessions follow any positive size. The display pipeline and
    /// telnet NAWS only take the fixed sizes the browser terminal offers.
    pub fn resize(&self, cols: u16, rows: u16) {
        let size = TerminalSize::new(cols, rows);
        let mut inner = self.lock();

        if cols > 0 && rows > 0 {
            if let Some(tx) = inner.remote.as_ref().and_then(|r| r.resize.as_ref()) {
                let _ = tx.send(size);
            }
        }

        if !size.is_allowed() {
            debug!("Session {}: ignoring resize to {}x{}", self.id, cols, rows);
            return;
        }
        inner.pipeline.resize(size);
        Self::announce_naws(&inner);
    }

    /// Switch charset on browser request.
    pub fn set_charset(self: &Arc<Self>, name: &str) {
        let charset = match name.parse::<Charset>() {
            Ok(charset) => charset,
            Err(e) => {
                self.send(ServerMessage::error(e));
                return;
            }
        };

        let mut guard = self.lock();
        let inner = &mut *guard;
        let switch = inner.pipeline.set_charset(charset, Instant::now());
        info!(
            "Session {}: charset set to {} ({}x{})",
            self.id, charset, switch.size.cols, switch.size.rows
        );
        if switch.size_changed {
            if let Some(tx) = inner.remote.as_ref().and_then(|r| r.resize.as_ref()) {
                let _ = tx.send(switch.size);
            }
            Self::announce_naws(inner);
        }
    }

    fn announce_naws(inner: &Inner) {
        let negotiated = inner.telnet.as_ref().is_some_and(|t| t.state().naws);
        if let (true, Some(remote)) = (negotiated, inner.remote.as_ref()) {
            let _ = remote.writer.send(naws_payload(inner.pipeline.size()).to_vec());
        }
    }

    /// Abort a running file transfer.
    pub fn cancel_download(&self) {
        let mut inner = self.lock();
        if let Some(transfer) = inner.transfer.as_mut() {
            if transfer.is_active() {
                info!("Session {}: transfer cancelled by user", self.id);
                transfer.cancel();
            }
        }
        inner.suppress.close();
    }

    /// End the remote connection opened as `generation`, if still live.
    fn disconnect_remote(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.remote.is_none() {
            return;
        }
        self.teardown_remote(&mut inner);
        self.send(ServerMessage::Disconnected);
    }

    fn teardown_remote(&self, inner: &mut Inner) {
        inner.state = SessionState::Disconnecting;
        if let Some(mut transfer) = inner.transfer.take() {
            transfer.cancel();
        }
        inner.telnet = None;
        inner.suppress.close();
        if let Some(remote) = inner.remote.take() {
            remote.close();
        }
        if let Some(label) = inner.remote_label.take() {
            info!("Session {}: disconnected from {}", self.id, label);
        }
        inner.state = SessionState::Idle;
    }

    /// Shut the whole session down. Safe to call more than once.
    ///
    /// The final `disconnected` is queued before the keepalive is signalled,
    /// so the browser writer flushes it on its way out.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;

        let had_remote = inner.remote.is_some();
        if had_remote {
            self.send(ServerMessage::Disconnected);
        }
        let _ = self.shutdown_tx.send(true);
        if had_remote {
            self.teardown_remote(&mut inner);
        }
        inner.state = SessionState::Idle;
        info!("Session {} closed", self.id);
    }
}

/// Registry of live sessions.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<Session>>>>,
}

impl SessionManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session.
    pub async fn register(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id(), Arc::clone(session));
        debug!(
            "Registered session {} (total: {})",
            session.id(),
            sessions.len()
        );
    }

    /// Unregister a session.
    pub async fn unregister(&self, session_id: Uuid) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(&session_id).is_some() {
            debug!(
                "Unregistered session {} (total: {})",
                session_id,
                sessions.len()
            );
        }
    }

    /// Get the number of active sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Get information about all sessions.
    pub async fn list(&self) -> Vec<SessionInfo> {
        self.sessions.read().await.values().map(|s| s.info()).collect()
    }

    /// Get information about a specific session.
    pub async fn get(&self, session_id: Uuid) -> Option<SessionInfo> {
        self.sessions.read().await.get(&session_id).map(|s| s.info())
    }

    /// Shut down every registered session.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{ApprovedEndpoint, StaticSource, BLOCKED_MESSAGE};

    fn test_session(
        entries: Vec<ApprovedEndpoint>,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<ServerMessage>) {
        let directory = Arc::new(Directory::new(StaticSource::new(entries)));
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(
            "127.0.0.1:50000".parse().unwrap(),
            Arc::new(Config::default()),
            directory,
            tx,
        );
        (session, rx)
    }

    #[tokio::test]
    async fn test_new_session_is_idle() {
        let (session, _rx) = test_session(Vec::new());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.charset(), Charset::Cp437);
        assert_eq!(session.size(), TerminalSize::new(80, 25));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_unapproved_connect_rejected() {
        let (session, mut rx) = test_session(Vec::new());
        session
            .connect(ConnectRequest {
                host: "evil.example.com".to_string(),
                port: 23,
                protocol: Protocol::Telnet,
                charset: None,
                credentials: None,
            })
            .await;

        assert_eq!(rx.recv().await.unwrap(), ServerMessage::error(BLOCKED_MESSAGE));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_endpoint_id() {
        let (session, mut rx) = test_session(Vec::new());
        session.connect_to_endpoint("nowhere", None).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            ServerMessage::error("endpoint nowhere not found")
        );
    }

    #[tokio::test]
    async fn test_set_charset() {
        let (session, mut rx) = test_session(Vec::new());
        session.set_charset("ATASCII");
        assert_eq!(session.charset(), Charset::Atascii);
        assert_eq!(session.size(), TerminalSize::new(40, 25));

        session.set_charset("EBCDIC");
        assert!(matches!(rx.recv().await.unwrap(), ServerMessage::Error { .. }));
        assert_eq!(session.charset(), Charset::Atascii);
    }

    #[tokio::test]
    async fn test_resize_only_allowed_sizes() {
        let (session, _rx) = test_session(Vec::new());
        session.resize(100, 31);
        assert_eq!(session.size(), TerminalSize::new(100, 31));
        session.resize(132, 43);
        assert_eq!(session.size(), TerminalSize::new(100, 31));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let (session, _rx) = test_session(Vec::new());
        let closed = session.closed();
        session.shutdown();
        session.shutdown();
        assert!(session.is_closed());
        assert!(*closed.borrow());
    }

    #[tokio::test]
    async fn test_session_manager() {
        let manager = SessionManager::new();
        let (first, _rx1) = test_session(Vec::new());
        let (second, _rx2) = test_session(Vec::new());

        manager.register(&first).await;
        manager.register(&second).await;
        assert_eq!(manager.count().await, 2);

        let info = manager.get(first.id()).await.unwrap();
        assert_eq!(info.state, SessionState::Idle);
        assert!(info.remote.is_none());

        manager.unregister(first.id()).await;
        assert_eq!(manager.count().await, 1);
        assert!(manager.get(first.id()).await.is_none());

        manager.shutdown_all().await;
        assert!(second.is_closed());
    }
}
