//! Outbound connections to remote BBSes.
//!
//! Both transports are wrapped in a [`RemoteLink`]: a queue of inbound
//! chunks plus channels for outbound bytes and (SSH only) window size
//! changes. Background pump tasks own the sockets, so the session never
//! holds a lock across network I/O.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use russh::client;
use russh::ChannelMsg;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::terminal::TerminalSize;
use crate::{BridgeError, Result};

/// Read buffer size for remote sockets.
pub const READ_BUFFER_SIZE: usize = 8192;

/// Inbound chunks buffered between the pump and the session.
const INBOUND_QUEUE: usize = 64;

/// Transport protocol for a remote BBS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Telnet (RFC 854).
    #[default]
    Telnet,
    /// SSH with a password-authenticated shell.
    Ssh,
}

impl Protocol {
    /// Protocol name as used in messages and URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Telnet => "telnet",
            Protocol::Ssh => "ssh",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "telnet" => Ok(Protocol::Telnet),
            "ssh" => Ok(Protocol::Ssh),
            _ => Err(format!("unknown protocol: {s}")),
        }
    }
}

/// SSH login.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

/// A live connection to a remote BBS.
#[derive(Debug)]
pub struct RemoteLink {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Chunks read from the remote. Closes on EOF or read error.
    pub inbound: mpsc::Receiver<Vec<u8>>,
    /// Raw bytes for the remote. Dropping every sender closes the
    /// connection's write side.
    pub writer: mpsc::UnboundedSender<Vec<u8>>,
    /// Window size changes (SSH only).
    pub resize: Option<mpsc::UnboundedSender<TerminalSize>>,
    /// The task that writes to the remote. It finishes once every writer
    /// sender is gone and the queued bytes are sent.
    pub drain: JoinHandle<()>,
    /// Other pump tasks.
    pub tasks: Vec<JoinHandle<()>>,
}

/// Open a telnet connection.
pub async fn dial_telnet(host: &str, port: u16, connect_timeout: Duration) -> Result<RemoteLink> {
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| BridgeError::Connection(format!("connection to {host}:{port} timed out")))?
        .map_err(|e| BridgeError::Connection(format!("{host}:{port}: {e}")))?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY: {}", e);
    }
    info!("Connected to telnet://{}:{}", host, port);

    let (read_half, write_half) = stream.into_split();
    let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
    let (writer, writer_rx) = mpsc::unbounded_channel();

    let drain = tokio::spawn(write_pump(write_half, writer_rx));
    let tasks = vec![tokio::spawn(read_pump(read_half, inbound_tx))];

    Ok(RemoteLink {
        protocol: Protocol::Telnet,
        inbound,
        writer,
        resize: None,
        drain,
        tasks,
    })
}

async fn read_pump(mut reader: impl AsyncRead + Unpin, inbound: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("Remote closed the connection");
                return;
            }
            Ok(n) => {
                if inbound.send(buf[..n].to_vec()).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("Remote read error: {}", e);
                return;
            }
        }
    }
}

async fn write_pump(mut writer: impl AsyncWrite + Unpin, mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            debug!("Remote write error: {}", e);
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// SSH client callbacks. BBS host keys are not pinned.
struct SshClient;

impl client::Handler for SshClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Open an SSH shell with a pseudo-terminal of `size`.
pub async fn dial_ssh(
    host: &str,
    port: u16,
    credentials: &Credentials,
    term: &str,
    size: TerminalSize,
    connect_timeout: Duration,
) -> Result<RemoteLink> {
    let config = Arc::new(client::Config::default());
    let mut handle = tokio::time::timeout(
        connect_timeout,
        client::connect(config, (host, port), SshClient),
    )
    .await
    .map_err(|_| BridgeError::Connection(format!("connection to {host}:{port} timed out")))??;

    let auth = handle
        .authenticate_password(credentials.username.clone(), credentials.password.clone())
        .await?;
    if !auth.success() {
        return Err(BridgeError::Ssh(format!(
            "authentication failed for {}",
            credentials.username
        )));
    }

    let channel = handle.channel_open_session().await?;
    channel
        .request_pty(
            false,
            term,
            u32::from(size.cols),
            u32::from(size.rows),
            0,
            0,
            &[],
        )
        .await?;
    channel.request_shell(false).await?;
    info!("Connected to ssh://{}@{}:{}", credentials.username, host, port);

    let (inbound_tx, inbound) = mpsc::channel(INBOUND_QUEUE);
    let (writer, writer_rx) = mpsc::unbounded_channel();
    let (resize, resize_rx) = mpsc::unbounded_channel();

    let drain = tokio::spawn(ssh_pump(handle, channel, inbound_tx, writer_rx, resize_rx));

    Ok(RemoteLink {
        protocol: Protocol::Ssh,
        inbound,
        writer,
        resize: Some(resize),
        drain,
        tasks: Vec::new(),
    })
}

async fn ssh_pump(
    handle: client::Handle<SshClient>,
    mut channel: russh::Channel<client::Msg>,
    inbound: mpsc::Sender<Vec<u8>>,
    mut writer: mpsc::UnboundedReceiver<Vec<u8>>,
    mut resize: mpsc::UnboundedReceiver<TerminalSize>,
) {
    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    if inbound.send(data.to_vec()).await.is_err() {
                        break;
                    }
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    debug!("SSH channel closed");
                    break;
                }
                Some(_) => {}
            },
            bytes = writer.recv() => match bytes {
                Some(bytes) => {
                    if let Err(e) = channel.data(&bytes[..]).await {
                        debug!("SSH write error: {}", e);
                        break;
                    }
                }
                None => break,
            },
            Some(size) = resize.recv() => {
                if let Err(e) = channel
                    .window_change(u32::from(size.cols), u32::from(size.rows), 0, 0)
                    .await
                {
                    debug!("SSH window change failed: {}", e);
                }
            }
        }
    }

    let _ = channel.close().await;
    let _ = handle
        .disconnect(russh::Disconnect::ByApplication, "", "en")
        .await;
}
