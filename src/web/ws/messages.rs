//! WebSocket message types for terminal sessions.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::directory::ApprovedEndpoint;
use crate::server::Protocol;
use crate::zmodem::TransferEvent;

/// Messages sent from the browser to the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Open a connection to an approved host.
    Connect {
        /// Host name.
        host: String,
        /// TCP port.
        port: u16,
        /// Transport protocol.
        #[serde(default)]
        protocol: Protocol,
        /// Charset to use; the approved entry's charset when absent.
        #[serde(default)]
        charset: Option<String>,
        /// SSH user name.
        #[serde(default)]
        username: Option<String>,
        /// SSH password.
        #[serde(default)]
        password: Option<String>,
    },
    /// Connect to a directory entry by id.
    ConnectToEndpoint {
        /// Directory entry id.
        id: String,
    },
    /// Request the approved directory.
    ListEndpoints,
    /// Keystrokes, as typed.
    Data {
        /// Input text.
        data: String,
    },
    /// Terminal size change.
    Resize {
        /// Columns.
        cols: u16,
        /// Rows.
        rows: u16,
    },
    /// Charset change.
    SetCharset {
        /// Charset name.
        charset: String,
    },
    /// Abort a running file transfer.
    CancelDownload,
    /// End the session.
    Disconnect,
}

/// Messages sent from the server to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// The remote connection is up.
    Connected {
        /// Status text.
        message: String,
    },
    /// Terminal output.
    Data {
        /// Base64-encoded UTF-8 bytes.
        data: String,
        /// Always `base64`.
        encoding: String,
    },
    /// The remote connection ended.
    Disconnected,
    /// Something went wrong.
    Error {
        /// Error text.
        message: String,
    },
    /// A file transfer started.
    DownloadStart {
        /// Status text.
        message: String,
    },
    /// Name of the file being received.
    DownloadInfo {
        /// File name.
        filename: String,
    },
    /// Transfer progress.
    DownloadProgress {
        /// Completion percentage.
        percent: u8,
    },
    /// A received file.
    FileDownload {
        /// File name.
        filename: String,
        /// Base64-encoded contents.
        data: String,
    },
    /// ANSI music string.
    Music {
        /// Music string, without introducer or terminator.
        payload: String,
    },
    /// Approved directory.
    Endpoints {
        /// Directory entries.
        entries: Vec<ApprovedEndpoint>,
    },
}

impl ServerMessage {
    /// Terminal output message for display bytes.
    pub fn data(bytes: &[u8]) -> Self {
        Self::Data {
            data: BASE64.encode(bytes),
            encoding: "base64".to_string(),
        }
    }

    /// Error message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl From<TransferEvent> for ServerMessage {
    fn from(event: TransferEvent) -> Self {
        match event {
            TransferEvent::Started => Self::DownloadStart {
                message: "ZMODEM transfer starting...".to_string(),
            },
            TransferEvent::FileInfo(filename) => Self::DownloadInfo { filename },
            TransferEvent::Progress(percent) => Self::DownloadProgress { percent },
            TransferEvent::File { name, data } => Self::FileDownload {
                filename: name,
                data: BASE64.encode(data),
            },
            TransferEvent::Failed(message) => Self::Error { message },
        }
    }
}
