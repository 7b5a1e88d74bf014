//! Configuration module.
//!
//! Settings are read from a TOML file. Every field has a default, so a
//! partial file (or none at all) yields a usable configuration.

use std::path::Path;

use serde::Deserialize;

use crate::{BridgeError, Result};

/// HTTP / websocket server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whether to serve the browser client from `static_path`.
    #[serde(default)]
    pub serve_static: bool,
    /// Path to static files directory.
    #[serde(default = "default_static_path")]
    pub static_path: String,
    /// Interval between websocket keepalive pings in seconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Browser read deadline in seconds, refreshed by any inbound frame.
    #[serde(default = "default_client_read_timeout")]
    pub client_read_timeout_secs: u64,
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_static_path() -> String {
    "web/dist".to_string()
}

fn default_ping_interval() -> u64 {
    30
}

fn default_client_read_timeout() -> u64 {
    180
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            serve_static: false,
            static_path: default_static_path(),
            ping_interval_secs: default_ping_interval(),
            client_read_timeout_secs: default_client_read_timeout(),
            cors_origins: Vec::new(),
        }
    }
}

/// Remote (BBS side) connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Dial timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Stale-connection read deadline in seconds.
    #[serde(default = "default_remote_read_timeout")]
    pub read_timeout_secs: u64,
    /// Terminal type requested for SSH pseudo-terminals.
    #[serde(default = "default_ssh_term")]
    pub ssh_term: String,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_remote_read_timeout() -> u64 {
    120
}

fn default_ssh_term() -> String {
    "xterm-256color".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_remote_read_timeout(),
            ssh_term: default_ssh_term(),
        }
    }
}

/// Display pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TerminalConfig {
    /// Charset used when a connect request does not name one.
    #[serde(default = "default_charset")]
    pub default_charset: String,
    /// Minimum percentage of printable ASCII for the legacy glyph bypass.
    #[serde(default = "default_bypass_threshold")]
    pub ascii_bypass_threshold: u8,
    /// Answer device-attribute and status queries from the remote.
    #[serde(default = "default_true")]
    pub answer_queries: bool,
    /// Track the cursor position for position-report replies.
    #[serde(default = "default_true")]
    pub track_cursor: bool,
    /// Maximum time the legacy preamble is withheld, in milliseconds.
    #[serde(default = "default_preamble_timeout")]
    pub preamble_timeout_ms: u64,
    /// Maximum number of bytes the legacy preamble may hold.
    #[serde(default = "default_preamble_max_bytes")]
    pub preamble_max_bytes: usize,
    /// Display suppression window after a transfer signature, in seconds.
    #[serde(default = "default_suppress_window")]
    pub suppress_window_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_charset() -> String {
    "CP437".to_string()
}

fn default_bypass_threshold() -> u8 {
    85
}

fn default_preamble_timeout() -> u64 {
    1500
}

fn default_preamble_max_bytes() -> usize {
    8192
}

fn default_suppress_window() -> u64 {
    5
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            default_charset: default_charset(),
            ascii_bypass_threshold: default_bypass_threshold(),
            answer_queries: true,
            track_cursor: true,
            preamble_timeout_ms: default_preamble_timeout(),
            preamble_max_bytes: default_preamble_max_bytes(),
            suppress_window_secs: default_suppress_window(),
        }
    }
}

/// Binary file transfer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    /// Whether transfer detection is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// External receiver executable.
    #[serde(default = "default_receiver_command")]
    pub receiver_command: String,
    /// Arguments passed to the receiver.
    #[serde(default = "default_receiver_args")]
    pub receiver_args: Vec<String>,
    /// Cancel the transfer after this many idle seconds.
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,
    /// Cancel the transfer after this many seconds in total.
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u64,
    /// Watchdog tick interval in seconds.
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval_secs: u64,
    /// Grace period before collecting received files, in milliseconds.
    #[serde(default = "default_completion_delay")]
    pub completion_delay_ms: u64,
}

fn default_receiver_command() -> String {
    "rz".to_string()
}

fn default_receiver_args() -> Vec<String> {
    vec!["-v".to_string(), "-b".to_string()]
}

fn default_inactivity_timeout() -> u64 {
    90
}

fn default_max_duration() -> u64 {
    1800 // 30 minutes
}

fn default_watchdog_interval() -> u64 {
    5
}

fn default_completion_delay() -> u64 {
    500
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            receiver_command: default_receiver_command(),
            receiver_args: default_receiver_args(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            max_duration_secs: default_max_duration(),
            watchdog_interval_secs: default_watchdog_interval(),
            completion_delay_ms: default_completion_delay(),
        }
    }
}

/// Approved-endpoint directory configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Path to the directory TOML file.
    #[serde(default = "default_directory_path")]
    pub path: String,
}

fn default_directory_path() -> String {
    "bbs.toml".to_string()
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            path: default_directory_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path. Empty disables file output.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/bbs-bridge.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Remote connection configuration.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Display pipeline configuration.
    #[serde(default)]
    pub terminal: TerminalConfig,
    /// Transfer configuration.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Directory configuration.
    #[serde(default)]
    pub directory: DirectoryConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(BridgeError::Io)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| BridgeError::Config(format!("config parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.terminal.ascii_bypass_threshold > 100 {
            return Err(BridgeError::Config(
                "terminal.ascii_bypass_threshold must be between 0 and 100".to_string(),
            ));
        }
        if self.transfer.watchdog_interval_secs == 0 {
            return Err(BridgeError::Config(
                "transfer.watchdog_interval_secs must be positive".to_string(),
            ));
        }
        if self.server.ping_interval_secs == 0 {
            return Err(BridgeError::Config(
                "server.ping_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
