//! Approved-endpoint directory.
//!
//! The bridge only dials hosts listed in the directory. Entries come from an
//! [`EndpointSource`] and are cached in memory; a connect request is checked
//! against the cache before any network activity.
//!
//! The file format is a list of `[[endpoint]]` tables:
//!
//! ```toml
//! [[endpoint]]
//! name = "Level 29"
//! address = "bbs.example.net:6400"
//! charset = "PETSCIIU"
//!
//! [[endpoint]]
//! name = "Modern Board"
//! address = "ssh.example.org:22"
//! protocol = "ssh"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::server::Protocol;
use crate::terminal::Charset;
use crate::{BridgeError, Result};

/// Port used when an address has none.
pub const DEFAULT_PORT: u16 = 23;

/// Message returned for hosts outside the directory.
pub const BLOCKED_MESSAGE: &str = "Connection blocked: Host not in approved list";

/// A host the bridge may connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovedEndpoint {
    /// Stable identifier for connect-by-id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Transport protocol.
    pub protocol: Protocol,
    /// Charset the BBS expects.
    pub charset: Charset,
}

impl ApprovedEndpoint {
    /// Whether this entry allows a connection to `host:port` over `protocol`.
    pub fn matches(&self, host: &str, port: u16, protocol: Protocol) -> bool {
        self.host.eq_ignore_ascii_case(host.trim()) && self.port == port && self.protocol == protocol
    }
}

/// Supplies directory entries.
pub trait EndpointSource: Send + Sync {
    /// Load the current entries.
    fn load(&self) -> Result<Vec<ApprovedEndpoint>>;
}

/// A fixed list of entries.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    entries: Vec<ApprovedEndpoint>,
}

impl StaticSource {
    /// Create a source serving `entries`.
    pub fn new(entries: Vec<ApprovedEndpoint>) -> Self {
        Self { entries }
    }
}

impl EndpointSource for StaticSource {
    fn load(&self) -> Result<Vec<ApprovedEndpoint>> {
        Ok(self.entries.clone())
    }
}

/// Entries read from a TOML file.
#[derive(Debug, Clone)]
pub struct TomlFileSource {
    path: PathBuf,
}

impl TomlFileSource {
    /// Create a source reading `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl EndpointSource for TomlFileSource {
    fn load(&self) -> Result<Vec<ApprovedEndpoint>> {
        let content = std::fs::read_to_string(&self.path)?;
        parse_directory(&content)
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryFile {
    #[serde(default)]
    endpoint: Vec<EndpointRow>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EndpointRow {
    id: Option<String>,
    name: String,
    address: String,
    protocol: Option<String>,
    charset: Option<String>,
}

/// Parse a directory file. Rows that cannot be used are skipped with a
/// warning; a file that is not valid TOML is an error.
pub fn parse_directory(content: &str) -> Result<Vec<ApprovedEndpoint>> {
    let file: DirectoryFile = toml::from_str(content)
        .map_err(|e| BridgeError::Config(format!("directory parse error: {e}")))?;

    let mut entries: Vec<ApprovedEndpoint> = Vec::with_capacity(file.endpoint.len());
    for (index, row) in file.endpoint.into_iter().enumerate() {
        match endpoint_from_row(row) {
            Ok(entry) if entries.iter().any(|e| e.id == entry.id) => {
                warn!("Skipping directory row {}: duplicate id {}", index + 1, entry.id);
            }
            Ok(entry) => entries.push(entry),
            Err(reason) => warn!("Skipping directory row {}: {}", index + 1, reason),
        }
    }
    Ok(entries)
}

fn endpoint_from_row(row: EndpointRow) -> std::result::Result<ApprovedEndpoint, String> {
    let name = row.name.trim().to_string();
    let address = row.address.trim();
    if name.is_empty() || address.is_empty() {
        return Err("name and address are required".to_string());
    }

    let (host, port) = parse_address(address)?;
    let protocol = match row.protocol.as_deref() {
        Some(p) => p.parse()?,
        None => Protocol::Telnet,
    };
    let charset = match row.charset.as_deref() {
        Some(c) => c.parse()?,
        None => Charset::default(),
    };
    let id = match row.id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => slugify(&name),
    };
    if id.is_empty() {
        return Err(format!("cannot derive an id from {name:?}"));
    }

    Ok(ApprovedEndpoint {
        id,
        name,
        host,
        port,
        protocol,
        charset,
    })
}

/// Split `host` or `host:port`, defaulting the port to [`DEFAULT_PORT`].
pub fn parse_address(address: &str) -> std::result::Result<(String, u16), String> {
    let (host, port) = match address.rsplit_once(':') {
        Some((host, "")) => (host, DEFAULT_PORT),
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| format!("invalid port in {address:?}"))?;
            (host, port)
        }
        None => (address, DEFAULT_PORT),
    };
    if host.is_empty() || port == 0 {
        return Err(format!("invalid address {address:?}"));
    }
    Ok((host.to_string(), port))
}

/// URL-friendly identifier from a display name: lowercase ASCII letters and
/// digits separated by single hyphens.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '_' || c == '-' {
            pending_hyphen = true;
        }
    }
    slug
}

/// Cached view of an [`EndpointSource`].
pub struct Directory {
    source: Box<dyn EndpointSource>,
    entries: RwLock<Vec<ApprovedEndpoint>>,
}

impl Directory {
    /// Create an empty directory over `source`. Call [`Directory::refresh`]
    /// to populate it, or let the first authorization do so.
    pub fn new(source: impl EndpointSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Reload entries from the source. Returns the number of entries.
    pub async fn refresh(&self) -> Result<usize> {
        let loaded = self.source.load()?;
        let count = loaded.len();
        *self.entries.write().await = loaded;
        debug!("Directory refreshed: {} entries", count);
        Ok(count)
    }

    /// Current entries.
    pub async fn entries(&self) -> Vec<ApprovedEndpoint> {
        self.entries.read().await.clone()
    }

    /// Look up an entry by id.
    pub async fn find(&self, id: &str) -> Result<ApprovedEndpoint> {
        self.ensure_loaded().await;
        self.entries
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound(format!("endpoint {id}")))
    }

    /// Check a connection request against the directory.
    ///
    /// Fails closed: an empty or unreadable directory blocks everything.
    pub async fn authorize(
        &self,
        host: &str,
        port: u16,
        protocol: Protocol,
    ) -> Result<ApprovedEndpoint> {
        self.ensure_loaded().await;

        let found = self
            .entries
            .read()
            .await
            .iter()
            .find(|e| e.matches(host, port, protocol))
            .cloned();

        match found {
            Some(entry) => {
                info!("SECURITY: Approved connection to {}://{}:{}", protocol, host, port);
                Ok(entry)
            }
            None => {
                warn!(
                    "SECURITY: Blocked unauthorized connection attempt to {}://{}:{}",
                    protocol, host, port
                );
                Err(BridgeError::Unauthorized(BLOCKED_MESSAGE.to_string()))
            }
        }
    }

    async fn ensure_loaded(&self) {
        if !self.entries.read().await.is_empty() {
            return;
        }
        if let Err(e) = self.refresh().await {
            warn!("SECURITY: failed to refresh approved list: {}", e);
        }
    }
}
