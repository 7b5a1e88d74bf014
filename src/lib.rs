//! bbs-bridge - browser terminal bridge to telnet and SSH BBSes
//!
//! Relays a browser terminal to a remote bulletin board system, converting
//! legacy 8-bit charsets (CP437, PETSCII, ATASCII) to ANSI/UTF-8 and
//! handing ZMODEM downloads to an external receiver.

pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod server;
pub mod terminal;
pub mod web;
pub mod zmodem;

pub use config::Config;
pub use directory::{ApprovedEndpoint, Directory, EndpointSource, StaticSource, TomlFileSource};
pub use error::{BridgeError, Result};
pub use server::{ConnectRequest, Credentials, Protocol, Session, SessionManager, SessionState};
pub use terminal::{Charset, DisplayPipeline, TerminalSize};
pub use web::WebServer;
