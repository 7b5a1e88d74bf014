//! Remote side of the bridge.
//!
//! This module provides telnet option handling, telnet/SSH dialing and the
//! per-browser session orchestrator.

pub mod remote;
mod session;
pub mod telnet;

pub use remote::{dial_ssh, dial_telnet, Credentials, Protocol, RemoteLink};
pub use session::{ConnectRequest, Session, SessionInfo, SessionManager, SessionState};
pub use telnet::{
    escape_iac, iac, naws_payload, option, Filtered, NegotiationState, TelnetFilter,
    TerminalIdentity,
};
