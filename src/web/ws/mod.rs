//! WebSocket module for browser terminals.
//!
//! This module provides the `/ws` endpoint and its JSON message types.

pub mod messages;
pub mod terminal;

pub use messages::{ClientMessage, ServerMessage};
pub use terminal::{terminal_ws_handler, TerminalWsState};
