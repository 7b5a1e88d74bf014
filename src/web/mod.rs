//! Browser-facing web module.
//!
//! This module provides the HTTP server, the health endpoint and the
//! WebSocket interface that browser terminals connect to.

pub mod router;
pub mod server;
pub mod ws;

pub use router::create_router;
pub use server::WebServer;
