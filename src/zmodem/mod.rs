//! ZMODEM file transfer bridge.
//!
//! The bridge watches the telnet-clean inbound stream for a ZMODEM start
//! and then hands the stream to a receiver until the transfer ends. The
//! protocol itself is left to the external `rz` program.

mod detector;
mod progress;
mod receiver;

pub use detector::{
    find_signature, has_suppress_trigger, Lookback, SuppressWindow, LOOKBACK_KEEP,
    LOOKBACK_LIMIT, SIGNATURES, SUPPRESS_TRIGGERS,
};
pub use progress::{parse_progress, Progress};
pub use receiver::{LrzszReceiver, ReceiverOptions, TransferEvent, CANCEL_SEQUENCE};

/// Errors that can occur while starting or running a transfer.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// I/O error (temporary directory, pipes).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The receiver process could not be started.
    #[error("failed to start receiver: {0}")]
    Spawn(String),
}

/// Takes exclusive ownership of the inbound stream during a transfer.
///
/// Implementations need not run an external process.
pub trait TransferHandler: Send {
    /// Offer a telnet-clean chunk.
    ///
    /// Returns the bytes left for display and whether the chunk was
    /// consumed. When `consumed` is true the caller must not display the
    /// chunk; any returned bytes are a remainder that precedes the transfer.
    fn process_data(&mut self, data: &[u8]) -> (Vec<u8>, bool);

    /// Abort the transfer. Does nothing when no transfer is running.
    fn cancel(&mut self);

    /// Whether a transfer owns the stream.
    fn is_active(&self) -> bool;
}
