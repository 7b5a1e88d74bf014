//! ZMODEM start detection.

use std::time::{Duration, Instant};

/// Byte patterns that open a ZMODEM session from the sending side.
pub const SIGNATURES: [&[u8]; 5] = [
    b"**\x18B00", // ZRQINIT, hex header
    b"**\x18A",   // binary header
    b"**\x18C",   // binary header, CRC-32
    b"\x18B00",   // hex header without the leading pad
    b"\x18C\x04", // ZFILE frame
];

/// Patterns that announce a transfer is about to start. Display output is
/// held back for a short window after one of these.
pub const SUPPRESS_TRIGGERS: [&[u8]; 3] = [b"**\x18B00", b"*\x18C", b"rz\r"];

/// The lookback buffer is trimmed once it grows past this size.
pub const LOOKBACK_LIMIT: usize = 1024;

/// Bytes kept after trimming.
pub const LOOKBACK_KEEP: usize = 512;

/// Offset of the earliest signature in `data`.
///
/// The lowest offset wins regardless of pattern order, so a partial header
/// typed earlier in the stream cannot shadow the real one.
pub fn find_signature(data: &[u8]) -> Option<usize> {
    SIGNATURES
        .iter()
        .filter_map(|sig| find(data, sig))
        .min()
}

/// Whether `data` contains a suppression trigger.
pub fn has_suppress_trigger(data: &[u8]) -> bool {
    SUPPRESS_TRIGGERS.iter().any(|t| find(data, t).is_some())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Bounded history of recent stream bytes, so a signature split across
/// chunks is still found.
#[derive(Debug, Default)]
pub struct Lookback {
    buffer: Vec<u8>,
}

impl Lookback {
    /// Create an empty lookback buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the signature offset within the buffer,
    /// if one is now present.
    pub fn push(&mut self, chunk: &[u8]) -> Option<usize> {
        self.buffer.extend_from_slice(chunk);
        if let Some(start) = find_signature(&self.buffer) {
            return Some(start);
        }
        if self.buffer.len() > LOOKBACK_LIMIT {
            let cut = self.buffer.len() - LOOKBACK_KEEP;
            self.buffer.drain(..cut);
        }
        None
    }

    /// Take the buffered bytes, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Drop the buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Grace window that hides raw framing between a start announcement and
/// the receiver taking over.
#[derive(Debug)]
pub struct SuppressWindow {
    length: Duration,
    until: Option<Instant>,
}

impl SuppressWindow {
    /// Create a closed window of the given length.
    pub fn new(length: Duration) -> Self {
        Self {
            length,
            until: None,
        }
    }

    /// Open the window if `chunk` carries a trigger. Returns whether it
    /// opened.
    pub fn observe(&mut self, chunk: &[u8], now: Instant) -> bool {
        if self.length.is_zero() || !has_suppress_trigger(chunk) {
            return false;
        }
        self.until = Some(now + self.length);
        true
    }

    /// Whether display output should be held back at `now`.
    pub fn is_open(&mut self, now: Instant) -> bool {
        match self.until {
            Some(until) if now < until => true,
            Some(_) => {
                self.until = None;
                false
            }
            None => false,
        }
    }

    /// Close the window.
    pub fn close(&mut self) {
        self.until = None;
    }
}
