//! PETSCII and ATASCII control code translation.
//!
//! Legacy BBSes drive the screen with single-byte control codes instead of
//! ANSI sequences. [`translate`] rewrites those codes as ANSI and leaves the
//! remaining bytes as text segments tagged with the charset that was active
//! when they arrived, so an in-band case switch affects only the bytes that
//! follow it.

use super::{from_unicode, Charset};

/// Maximum number of line breaks produced by a run of consecutive carriage
/// returns. Redundant CRs from BBS software collapse into a single line
/// break; a CR already followed by LF is not doubled.
pub const MAX_CONSECUTIVE_CR: usize = 1;

const CLEAR_HOME: &[u8] = b"\x1b[2J\x1b[H";
const HOME: &[u8] = b"\x1b[H";
const ERASE_PREVIOUS: &[u8] = b"\x08 \x08";

/// PETSCII color codes and their SGR foreground numbers. Both case sets use
/// the same palette.
const PETSCII_COLORS: [(u8, u8); 16] = [
    (0x05, 97), // white
    (0x1C, 31), // red
    (0x1E, 32), // green
    (0x1F, 34), // blue
    (0x81, 33), // orange
    (0x90, 30), // black
    (0x95, 33), // brown
    (0x96, 91), // light red
    (0x97, 90), // dark grey
    (0x98, 37), // grey
    (0x99, 92), // light green
    (0x9A, 94), // light blue
    (0x9B, 37), // light grey
    (0x9C, 35), // purple
    (0x9E, 93), // yellow
    (0x9F, 96), // cyan
];

/// What a single legacy byte turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Emit a fixed ANSI or control sequence.
    Emit(&'static [u8]),
    /// Emit `ESC [ n m`.
    Color(u8),
    /// A carriage return, subject to the CR run policy.
    CarriageReturn,
    /// Render the byte as a glyph.
    Glyph,
    /// Emit nothing.
    Nothing,
}

/// A piece of translated output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Terminal-ready bytes (ANSI sequences and ASCII controls).
    Control(Vec<u8>),
    /// Legacy bytes to be rendered with the given charset's glyph table.
    Text { charset: Charset, bytes: Vec<u8> },
}

/// Output of [`translate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Output segments in stream order.
    pub segments: Vec<Segment>,
    /// Charset in effect after the chunk.
    pub charset: Charset,
    /// Offset of the last in-band charset switch code, if any.
    pub switched_at: Option<usize>,
    /// Length of the carriage return run the chunk ends with, counting a
    /// run carried in from earlier chunks.
    pub trailing_crs: usize,
}

impl Translation {
    /// Concatenate all segments into one byte sequence, leaving text bytes
    /// unconverted.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for segment in &self.segments {
            match segment {
                Segment::Control(bytes) | Segment::Text { bytes, .. } => {
                    out.extend_from_slice(bytes)
                }
            }
        }
        out
    }

    fn push_control(&mut self, bytes: &[u8]) {
        if let Some(Segment::Control(last)) = self.segments.last_mut() {
            last.extend_from_slice(bytes);
        } else {
            self.segments.push(Segment::Control(bytes.to_vec()));
        }
    }

    fn push_text(&mut self, charset: Charset, byte: u8) {
        if let Some(Segment::Text { charset: c, bytes }) = self.segments.last_mut() {
            if *c == charset {
                bytes.push(byte);
                return;
            }
        }
        self.segments.push(Segment::Text {
            charset,
            bytes: vec![byte],
        });
    }
}

/// Transition function for one byte: the action and the charset that
/// applies to the following byte.
pub fn step(byte: u8, charset: Charset) -> (Action, Charset) {
    match charset {
        Charset::PetsciiUpper | Charset::PetsciiLower => petscii_step(byte, charset),
        Charset::Atascii => (atascii_action(byte), charset),
        Charset::Cp437 | Charset::Utf8 => (Action::Glyph, charset),
    }
}

fn petscii_step(byte: u8, charset: Charset) -> (Action, Charset) {
    if let Some(&(_, sgr)) = PETSCII_COLORS.iter().find(|(code, _)| *code == byte) {
        return (Action::Color(sgr), charset);
    }
    let action = match byte {
        0x0E => return (Action::Nothing, Charset::PetsciiLower),
        0x8E => return (Action::Nothing, Charset::PetsciiUpper),
        0x0F => Action::Nothing,
        0x07 => Action::Emit(b"\x07"),
        0x09 => Action::Emit(b"\t"),
        0x0A => Action::Emit(b"\n"),
        0x0D | 0x8D => Action::CarriageReturn,
        0x11 => Action::Emit(b"\x1b[B"),
        0x91 => Action::Emit(b"\x1b[A"),
        0x1D => Action::Emit(b"\x1b[C"),
        0x9D => Action::Emit(b"\x1b[D"),
        0x13 => Action::Emit(HOME),
        0x93 => Action::Emit(CLEAR_HOME),
        0x12 => Action::Emit(b"\x1b[7m"),
        0x92 => Action::Emit(b"\x1b[27m"),
        0x14 => Action::Emit(ERASE_PREVIOUS),
        _ => Action::Glyph,
    };
    (action, charset)
}

fn atascii_action(byte: u8) -> Action {
    match byte {
        0x9B => Action::Emit(b"\r\n"),
        0x7D | 0x0C => Action::Emit(CLEAR_HOME),
        0x1C => Action::Emit(b"\x1b[A"),
        0x1D => Action::Emit(b"\x1b[B"),
        0x1E => Action::Emit(b"\x1b[D"),
        0x1F => Action::Emit(b"\x1b[C"),
        0x7E => Action::Emit(ERASE_PREVIOUS),
        0x7F => Action::Emit(b"\t"),
        0xFD => Action::Emit(b"\x07"),
        _ => Action::Glyph,
    }
}

/// Translate a chunk of legacy bytes starting in `charset`.
pub fn translate(chunk: &[u8], charset: Charset) -> Translation {
    translate_continuing(chunk, charset, 0)
}

/// Translate a chunk that follows one ending in `carried_crs` carriage
/// returns, so a CR run or CR LF pair split between chunks breaks the line
/// only once.
pub fn translate_continuing(chunk: &[u8], charset: Charset, carried_crs: usize) -> Translation {
    let mut out = Translation {
        segments: Vec::new(),
        charset,
        switched_at: None,
        trailing_crs: 0,
    };

    let mut i = 0;
    if carried_crs > 0 && chunk.first() == Some(&b'\n') {
        i = 1;
    }

    while i < chunk.len() {
        let (action, next) = step(chunk[i], out.charset);
        match action {
            Action::Emit(bytes) => out.push_control(bytes),
            Action::Color(sgr) => out.push_control(format!("\x1b[{sgr}m").as_bytes()),
            Action::Glyph => out.push_text(out.charset, chunk[i]),
            Action::Nothing => {}
            Action::CarriageReturn => {
                let run = chunk[i..]
                    .iter()
                    .take_while(|&&b| step(b, out.charset).0 == Action::CarriageReturn)
                    .count();
                let leading = if i == 0 { carried_crs } else { 0 };
                let followed_by_lf = chunk.get(i + run) == Some(&b'\n');
                let emitted = leading.min(MAX_CONSECUTIVE_CR);
                let breaks = (leading + run).min(MAX_CONSECUTIVE_CR);
                for n in emitted..breaks {
                    if n + 1 == breaks && followed_by_lf {
                        out.push_control(b"\r");
                    } else {
                        out.push_control(b"\r\n");
                    }
                }
                if i + run == chunk.len() {
                    out.trailing_crs = leading + run;
                }
                i += run;
                // The line already broke in the previous chunk.
                if emitted == breaks && followed_by_lf {
                    i += 1;
                }
                continue;
            }
        }
        if next != out.charset {
            out.switched_at = Some(i);
        }
        out.charset = next;
        i += 1;
    }

    out
}

/// Whether a chunk contains a byte that clears or homes the screen in
/// `charset`.
pub fn contains_screen_reset(chunk: &[u8], charset: Charset) -> bool {
    match charset {
        Charset::PetsciiUpper | Charset::PetsciiLower => {
            chunk.iter().any(|&b| b == 0x93 || b == 0x13)
        }
        Charset::Atascii => chunk.iter().any(|&b| b == 0x7D || b == 0x0C),
        Charset::Cp437 | Charset::Utf8 => false,
    }
}

/// Encode browser keystrokes for the remote charset.
///
/// DEL becomes BS, or the native delete code on PETSCII. For
/// legacy charsets the ANSI cursor keys, home and clear-screen become the
/// native control codes. Everything else goes through [`from_unicode`].
pub fn encode_input(input: &str, charset: Charset) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut chars = input.char_indices();
    while let Some((i, c)) = chars.next() {
        if charset.is_legacy() {
            if let Some((code, len)) = legacy_key(&bytes[i..], charset) {
                out.push(code);
                // Key sequences are ASCII, one char per byte.
                for _ in 1..len {
                    chars.next();
                }
                continue;
            }
        }
        match c {
            '\x7f' | '\x08' if charset.is_petscii() => out.push(0x14),
            '\x7f' => out.push(0x08),
            _ => {
                let mut buf = [0u8; 4];
                out.extend(from_unicode(c.encode_utf8(&mut buf), charset));
            }
        }
    }
    out
}

fn legacy_key(input: &[u8], charset: Charset) -> Option<(u8, usize)> {
    let (name, len) = match input {
        [0x1B, b'[' | b'O', k @ b'A'..=b'D', ..] => (*k, 3),
        [0x1B, b'[', b'H', ..] | [0x1B, b'O', b'H', ..] => (b'H', 3),
        [0x1B, b'[', b'1', b'~', ..] => (b'H', 4),
        [0x1B, b'[', b'2', b'J', ..] => (b'J', 4),
        [0x1B, b'[', b'J', ..] => (b'J', 3),
        _ => return None,
    };
    let code = if charset.is_petscii() {
        match name {
            b'A' => 0x91,
            b'B' => 0x11,
            b'C' => 0x1D,
            b'D' => 0x9D,
            b'H' => 0x13,
            _ => 0x93,
        }
    } else {
        match name {
            b'A' => 0x1C,
            b'B' => 0x1D,
            b'C' => 0x1F,
            b'D' => 0x1E,
            b'H' => return None,
            _ => 0x7D,
        }
    };
    Some((code, len))
}
