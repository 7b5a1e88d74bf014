//! Charset conversion between remote byte streams and Unicode.
//!
//! The bridge speaks CP437 by default, raw UTF-8 for modern hosts, and the
//! PETSCII (upper and lower sets) and ATASCII charsets of 8-bit home
//! computers. Conversion is total: every byte decodes to something and
//! every character encodes to something.

use std::fmt;
use std::str::FromStr;

use codepage_437::CP437_CONTROL;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::tables::{atascii_byte, atascii_glyph, petscii_byte, petscii_glyph};

/// Byte sent for characters the target charset cannot represent.
pub const PLACEHOLDER_BYTE: u8 = b'?';

/// Character set of the remote BBS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Charset {
    /// IBM PC code page 437 (default).
    #[default]
    Cp437,
    /// UTF-8, passed through unchanged.
    Utf8,
    /// Commodore PETSCII, uppercase/graphics set.
    PetsciiUpper,
    /// Commodore PETSCII, lowercase/uppercase set.
    PetsciiLower,
    /// Atari ATASCII.
    Atascii,
}

impl Charset {
    /// Get the charset name as used in client messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Charset::Cp437 => "CP437",
            Charset::Utf8 => "UTF-8",
            Charset::PetsciiUpper => "PETSCIIU",
            Charset::PetsciiLower => "PETSCIIL",
            Charset::Atascii => "ATASCII",
        }
    }

    /// Get the display name for the charset.
    pub fn display_name(&self) -> &'static str {
        match self {
            Charset::Cp437 => "CP437 (IBM PC)",
            Charset::Utf8 => "UTF-8",
            Charset::PetsciiUpper => "PETSCII (upper case)",
            Charset::PetsciiLower => "PETSCII (lower case)",
            Charset::Atascii => "ATASCII",
        }
    }

    /// Get all available charsets.
    pub fn all() -> &'static [Charset] {
        &[
            Charset::Cp437,
            Charset::Utf8,
            Charset::PetsciiUpper,
            Charset::PetsciiLower,
            Charset::Atascii,
        ]
    }

    /// Whether this is a legacy home-computer charset with in-band control codes.
    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            Charset::PetsciiUpper | Charset::PetsciiLower | Charset::Atascii
        )
    }

    /// Whether this is one of the PETSCII sets.
    pub fn is_petscii(&self) -> bool {
        matches!(self, Charset::PetsciiUpper | Charset::PetsciiLower)
    }

    /// Terminal type reported through telnet TERMINAL-TYPE.
    pub fn terminal_type(&self) -> &'static str {
        match self {
            Charset::PetsciiUpper | Charset::PetsciiLower => "PETSCII",
            Charset::Atascii => "ATASCII",
            Charset::Cp437 | Charset::Utf8 => "ansi",
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Charset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cp437" | "ibm437" | "437" | "ansi" | "ibm-pc" => Ok(Charset::Cp437),
            "utf8" | "utf-8" => Ok(Charset::Utf8),
            "petsciiu" | "petscii" | "petscii-upper" | "petscii_upper" => Ok(Charset::PetsciiUpper),
            "petsciil" | "petscii-lower" | "petscii_lower" => Ok(Charset::PetsciiLower),
            "atascii" => Ok(Charset::Atascii),
            _ => Err(format!("unknown charset: {s}")),
        }
    }
}

impl Serialize for Charset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Charset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Decode remote bytes into a string.
///
/// # Examples
///
/// ```
/// use bbs_bridge::terminal::{to_unicode, Charset};
///
/// assert_eq!(to_unicode(&[0xC9, 0xCD, 0xBB], Charset::Cp437), "╔═╗");
/// assert_eq!(to_unicode(&[0x41], Charset::PetsciiLower), "a");
/// ```
pub fn to_unicode(bytes: &[u8], charset: Charset) -> String {
    match charset {
        Charset::Cp437 => bytes.iter().map(|&b| CP437_CONTROL.decode(b)).collect(),
        Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Charset::PetsciiUpper => bytes.iter().map(|&b| petscii_glyph(b, false)).collect(),
        Charset::PetsciiLower => bytes.iter().map(|&b| petscii_glyph(b, true)).collect(),
        Charset::Atascii => bytes.iter().map(|&b| atascii_glyph(b)).collect(),
    }
}

/// Encode a string into remote bytes, substituting [`PLACEHOLDER_BYTE`]
/// for characters the charset lacks. ASCII control characters pass through.
pub fn from_unicode(text: &str, charset: Charset) -> Vec<u8> {
    if charset == Charset::Utf8 {
        return text.as_bytes().to_vec();
    }
    text.chars()
        .map(|c| {
            let encoded = match charset {
                _ if c.is_ascii_control() && c != '\r' && c != '\n' => Some(c as u8),
                Charset::Cp437 | Charset::Utf8 => CP437_CONTROL.encode(c),
                Charset::PetsciiUpper => petscii_byte(c, false),
                Charset::PetsciiLower => petscii_byte(c, true),
                Charset::Atascii => atascii_byte(c),
            };
            encoded.unwrap_or(PLACEHOLDER_BYTE)
        })
        .collect()
}

/// Whether a chunk looks like plain ASCII text rather than legacy graphics.
///
/// True when the chunk has no byte at or above 0x80 and at least
/// `threshold_percent` of its bytes are printable ASCII, CR, LF or TAB.
pub fn is_plain_ascii(bytes: &[u8], threshold_percent: u8) -> bool {
    if bytes.is_empty() || bytes.iter().any(|&b| b >= 0x80) {
        return false;
    }
    let printable = bytes
        .iter()
        .filter(|&&b| matches!(b, 0x20..=0x7E | b'\r' | b'\n' | b'\t'))
        .count();
    printable * 100 >= bytes.len() * usize::from(threshold_percent)
}
