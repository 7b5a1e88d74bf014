//! Glyph tables for the legacy home-computer charsets.
//!
//! Every byte maps to exactly one `char`. Control codes the translator does
//! not handle map to [`NON_PRINTING`], which occupies no cell in the
//! browser terminal. Block graphics use Box Drawing and Block Elements
//! approximations so that common terminal fonts can render them.

/// Placeholder for bytes with no visible glyph.
pub const NON_PRINTING: char = '\u{200B}';

const NP: char = NON_PRINTING;

/// PETSCII 0x60-0x7F (and 0xC0-0xDF) in the uppercase/graphics set.
const PETSCII_UPPER_60: [char; 32] = [
    '─', '♠', '│', '─', '▔', '▔', '▁', '▏', '▕', '╮', '╰', '╯', '▁', '╲', '╱', '▔', //
    '▔', '●', '▁', '♥', '▏', '╭', '╳', '○', '♣', '▕', '♦', '┼', '▒', '│', 'π', '◥',
];

/// PETSCII 0x60-0x7F (and 0xC0-0xDF) in the lowercase/uppercase set.
const PETSCII_LOWER_60: [char; 32] = [
    '─', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', //
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', '┼', '▒', '│', '▒', '▨',
];

/// PETSCII 0xA0-0xBF (and 0xE0-0xFF), shared by both sets except 0xA9/0xBA/0xFF.
const PETSCII_GRAPHICS_A0: [char; 32] = [
    '\u{00A0}', '▌', '▄', '▔', '▁', '▏', '▒', '▕', '▒', '◤', '▕', '├', '▗', '└', '┐', '▂', //
    '┌', '┴', '┬', '┤', '▎', '▍', '▐', '▔', '▀', '▃', '▟', '▖', '▝', '┘', '▘', '▚',
];

/// ATASCII 0x00-0x1F graphics.
const ATASCII_LOW: [char; 32] = [
    '♥', '├', '▕', '┘', '┤', '┐', '╱', '╲', '◢', '▗', '◣', '▝', '▘', '▔', '▁', '▖', //
    '♣', '┌', '─', '┼', '•', '▄', '▎', '┬', '┴', '▌', '└', '␛', '↑', '↓', '←', '→',
];

/// Glyph for a PETSCII byte.
pub fn petscii_glyph(byte: u8, lower: bool) -> char {
    match byte {
        0x07 => '\u{07}',
        0x0A => '\n',
        0x0D => '\r',
        0x00..=0x1F | 0x80..=0x9F => NP,
        0x20..=0x3F | 0x40 | 0x5B | 0x5D => byte as char,
        0x41..=0x5A if lower => (byte + 0x20) as char,
        0x41..=0x5A => byte as char,
        0x5C => '£',
        0x5E => '↑',
        0x5F => '←',
        0x60..=0x7F => petscii_60(byte - 0x60, lower),
        0xC0..=0xDF => petscii_60(byte - 0xC0, lower),
        0xA9 | 0xE9 if lower => '▨',
        0xBA | 0xFA if lower => '✓',
        0xFF if lower => '▒',
        0xFF => 'π',
        0xA0..=0xBF => PETSCII_GRAPHICS_A0[usize::from(byte - 0xA0)],
        0xE0..=0xFE => PETSCII_GRAPHICS_A0[usize::from(byte - 0xE0)],
    }
}

fn petscii_60(index: u8, lower: bool) -> char {
    let table = if lower {
        &PETSCII_LOWER_60
    } else {
        &PETSCII_UPPER_60
    };
    table[usize::from(index)]
}

/// Glyph for an ATASCII byte. The high half is the inverse-video copy of the
/// low half and renders with the same glyph.
pub fn atascii_glyph(byte: u8) -> char {
    match byte & 0x7F {
        low @ 0x00..=0x1F => ATASCII_LOW[usize::from(low)],
        0x60 => '♦',
        0x7B => '♠',
        0x7D => '↰',
        0x7E => '◀',
        0x7F => '▶',
        ascii => ascii as char,
    }
}

/// Reverse lookup for PETSCII, used when encoding keystrokes.
///
/// Letters follow the keyboard: in the lowercase set an unshifted letter is
/// 0x41-0x5A and a shifted letter is 0xC1-0xDA.
pub fn petscii_byte(c: char, lower: bool) -> Option<u8> {
    match c {
        '\r' | '\n' => return Some(0x0D),
        'a'..='z' => return Some(c as u8 - 0x20),
        'A'..='Z' if lower => return Some(c as u8 + 0x80),
        'A'..='Z' => return Some(c as u8),
        _ => {}
    }
    (0x20..=0xFFu8).find(|&b| !(0x80..=0x9F).contains(&b) && petscii_glyph(b, lower) == c)
}

/// Reverse lookup for ATASCII, used when encoding keystrokes.
pub fn atascii_byte(c: char) -> Option<u8> {
    match c {
        '\r' | '\n' => Some(0x9B),
        _ => (0x00..=0x7Fu8).find(|&b| atascii_glyph(b) == c),
    }
}
