//! Incremental ANSI escape sequence normalizer.
//!
//! Remote output arrives in arbitrary fragments, so an escape sequence may
//! be split across reads. [`AnsiNormalizer`] keeps the unfinished tail of a
//! chunk as carry and completes it with the next chunk. Complete sequences
//! are rewritten into canonical ANSI on the way through.

/// Sequences longer than this are emitted as-is without waiting for a
/// terminator.
pub const MAX_SEQUENCE_LEN: usize = 100;

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;
const FF: u8 = 0x0C;

/// Result of feeding a chunk to the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fed {
    /// Normalized bytes ready for display.
    pub output: Vec<u8>,
    /// Whether an unfinished sequence is being carried.
    pub incomplete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    /// The sequence needs more bytes.
    Pending,
    /// The sequence ends at the current byte.
    Complete,
    /// The current byte is an ESC that starts a new sequence; everything
    /// before it is emitted unchanged.
    Restart,
}

/// Resumable normalizer for one remote stream.
#[derive(Debug)]
pub struct AnsiNormalizer {
    carry: Vec<u8>,
    promote_c1: bool,
}

impl Default for AnsiNormalizer {
    fn default() -> Self {
        Self {
            carry: Vec::new(),
            promote_c1: true,
        }
    }
}

impl AnsiNormalizer {
    /// Create a normalizer with an empty carry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable 8-bit C1 promotion. UTF-8 streams turn it off,
    /// since 0x9B and friends appear there as continuation bytes.
    pub fn set_promote_c1(&mut self, enabled: bool) {
        self.promote_c1 = enabled;
    }

    /// Bytes held back from the previous chunk.
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }

    /// Discard any carried bytes.
    pub fn reset(&mut self) {
        self.carry.clear();
    }

    /// Release carried bytes verbatim.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.carry)
    }

    /// Normalize a chunk, holding back an unfinished trailing sequence.
    pub fn feed(&mut self, chunk: &[u8]) -> Fed {
        let mut data = std::mem::take(&mut self.carry);
        if self.promote_c1 {
            promote_c1(chunk, &mut data);
        } else {
            data.extend_from_slice(chunk);
        }

        let mut output = Vec::with_capacity(data.len());
        let mut start: Option<usize> = None;

        for i in 0..data.len() {
            let byte = data[i];
            let Some(s) = start else {
                match byte {
                    ESC => start = Some(i),
                    FF => output.extend_from_slice(b"\x1b[2J\x1b[H"),
                    _ => output.push(byte),
                }
                continue;
            };

            if i == s {
                continue;
            }

            match status(&data[s..=i]) {
                Status::Pending if i + 1 - s >= MAX_SEQUENCE_LEN => {
                    output.extend_from_slice(&data[s..=i]);
                    start = None;
                }
                Status::Pending => {}
                Status::Complete => {
                    rewrite(&data[s..=i], &mut output);
                    start = None;
                }
                Status::Restart => {
                    output.extend_from_slice(&data[s..i]);
                    start = Some(i);
                }
            }
        }

        if let Some(s) = start {
            self.carry = data[s..].to_vec();
        }

        Fed {
            output,
            incomplete: !self.carry.is_empty(),
        }
    }
}

/// Append `chunk` to `out`, expanding 8-bit C1 introducers to their
/// 7-bit ESC forms.
fn promote_c1(chunk: &[u8], out: &mut Vec<u8>) {
    out.reserve(chunk.len());
    for &byte in chunk {
        match byte {
            0x9B => out.extend_from_slice(b"\x1b["),
            0x9D => out.extend_from_slice(b"\x1b]"),
            0x90 => out.extend_from_slice(b"\x1bP"),
            0x9C => out.extend_from_slice(b"\x1b\\"),
            _ => out.push(byte),
        }
    }
}

/// Completion status of `seq`, which starts with ESC and holds at least two
/// bytes. Only the last byte is new since the previous call.
fn status(seq: &[u8]) -> Status {
    let last = seq[seq.len() - 1];
    match seq[1] {
        ESC => Status::Restart,
        b'[' => match last {
            _ if seq.len() == 2 => Status::Pending,
            ESC => Status::Restart,
            0x40..=0x7E => Status::Complete,
            _ => Status::Pending,
        },
        b']' | b'P' | b'X' | b'^' | b'_' => {
            let osc = seq[1] == b']';
            if osc && last == BEL {
                Status::Complete
            } else if seq.len() >= 4 && last == b'\\' && seq[seq.len() - 2] == ESC {
                Status::Complete
            } else {
                Status::Pending
            }
        }
        0x20..=0x2F => match last {
            _ if seq.len() == 2 => Status::Pending,
            ESC => Status::Restart,
            0x30..=0x7E => Status::Complete,
            _ => Status::Pending,
        },
        _ => Status::Complete,
    }
}

/// Append the canonical form of a complete sequence to `out`.
fn rewrite(seq: &[u8], out: &mut Vec<u8>) {
    if seq.len() < 3 || seq[1] != b'[' {
        out.extend_from_slice(seq);
        return;
    }

    let params = &seq[2..seq.len() - 1];
    let mut final_byte = seq[seq.len() - 1];
    let numeric = is_numeric(params);

    if numeric {
        final_byte = fix_case(final_byte);
    }

    out.extend_from_slice(b"\x1b[");
    if params.is_empty() && matches!(final_byte, b'J' | b'K' | b'm') {
        out.push(b'0');
    } else {
        out.extend_from_slice(params);
    }
    out.push(final_byte);

    if final_byte == b'J' && numeric && params.split(|&b| b == b';').any(|p| p == b"2") {
        out.extend_from_slice(b"\x1b[H");
    }
}

/// Parameters made only of digits and semicolons. An empty list counts; a
/// private-mode prefix such as `?` does not.
fn is_numeric(params: &[u8]) -> bool {
    params.iter().all(|&b| b.is_ascii_digit() || b == b';')
}

/// Reinterpret the ambiguous final bytes some BBS software emits: `M` means
/// SGR and `j` means erase display.
fn fix_case(final_byte: u8) -> u8 {
    match final_byte {
        b'M' => b'm',
        b'j' => b'J',
        other => other,
    }
}

/// Correct ambiguous-case CSI sequences in already-normalized output.
///
/// Only 7-bit CSI sequences with numeric parameters are touched. Applying
/// this twice gives the same result as applying it once.
pub fn normalize_sgr_case(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    let mut i = 0;
    while i + 1 < out.len() {
        if out[i] != ESC || out[i + 1] != b'[' {
            i += 1;
            continue;
        }
        let params_start = i + 2;
        let mut j = params_start;
        while j < out.len() && (0x20..=0x3F).contains(&out[j]) {
            j += 1;
        }
        if j >= out.len() {
            break;
        }
        if !(0x40..=0x7E).contains(&out[j]) {
            // Not a final byte; it may start the next sequence.
            i = j;
            continue;
        }
        if is_numeric(&out[params_start..j]) {
            out[j] = fix_case(out[j]);
        }
        i = j + 1;
    }
    out
}
