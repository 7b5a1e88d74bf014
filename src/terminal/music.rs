//! ANSI music extraction.
//!
//! BBS door games play tunes with `ESC [ M`, `ESC [ N` or `ESC [ |`
//! followed by a music string. The string ends at BEL, SO, SI or ST, or
//! just before the next ESC. The browser plays it; the terminal never sees
//! it.

/// Longest music string held while waiting for a terminator. Longer
/// buffers are released to the display unchanged.
pub const MAX_MUSIC_LEN: usize = 4096;

const ESC: u8 = 0x1B;

/// Stateful extractor for one remote stream.
#[derive(Debug, Default)]
pub struct MusicExtractor {
    /// Bytes from the introducer onward while a string is open.
    pending: Vec<u8>,
}

impl MusicExtractor {
    /// Create an extractor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a music string is open across chunks.
    pub fn in_sequence(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Remove music strings from `data`, returning the remaining display
    /// bytes and the extracted payloads in order.
    pub fn extract(&mut self, data: &[u8]) -> (Vec<u8>, Vec<String>) {
        let mut payloads = Vec::new();
        let mut display = Vec::with_capacity(data.len());

        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(data);

        let mut i = 0;
        loop {
            let Some(start) = find_introducer(&input, i) else {
                // Hold a trailing ESC or ESC [ in case it grows into an introducer.
                let keep = partial_introducer_len(&input[i..]);
                let split = input.len() - keep;
                display.extend_from_slice(&input[i..split]);
                self.pending = input[split..].to_vec();
                break;
            };
            display.extend_from_slice(&input[i..start]);

            let body = start + 3;
            match find_terminator(&input, body) {
                Some((end, resume)) => {
                    if end > body {
                        payloads.push(String::from_utf8_lossy(&input[body..end]).into_owned());
                    }
                    i = resume;
                }
                None if input.len() - start > MAX_MUSIC_LEN => {
                    display.extend_from_slice(&input[start..]);
                    break;
                }
                None => {
                    self.pending = input[start..].to_vec();
                    break;
                }
            }
        }

        (display, payloads)
    }
}

fn find_introducer(data: &[u8], from: usize) -> Option<usize> {
    (from..data.len().saturating_sub(2)).find(|&i| {
        data[i] == ESC && data[i + 1] == b'[' && matches!(data[i + 2], b'|' | b'M' | b'N')
    })
}

fn partial_introducer_len(data: &[u8]) -> usize {
    match data {
        [.., ESC, b'['] => 2,
        [.., ESC] => 1,
        _ => 0,
    }
}

/// End of the music body and the offset where display resumes.
fn find_terminator(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut j = from;
    while j < data.len() {
        match data[j] {
            0x07 | 0x0E | 0x0F => return Some((j, j + 1)),
            ESC => {
                return match data.get(j + 1) {
                    Some(b'\\') => Some((j, j + 2)),
                    Some(_) => Some((j, j)),
                    // Could still become ST.
                    None => None,
                };
            }
            _ => j += 1,
        }
    }
    None
}
