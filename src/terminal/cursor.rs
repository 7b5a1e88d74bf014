//! Best-effort cursor tracking and terminal query answers.
//!
//! Some BBSes probe the terminal before drawing: a cursor position report
//! to detect ANSI support, device attributes to pick an emulation. The
//! bridge answers on behalf of the browser terminal, using a tracker that
//! follows the display stream closely enough for those replies. There is no
//! screen model.

use super::TerminalSize;

const ESC: u8 = 0x1B;

/// Carry limit for a sequence split across chunks.
const MAX_CARRY: usize = 32;

/// A query the remote sent to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// `ESC [ 6 n` - cursor position report.
    CursorPosition,
    /// `ESC [ 5 n` - device status.
    Status,
    /// `ESC [ c`, `ESC [ 0 c` or `ESC Z` - primary device attributes.
    DeviceAttributes,
}

/// Find the terminal queries in `data`, in stream order.
pub fn find_queries(data: &[u8]) -> Vec<Query> {
    let mut queries = Vec::new();
    let mut i = 0;
    while i < data.len() {
        if data[i] != ESC {
            i += 1;
            continue;
        }
        let rest = &data[i + 1..];
        let (query, len) = match rest {
            [b'[', b'6', b'n', ..] => (Some(Query::CursorPosition), 4),
            [b'[', b'5', b'n', ..] => (Some(Query::Status), 4),
            [b'[', b'c', ..] => (Some(Query::DeviceAttributes), 3),
            [b'[', b'0', b'c', ..] => (Some(Query::DeviceAttributes), 4),
            [b'Z', ..] => (Some(Query::DeviceAttributes), 2),
            _ => (None, 1),
        };
        if let Some(query) = query {
            queries.push(query);
        }
        i += len;
    }
    queries
}

/// Follows the cursor through the display stream.
#[derive(Debug, Clone)]
pub struct CursorTracker {
    row: u16,
    col: u16,
    size: TerminalSize,
    carry: Vec<u8>,
}

impl CursorTracker {
    /// Create a tracker at the home position.
    pub fn new(size: TerminalSize) -> Self {
        Self {
            row: 1,
            col: 1,
            size,
            carry: Vec::new(),
        }
    }

    /// Current 1-based (row, column).
    pub fn position(&self) -> (u16, u16) {
        (self.row, self.col)
    }

    /// Change the screen size, clamping the position into it.
    pub fn set_size(&mut self, size: TerminalSize) {
        self.size = size;
        self.row = self.row.clamp(1, size.rows);
        self.col = self.col.clamp(1, size.cols);
    }

    /// Return to the home position and drop any carry.
    pub fn reset(&mut self) {
        self.row = 1;
        self.col = 1;
        self.carry.clear();
    }

    /// Reply to a query, as bytes for the remote.
    pub fn reply(&self, query: Query) -> Vec<u8> {
        match query {
            Query::CursorPosition => format!("\x1b[{};{}R", self.row, self.col).into_bytes(),
            Query::Status => b"\x1b[0n".to_vec(),
            Query::DeviceAttributes => b"\x1b[?6c".to_vec(),
        }
    }

    /// Advance the position over display bytes.
    pub fn update(&mut self, data: &[u8]) {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(data);

        let mut i = 0;
        while i < input.len() {
            match input[i] {
                ESC => match sequence_len(&input[i..]) {
                    Some(len) => {
                        self.apply_sequence(&input[i..i + len]);
                        i += len;
                        continue;
                    }
                    None => {
                        if input.len() - i <= MAX_CARRY {
                            self.carry = input[i..].to_vec();
                        }
                        return;
                    }
                },
                b'\r' => self.col = 1,
                b'\n' => self.line_feed(),
                0x08 => self.col = self.col.saturating_sub(1).max(1),
                b'\t' => self.col = ((self.col - 1) / 8 + 1) * 8 + 1,
                0x00..=0x1F | 0x7F => {}
                _ => self.advance(),
            }
            self.col = self.col.min(self.size.cols + 1);
            i += 1;
        }
    }

    fn advance(&mut self) {
        if self.col > self.size.cols {
            self.col = 1;
            self.line_feed();
        }
        self.col += 1;
    }

    fn line_feed(&mut self) {
        self.row = (self.row + 1).min(self.size.rows);
    }

    fn apply_sequence(&mut self, seq: &[u8]) {
        if seq.len() < 3 || seq[1] != b'[' {
            return;
        }
        let final_byte = seq[seq.len() - 1];
        let params: Vec<u16> = std::str::from_utf8(&seq[2..seq.len() - 1])
            .unwrap_or("")
            .split(';')
            .map(|p| p.parse().unwrap_or(0))
            .collect();
        let n = |idx: usize| params.get(idx).copied().filter(|&v| v > 0).unwrap_or(1);

        let (rows, cols) = (self.size.rows, self.size.cols);
        match final_byte {
            b'H' | b'f' => {
                self.row = n(0).min(rows);
                self.col = n(1).min(cols);
            }
            b'A' => self.row = self.row.saturating_sub(n(0)).max(1),
            b'B' => self.row = (self.row.saturating_add(n(0))).min(rows),
            b'C' => self.col = (self.col.saturating_add(n(0))).min(cols),
            b'D' => self.col = self.col.saturating_sub(n(0)).max(1),
            b'E' => {
                self.row = (self.row.saturating_add(n(0))).min(rows);
                self.col = 1;
            }
            b'F' => {
                self.row = self.row.saturating_sub(n(0)).max(1);
                self.col = 1;
            }
            b'G' => self.col = n(0).min(cols),
            b'd' => self.row = n(0).min(rows),
            _ => {}
        }
    }
}

/// Length of the complete escape sequence at the start of `data`, or `None`
/// if it is cut off.
fn sequence_len(data: &[u8]) -> Option<usize> {
    match data.get(1)? {
        b'[' => data[2..]
            .iter()
            .position(|b| (0x40..=0x7E).contains(b))
            .map(|p| p + 3),
        b']' => data[2..]
            .iter()
            .position(|&b| b == 0x07 || b == b'\\')
            .map(|p| p + 3),
        0x20..=0x2F => data.get(2).map(|_| 3),
        _ => Some(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> CursorTracker {
        CursorTracker::new(TerminalSize::new(80, 25))
    }

    #[test]
    fn test_find_queries() {
        let queries = find_queries(b"hi\x1b[6n\x1b[5n\x1b[c\x1bZ\x1b[0c\x1b[31m");
        assert_eq!(
            queries,
            vec![
                Query::CursorPosition,
                Query::Status,
                Query::DeviceAttributes,
                Query::DeviceAttributes,
                Query::DeviceAttributes,
            ]
        );
        assert!(find_queries(b"\x1b[2J plain").is_empty());
    }

    #[test]
    fn test_replies() {
        let t = tracker();
        assert_eq!(t.reply(Query::CursorPosition), b"\x1b[1;1R");
        assert_eq!(t.reply(Query::Status), b"\x1b[0n");
        assert_eq!(t.reply(Query::DeviceAttributes), b"\x1b[?6c");
    }

    #[test]
    fn test_text_and_newlines() {
        let mut t = tracker();
        t.update(b"abc");
        assert_eq!(t.position(), (1, 4));
        t.update(b"\r\nxy");
        assert_eq!(t.position(), (2, 3));
        t.update(b"\x08");
        assert_eq!(t.position(), (2, 2));
    }

    #[test]
    fn test_cursor_addressing() {
        let mut t = tracker();
        t.update(b"\x1b[10;20H");
        assert_eq!(t.position(), (10, 20));
        t.update(b"\x1b[3A\x1b[5C");
        assert_eq!(t.position(), (7, 25));
        t.update(b"\x1b[99B\x1b[G");
        assert_eq!(t.position(), (25, 1));
        t.update(b"\x1b[H");
        assert_eq!(t.position(), (1, 1));
    }

    #[test]
    fn test_sgr_does_not_move() {
        let mut t = tracker();
        t.update(b"\x1b[1;31mX\x1b[0m");
        assert_eq!(t.position(), (1, 2));
    }

    #[test]
    fn test_sequence_split_across_updates() {
        let mut t = tracker();
        t.update(b"\x1b[5;");
        assert_eq!(t.position(), (1, 1));
        t.update(b"7H");
        assert_eq!(t.position(), (5, 7));
    }

    #[test]
    fn test_wraps_at_right_margin() {
        let mut t = CursorTracker::new(TerminalSize::new(40, 25));
        t.update(&[b'x'; 41]);
        assert_eq!(t.position(), (2, 2));
    }

    #[test]
    fn test_set_size_clamps() {
        let mut t = tracker();
        t.update(b"\x1b[25;80H");
        t.set_size(TerminalSize::new(40, 24));
        assert_eq!(t.position(), (24, 40));
    }
}
