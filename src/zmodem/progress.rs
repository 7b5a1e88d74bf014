//! Parsing of the receiver's stderr progress text.
//!
//! `rz -v` prints free-form status lines. Two things are picked out: the
//! `Receiving: <name>` announcement and the first `NN%` figure.

/// A status update read from the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Name of the file being received.
    FileName(String),
    /// Completion percentage, 0-100.
    Percent(u8),
}

const RECEIVING: &str = "Receiving:";

/// Extract status updates from one block of stderr text.
pub fn parse_progress(text: &str) -> Vec<Progress> {
    let mut updates = Vec::new();

    if let Some(idx) = text.find(RECEIVING) {
        let line = text[idx + RECEIVING.len()..]
            .lines()
            .next()
            .unwrap_or_default();
        let name = line.trim();
        if !name.is_empty() {
            updates.push(Progress::FileName(name.to_string()));
        }
    }

    if let Some(percent) = find_percent(text) {
        updates.push(Progress::Percent(percent));
    }

    updates
}

/// First one-to-three digit number directly followed by `%`, clamped to 100.
fn find_percent(text: &str) -> Option<u8> {
    let bytes = text.as_bytes();
    bytes.iter().enumerate().find_map(|(i, &b)| {
        if b != b'%' {
            return None;
        }
        let digits = bytes[..i]
            .iter()
            .rev()
            .take(3)
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }
        let value: u16 = text[i - digits..i].parse().ok()?;
        Some(value.min(100) as u8)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receiving_line() {
        let updates = parse_progress("rz waiting to receive.\nReceiving: GAME.ZIP\nBytes received");
        assert_eq!(updates, vec![Progress::FileName("GAME.ZIP".to_string())]);
    }

    #[test]
    fn test_percent() {
        assert_eq!(
            parse_progress("Bytes received:    2048/   4096   BPS:1024 ETA 00:02  50%"),
            vec![Progress::Percent(50)]
        );
        assert_eq!(parse_progress("100%"), vec![Progress::Percent(100)]);
        assert_eq!(parse_progress("1234%"), vec![Progress::Percent(100)]);
    }

    #[test]
    fn test_first_percent_wins() {
        assert_eq!(parse_progress("7% then 8%"), vec![Progress::Percent(7)]);
        assert_eq!(parse_progress("% then 9%"), vec![Progress::Percent(9)]);
    }

    #[test]
    fn test_both_in_one_block() {
        let updates = parse_progress("Receiving: a.txt\r\n 12%");
        assert_eq!(
            updates,
            vec![
                Progress::FileName("a.txt".to_string()),
                Progress::Percent(12)
            ]
        );
    }

    #[test]
    fn test_nothing_recognised() {
        assert!(parse_progress("Receiving:   \nrz ready").is_empty());
    }
}
