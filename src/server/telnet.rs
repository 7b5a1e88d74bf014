//! Telnet protocol implementation.
//!
//! This module strips IAC sequences from the stream received from a remote
//! BBS and answers option negotiation inline according to RFC 854. The
//! bridge acts as the telnet *client*: it offers binary transport, window
//! size and terminal type, and refuses everything else.

use tracing::{debug, trace};

use crate::terminal::TerminalSize;

/// Telnet command bytes (IAC = Interpret As Command).
pub mod iac {
    /// IAC - Interpret As Command (255)
    pub const IAC: u8 = 255;

    /// WILL - Sender wants to enable option (251)
    pub const WILL: u8 = 251;

    /// WONT - Sender refuses to enable option (252)
    pub const WONT: u8 = 252;

    /// DO - Sender wants receiver to enable option (253)
    pub const DO: u8 = 253;

    /// DONT - Sender wants receiver to disable option (254)
    pub const DONT: u8 = 254;

    /// SB - Subnegotiation Begin (250)
    pub const SB: u8 = 250;

    /// SE - Subnegotiation End (240)
    pub const SE: u8 = 240;
}

/// Telnet option codes.
pub mod option {
    /// BINARY - 8-bit binary transmission (0)
    pub const BINARY: u8 = 0;

    /// TERMINAL_TYPE - Terminal Type (24)
    pub const TERMINAL_TYPE: u8 = 24;

    /// NAWS - Negotiate About Window Size (31)
    pub const NAWS: u8 = 31;
}

/// TERMINAL-TYPE subnegotiation codes (RFC 1091).
pub mod ttype {
    /// IS - the value follows
    pub const IS: u8 = 0;

    /// SEND - request for the value
    pub const SEND: u8 = 1;
}

/// Options negotiated with the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiationState {
    /// We transmit in binary mode.
    pub binary_tx: bool,
    /// The remote transmits in binary mode.
    pub binary_rx: bool,
    /// Window size negotiation is active.
    pub naws: bool,
    /// Terminal type negotiation is active.
    pub terminal_type: bool,
}

/// Output of [`TelnetFilter::filter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filtered {
    /// Clean data with all telnet framing removed.
    pub data: Vec<u8>,
    /// Negotiation replies to write back to the remote.
    pub replies: Vec<u8>,
}

/// Identity the filter reports to the remote during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalIdentity {
    /// Value returned for TERMINAL-TYPE SEND.
    pub terminal_type: &'static str,
    /// Size announced via NAWS.
    pub size: TerminalSize,
}

/// Build the 9-byte NAWS subnegotiation for a terminal size.
pub fn naws_payload(size: TerminalSize) -> [u8; 9] {
    let [w_hi, w_lo] = size.cols.to_be_bytes();
    let [h_hi, h_lo] = size.rows.to_be_bytes();
    [
        iac::IAC,
        iac::SB,
        option::NAWS,
        w_hi,
        w_lo,
        h_hi,
        h_lo,
        iac::IAC,
        iac::SE,
    ]
}

/// Double every literal 0xFF so the bytes survive the telnet wire.
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 16);
    for &byte in data {
        out.push(byte);
        if byte == iac::IAC {
            out.push(iac::IAC);
        }
    }
    out
}

/// Request binary mode in both directions.
pub fn binary_mode_request() -> [u8; 6] {
    [
        iac::IAC,
        iac::DO,
        option::BINARY,
        iac::IAC,
        iac::WILL,
        option::BINARY,
    ]
}

/// Stateless-per-chunk IAC filter with persistent negotiation state.
///
/// An unterminated subnegotiation at the end of a chunk drops the rest of
/// that chunk; nothing is carried into the next one.
#[derive(Debug, Default)]
pub struct TelnetFilter {
    state: NegotiationState,
}

impl TelnetFilter {
    /// Create a new filter with nothing negotiated.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current negotiation state.
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Remove telnet framing from `input` and compute negotiation replies.
    pub fn filter(&mut self, input: &[u8], identity: &TerminalIdentity) -> Filtered {
        let mut out = Filtered {
            data: Vec::with_capacity(input.len()),
            replies: Vec::new(),
        };

        let mut i = 0;
        while i < input.len() {
            let byte = input[i];
            if byte != iac::IAC {
                out.data.push(byte);
                i += 1;
                continue;
            }

            let Some(&command) = input.get(i + 1) else {
                // Lone IAC at the end of the chunk.
                break;
            };

            match command {
                iac::IAC => {
                    out.data.push(iac::IAC);
                    i += 2;
                }
                iac::WILL | iac::WONT | iac::DO | iac::DONT => {
                    let Some(&opt) = input.get(i + 2) else {
                        break;
                    };
                    self.respond(command, opt, identity, &mut out.replies);
                    i += 3;
                }
                iac::SB => match find_subnegotiation_end(input, i + 2) {
                    Some(end) => {
                        self.subnegotiate(&input[i + 2..end], identity, &mut out.replies);
                        i = end + 2;
                    }
                    None => {
                        debug!(
                            "Unterminated telnet subnegotiation, dropping {} bytes",
                            input.len() - i
                        );
                        break;
                    }
                },
                _ => {
                    trace!("Ignoring telnet command {:02X}", command);
                    i += 2;
                }
            }
        }

        out
    }

    fn respond(&mut self, command: u8, opt: u8, identity: &TerminalIdentity, replies: &mut Vec<u8>) {
        match command {
            iac::DO => match opt {
                option::BINARY => {
                    self.state.binary_tx = true;
                    replies.extend_from_slice(&[iac::IAC, iac::WILL, opt]);
                }
                option::NAWS => {
                    self.state.naws = true;
                    replies.extend_from_slice(&[iac::IAC, iac::WILL, opt]);
                    replies.extend_from_slice(&naws_payload(identity.size));
                }
                option::TERMINAL_TYPE => {
                    self.state.terminal_type = true;
                    replies.extend_from_slice(&[iac::IAC, iac::WILL, opt]);
                }
                _ => replies.extend_from_slice(&[iac::IAC, iac::WONT, opt]),
            },
            iac::DONT => {
                match opt {
                    option::BINARY => self.state.binary_tx = false,
                    option::NAWS => self.state.naws = false,
                    option::TERMINAL_TYPE => self.state.terminal_type = false,
                    _ => {}
                }
                replies.extend_from_slice(&[iac::IAC, iac::WONT, opt]);
            }
            iac::WILL => {
                if opt == option::BINARY {
                    self.state.binary_rx = true;
                    replies.extend_from_slice(&[iac::IAC, iac::DO, opt]);
                } else {
                    replies.extend_from_slice(&[iac::IAC, iac::DONT, opt]);
                }
            }
            iac::WONT => {
                if opt == option::BINARY {
                    self.state.binary_rx = false;
                }
                replies.extend_from_slice(&[iac::IAC, iac::DONT, opt]);
            }
            _ => {}
        }
    }

    fn subnegotiate(&mut self, body: &[u8], identity: &TerminalIdentity, replies: &mut Vec<u8>) {
        if let [option::TERMINAL_TYPE, ttype::SEND, ..] = body {
            debug!("Reporting terminal type {}", identity.terminal_type);
            replies.extend_from_slice(&[iac::IAC, iac::SB, option::TERMINAL_TYPE, ttype::IS]);
            replies.extend_from_slice(identity.terminal_type.as_bytes());
            replies.extend_from_slice(&[iac::IAC, iac::SE]);
        }
    }
}

/// Index of the IAC in the closing IAC SE, searching from `from`.
fn find_subnegotiation_end(input: &[u8], from: usize) -> Option<usize> {
    let mut j = from;
    while j + 1 < input.len() {
        if input[j] == iac::IAC {
            if input[j + 1] == iac::SE {
                return Some(j);
            }
            // IAC IAC inside the body is an escaped data byte.
            j += 2;
            continue;
        }
        j += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> TerminalIdentity {
        TerminalIdentity {
            terminal_type: "ansi",
            size: TerminalSize::new(80, 25),
        }
    }

    #[test]
    fn test_plain_data_passes_through() {
        let mut filter = TelnetFilter::new();
        let out = filter.filter(b"Welcome!\r\n", &identity());
        assert_eq!(out.data, b"Welcome!\r\n");
        assert!(out.replies.is_empty());
    }

    #[test]
    fn test_escaped_iac_yields_single_byte() {
        let mut filter = TelnetFilter::new();
        let out = filter.filter(&[b'a', iac::IAC, iac::IAC, b'b'], &identity());
        assert_eq!(out.data, vec![b'a', 0xFF, b'b']);
    }

    #[test]
    fn test_escape_iac_round_trip() {
        let mut filter = TelnetFilter::new();
        let wire = escape_iac(&[0xFF]);
        assert_eq!(wire, vec![0xFF, 0xFF]);
        let out = filter.filter(&wire, &identity());
        assert_eq!(out.data, vec![0xFF]);
    }

    #[test]
    fn test_do_binary_accepted() {
        let mut filter = TelnetFilter::new();
        let out = filter.filter(&[iac::IAC, iac::DO, option::BINARY], &identity());
        assert!(out.data.is_empty());
        assert_eq!(out.replies, vec![iac::IAC, iac::WILL, option::BINARY]);
        assert!(filter.state().binary_tx);
    }

    #[test]
    fn test_will_binary_accepted() {
        let mut filter = TelnetFilter::new();
        let out = filter.filter(&[iac::IAC, iac::WILL, option::BINARY], &identity());
        assert_eq!(out.replies, vec![iac::IAC, iac::DO, option::BINARY]);
        assert!(filter.state().binary_rx);

        let out = filter.filter(&[iac::IAC, iac::WONT, option::BINARY], &identity());
        assert_eq!(out.replies, vec![iac::IAC, iac::DONT, option::BINARY]);
        assert!(!filter.state().binary_rx);
    }

    #[test]
    fn test_do_naws_sends_window_size() {
        let mut filter = TelnetFilter::new();
        let ident = TerminalIdentity {
            terminal_type: "PETSCII",
            size: TerminalSize::new(40, 25),
        };
        let out = filter.filter(&[iac::IAC, iac::DO, option::NAWS], &ident);
        let mut expected = vec![iac::IAC, iac::WILL, option::NAWS];
        expected.extend_from_slice(&[iac::IAC, iac::SB, option::NAWS, 0, 40, 0, 25, iac::IAC, iac::SE]);
        assert_eq!(out.replies, expected);
        assert!(filter.state().naws);
    }

    #[test]
    fn test_unknown_options_refused() {
        let mut filter = TelnetFilter::new();
        let out = filter.filter(&[iac::IAC, iac::DO, 1, iac::IAC, iac::WILL, 3], &identity());
        assert_eq!(
            out.replies,
            vec![iac::IAC, iac::WONT, 1, iac::IAC, iac::DONT, 3]
        );
    }

    #[test]
    fn test_dont_clears_state() {
        let mut filter = TelnetFilter::new();
        filter.filter(&[iac::IAC, iac::DO, option::NAWS], &identity());
        let out = filter.filter(&[iac::IAC, iac::DONT, option::NAWS], &identity());
        assert_eq!(out.replies, vec![iac::IAC, iac::WONT, option::NAWS]);
        assert!(!filter.state().naws);
    }

    #[test]
    fn test_terminal_type_send() {
        let mut filter = TelnetFilter::new();
        let input = [
            iac::IAC,
            iac::SB,
            option::TERMINAL_TYPE,
            ttype::SEND,
            iac::IAC,
            iac::SE,
            b'X',
        ];
        let out = filter.filter(&input, &identity());
        assert_eq!(out.data, b"X");
        let mut expected = vec![iac::IAC, iac::SB, option::TERMINAL_TYPE, ttype::IS];
        expected.extend_from_slice(b"ansi");
        expected.extend_from_slice(&[iac::IAC, iac::SE]);
        assert_eq!(out.replies, expected);
    }

    #[test]
    fn test_unterminated_subnegotiation_drops_rest() {
        let mut filter = TelnetFilter::new();
        let input = [b'o', b'k', iac::IAC, iac::SB, option::TERMINAL_TYPE, b'x', b'y'];
        let out = filter.filter(&input, &identity());
        assert_eq!(out.data, b"ok");
        assert!(out.replies.is_empty());
    }

    #[test]
    fn test_other_commands_skipped() {
        let mut filter = TelnetFilter::new();
        // IAC NOP, IAC GA
        let out = filter.filter(&[b'a', iac::IAC, 241, b'b', iac::IAC, 249], &identity());
        assert_eq!(out.data, b"ab");
    }

    #[test]
    fn test_binary_mode_request_bytes() {
        assert_eq!(
            binary_mode_request(),
            [iac::IAC, iac::DO, 0, iac::IAC, iac::WILL, 0]
        );
    }
}
