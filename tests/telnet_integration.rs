//! Integration tests for telnet option handling.

use bbs_bridge::server::telnet::{iac, option, ttype};
use bbs_bridge::server::{escape_iac, naws_payload, TelnetFilter, TerminalIdentity};
use bbs_bridge::TerminalSize;

fn identity(terminal_type: &'static str, cols: u16, rows: u16) -> TerminalIdentity {
    TerminalIdentity {
        terminal_type,
        size: TerminalSize::new(cols, rows),
    }
}

#[test]
fn test_typical_bbs_login_negotiation() {
    let mut filter = TelnetFilter::new();
    let id = identity("ansi", 80, 25);

    // Remote asks for binary, window size and terminal type, then greets.
    let mut stream = vec![
        iac::IAC,
        iac::WILL,
        option::BINARY,
        iac::IAC,
        iac::DO,
        option::NAWS,
        iac::IAC,
        iac::DO,
        option::TERMINAL_TYPE,
    ];
    stream.extend_from_slice(b"Welcome!\r\n");

    let out = filter.filter(&stream, &id);
    assert_eq!(out.data, b"Welcome!\r\n");

    let mut expected = vec![
        iac::IAC,
        iac::DO,
        option::BINARY,
        iac::IAC,
        iac::WILL,
        option::NAWS,
    ];
    expected.extend_from_slice(&naws_payload(TerminalSize::new(80, 25)));
    expected.extend_from_slice(&[iac::IAC, iac::WILL, option::TERMINAL_TYPE]);
    assert_eq!(out.replies, expected);

    let state = filter.state();
    assert!(state.binary_rx);
    assert!(state.naws);
    assert!(state.terminal_type);

    // Terminal type request in a later chunk.
    let out = filter.filter(
        &[
            iac::IAC,
            iac::SB,
            option::TERMINAL_TYPE,
            ttype::SEND,
            iac::IAC,
            iac::SE,
        ],
        &identity("PETSCII", 40, 25),
    );
    assert!(out.data.is_empty());
    let mut expected = vec![iac::IAC, iac::SB, option::TERMINAL_TYPE, ttype::IS];
    expected.extend_from_slice(b"PETSCII");
    expected.extend_from_slice(&[iac::IAC, iac::SE]);
    assert_eq!(out.replies, expected);
}

#[test]
fn test_unsupported_options_refused() {
    let mut filter = TelnetFilter::new();
    let out = filter.filter(
        &[iac::IAC, iac::DO, 1, iac::IAC, iac::WILL, 3],
        &identity("ansi", 80, 25),
    );
    assert_eq!(out.replies, vec![iac::IAC, iac::WONT, 1, iac::IAC, iac::DONT, 3]);
}

#[test]
fn test_escaped_iac_round_trip() {
    let payload = [b'a', 0xFF, b'b', 0xFF, 0xFF];
    let escaped = escape_iac(&payload);
    assert_eq!(escaped.len(), payload.len() + 3);

    let mut filter = TelnetFilter::new();
    let out = filter.filter(&escaped, &identity("ansi", 80, 25));
    assert_eq!(out.data, payload);
    assert!(out.replies.is_empty());
}

#[test]
fn test_unterminated_subnegotiation_drops_rest_of_chunk() {
    let mut filter = TelnetFilter::new();
    let out = filter.filter(
        &[b'o', b'k', iac::IAC, iac::SB, option::NAWS, 0, 80],
        &identity("ansi", 80, 25),
    );
    assert_eq!(out.data, b"ok");

    // The next chunk starts fresh.
    let out = filter.filter(b"next", &identity("ansi", 80, 25));
    assert_eq!(out.data, b"next");
}

#[test]
fn test_naws_payload_big_endian() {
    assert_eq!(
        naws_payload(TerminalSize::new(100, 31)),
        [iac::IAC, iac::SB, option::NAWS, 0, 100, 0, 31, iac::IAC, iac::SE]
    );
}
