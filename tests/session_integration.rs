//! Session tests against a local fake BBS.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use bbs_bridge::directory::BLOCKED_MESSAGE;
use bbs_bridge::server::telnet::{binary_mode_request, iac, option};
use bbs_bridge::server::{naws_payload, ConnectRequest, Protocol, Session, SessionState};
use bbs_bridge::web::ws::ServerMessage;
use bbs_bridge::zmodem::CANCEL_SEQUENCE;
use bbs_bridge::{ApprovedEndpoint, Charset, Config, Directory, StaticSource, TerminalSize};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    session: Arc<Session>,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
    listener: TcpListener,
    port: u16,
}

async fn harness(charset: Charset) -> Harness {
    let mut config = Config::default();
    config.transfer.enabled = false;
    harness_with(charset, config).await
}

async fn harness_with(charset: Charset, mut config: Config) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let directory = Directory::new(StaticSource::new(vec![ApprovedEndpoint {
        id: "fake-bbs".to_string(),
        name: "Fake BBS".to_string(),
        host: "127.0.0.1".to_string(),
        port,
        protocol: Protocol::Telnet,
        charset,
    }]));

    config.terminal.preamble_timeout_ms = 200;

    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(
        "127.0.0.1:40000".parse().unwrap(),
        Arc::new(config),
        Arc::new(directory),
        tx,
    );

    Harness {
        session,
        rx,
        listener,
        port,
    }
}

fn request(port: u16) -> ConnectRequest {
    ConnectRequest {
        host: "127.0.0.1".to_string(),
        port,
        protocol: Protocol::Telnet,
        charset: None,
        credentials: None,
    }
}

async fn next_message(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("session channel closed")
}

/// Collect display output until it contains `needle`.
async fn display_until(rx: &mut mpsc::UnboundedReceiver<ServerMessage>, needle: &str) -> String {
    let mut text = String::new();
    while !text.contains(needle) {
        match next_message(rx).await {
            ServerMessage::Data { data, encoding } => {
                assert_eq!(encoding, "base64");
                let bytes = BASE64.decode(data).unwrap();
                text.push_str(&String::from_utf8(bytes).unwrap());
            }
            other => panic!("unexpected message {other:?} while waiting for {needle:?}"),
        }
    }
    text
}

async fn read_exact(socket: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    tokio::time::timeout(WAIT, socket.read_exact(&mut buf))
        .await
        .expect("timed out reading from the session")
        .unwrap();
    buf
}

async fn connect(h: &mut Harness) -> TcpStream {
    let session = Arc::clone(&h.session);
    let port = h.port;
    let connecting = tokio::spawn(async move { session.connect(request(port)).await });
    let (socket, _) = tokio::time::timeout(WAIT, h.listener.accept())
        .await
        .unwrap()
        .unwrap();
    connecting.await.unwrap();

    assert_eq!(
        next_message(&mut h.rx).await,
        ServerMessage::Connected {
            message: format!("Connected to 127.0.0.1:{}", h.port)
        }
    );
    assert_eq!(h.session.state(), SessionState::Streaming);
    socket
}

#[tokio::test]
async fn test_relay_and_remote_hangup() {
    let mut h = harness(Charset::Cp437).await;
    let mut bbs = connect(&mut h).await;

    let mut greeting = vec![iac::IAC, iac::DO, option::NAWS];
    greeting.extend_from_slice(b"Hello \xc9\xcd\xbb\r\n");
    bbs.write_all(&greeting).await.unwrap();

    let text = display_until(&mut h.rx, "\r\n").await;
    assert_eq!(text, "Hello ╔═╗\r\n");

    let mut expected = vec![iac::IAC, iac::WILL, option::NAWS];
    expected.extend_from_slice(&naws_payload(TerminalSize::new(80, 25)));
    assert_eq!(read_exact(&mut bbs, expected.len()).await, expected);

    h.session.send_input("hi\r");
    assert_eq!(read_exact(&mut bbs, 3).await, b"hi\r");

    h.session.resize(100, 31);
    assert_eq!(
        read_exact(&mut bbs, 9).await,
        naws_payload(TerminalSize::new(100, 31))
    );

    drop(bbs);
    assert_eq!(next_message(&mut h.rx).await, ServerMessage::Disconnected);
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!h.session.is_closed());
}

#[tokio::test]
async fn test_reconnect_after_hangup() {
    let mut h = harness(Charset::Cp437).await;
    let bbs = connect(&mut h).await;
    drop(bbs);
    assert_eq!(next_message(&mut h.rx).await, ServerMessage::Disconnected);

    let mut bbs = connect(&mut h).await;
    bbs.write_all(b"again\r\n").await.unwrap();
    assert_eq!(display_until(&mut h.rx, "\r\n").await, "again\r\n");
}

#[tokio::test]
async fn test_unapproved_port_never_dialed() {
    let mut h = harness(Charset::Cp437).await;
    h.session.connect(request(h.port.wrapping_add(1))).await;

    assert_eq!(next_message(&mut h.rx).await, ServerMessage::error(BLOCKED_MESSAGE));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), h.listener.accept())
            .await
            .is_err()
    );
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_shutdown_closes_remote() {
    let mut h = harness(Charset::Cp437).await;
    let mut bbs = connect(&mut h).await;

    h.session.shutdown();
    assert_eq!(next_message(&mut h.rx).await, ServerMessage::Disconnected);
    assert!(h.session.is_closed());

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(WAIT, bbs.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    // A second shutdown is a no-op.
    h.session.shutdown();
    assert!(h.rx.try_recv().is_err());
}

#[tokio::test]
async fn test_petscii_preamble_released_by_clear_screen() {
    let mut h = harness(Charset::PetsciiUpper).await;
    let mut bbs = connect(&mut h).await;
    assert_eq!(h.session.charset(), Charset::PetsciiUpper);
    assert_eq!(h.session.size(), TerminalSize::new(40, 25));

    bbs.write_all(&[0x93, b'O', b'K']).await.unwrap();
    let text = display_until(&mut h.rx, "OK").await;
    assert!(text.starts_with("\x1b[2J\x1b[H"), "{text:?}");
}

#[tokio::test]
async fn test_petscii_preamble_released_by_timer() {
    let mut h = harness(Charset::Atascii).await;
    let mut bbs = connect(&mut h).await;

    bbs.write_all(b"connecting").await.unwrap();
    // Nothing else arrives; the timed flush releases the held text.
    let text = display_until(&mut h.rx, "connecting").await;
    assert_eq!(text, "connecting");
}

#[tokio::test]
async fn test_charset_switch_announces_size() {
    let mut h = harness(Charset::Cp437).await;
    let mut bbs = connect(&mut h).await;

    bbs.write_all(&[iac::IAC, iac::DO, option::NAWS]).await.unwrap();
    let mut expected = vec![iac::IAC, iac::WILL, option::NAWS];
    expected.extend_from_slice(&naws_payload(TerminalSize::new(80, 25)));
    assert_eq!(read_exact(&mut bbs, expected.len()).await, expected);

    h.session.set_charset("PETSCIIL");
    assert_eq!(
        read_exact(&mut bbs, 9).await,
        naws_payload(TerminalSize::new(40, 25))
    );
}

#[tokio::test]
async fn test_transfer_holds_display_until_complete() {
    let mut config = Config::default();
    config.transfer.enabled = true;
    config.transfer.receiver_command = "sh".to_string();
    config.transfer.receiver_args = vec![
        "-c".to_string(),
        "printf 'Receiving: demo.bin\\n' >&2; head -c 12 > demo.bin".to_string(),
    ];
    config.transfer.completion_delay_ms = 10;
    let mut h = harness_with(Charset::Cp437, config).await;
    let mut bbs = connect(&mut h).await;

    bbs.write_all(b"before\r\n").await.unwrap();
    assert_eq!(display_until(&mut h.rx, "\r\n").await, "before\r\n");

    bbs.write_all(b"**\x18B00hel").await.unwrap();
    let request = binary_mode_request();
    assert_eq!(read_exact(&mut bbs, request.len()).await, request.to_vec());
    bbs.write_all(b"lo!").await.unwrap();

    // Only transfer notifications until the file arrives.
    let (filename, data) = loop {
        match next_message(&mut h.rx).await {
            ServerMessage::FileDownload { filename, data } => break (filename, data),
            ServerMessage::Data { data, .. } => {
                panic!("display output during transfer: {:?}", BASE64.decode(data))
            }
            ServerMessage::DownloadStart { .. }
            | ServerMessage::DownloadInfo { .. }
            | ServerMessage::DownloadProgress { .. } => {}
            other => panic!("unexpected message {other:?}"),
        }
    };
    assert_eq!(filename, "demo.bin");
    assert_eq!(BASE64.decode(data).unwrap(), b"**\x18B00hello!");

    bbs.write_all(b"after\r\n").await.unwrap();
    assert_eq!(display_until(&mut h.rx, "\r\n").await, "after\r\n");
    assert_eq!(h.session.state(), SessionState::Streaming);
}

#[tokio::test]
async fn test_connect_without_charset_uses_endpoint_charset() {
    let mut h = harness(Charset::Cp437).await;
    h.session.set_charset("ATASCII");
    assert_eq!(h.session.charset(), Charset::Atascii);

    let _bbs = connect(&mut h).await;
    assert_eq!(h.session.charset(), Charset::Cp437);
    assert_eq!(h.session.size(), TerminalSize::new(80, 25));
}

#[tokio::test]
async fn test_shutdown_during_transfer_sends_cancel() {
    let mut config = Config::default();
    config.transfer.enabled = true;
    config.transfer.receiver_command = "sh".to_string();
    config.transfer.receiver_args = vec!["-c".to_string(), "cat > partial.bin".to_string()];
    let mut h = harness_with(Charset::Cp437, config).await;
    let mut bbs = connect(&mut h).await;

    bbs.write_all(b"**\x18B00").await.unwrap();
    let request = binary_mode_request();
    assert_eq!(read_exact(&mut bbs, request.len()).await, request.to_vec());
    assert!(matches!(
        next_message(&mut h.rx).await,
        ServerMessage::DownloadStart { .. }
    ));

    h.session.shutdown();

    let mut rest = Vec::new();
    tokio::time::timeout(WAIT, bbs.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rest, CANCEL_SEQUENCE);
}
