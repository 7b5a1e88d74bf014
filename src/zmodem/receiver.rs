//! ZMODEM receive through an external `rz` process.
//!
//! Once a start signature shows up, the receiver spawns `rz` in a fresh
//! temporary directory and takes over the inbound stream. A set of tasks
//! then runs alongside the session:
//!
//! - a stdin writer feeding remote bytes to `rz`;
//! - a stdout relay sending `rz` replies back to the remote, IAC-escaped;
//! - a stderr reader turning progress text into [`TransferEvent`]s;
//! - an exit waiter that collects received files when `rz` finishes;
//! - a watchdog enforcing the inactivity and total-duration limits.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use super::detector::Lookback;
use super::progress::{parse_progress, Progress};
use super::{TransferError, TransferHandler};
use crate::config::TransferConfig;
use crate::server::telnet::{binary_mode_request, escape_iac};

/// Sent to the remote to abort a transfer.
pub const CANCEL_SEQUENCE: [u8; 8] = [0x18; 8];

const READ_BUFFER_SIZE: usize = 4096;

/// Receiver process settings.
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Executable to run.
    pub command: String,
    /// Arguments for the executable.
    pub args: Vec<String>,
    /// Cancel after this long without inbound data.
    pub inactivity_timeout: Duration,
    /// Cancel after this long in total.
    pub max_duration: Duration,
    /// Watchdog tick interval.
    pub watchdog_interval: Duration,
    /// Wait before collecting files after the process exits.
    pub completion_delay: Duration,
}

impl From<&TransferConfig> for ReceiverOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            command: config.receiver_command.clone(),
            args: config.receiver_args.clone(),
            inactivity_timeout: Duration::from_secs(config.inactivity_timeout_secs),
            max_duration: Duration::from_secs(config.max_duration_secs),
            watchdog_interval: Duration::from_secs(config.watchdog_interval_secs),
            completion_delay: Duration::from_millis(config.completion_delay_ms),
        }
    }
}

/// Notifications for the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// The receiver took over the stream.
    Started,
    /// The sender announced a file name.
    FileInfo(String),
    /// Completion percentage.
    Progress(u8),
    /// A received file.
    File {
        /// File name as written by the receiver.
        name: String,
        /// File contents.
        data: Vec<u8>,
    },
    /// The transfer could not start or was aborted.
    Failed(String),
}

/// State shared between the receiver and its tasks.
#[derive(Debug)]
struct Control {
    started: Instant,
    /// Milliseconds after `started` of the last inbound chunk.
    last_activity_ms: AtomicU64,
    /// The process has exited and the transfer no longer owns the stream.
    done: AtomicBool,
    /// Received files must not be delivered.
    cancelled: AtomicBool,
    /// Wakes the exit waiter to kill the process.
    kill: Notify,
}

impl Control {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            done: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            kill: Notify::new(),
        }
    }

    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        let last = Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last)
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn abort(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.kill.notify_one();
    }
}

/// An active transfer.
#[derive(Debug)]
struct Transfer {
    control: Arc<Control>,
    stdin: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

/// [`TransferHandler`] backed by an external `rz` process.
///
/// Must be driven from inside a Tokio runtime.
#[derive(Debug)]
pub struct LrzszReceiver {
    options: ReceiverOptions,
    remote: mpsc::UnboundedSender<Vec<u8>>,
    events: mpsc::UnboundedSender<TransferEvent>,
    lookback: Lookback,
    transfer: Option<Transfer>,
}

impl LrzszReceiver {
    /// Create a receiver. `remote` carries raw bytes to the remote telnet
    /// connection; `events` carries notifications for the browser.
    pub fn new(
        options: ReceiverOptions,
        remote: mpsc::UnboundedSender<Vec<u8>>,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Self {
        Self {
            options,
            remote,
            events,
            lookback: Lookback::new(),
            transfer: None,
        }
    }

    fn reap(&mut self) {
        if self
            .transfer
            .as_ref()
            .is_some_and(|transfer| transfer.control.is_done())
        {
            debug!("Transfer finished");
            self.transfer = None;
        }
    }

    fn start(&mut self, initial: Vec<u8>) -> Result<(), TransferError> {
        let dir = tempfile::Builder::new()
            .prefix("bbs-bridge-rz-")
            .tempdir()?;

        let mut child = Command::new(&self.options.command)
            .args(&self.options.args)
            .current_dir(dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransferError::Spawn(format!("{}: {}", self.options.command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransferError::Spawn("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransferError::Spawn("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransferError::Spawn("stderr not captured".to_string()))?;

        // rz needs a clean 8-bit path.
        let _ = self.remote.send(binary_mode_request().to_vec());

        info!(
            "Started {} in {} for incoming transfer",
            self.options.command,
            dir.path().display()
        );
        let _ = self.events.send(TransferEvent::Started);

        let control = Arc::new(Control::new());
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_stdin(
            stdin,
            stdin_rx,
            control.clone(),
            self.remote.clone(),
        ));
        tokio::spawn(relay_stdout(stdout, self.remote.clone()));
        tokio::spawn(read_stderr(stderr, self.events.clone()));
        tokio::spawn(wait_for_exit(
            child,
            dir,
            control.clone(),
            self.events.clone(),
            self.options.completion_delay,
        ));
        tokio::spawn(watchdog(
            control.clone(),
            self.remote.clone(),
            self.events.clone(),
            self.options.clone(),
        ));

        let _ = stdin_tx.send(initial);
        self.transfer = Some(Transfer {
            control,
            stdin: Some(stdin_tx),
        });
        Ok(())
    }
}

impl TransferHandler for LrzszReceiver {
    fn process_data(&mut self, data: &[u8]) -> (Vec<u8>, bool) {
        self.reap();

        if let Some(transfer) = &self.transfer {
            transfer.control.touch();
            if let Some(stdin) = &transfer.stdin {
                let _ = stdin.send(data.to_vec());
            }
            return (Vec::new(), true);
        }

        let Some(start) = self.lookback.push(data) else {
            return (data.to_vec(), false);
        };

        let mut buffered = self.lookback.take();
        let initial = buffered.split_off(start);
        match self.start(initial) {
            Ok(()) => (Vec::new(), true),
            Err(e) => {
                warn!("Could not start transfer receiver: {}", e);
                let _ = self.events.send(TransferEvent::Failed(e.to_string()));
                (data.to_vec(), false)
            }
        }
    }

    fn cancel(&mut self) {
        self.lookback.clear();
        let Some(mut transfer) = self.transfer.take() else {
            return;
        };
        if transfer.control.is_done() {
            return;
        }

        info!("Cancelling transfer");
        let _ = self.remote.send(CANCEL_SEQUENCE.to_vec());
        drop(transfer.stdin.take());
        transfer.control.abort();
    }

    fn is_active(&self) -> bool {
        self.transfer
            .as_ref()
            .is_some_and(|transfer| !transfer.control.is_done())
    }
}

impl Drop for LrzszReceiver {
    fn drop(&mut self) {
        if let Some(transfer) = &self.transfer {
            transfer.control.abort();
        }
    }
}

async fn write_stdin(
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    control: Arc<Control>,
    remote: mpsc::UnboundedSender<Vec<u8>>,
) {
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            debug!("Receiver stdin closed: {}", e);
            if !control.is_done() {
                warn!("Receiver stopped reading, cancelling transfer");
                let _ = remote.send(CANCEL_SEQUENCE.to_vec());
            }
            // Let the exit waiter end the transfer; files already written
            // are still delivered.
            control.kill.notify_one();
            return;
        }
        let _ = stdin.flush().await;
    }
}

async fn relay_stdout(
    mut stdout: impl AsyncRead + Unpin,
    remote: mpsc::UnboundedSender<Vec<u8>>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => {
                if remote.send(escape_iac(&buf[..n])).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("Receiver stdout error: {}", e);
                return;
            }
        }
    }
}

async fn read_stderr(
    mut stderr: impl AsyncRead + Unpin,
    events: mpsc::UnboundedSender<TransferEvent>,
) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = match stderr.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        let text = String::from_utf8_lossy(&buf[..n]);
        for update in parse_progress(&text) {
            let event = match update {
                Progress::FileName(name) => TransferEvent::FileInfo(name),
                Progress::Percent(percent) => TransferEvent::Progress(percent),
            };
            let _ = events.send(event);
        }
    }
}

async fn wait_for_exit(
    mut child: Child,
    dir: tempfile::TempDir,
    control: Arc<Control>,
    events: mpsc::UnboundedSender<TransferEvent>,
    completion_delay: Duration,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = control.kill.notified() => None,
    };
    match exited {
        Some(Ok(status)) => debug!("Receiver exited with {}", status),
        Some(Err(e)) => warn!("Failed to wait for receiver: {}", e),
        None => {
            if let Err(e) = child.start_kill() {
                debug!("Receiver already gone: {}", e);
            }
            let _ = child.wait().await;
        }
    }
    control.done.store(true, Ordering::Release);

    if !control.cancelled.load(Ordering::Acquire) {
        tokio::time::sleep(completion_delay).await;
        deliver_files(dir.path(), &events).await;
    }

    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}

async fn deliver_files(dir: &Path, events: &mpsc::UnboundedSender<TransferEvent>) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read {}: {}", dir.display(), e);
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        match tokio::fs::read(entry.path()).await {
            Ok(data) => {
                info!("Received {} ({} bytes)", name, data.len());
                let _ = events.send(TransferEvent::File { name, data });
            }
            Err(e) => warn!("Failed to read received file {}: {}", name, e),
        }
    }
}

async fn watchdog(
    control: Arc<Control>,
    remote: mpsc::UnboundedSender<Vec<u8>>,
    events: mpsc::UnboundedSender<TransferEvent>,
    options: ReceiverOptions,
) {
    let mut ticker = tokio::time::interval(options.watchdog_interval);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if control.is_done() {
            return;
        }

        let reason = if control.started.elapsed() > options.max_duration {
            "maximum duration exceeded"
        } else if control.idle() > options.inactivity_timeout {
            "no activity"
        } else {
            continue;
        };

        warn!("Cancelling transfer: {}", reason);
        let _ = remote.send(CANCEL_SEQUENCE.to_vec());
        control.abort();
        let _ = events.send(TransferEvent::Failed(format!("Transfer cancelled: {reason}")));
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIGNATURE: &[u8] = b"**\x18B00";

    fn options(script: &str) -> ReceiverOptions {
        ReceiverOptions {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            inactivity_timeout: Duration::from_secs(90),
            max_duration: Duration::from_secs(1800),
            watchdog_interval: Duration::from_secs(5),
            completion_delay: Duration::from_millis(10),
        }
    }

    fn receiver(
        options: ReceiverOptions,
    ) -> (
        LrzszReceiver,
        mpsc::UnboundedReceiver<Vec<u8>>,
        mpsc::UnboundedReceiver<TransferEvent>,
    ) {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            LrzszReceiver::new(options, remote_tx, event_tx),
            remote_rx,
            event_rx,
        )
    }

    async fn wait_inactive(receiver: &LrzszReceiver) {
        for _ in 0..200 {
            if !receiver.is_active() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transfer still active");
    }

    #[tokio::test]
    async fn test_passthrough_without_signature() {
        let (mut rx, _remote, _events) = receiver(options("exit 0"));
        assert_eq!(rx.process_data(b"hello"), (b"hello".to_vec(), false));
        assert!(!rx.is_active());
    }

    #[tokio::test]
    async fn test_receives_file() {
        let script = "printf 'Receiving: demo.bin\\n 50%%\\n' >&2; \
                      head -c 12 > demo.bin; printf 'ok\\377'";
        let (mut rx, mut remote, mut events) = receiver(options(script));

        let (rest, consumed) = rx.process_data(b"**\x18B00hel");
        assert!(consumed);
        assert!(rest.is_empty());
        assert!(rx.is_active());

        let (rest, consumed) = rx.process_data(b"lo!");
        assert!(consumed);
        assert!(rest.is_empty());

        assert_eq!(remote.recv().await.unwrap(), binary_mode_request().to_vec());
        let mut relayed = Vec::new();
        while relayed.len() < 4 {
            relayed.extend(remote.recv().await.unwrap());
        }
        assert_eq!(relayed, b"ok\xff\xff");

        let mut seen = Vec::new();
        let file = loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let TransferEvent::File { name, data } = event {
                break (name, data);
            }
            seen.push(event);
        };
        assert_eq!(file.0, "demo.bin");
        assert_eq!(file.1, b"**\x18B00hello!");
        assert_eq!(seen[0], TransferEvent::Started);
        assert!(seen.contains(&TransferEvent::FileInfo("demo.bin".to_string())));
        assert!(seen.contains(&TransferEvent::Progress(50)));

        wait_inactive(&rx).await;
        assert_eq!(rx.process_data(b"back"), (b"back".to_vec(), false));
    }

    #[tokio::test]
    async fn test_signature_split_across_chunks() {
        let (mut rx, _remote, _events) = receiver(options("cat > /dev/null"));
        assert_eq!(rx.process_data(b"x**\x18"), (b"x**\x18".to_vec(), false));
        let (_, consumed) = rx.process_data(b"B00");
        assert!(consumed);
        assert!(rx.is_active());
        rx.cancel();
    }

    #[tokio::test]
    async fn test_spawn_failure_passes_chunk_through() {
        let mut opts = options("");
        opts.command = "/nonexistent/bbs-bridge-rz".to_string();
        let (mut rx, mut remote, mut events) = receiver(opts);

        assert_eq!(rx.process_data(SIGNATURE), (SIGNATURE.to_vec(), false));
        assert!(!rx.is_active());
        assert!(matches!(events.recv().await, Some(TransferEvent::Failed(_))));
        // Nothing reaches the remote, not even the binary mode request.
        assert!(remote.try_recv().is_err());
        // The lookback was discarded, so plain text passes again.
        assert_eq!(rx.process_data(b"ok"), (b"ok".to_vec(), false));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (mut rx, mut remote, mut events) = receiver(options("cat > partial.bin"));
        rx.process_data(SIGNATURE);
        assert!(rx.is_active());

        rx.cancel();
        assert!(!rx.is_active());
        rx.cancel();

        assert_eq!(remote.recv().await.unwrap(), binary_mode_request().to_vec());
        assert_eq!(remote.recv().await.unwrap(), CANCEL_SEQUENCE.to_vec());
        assert_eq!(events.recv().await, Some(TransferEvent::Started));

        // Cancelled transfers deliver nothing.
        let next = tokio::time::timeout(Duration::from_millis(200), events.recv()).await;
        assert!(!matches!(next, Ok(Some(TransferEvent::File { .. }))));
    }

    #[tokio::test]
    async fn test_stdin_failure_cancels_remote() {
        // Stops reading its input but keeps running.
        let (mut rx, mut remote, _events) = receiver(options("exec 0<&-; sleep 5"));
        rx.process_data(SIGNATURE);
        assert_eq!(remote.recv().await.unwrap(), binary_mode_request().to_vec());

        tokio::time::sleep(Duration::from_millis(200)).await;
        rx.process_data(&[0x55; 1024]);

        let cancel = tokio::time::timeout(Duration::from_secs(5), remote.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cancel, CANCEL_SEQUENCE.to_vec());
        wait_inactive(&rx).await;
    }

    #[tokio::test]
    async fn test_watchdog_cancels_idle_transfer() {
        let mut opts = options("sleep 5");
        opts.inactivity_timeout = Duration::from_millis(50);
        opts.watchdog_interval = Duration::from_millis(20);
        let (mut rx, mut remote, mut events) = receiver(opts);

        rx.process_data(SIGNATURE);
        assert_eq!(events.recv().await, Some(TransferEvent::Started));

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(TransferEvent::Failed(_))));

        assert_eq!(remote.recv().await.unwrap(), binary_mode_request().to_vec());
        assert_eq!(remote.recv().await.unwrap(), CANCEL_SEQUENCE.to_vec());
        wait_inactive(&rx).await;
    }
}
