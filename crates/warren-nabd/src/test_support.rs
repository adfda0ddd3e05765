//! In-memory connector for exercising supervisors without processes.
//!
//! Every call to [`ScriptedConnector::open`](crate::transport::Connector::open)
//! either fails, when failures were queued, or hands back a session wired to
//! a fresh [`FakeRemote`] that plays the daemon side: it pushes lines to the
//! supervisor and records everything written to it. A [`WriteFault`] can
//! make the writer of the next session hang or break.

use std::io::{self, Cursor, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::device::Device;
use crate::transport::{Connector, Session, TransportError};

/// Interval used by [`wait_until`] between checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Daemon side of one in-memory session.
#[derive(Debug)]
pub struct FakeRemote {
    device: Device,
    inbound: Mutex<Option<Sender<Vec<u8>>>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl FakeRemote {
    /// Device the session was opened for.
    #[must_use]
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Sends one line, appending the terminator.
    pub fn send_line(&self, line: &str) {
        let mut bytes = line.as_bytes().to_vec();
        bytes.push(b'\n');
        self.send_raw(bytes);
    }

    /// Sends bytes exactly as given.
    pub fn send_raw(&self, bytes: Vec<u8>) {
        if let Some(inbound) = lock(&self.inbound).as_ref() {
            drop(inbound.send(bytes));
        }
    }

    /// Closes the daemon side; the supervisor reads end of stream.
    pub fn hang_up(&self) {
        drop(lock(&self.inbound).take());
    }

    /// Every frame written by the supervisor and publishers, without
    /// terminators.
    #[must_use]
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&lock(&self.written))
            .split_terminator("\r\n")
            .map(str::to_owned)
            .collect()
    }

    /// Written frames parsed as JSON, skipping anything unparsable.
    #[must_use]
    pub fn written_json(&self) -> Vec<serde_json::Value> {
        self.written_lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Waits until at least `count` frames were written.
    pub fn wait_for_lines(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.written_lines().len() >= count)
    }
}

/// Writer misbehaviour armed for the next session opened.
///
/// The fault triggers on the first write whose bytes contain `marker`. Once
/// it has triggered, that write and every later one fail with a broken pipe,
/// as they would once the bridge died.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteFault {
    marker: &'static str,
    delay: Duration,
}

impl WriteFault {
    /// The matching write fails at once.
    #[must_use]
    pub const fn fail(marker: &'static str) -> Self {
        Self {
            marker,
            delay: Duration::ZERO,
        }
    }

    /// The matching write blocks for `delay`, the way a pipe nobody drains
    /// does, before failing.
    #[must_use]
    pub const fn hang(marker: &'static str, delay: Duration) -> Self {
        Self { marker, delay }
    }

    fn matches(&self, bytes: &[u8]) -> bool {
        let marker = self.marker.as_bytes();
        !marker.is_empty() && bytes.windows(marker.len()).any(|window| window == marker)
    }
}

#[derive(Default)]
struct Script {
    failures: usize,
    fault: Option<WriteFault>,
    attempts: Vec<Instant>,
    remotes: Vec<Arc<FakeRemote>>,
}

/// Connector handing out in-memory sessions.
#[derive(Default)]
pub struct ScriptedConnector {
    script: Mutex<Script>,
    opened: Condvar,
}

impl ScriptedConnector {
    /// Creates a connector whose attempts all succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` attempts fail as if the bridge were missing.
    pub fn fail_next(&self, count: usize) {
        lock(&self.script).failures += count;
    }

    /// Arms `fault` on the writer of the next session handed out.
    pub fn fault_next_session(&self, fault: WriteFault) {
        lock(&self.script).fault = Some(fault);
    }

    /// Number of attempts so far, failed or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        lock(&self.script).attempts.len()
    }

    /// When each attempt happened.
    #[must_use]
    pub fn attempt_times(&self) -> Vec<Instant> {
        lock(&self.script).attempts.clone()
    }

    /// Number of sessions handed out.
    #[must_use]
    pub fn sessions(&self) -> usize {
        lock(&self.script).remotes.len()
    }

    /// Daemon side of the `index`-th session, waiting for it to open.
    pub fn remote(&self, index: usize, timeout: Duration) -> Option<Arc<FakeRemote>> {
        let script = lock(&self.script);
        let (script, _) = self
            .opened
            .wait_timeout_while(script, timeout, |script| script.remotes.len() <= index)
            .unwrap_or_else(|poison| poison.into_inner());
        script.remotes.get(index).cloned()
    }

    /// Waits until at least `count` attempts were made.
    pub fn wait_for_attempts(&self, count: usize, timeout: Duration) -> bool {
        let script = lock(&self.script);
        let (script, _) = self
            .opened
            .wait_timeout_while(script, timeout, |script| script.attempts.len() < count)
            .unwrap_or_else(|poison| poison.into_inner());
        script.attempts.len() >= count
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, device: &Device) -> Result<Session, TransportError> {
        let mut script = lock(&self.script);
        script.attempts.push(Instant::now());
        self.opened.notify_all();
        if script.failures > 0 {
            script.failures -= 1;
            return Err(TransportError::BridgeNotFound {
                command: String::from("scripted"),
                source: Arc::new(io::Error::from(io::ErrorKind::NotFound)),
            });
        }

        let (inbound, chunks) = mpsc::channel();
        let written = Arc::new(Mutex::new(Vec::new()));
        let reader = ChannelReader {
            chunks,
            pending: Cursor::new(Vec::new()),
        };
        let writer = RecordingWriter {
            written: Arc::clone(&written),
            fault: script.fault.take(),
            broken: false,
        };
        let session = Session::from_streams(reader, writer)?;
        script.remotes.push(Arc::new(FakeRemote {
            device: device.clone(),
            inbound: Mutex::new(Some(inbound)),
            written,
        }));
        self.opened.notify_all();
        Ok(session)
    }
}

impl std::fmt::Debug for ScriptedConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let script = lock(&self.script);
        f.debug_struct("ScriptedConnector")
            .field("attempts", &script.attempts.len())
            .field("sessions", &script.remotes.len())
            .finish_non_exhaustive()
    }
}

struct ChannelReader {
    chunks: Receiver<Vec<u8>>,
    pending: Cursor<Vec<u8>>,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let read = self.pending.read(buf)?;
            if read > 0 {
                return Ok(read);
            }
            match self.chunks.recv() {
                Ok(chunk) => self.pending = Cursor::new(chunk),
                Err(_) => return Ok(0),
            }
        }
    }
}

struct RecordingWriter {
    written: Arc<Mutex<Vec<u8>>>,
    fault: Option<WriteFault>,
    broken: bool,
}

impl Write for RecordingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(fault) = self.fault
            && !self.broken
            && fault.matches(buf)
        {
            std::thread::sleep(fault.delay);
            self.broken = true;
        }
        if self.broken {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        lock(&self.written).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
