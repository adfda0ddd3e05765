//! Duplex line transport to the daemon through a bridge process.
//!
//! A [`Session`] owns one bridge: the process handle, a writer shared by every
//! publisher, and a channel fed by a background thread that splits the bridge
//! output into lines. Reading through the channel lets the supervisor wait for
//! a frame with a bound instead of blocking on the pipe indefinitely.

mod bridge;
mod errors;

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::Child;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub use bridge::{BridgeCommand, BridgeConfig, BridgeConnector, Connector};
pub use errors::TransportError;

/// Log target for transport operations.
pub(crate) const TRANSPORT_TARGET: &str = "warren_nabd::transport";

static SESSION_ID: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> u64 {
    SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Result of a bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One line, terminator included when the bridge sent one.
    Frame(Vec<u8>),
    /// Nothing arrived within the timeout.
    Timeout,
    /// The bridge closed its output.
    Closed,
}

/// Writer half of a session, shared by every publisher of a device.
///
/// Shutting the writer never waits for a write in progress: the sink is
/// released by whichever side holds the lock last.
pub struct FrameWriter {
    sink: Mutex<Option<Box<dyn Write + Send>>>,
    shut: AtomicBool,
}

impl FrameWriter {
    fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
            shut: AtomicBool::new(false),
        }
    }

    /// Writes every frame and flushes, holding the writer lock throughout so
    /// batches from concurrent publishers never interleave.
    pub fn write_lines(&self, frames: &[Vec<u8>]) -> Result<(), TransportError> {
        if self.is_shut() {
            return Err(TransportError::Closed);
        }
        let mut guard = self.sink.lock().unwrap_or_else(|poison| poison.into_inner());
        self.write_locked(&mut guard, frames)
    }

    /// Like [`Self::write_lines`], but gives up at once when another writer
    /// holds the lock. Returns whether the frames were written.
    pub fn try_write_lines(&self, frames: &[Vec<u8>]) -> Result<bool, TransportError> {
        if self.is_shut() {
            return Err(TransportError::Closed);
        }
        let mut guard = match self.sink.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poison)) => poison.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(false),
        };
        self.write_locked(&mut guard, frames).map(|()| true)
    }

    fn write_locked(
        &self,
        sink: &mut Option<Box<dyn Write + Send>>,
        frames: &[Vec<u8>],
    ) -> Result<(), TransportError> {
        let outcome = match sink.as_mut() {
            Some(open) if !self.is_shut() => write_frames(&mut **open, frames),
            _ => Err(TransportError::Closed),
        };
        if self.is_shut() {
            drop(sink.take());
        }
        outcome
    }

    /// Marks the writer closed; later writes fail with
    /// [`TransportError::Closed`]. Returns without waiting for a write in
    /// progress, which drops the sink when it finishes.
    pub fn shut(&self) {
        self.shut.store(true, Ordering::Release);
        let guard = match self.sink.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poison)) => Some(poison.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        };
        if let Some(mut guard) = guard {
            drop(guard.take());
        }
    }

    /// Whether [`Self::shut`] has been called.
    #[must_use]
    pub fn is_shut(&self) -> bool {
        self.shut.load(Ordering::Acquire)
    }
}

fn write_frames(sink: &mut dyn Write, frames: &[Vec<u8>]) -> Result<(), TransportError> {
    for frame in frames {
        sink.write_all(frame)?;
    }
    sink.flush()?;
    Ok(())
}

/// Item carried from the reader thread to [`Session::read_frame`].
enum Pumped {
    Line(Vec<u8>),
    Failed(io::Error),
    HungUp,
}

/// Handle forcing a session down from any thread: kills the bridge process
/// and wakes a reader blocked in [`Session::read_frame`].
///
/// In-memory sessions built by [`Session::from_streams`] carry no process.
#[derive(Default)]
pub struct BridgeProcess {
    child: Mutex<Option<Child>>,
    hangup: Mutex<Option<Sender<Pumped>>>,
}

impl BridgeProcess {
    fn from_child(child: Child) -> Self {
        Self {
            child: Mutex::new(Some(child)),
            hangup: Mutex::new(None),
        }
    }

    fn arm(&self, hangup: Sender<Pumped>) {
        *self.hangup.lock().unwrap_or_else(|poison| poison.into_inner()) = Some(hangup);
    }

    /// Kills and reaps the process, then wakes the reader. Safe to call
    /// repeatedly or after the process already exited.
    pub fn terminate(&self) {
        self.kill_child();
        let hangup = self
            .hangup
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        if let Some(hangup) = hangup {
            drop(hangup.send(Pumped::HungUp));
        }
    }

    fn kill_child(&self) {
        let taken = self
            .child
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        let Some(mut child) = taken else {
            return;
        };
        let pid = child.id();
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(target: TRANSPORT_TARGET, pid, ?status, "bridge already exited");
                return;
            }
            Ok(None) => {}
            Err(error) => {
                warn!(target: TRANSPORT_TARGET, pid, error = %error, "failed to check bridge status");
            }
        }
        if let Err(error) = child.kill() {
            warn!(target: TRANSPORT_TARGET, pid, error = %error, "failed to kill bridge process");
        }
        match child.wait() {
            Ok(status) => debug!(target: TRANSPORT_TARGET, pid, ?status, "bridge terminated"),
            Err(error) => {
                warn!(target: TRANSPORT_TARGET, pid, error = %error, "failed to reap bridge process");
            }
        }
    }

    /// Process id of the running bridge.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .as_ref()
            .map(Child::id)
    }
}

/// One live connection to the daemon of one device.
pub struct Session {
    id: u64,
    opened_at: Instant,
    frames: Receiver<Pumped>,
    ended: AtomicBool,
    writer: Arc<FrameWriter>,
    process: Arc<BridgeProcess>,
}

impl Session {
    /// Builds a session over arbitrary byte streams, without a process.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Result<Self, TransportError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::assemble(reader, Box::new(writer), BridgeProcess::default())
    }

    /// Builds a session over a spawned bridge's stdio.
    pub(crate) fn from_child(mut child: Child) -> Result<Self, TransportError> {
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let process = BridgeProcess::from_child(child);
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            process.terminate();
            return Err(TransportError::SpawnFailed {
                message: String::from("failed to capture bridge stdio"),
                source: Arc::new(io::Error::other("stdio not piped")),
            });
        };
        Self::assemble(stdout, Box::new(stdin), process)
    }

    fn assemble<R>(
        reader: R,
        writer: Box<dyn Write + Send>,
        process: BridgeProcess,
    ) -> Result<Self, TransportError>
    where
        R: Read + Send + 'static,
    {
        let id = next_session_id();
        let (sender, frames) = mpsc::channel();
        process.arm(sender.clone());
        let process = Arc::new(process);
        let spawned = thread::Builder::new()
            .name(format!("nabd-session-{id}"))
            .spawn(move || pump_lines(reader, &sender));
        if let Err(error) = spawned {
            process.terminate();
            return Err(TransportError::SpawnFailed {
                message: String::from("failed to start bridge reader thread"),
                source: Arc::new(error),
            });
        }
        Ok(Self {
            id,
            opened_at: Instant::now(),
            frames,
            ended: AtomicBool::new(false),
            writer: Arc::new(FrameWriter::new(writer)),
            process,
        })
    }

    /// Process-unique session number.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// When the session was opened.
    #[must_use]
    pub const fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Shared writer for publishers.
    #[must_use]
    pub fn writer(&self) -> Arc<FrameWriter> {
        Arc::clone(&self.writer)
    }

    /// Shared process handle, used to force the session down from outside.
    #[must_use]
    pub fn process(&self) -> Arc<BridgeProcess> {
        Arc::clone(&self.process)
    }

    /// Waits up to `timeout` for the next line.
    ///
    /// Once the stream has ended or failed, every later read reports
    /// [`ReadOutcome::Closed`] without waiting.
    pub fn read_frame(&self, timeout: Duration) -> Result<ReadOutcome, TransportError> {
        if self.ended.load(Ordering::Acquire) {
            return Ok(ReadOutcome::Closed);
        }
        match self.frames.recv_timeout(timeout) {
            Ok(Pumped::Line(line)) => Ok(ReadOutcome::Frame(line)),
            Ok(Pumped::Failed(error)) => {
                self.ended.store(true, Ordering::Release);
                Err(error.into())
            }
            Ok(Pumped::HungUp) | Err(RecvTimeoutError::Disconnected) => {
                self.ended.store(true, Ordering::Release);
                Ok(ReadOutcome::Closed)
            }
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::Timeout),
        }
    }

    /// Writes frames through the shared writer.
    pub fn write_lines(&self, frames: &[Vec<u8>]) -> Result<(), TransportError> {
        self.writer.write_lines(frames)
    }

    /// Terminates the bridge, releases the writer and wakes any pending
    /// read, which then reports [`ReadOutcome::Closed`]. Never waits for a
    /// publisher stuck in a write. Idempotent.
    pub fn close(&self) {
        self.process.terminate();
        self.writer.shut();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("pid", &self.process.pid())
            .field("closed", &self.writer.is_shut())
            .finish_non_exhaustive()
    }
}

/// Splits the bridge output into lines until EOF, an error, or the session
/// stops listening.
fn pump_lines<R: Read>(reader: R, sender: &Sender<Pumped>) {
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                drop(sender.send(Pumped::HungUp));
                return;
            }
            Ok(_) => {
                if sender.send(Pumped::Line(line)).is_err() {
                    return;
                }
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                drop(sender.send(Pumped::Failed(error)));
                return;
            }
        }
    }
}
