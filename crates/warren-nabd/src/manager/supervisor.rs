//! Connection lifecycle of a single device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{LinkError, LinkStatus, LinkTiming};
use crate::bus::EventBus;
use crate::codec::{self, Command, Event, MalformedFrame};
use crate::device::Device;
use crate::transport::{BridgeProcess, Connector, FrameWriter, ReadOutcome, Session, TransportError};

/// Log target for supervisor activity.
const SUPERVISOR_TARGET: &str = "warren_nabd::supervisor";

/// Why a live session ended.
#[derive(Debug, Error)]
enum SessionLoss {
    #[error("no reply to the liveness probe")]
    ProbeUnanswered,
    #[error("bridge closed the stream")]
    Closed,
    #[error("shutdown requested")]
    Shutdown,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Malformed(#[from] MalformedFrame),
}

/// Writable half of the live session, as seen by publishers.
#[derive(Clone)]
struct LiveSession {
    id: u64,
    writer: Arc<FrameWriter>,
    process: Arc<BridgeProcess>,
}

struct LinkState {
    status: LinkStatus,
    live: Option<LiveSession>,
    greet_pending: bool,
}

/// State shared between the supervisor thread and publishers.
struct LinkShared {
    device: Device,
    bus: Arc<EventBus>,
    connector: Arc<dyn Connector>,
    timing: LinkTiming,
    stopping: Arc<AtomicBool>,
    state: Mutex<LinkState>,
    changed: Condvar,
}

/// One device, its shared state and its supervisor thread, if started.
pub(super) struct DeviceLink {
    shared: Arc<LinkShared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceLink {
    pub(super) fn new(
        device: Device,
        bus: Arc<EventBus>,
        connector: Arc<dyn Connector>,
        timing: LinkTiming,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        let shared = LinkShared {
            device,
            bus,
            connector,
            timing,
            stopping,
            state: Mutex::new(LinkState {
                status: LinkStatus::Disconnected,
                live: None,
                greet_pending: false,
            }),
            changed: Condvar::new(),
        };
        Self {
            shared: Arc::new(shared),
            supervisor: Mutex::new(None),
        }
    }

    pub(super) fn device(&self) -> &Device {
        &self.shared.device
    }

    pub(super) fn status(&self) -> LinkStatus {
        self.shared.lock_state().status
    }

    /// Spawns the supervisor unless a running one exists. The check and the
    /// spawn happen under the same lock, so concurrent callers start at most
    /// one thread.
    pub(super) fn ensure_started(&self) -> Result<(), LinkError> {
        let mut slot = self
            .supervisor
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        if self.shared.is_stopping() {
            return Err(LinkError::ShuttingDown);
        }
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        if let Some(finished) = slot.take()
            && finished.join().is_err()
        {
            warn!(
                target: SUPERVISOR_TARGET,
                device = %self.shared.device,
                "previous supervisor panicked; restarting"
            );
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(format!("nabd-supervisor-{}", self.shared.device.name()))
            .spawn(move || shared.supervise())
            .map_err(|source| LinkError::SupervisorSpawn {
                device: self.shared.device.name().to_owned(),
                source: Arc::new(source),
            })?;
        *slot = Some(handle);
        Ok(())
    }

    /// Sends the greeting now when a session is live, or marks it for the
    /// next handshake.
    pub(super) fn request_greeting(&self) {
        let live = {
            let mut state = self.shared.lock_state();
            if state.live.is_none() {
                state.greet_pending = true;
            }
            state.live.clone()
        };
        if let Some(live) = live {
            self.shared.greet(live.id, &live.writer);
        }
    }

    /// Writes the frames to the current session, moving on to the next one
    /// whenever a write fails.
    pub(super) fn deliver(&self, frames: &[Vec<u8>]) -> Result<(), LinkError> {
        let mut failed: Option<u64> = None;
        loop {
            let live = self.shared.wait_live(failed)?;
            match live.writer.write_lines(frames) {
                Ok(()) => return Ok(()),
                Err(error) => {
                    debug!(
                        target: SUPERVISOR_TARGET,
                        device = %self.shared.device,
                        session = live.id,
                        error = %error,
                        "write failed; waiting for the next session"
                    );
                    live.process.terminate();
                    failed = Some(live.id);
                }
            }
        }
    }

    /// Forces the live session down and wakes every waiter. The stop flag
    /// must already be set.
    pub(super) fn halt(&self) {
        let state = self.shared.lock_state();
        if let Some(live) = state.live.as_ref() {
            live.process.terminate();
            live.writer.shut();
        }
        self.shared.changed.notify_all();
    }

    pub(super) fn join(&self) {
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            warn!(
                target: SUPERVISOR_TARGET,
                device = %self.shared.device,
                "supervisor panicked"
            );
        }
    }
}

impl LinkShared {
    fn lock_state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn set_status(&self, status: LinkStatus) {
        self.lock_state().status = status;
    }

    /// Blocks until a session newer than `failed` is live.
    fn wait_live(&self, failed: Option<u64>) -> Result<LiveSession, LinkError> {
        let mut state = self.lock_state();
        loop {
            if self.is_stopping() {
                return Err(LinkError::ShuttingDown);
            }
            let usable = state
                .live
                .as_ref()
                .filter(|live| failed.is_none_or(|failed| live.id > failed));
            if let Some(live) = usable {
                return Ok(live.clone());
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|poison| poison.into_inner());
        }
    }

    fn supervise(&self) {
        info!(target: SUPERVISOR_TARGET, device = %self.device, "supervisor started");
        while !self.is_stopping() {
            self.set_status(LinkStatus::Connecting);
            match self.establish() {
                Ok(session) => {
                    let loss = self.read_until_lost(&session);
                    self.retire(&session);
                    if self.is_stopping() {
                        debug!(
                            target: SUPERVISOR_TARGET,
                            device = %self.device,
                            session = session.id(),
                            "session closed for shutdown"
                        );
                    } else {
                        warn!(
                            target: SUPERVISOR_TARGET,
                            device = %self.device,
                            session = session.id(),
                            uptime = ?session.opened_at().elapsed(),
                            reason = %loss,
                            "session lost"
                        );
                    }
                    self.bus.dispatch(&self.device, &Event::offline());
                }
                Err(error) => {
                    self.set_status(LinkStatus::Disconnected);
                    self.report_failed_attempt(&error);
                }
            }
            self.cool_down();
        }
        self.set_status(LinkStatus::Disconnected);
        info!(target: SUPERVISOR_TARGET, device = %self.device, "supervisor stopped");
    }

    fn report_failed_attempt(&self, error: &TransportError) {
        if self.is_stopping() {
            debug!(target: SUPERVISOR_TARGET, device = %self.device, "attempt abandoned for shutdown");
        } else if error.is_unavailable() {
            warn!(target: SUPERVISOR_TARGET, device = %self.device, error = %error, "bridge unavailable");
        } else {
            warn!(
                target: SUPERVISOR_TARGET,
                device = %self.device,
                error = %error,
                "connection attempt failed"
            );
        }
    }

    /// Opens a session, subscribes, then exposes it to publishers. The
    /// handshake is written before exposure so it is always the first frame.
    fn establish(&self) -> Result<Session, TransportError> {
        let session = self.connector.open(&self.device)?;
        session.write_lines(&[codec::encode(&Command::handshake())])?;

        let greet = {
            let mut state = self.lock_state();
            if self.is_stopping() {
                drop(state);
                session.close();
                return Err(TransportError::Closed);
            }
            state.live = Some(LiveSession {
                id: session.id(),
                writer: session.writer(),
                process: session.process(),
            });
            state.status = LinkStatus::Connected;
            std::mem::take(&mut state.greet_pending)
        };
        self.changed.notify_all();
        info!(
            target: SUPERVISOR_TARGET,
            device = %self.device,
            session = session.id(),
            "session established"
        );

        if greet {
            self.greet(session.id(), &session.writer());
        }
        Ok(session)
    }

    /// Rotates the ears forward and back. Best effort.
    fn greet(&self, session: u64, writer: &FrameWriter) {
        let frames = [
            codec::encode(&Command::ears(1, 1)),
            codec::encode(&Command::ears(0, 0)),
        ];
        if let Err(error) = writer.write_lines(&frames) {
            warn!(
                target: SUPERVISOR_TARGET,
                device = %self.device,
                session,
                error = %error,
                "greeting failed"
            );
        }
    }

    /// Dispatches inbound frames until the session is lost.
    fn read_until_lost(&self, session: &Session) -> SessionLoss {
        let mut probing = false;
        loop {
            let outcome = match session.read_frame(self.timing.read_timeout) {
                Ok(outcome) => outcome,
                Err(error) => return error.into(),
            };
            match outcome {
                ReadOutcome::Frame(line) => {
                    let event = match codec::decode(&line) {
                        Ok(event) => event,
                        Err(error) => return error.into(),
                    };
                    if probing {
                        probing = false;
                        self.set_status(LinkStatus::Connected);
                    }
                    self.bus.dispatch(&self.device, &event);
                }
                ReadOutcome::Closed => return SessionLoss::Closed,
                ReadOutcome::Timeout if self.is_stopping() => return SessionLoss::Shutdown,
                ReadOutcome::Timeout if probing => return SessionLoss::ProbeUnanswered,
                ReadOutcome::Timeout => {
                    probing = true;
                    self.set_status(LinkStatus::Probing);
                    debug!(
                        target: SUPERVISOR_TARGET,
                        device = %self.device,
                        session = session.id(),
                        "daemon silent; probing"
                    );
                    // The deadline never waits on the writer lock: a busy
                    // writer counts as probed.
                    match session
                        .writer()
                        .try_write_lines(&[codec::encode(&Command::gestalt())])
                    {
                        Ok(true) => {}
                        Ok(false) => debug!(
                            target: SUPERVISOR_TARGET,
                            device = %self.device,
                            session = session.id(),
                            "writer busy; probe skipped"
                        ),
                        Err(error) => return error.into(),
                    }
                }
            }
        }
    }

    /// Withdraws the session from publishers and closes it.
    fn retire(&self, session: &Session) {
        {
            let mut state = self.lock_state();
            if state
                .live
                .as_ref()
                .is_some_and(|live| live.id == session.id())
            {
                state.live = None;
            }
            state.status = LinkStatus::Disconnected;
        }
        session.close();
    }

    /// Sleeps for the cooldown, returning early on shutdown.
    fn cool_down(&self) {
        let state = self.lock_state();
        let waited = self
            .changed
            .wait_timeout_while(state, self.timing.reconnect_cooldown, |_| {
                !self.is_stopping()
            });
        drop(waited.unwrap_or_else(|poison| poison.into_inner()));
    }
}
