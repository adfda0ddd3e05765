//! Running service: device links plus the subscribers the service owns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use warren_config::Config;
use warren_nabd::{
    Batch, Device, DeviceState, Event, EventBus, EventKind, LinkError, SessionManager,
    StateTracker, Subscriber, SubscriberError,
};

use crate::health::HealthReporter;
use crate::telemetry::TelemetryHandle;

const EVENTS_TARGET: &str = "warrend::events";

/// Subscriber turning device events into structured log records.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventLogger;

impl Subscriber for EventLogger {
    fn on_event(&self, device: &Device, event: &Event) -> Result<(), SubscriberError> {
        match event.kind() {
            EventKind::RfidDetected { uid } => {
                info!(target: EVENTS_TARGET, device = %device, uid = %uid, "tag detected");
            }
            EventKind::State(state) => {
                info!(target: EVENTS_TARGET, device = %device, state = %state, "state changed");
            }
            EventKind::Unknown => debug!(
                target: EVENTS_TARGET,
                device = %device,
                event_type = event.type_name().unwrap_or("untyped"),
                "event received"
            ),
        }
        Ok(())
    }
}

/// Bootstrapped service.
pub struct Service {
    config: Config,
    bus: Arc<EventBus>,
    states: Arc<StateTracker>,
    manager: SessionManager,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
    started: AtomicBool,
}

impl Service {
    pub(crate) fn new(
        config: Config,
        bus: Arc<EventBus>,
        states: Arc<StateTracker>,
        manager: SessionManager,
        telemetry: TelemetryHandle,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            config,
            bus,
            states,
            manager,
            telemetry,
            reporter,
            started: AtomicBool::new(false),
        }
    }

    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Bus shared by every device link; collaborators subscribe here.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Last reported state of every device.
    #[must_use]
    pub fn states(&self) -> &StateTracker {
        &self.states
    }

    /// Device links.
    #[must_use]
    pub const fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Subscribes the event logger and connects every device, greeting them
    /// when configured to. Calling it again is a no-op.
    pub fn start(&self) -> Result<(), LinkError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.bus.subscribe(EventLogger);
        self.manager.connect_all(self.config.greet_on_connect())?;
        self.reporter.service_started(self.manager.registry().len());
        Ok(())
    }

    /// Sends commands to a device; see [`SessionManager::publish`].
    pub fn publish(&self, device: &str, batch: impl Into<Batch>) -> Result<(), LinkError> {
        self.manager.publish(device, batch)
    }

    /// Last state reported by the named device.
    pub fn device_state(&self, device: &str) -> Result<DeviceState, LinkError> {
        let device = self
            .manager
            .registry()
            .resolve(device)
            .map_err(|_| LinkError::UnknownDevice {
                query: device.to_owned(),
            })?;
        Ok(self.states.state(device))
    }

    /// Stops every device link and waits for the supervisors to exit.
    pub fn stop(&self) {
        self.manager.shutdown();
        self.reporter.service_stopped();
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("manager", &self.manager)
            .field("subscribers", &self.bus.subscriber_count())
            .finish_non_exhaustive()
    }
}
