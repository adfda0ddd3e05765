//! Last reported state per device.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::bus::{Subscriber, SubscriberError};
use crate::codec::{DeviceState, Event, EventKind};
use crate::device::Device;

/// Subscriber caching the most recent [`DeviceState`] of each device.
#[derive(Debug, Default)]
pub struct StateTracker {
    states: Mutex<HashMap<String, DeviceState>>,
}

impl StateTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last state reported for the device; `Offline` when nothing was heard.
    #[must_use]
    pub fn state(&self, device: &Device) -> DeviceState {
        self.states
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(device.address())
            .copied()
            .unwrap_or(DeviceState::Offline)
    }
}

impl Subscriber for StateTracker {
    fn on_event(&self, device: &Device, event: &Event) -> Result<(), SubscriberError> {
        if let EventKind::State(state) = event.kind() {
            self.states
                .lock()
                .unwrap_or_else(|poison| poison.into_inner())
                .insert(device.address().to_owned(), *state);
        }
        Ok(())
    }
}
