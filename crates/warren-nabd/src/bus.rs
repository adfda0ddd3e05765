//! In-process fan-out of decoded events.
//!
//! Subscribers register once, usually at startup, and receive every event of
//! every device in registration order on the supervisor thread that decoded
//! it. A subscriber that fails, by returning an error or by panicking, is
//! logged and skipped; the remaining subscribers and the read loop carry on.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::codec::Event;
use crate::device::Device;

/// Log target for dispatch.
const BUS_TARGET: &str = "warren_nabd::bus";

/// Error type subscribers may return.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every dispatched event.
pub trait Subscriber: Send + Sync {
    /// Handles one event from one device.
    fn on_event(&self, device: &Device, event: &Event) -> Result<(), SubscriberError>;
}

impl<F> Subscriber for F
where
    F: Fn(&Device, &Event) -> Result<(), SubscriberError> + Send + Sync,
{
    fn on_event(&self, device: &Device, event: &Event) -> Result<(), SubscriberError> {
        self(device, event)
    }
}

/// Ordered list of subscribers shared by every supervisor.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
}

impl EventBus {
    /// Creates a bus without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a subscriber. Events already dispatched are not replayed.
    pub fn subscribe<S>(&self, subscriber: S)
    where
        S: Subscriber + 'static,
    {
        self.subscribe_shared(Arc::new(subscriber));
    }

    /// Appends a subscriber the caller keeps a handle on.
    pub fn subscribe_shared(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(subscriber);
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .len()
    }

    /// Delivers the event to every subscriber, in registration order.
    ///
    /// The list is snapshotted first so a subscriber may itself subscribe
    /// without deadlocking.
    pub fn dispatch(&self, device: &Device, event: &Event) {
        let snapshot: Vec<Arc<dyn Subscriber>> = self
            .subscribers
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone();
        let event_type = event.type_name().unwrap_or("unknown");
        debug!(
            target: BUS_TARGET,
            device = %device,
            event_type,
            subscribers = snapshot.len(),
            "dispatching event"
        );

        for (index, subscriber) in snapshot.iter().enumerate() {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_event(device, event)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => warn!(
                    target: BUS_TARGET,
                    device = %device,
                    event_type,
                    subscriber = index,
                    error = %error,
                    "subscriber failed"
                ),
                Err(payload) => warn!(
                    target: BUS_TARGET,
                    device = %device,
                    event_type,
                    subscriber = index,
                    panic = panic_message(payload.as_ref()),
                    "subscriber panicked"
                ),
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
