//! Unit tests for the service lifecycle pieces.

use std::sync::Arc;

use rstest::rstest;
use warren_config::{Config, DeviceEntry};
use warren_nabd::test_support::ScriptedConnector;
use warren_nabd::{Connector, DeviceState, LinkError};

use super::support::{HealthEvent, RecordingHealthReporter, WAIT_TIMEOUT, test_config};
use crate::bootstrap::{BootstrapError, StaticConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::process::{ShutdownError, ShutdownSignal, serve};
use crate::service::Service;
use crate::telemetry;

struct ImmediateShutdown;

impl ShutdownSignal for ImmediateShutdown {
    fn wait(&self) -> Result<(), ShutdownError> {
        Ok(())
    }
}

struct BrokenShutdown;

impl ShutdownSignal for BrokenShutdown {
    fn wait(&self) -> Result<(), ShutdownError> {
        Err(ShutdownError::Install {
            source: std::io::Error::other("no signals here"),
        })
    }
}

fn bootstrapped(
    devices: Vec<DeviceEntry>,
) -> (Service, Arc<RecordingHealthReporter>, Arc<ScriptedConnector>) {
    let reporter = Arc::new(RecordingHealthReporter::default());
    let connector = Arc::new(ScriptedConnector::new());
    let shared = Arc::clone(&connector) as Arc<dyn Connector>;
    let service = bootstrap_with(
        &StaticConfigLoader::new(test_config(devices)),
        Arc::clone(&reporter) as Arc<dyn HealthReporter>,
        move |_| shared,
    )
    .expect("bootstrap succeeds");
    (service, reporter, connector)
}

fn kitchen() -> Vec<DeviceEntry> {
    vec![DeviceEntry::new("kitchen", "10.0.0.5")]
}

#[test]
fn telemetry_initialisation_is_idempotent() {
    let config = Config::default();

    let first = telemetry::initialise(&config).expect("first call");
    let second = telemetry::initialise(&config).expect("second call");

    assert_eq!(first, second);
}

#[test]
fn serve_starts_then_stops_the_service() {
    let (service, reporter, connector) = bootstrapped(kitchen());

    serve(&service, &ImmediateShutdown).expect("serve succeeds");

    assert!(connector.wait_for_attempts(1, WAIT_TIMEOUT));
    assert_eq!(
        reporter.events(),
        vec![
            HealthEvent::BootstrapStarting,
            HealthEvent::BootstrapSucceeded,
            HealthEvent::ServiceStarted(1),
            HealthEvent::ServiceStopped,
        ]
    );
    assert!(service.manager().is_shutting_down());
}

#[test]
fn serve_stops_the_service_when_waiting_fails() {
    let (service, reporter, _connector) = bootstrapped(kitchen());

    let outcome = serve(&service, &BrokenShutdown);

    assert!(matches!(outcome, Err(crate::LaunchError::Shutdown(_))));
    assert_eq!(reporter.events().last(), Some(&HealthEvent::ServiceStopped));
}

#[test]
fn starting_twice_subscribes_the_logger_once() {
    let (service, reporter, connector) = bootstrapped(kitchen());

    service.start().expect("first start");
    service.start().expect("second start");

    assert_eq!(service.bus().subscriber_count(), 2);
    assert!(connector.wait_for_attempts(1, WAIT_TIMEOUT));
    let started = reporter
        .events()
        .into_iter()
        .filter(|event| matches!(event, HealthEvent::ServiceStarted(_)))
        .count();
    assert_eq!(started, 1);
    service.stop();
}

#[rstest]
#[case("kitchen")]
#[case("KITCHEN")]
#[case("10.0.0.5")]
fn devices_start_offline(#[case] query: &str) {
    let (service, _reporter, _connector) = bootstrapped(kitchen());

    assert_eq!(service.device_state(query).ok(), Some(DeviceState::Offline));
}

#[test]
fn unknown_devices_are_rejected() {
    let (service, _reporter, _connector) = bootstrapped(kitchen());

    assert!(matches!(
        service.device_state("attic"),
        Err(LinkError::UnknownDevice { query }) if query == "attic"
    ));
    assert!(matches!(
        service.publish("attic", warren_nabd::Command::gestalt()),
        Err(LinkError::UnknownDevice { .. })
    ));
}

#[test]
fn telemetry_failures_name_the_stage() {
    let error = BootstrapError::Telemetry {
        source: telemetry::TelemetryError::Filter {
            directives: String::from("bad=loud"),
            message: String::from("invalid level"),
        },
    };

    assert_eq!(
        error.to_string(),
        "failed to initialise telemetry: invalid log filter 'bad=loud': invalid level"
    );
}

#[test]
fn reporters_behind_an_arc_forward_every_event() {
    let recorder = Arc::new(RecordingHealthReporter::default());
    let reporter: Arc<dyn HealthReporter> = Arc::new(Arc::clone(&recorder));

    reporter.bootstrap_starting();
    reporter.service_started(3);
    reporter.service_stopped();

    assert_eq!(
        recorder.events(),
        vec![
            HealthEvent::BootstrapStarting,
            HealthEvent::ServiceStarted(3),
            HealthEvent::ServiceStopped,
        ]
    );
}

#[test]
fn structured_reporter_accepts_every_event() {
    let reporter = StructuredHealthReporter::new();
    let config = test_config(kitchen());

    reporter.bootstrap_starting();
    reporter.bootstrap_succeeded(&config);
    reporter.service_started(config.devices().len());
    reporter.service_stopped();
}
