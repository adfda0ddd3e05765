//! Behavioural tests covering bootstrap, start and stop of the service.

use std::cell::RefCell;

use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::json;

use warren_nabd::test_support::wait_until;
use warren_nabd::{Command, LinkError};

use super::support::{HealthEvent, TestWorld, WAIT_TIMEOUT, world};

type StepResult = Result<(), String>;

#[given("a configuration declaring device \"{name}\" at \"{address}\"")]
fn given_device(world: &RefCell<TestWorld>, name: String, address: String) {
    world.borrow_mut().declare_device(name, address);
}

#[given("a failing configuration loader")]
fn given_failing_loader(world: &RefCell<TestWorld>) {
    world.borrow_mut().use_failing_loader();
}

#[when("the service bootstraps")]
fn when_bootstraps(world: &RefCell<TestWorld>) {
    world.borrow_mut().bootstrap();
}

#[when("the service starts")]
fn when_starts(world: &RefCell<TestWorld>) -> StepResult {
    let world = world.borrow();
    world.service()?.start().map_err(|error| error.to_string())
}

#[when("the service stops")]
fn when_stops(world: &RefCell<TestWorld>) -> StepResult {
    let world = world.borrow();
    world.service()?.stop();
    Ok(())
}

#[when("device \"{name}\" reports state \"{state}\"")]
fn when_reports_state(world: &RefCell<TestWorld>, name: String, state: String) -> StepResult {
    let remote = world.borrow().remote_for(&name)?;
    remote.send_line(&json!({"type": "state", "state": state}).to_string());
    Ok(())
}

#[then("bootstrap succeeds")]
fn then_bootstrap_succeeds(world: &RefCell<TestWorld>) -> StepResult {
    world.borrow().service().map(|_| ())
}

#[then("bootstrap fails")]
fn then_bootstrap_fails(world: &RefCell<TestWorld>) {
    assert!(world.borrow().bootstrap_error().is_some());
}

#[then("the reporter recorded bootstrap start")]
fn then_recorded_start(world: &RefCell<TestWorld>) {
    let events = world.borrow().reporter.events();
    assert_eq!(events.first(), Some(&HealthEvent::BootstrapStarting));
}

#[then("the reporter recorded bootstrap success")]
fn then_recorded_success(world: &RefCell<TestWorld>) {
    let events = world.borrow().reporter.events();
    assert!(events.contains(&HealthEvent::BootstrapSucceeded));
}

#[then("the reporter recorded bootstrap failure")]
fn then_recorded_failure(world: &RefCell<TestWorld>) {
    let events = world.borrow().reporter.events();
    assert!(
        events
            .iter()
            .any(|event| matches!(event, HealthEvent::BootstrapFailed(message) if !message.is_empty())),
        "missing failure in {events:?}"
    );
    assert!(!events.contains(&HealthEvent::BootstrapSucceeded));
}

#[then("no connection was attempted")]
fn then_no_attempts(world: &RefCell<TestWorld>) {
    assert_eq!(world.borrow().connector.attempts(), 0);
}

#[then("\"{count}\" devices received the handshake then the greeting")]
fn then_greeted(world: &RefCell<TestWorld>, count: usize) -> StepResult {
    let remotes = world.borrow().remotes(count)?;
    let greeting = [
        json!({"type": "ears", "left": 1, "right": 1}),
        json!({"type": "ears", "left": 0, "right": 0}),
    ];
    for remote in remotes {
        if !remote.wait_for_lines(3, WAIT_TIMEOUT) {
            return Err(format!("{} was not greeted", remote.device()));
        }
        let written = remote.written_json();
        assert_eq!(
            written.first().and_then(|frame| frame.get("type")),
            Some(&json!("mode"))
        );
        assert_eq!(written.get(1..3), Some(greeting.as_slice()));
    }
    assert_eq!(world.borrow().connector.attempts(), count);
    Ok(())
}

#[then("the reporter recorded the service start for \"{count}\" devices")]
fn then_recorded_service_start(world: &RefCell<TestWorld>, count: usize) {
    let events = world.borrow().reporter.events();
    assert!(events.contains(&HealthEvent::ServiceStarted(count)));
}

#[then("device \"{name}\" is \"{state}\"")]
fn then_device_state(world: &RefCell<TestWorld>, name: String, state: String) -> StepResult {
    let world = world.borrow();
    let service = world.service()?;
    let reached = wait_until(WAIT_TIMEOUT, || {
        service
            .device_state(&name)
            .is_ok_and(|current| current.to_string() == state)
    });
    let current = service
        .device_state(&name)
        .map_err(|error| error.to_string())?;

    assert!(reached, "{name} is {current}, expected {state}");
    Ok(())
}

#[then("publishing to \"{name}\" is refused because the service is shutting down")]
fn then_publish_refused(world: &RefCell<TestWorld>, name: String) -> StepResult {
    let world = world.borrow();
    let outcome = world.service()?.publish(&name, Command::ears(3, 3));

    assert!(
        matches!(outcome, Err(LinkError::ShuttingDown)),
        "unexpected outcome {outcome:?}"
    );
    Ok(())
}

#[then("the reporter recorded the service stop")]
fn then_recorded_stop(world: &RefCell<TestWorld>) {
    let events = world.borrow().reporter.events();
    assert_eq!(events.last(), Some(&HealthEvent::ServiceStopped));
}

#[scenario(path = "tests/features/service_lifecycle.feature", index = 0)]
fn bootstrap_succeeds(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/service_lifecycle.feature", index = 1)]
fn bootstrap_fails_on_configuration(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/service_lifecycle.feature", index = 2)]
fn bootstrap_rejects_duplicate_names(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/service_lifecycle.feature", index = 3)]
fn start_connects_and_greets(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/service_lifecycle.feature", index = 4)]
fn state_follows_reports(world: RefCell<TestWorld>) {
    let _ = world;
}

#[scenario(path = "tests/features/service_lifecycle.feature", index = 5)]
fn stop_refuses_commands(world: RefCell<TestWorld>) {
    let _ = world;
}
