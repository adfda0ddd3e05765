//! Test harness utilities for the service behavioural suite.

mod config_loader;
mod reporter;
#[path = "world.rs"]
mod world_fixture;

pub use config_loader::{FailingConfigLoader, test_config};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use world_fixture::{TestWorld, WAIT_TIMEOUT, world};
