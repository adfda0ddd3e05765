//! Behavioural coverage for configuration layering.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use warren_config::{
    Config, DEFAULT_READ_TIMEOUT_MS, DEFAULT_RECONNECT_COOLDOWN_MS, DeviceEntry,
    default_log_filter, default_log_format,
};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const READ_TIMEOUT_VAR: &str = "WARREN_READ_TIMEOUT_MS";

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    file_lines: RefCell<Vec<String>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    loaded: RefCell<Option<Config>>,
    error: RefCell<Option<String>>,
    _env_guard: MutexGuard<'static, ()>,
}

impl Harness {
    fn new() -> Self {
        let env_guard = ENV_MUTEX
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        let harness = Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("warrend")]),
            file_lines: RefCell::new(Vec::new()),
            env_overrides: RefCell::new(Vec::new()),
            loaded: RefCell::new(None),
            error: RefCell::new(None),
            _env_guard: env_guard,
        };
        // Stray variables from the host would leak into every scenario.
        harness.clear_env(READ_TIMEOUT_VAR);
        harness
    }

    fn push_file_line(&self, line: String) {
        self.file_lines.borrow_mut().push(line);
    }

    fn write_config(&self) {
        let lines = self.file_lines.borrow();
        if lines.is_empty() {
            return;
        }
        let path = self.temp_dir.path().join("warren.toml");
        if let Err(error) = fs::write(&path, lines.join("\n")) {
            panic!("failed to write configuration: {error}");
        }
        let mut args = self.cli_args.borrow_mut();
        args.insert(1, path.into_os_string());
        args.insert(1, OsString::from("--config-path"));
    }

    fn set_env(&self, key: &str, value: &str) {
        let previous = std::env::var_os(key);
        // Environment mutation is serialised by `ENV_MUTEX` and undone in `Drop`.
        unsafe { std::env::set_var(key, value) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_owned(), previous));
    }

    fn clear_env(&self, key: &str) {
        let previous = std::env::var_os(key);
        unsafe { std::env::remove_var(key) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_owned(), previous));
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) {
        if self.loaded.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }

        self.write_config();
        let args = self.cli_args.borrow().clone();
        match Config::load_from_iter(args) {
            Ok(config) => {
                *self.loaded.borrow_mut() = Some(config);
            }
            Err(error) => {
                *self.error.borrow_mut() = Some(error.to_string());
            }
        }
    }

    fn loaded_config(&self) -> Config {
        self.load();

        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }

        match self.loaded.borrow().as_ref() {
            Some(config) => config.clone(),
            None => panic!("configuration was not loaded"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let mut overrides = self.env_overrides.borrow_mut();
        while let Some((key, value)) = overrides.pop() {
            if let Some(os_value) = value {
                unsafe { std::env::set_var(&key, os_value) };
            } else {
                unsafe { std::env::remove_var(&key) };
            }
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the read timeout to \"{millis}\"")]
fn given_file_timeout(harness: &Harness, millis: u64) {
    harness.push_file_line(format!("read_timeout_ms = {millis}"));
}

#[given("a configuration file declaring device \"{name}\" at \"{address}\"")]
fn given_file_device(harness: &Harness, name: String, address: String) {
    harness.push_file_line(String::from("[[devices]]"));
    harness.push_file_line(format!("name = \"{name}\""));
    harness.push_file_line(format!("address = \"{address}\""));
}

#[given("the environment overrides the read timeout to \"{millis}\"")]
fn given_env_timeout(harness: &Harness, millis: u64) {
    harness.set_env(READ_TIMEOUT_VAR, &millis.to_string());
}

#[when("the CLI sets the read timeout to \"{millis}\"")]
fn when_cli_timeout(harness: &Harness, millis: u64) {
    harness.push_cli_arg("--read-timeout-ms");
    harness.push_cli_arg(millis.to_string());
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.load();
}

#[then("loading the configuration resolves the read timeout to \"{millis}\"")]
fn then_resolved_timeout(harness: &Harness, millis: u64) {
    let config = harness.loaded_config();

    assert_eq!(config.read_timeout_ms, millis);
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults_applied(harness: &Harness) {
    let config = harness.loaded_config();

    assert_eq!(config.read_timeout_ms, DEFAULT_READ_TIMEOUT_MS);
    assert_eq!(config.reconnect_cooldown_ms, DEFAULT_RECONNECT_COOLDOWN_MS);
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
    assert!(config.devices().is_empty(), "expected no devices");
}

#[then("loading the configuration lists device \"{name}\" at \"{address}\"")]
fn then_lists_device(harness: &Harness, name: String, address: String) {
    let config = harness.loaded_config();

    assert_eq!(config.devices(), &[DeviceEntry::new(name, address)]);
}

#[scenario(path = "tests/features/configuration_precedence.feature", index = 0)]
fn environment_overrides_file(harness: Harness) {
    let _ = harness;
}

#[scenario(path = "tests/features/configuration_precedence.feature", index = 1)]
fn cli_overrides_environment(harness: Harness) {
    let _ = harness;
}

#[scenario(path = "tests/features/configuration_precedence.feature", index = 2)]
fn defaults_apply(harness: Harness) {
    let _ = harness;
}

#[scenario(path = "tests/features/configuration_precedence.feature", index = 3)]
fn devices_from_file(harness: Harness) {
    let _ = harness;
}
