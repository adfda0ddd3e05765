//! Log output for the service.
//!
//! Every record goes to stderr through a single `fmt` layer filtered by the
//! configured directives. JSON lines carry the event fields flattened into
//! the top-level object, without span context, so each device event is one
//! flat record. Compact output is meant for a terminal and keeps colour only
//! when stderr is one.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use warren_config::{Config, LogFormat};

/// Format installed by the first successful call to [`initialise`].
static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

/// Proof that log output is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Format of the installed output. Later configurations do not change it.
    #[must_use]
    pub const fn format(self) -> LogFormat {
        self.format
    }
}

/// Errors encountered while configuring log output.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The filter directives did not parse.
    #[error("invalid log filter '{directives}': {message}")]
    Filter {
        /// Directives as configured.
        directives: String,
        /// Parser message.
        message: String,
    },
    /// Another global subscriber is already installed.
    #[error("failed to install log output: {0}")]
    Install(#[from] TryInitError),
}

/// Installs log output on the first call; later calls only report what was
/// installed.
///
/// # Examples
///
/// ```rust
/// use warren_config::{Config, LogFormat};
/// use warrend::telemetry;
///
/// # fn main() -> Result<(), warrend::TelemetryError> {
/// let first = telemetry::initialise(&Config::default())?;
/// let compact = Config {
///     log_format: LogFormat::Compact,
///     ..Config::default()
/// };
/// let second = telemetry::initialise(&compact)?;
/// assert_eq!(second.format(), first.format());
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| install(config).map(|()| config.log_format()))
        .map(|format| TelemetryHandle { format: *format })
}

fn install(config: &Config) -> Result<(), TelemetryError> {
    let filter = directives(config.log_filter())?;
    Registry::default()
        .with(stderr_layer(config.log_format()).with_filter(filter))
        .try_init()?;
    Ok(())
}

fn directives(text: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(text).map_err(|error| TelemetryError::Filter {
        directives: text.to_owned(),
        message: error.to_string(),
    })
}

fn stderr_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_thread_names(true);
    match format {
        LogFormat::Json => layer
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed(),
        LogFormat::Compact => layer
            .compact()
            .with_ansi(io::stderr().is_terminal())
            .boxed(),
    }
}
