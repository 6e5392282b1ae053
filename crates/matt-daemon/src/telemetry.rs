//! Structured diagnostics for the daemon.
//!
//! Diagnostics go to stderr through `tracing`; they are separate from the
//! operator journal written by [`crate::journal`]. Once the process detaches,
//! stderr points at `/dev/null`, so the stream is muted instead of formatting
//! events nobody can read.

use std::io::{self, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter, writer::OptionalWriter};

use matt_daemon_config::{Config, LogFormat};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();
static DETACHED: AtomicBool = AtomicBool::new(false);

/// Targets owned by this workspace. A bare level in the configured filter
/// applies to these; third-party crates stay at `warn`.
const DAEMON_TARGETS: [&str; 3] = [env!("CARGO_PKG_NAME"), "matt_daemon", "matt_daemon_config"];

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

impl TelemetryHandle {
    /// Mutes the diagnostic stream after the process left its terminal.
    pub fn detach(self) {
        tracing::info!(
            target: concat!(env!("CARGO_PKG_NAME"), "::telemetry"),
            "diagnostics muted after detaching; the journal remains authoritative"
        );
        DETACHED.store(true, Ordering::Release);
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first time.
///
/// Later calls return a fresh [`TelemetryHandle`] without touching the
/// global state again, so test harnesses may bootstrap repeatedly.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

/// Writer factory that targets stderr until the process detaches.
#[derive(Debug, Clone, Copy)]
struct DiagnosticStream;

impl<'a> MakeWriter<'a> for DiagnosticStream {
    type Writer = OptionalWriter<io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        stream_for(DETACHED.load(Ordering::Acquire))
    }
}

fn stream_for(detached: bool) -> OptionalWriter<io::Stderr> {
    if detached {
        OptionalWriter::none()
    } else {
        OptionalWriter::some(io::stderr())
    }
}

/// Expands a bare level such as `debug` into per-target directives for the
/// daemon's own targets. Filters that already name targets pass through.
fn scoped_directives(filter: &str) -> String {
    let filter = filter.trim();
    if filter.contains('=') || filter.contains(',') || filter.is_empty() {
        return filter.to_owned();
    }
    let mut directives = vec!["warn".to_owned()];
    directives.extend(
        DAEMON_TARGETS
            .iter()
            .map(|target| format!("{target}={filter}")),
    );
    directives.join(",")
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(scoped_directives(config.log_filter()))
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            // Accept, signal and session threads are named.
            .with_thread_names(true)
            .with_writer(DiagnosticStream)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn repeated_initialisation_is_idempotent() {
        let config = Config::default();
        initialise(&config).expect("first initialisation");
        initialise(&config).expect("second initialisation");
    }

    #[rstest]
    fn bare_level_is_scoped_to_daemon_targets() {
        assert_eq!(
            scoped_directives("debug"),
            "warn,matt-daemon=debug,matt_daemon=debug,matt_daemon_config=debug"
        );
    }

    #[rstest]
    #[case("matt-daemon::transport=trace")]
    #[case("info,matt-daemon=debug")]
    fn explicit_directives_pass_through(#[case] filter: &str) {
        assert_eq!(scoped_directives(filter), filter);
    }

    #[rstest]
    fn detached_stream_is_muted() {
        assert!(matches!(stream_for(true), OptionalWriter::B(_)));
        assert!(matches!(stream_for(false), OptionalWriter::A(_)));
    }
}
