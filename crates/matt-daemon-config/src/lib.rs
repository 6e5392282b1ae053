//! Configuration shared by the `Matt_daemon` binary and its tests.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! configuration file, then `MATT_DAEMON_*` environment variables, then
//! command-line flags. The resolved [`Config`] is constructed once at startup
//! and handed to every component by reference.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod logging;

pub use defaults::{
    DEFAULT_CONTROL_PORT, DEFAULT_HEARTBEAT_SECS, DEFAULT_LISTEN_HOST, DEFAULT_LOCK_PATH,
    DEFAULT_LOG_FILTER, DEFAULT_LOG_PATH, DEFAULT_MAX_CLIENTS, DEFAULT_SHUTDOWN_GRACE_MS,
    default_lock_path, default_log_filter, default_log_format, default_log_path,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "MATT_DAEMON")]
#[serde(default)]
pub struct Config {
    /// Lock file proving that an instance is running.
    #[ortho_config(default = default_lock_path())]
    pub lock_path: Utf8PathBuf,
    /// Append-only journal destination.
    #[ortho_config(default = default_log_path())]
    pub log_path: Utf8PathBuf,
    /// Host or address the control port binds to.
    #[ortho_config(default = DEFAULT_LISTEN_HOST.to_owned())]
    pub listen_host: String,
    /// Control port.
    #[ortho_config(default = DEFAULT_CONTROL_PORT)]
    pub listen_port: u16,
    /// Capacity of the session registry.
    #[ortho_config(default = DEFAULT_MAX_CLIENTS)]
    pub max_clients: usize,
    /// Milliseconds granted to sessions to drain during shutdown.
    #[ortho_config(default = DEFAULT_SHUTDOWN_GRACE_MS)]
    pub shutdown_grace_ms: u64,
    /// Seconds between heartbeat records; `0` disables the heartbeat.
    #[ortho_config(default = DEFAULT_HEARTBEAT_SECS)]
    pub heartbeat_secs: u64,
    /// `tracing` filter expression for the diagnostic stream.
    #[ortho_config(default = default_log_filter().to_owned())]
    pub log_filter: String,
    /// Diagnostic stream format.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_path: default_lock_path(),
            log_path: default_log_path(),
            listen_host: DEFAULT_LISTEN_HOST.to_owned(),
            listen_port: DEFAULT_CONTROL_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            log_filter: default_log_filter().to_owned(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Path of the single-instance lock file.
    #[must_use]
    pub fn lock_path(&self) -> &Utf8Path {
        self.lock_path.as_path()
    }

    /// Path of the journal.
    #[must_use]
    pub fn log_path(&self) -> &Utf8Path {
        self.log_path.as_path()
    }

    /// Host the control port binds to.
    #[must_use]
    pub fn listen_host(&self) -> &str {
        &self.listen_host
    }

    /// Control port number.
    #[must_use]
    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Maximum number of concurrently admitted sessions.
    #[must_use]
    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Time allowed for sessions to finish in-flight work during shutdown.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Heartbeat cadence, or `None` when heartbeats are disabled.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs))
    }

    /// Diagnostic filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Diagnostic output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
