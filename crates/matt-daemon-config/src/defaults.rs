use camino::Utf8PathBuf;

/// Lock file guarding single-instance startup.
pub const DEFAULT_LOCK_PATH: &str = "/var/lock/matt_daemon.lock";

/// Journal receiving every client message and lifecycle record.
pub const DEFAULT_LOG_PATH: &str = "/var/log/matt_daemon.log";

/// Interface the control port binds to.
pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";

/// TCP port accepting control connections.
pub const DEFAULT_CONTROL_PORT: u16 = 4242;

/// Maximum number of simultaneously admitted client sessions.
pub const DEFAULT_MAX_CLIENTS: usize = 3;

/// Grace period granted to in-flight sessions during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 2_000;

/// Interval between `Daemon is alive` journal records; zero disables them.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Default filter expression for the diagnostic stream.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default lock file location.
pub fn default_lock_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_LOCK_PATH)
}

/// Default journal location.
pub fn default_log_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_LOG_PATH)
}

/// Default log filter expression used by the binary.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default diagnostic format.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}
