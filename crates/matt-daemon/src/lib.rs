//! Single-instance control daemon.
//!
//! `Matt_daemon` claims an exclusive lock file, detaches from its terminal
//! and serves a small TCP control port (4242 by default). Every line a client
//! sends is appended to a timestamped journal; the line `quit`, or a
//! termination signal, stops the daemon, which then drains its clients,
//! closes the journal and removes the lock.
//!
//! At most three clients are served at once by default. Further connections
//! are answered with `Connection refused` and closed.
//!
//! Two output channels exist. The journal (see [`Journal`]) is the operator
//! facing record kept in the log file; structured diagnostics go through
//! `tracing` to stderr and are configured by [`telemetry`].

mod bootstrap;
mod command;
mod journal;
mod process;
pub mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, Bootstrapped, ConfigLoader, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use command::{Command, trim_line_ending};
pub use journal::{Journal, JournalError, Level};
pub use process::{
    DaemonizeError, Daemonizer, LaunchError, LaunchMode, RunState, ShutdownController,
    ShutdownError, ShutdownTrigger, SignalSource, SignalWatch, SystemDaemonizer,
    SystemSignalSource, run_daemon,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
