pub(crate) mod daemonizer;
mod errors;
mod guard;
pub(crate) mod launch;
mod privilege;
pub(crate) mod shutdown;

pub use daemonizer::{DaemonizeError, Daemonizer, SystemDaemonizer};
pub use errors::LaunchError;
pub use launch::{LaunchMode, run_daemon};
pub use shutdown::{
    RunState, ShutdownController, ShutdownError, ShutdownTrigger, SignalSource, SignalWatch,
    SystemSignalSource,
};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
pub(crate) const FOREGROUND_ENV_VAR: &str = "MATT_DAEMON_FOREGROUND";
