//! Implements the daemonisation backend for the `Matt_daemon` process.

use daemonize_me::Daemon;
use std::ffi::OsStr;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

const DAEMON_NAME: &str = "Matt_daemon";
const WORK_DIR: &str = "/";

/// Abstraction over daemonisation strategies.
pub trait Daemonizer: Send + Sync {
    /// Detaches the process into the background.
    ///
    /// On success the caller continues in the detached child; the invoking
    /// parent has already exited.
    fn daemonize(&self) -> Result<(), DaemonizeError>;
}

/// Errors surfaced by the daemonisation backend.
#[derive(Debug, Error)]
pub enum DaemonizeError {
    /// System-level daemonisation failed.
    #[error("{0}")]
    System(#[from] daemonize_me::DaemonError),
}

/// Daemoniser that delegates to `daemonize-me`: fork, `setsid`, `chdir /`,
/// reset the umask and point the standard streams at `/dev/null`.
#[derive(Debug, Default)]
pub struct SystemDaemonizer;

impl SystemDaemonizer {
    /// Builds a new system daemoniser.
    pub fn new() -> Self {
        Self
    }
}

impl Daemonizer for SystemDaemonizer {
    fn daemonize(&self) -> Result<(), DaemonizeError> {
        info!(
            target: PROCESS_TARGET,
            work_dir = WORK_DIR,
            "daemonising into background"
        );
        Daemon::new()
            .umask(0o022)
            .work_dir(Path::new(WORK_DIR))
            .name(OsStr::new(DAEMON_NAME))
            .start()?;
        info!(
            target: PROCESS_TARGET,
            pid = std::process::id(),
            "daemon process detached; continuing in child"
        );
        Ok(())
    }
}
