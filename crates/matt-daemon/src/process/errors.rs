//! Defines the unified error surface for daemon launch and supervision.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::journal::JournalError;
use crate::transport::ListenerError;

use super::daemonizer::DaemonizeError;
use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the daemon process.
///
/// Every failure to claim the lock renders with the
/// `Error: Could not create lock file` prefix that operators grep for.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The daemon must run with an effective uid of 0.
    #[error("Error: Matt_daemon must be run as root (effective uid {euid})")]
    InsufficientPrivilege {
        /// Effective uid of the caller.
        euid: u32,
    },
    /// Lock file creation failed.
    #[error("Error: Could not create lock file '{path}': {source}")]
    LockCreate {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A running daemon already holds the lock.
    #[error("Error: Could not create lock file '{path}': daemon already running with pid {pid}")]
    AlreadyRunning {
        /// Lock file path.
        path: PathBuf,
        /// PID recorded in the existing lock file.
        pid: u32,
    },
    /// Another instance holds the lock but has not recorded its pid yet.
    #[error("Error: Could not create lock file '{path}': lock is held by another instance")]
    LockHeld {
        /// Lock file path.
        path: PathBuf,
    },
    /// Writing the holder pid into the lock file failed.
    #[error("failed to record pid in lock file '{path}': {source}")]
    PidWrite {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The journal could not be opened.
    #[error("failed to open journal: {source}")]
    LogUnavailable {
        /// Underlying journal error.
        #[source]
        source: JournalError,
    },
    /// Daemonisation failed.
    #[error("failed to daemonise: {source}")]
    Daemonize {
        /// Underlying daemonisation error.
        #[source]
        source: DaemonizeError,
    },
    /// Installing the signal listener failed.
    #[error("failed to install signal handling: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
    /// Bootstrapping the daemon failed.
    #[error("daemon bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// The control port could not be bound or served.
    #[error("control listener failed: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
}

impl From<JournalError> for LaunchError {
    fn from(source: JournalError) -> Self {
        Self::LogUnavailable { source }
    }
}

impl From<DaemonizeError> for LaunchError {
    fn from(source: DaemonizeError) -> Self {
        Self::Daemonize { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<ListenerError> for LaunchError {
    fn from(source: ListenerError) -> Self {
        Self::Listener { source }
    }
}
