//! Supervises daemon launch sequencing and runtime orchestration.

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use nix::unistd::{Uid, geteuid};
use tracing::{info, warn};

use matt_daemon_config::Config;

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::journal::{Journal, Level};
use crate::transport::{ConnectionHandler, ControlListener, ControlSessionHandler, SessionRegistry};

use super::daemonizer::{Daemonizer, SystemDaemonizer};
use super::errors::LaunchError;
use super::guard::LockGuard;
use super::privilege::ensure_root;
use super::shutdown::{ShutdownController, ShutdownTrigger, SignalSource, SystemSignalSource};
use super::{FOREGROUND_ENV_VAR, PROCESS_TARGET};

/// Launch mode for the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Fork into the background and detach from the controlling terminal.
    Background,
    /// Remain attached to the terminal; primarily used for debugging and tests.
    Foreground,
}

impl LaunchMode {
    fn detect() -> Self {
        if env::var_os(FOREGROUND_ENV_VAR).is_some() {
            Self::Foreground
        } else {
            Self::Background
        }
    }
}

/// Process-level collaborators needed to control daemon lifecycle.
pub(crate) struct ProcessControl<D, S> {
    pub(crate) mode: LaunchMode,
    /// Effective uid vetted before any file is touched; `None` skips the check.
    pub(crate) effective_uid: Option<Uid>,
    pub(crate) daemonizer: D,
    pub(crate) signals: S,
}

/// Collaborators required to launch the daemon runtime.
pub(crate) struct LaunchPlan<L, D, S> {
    pub(crate) process: ProcessControl<D, S>,
    pub(crate) loader: L,
    pub(crate) controller: ShutdownController,
}

/// Runs the daemon using the production collaborators.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        process: ProcessControl {
            mode: LaunchMode::detect(),
            effective_uid: Some(geteuid()),
            daemonizer: SystemDaemonizer::new(),
            signals: SystemSignalSource::new(),
        },
        loader: SystemConfigLoader::from_env(),
        controller: ShutdownController::new(),
    };
    run_daemon_with(plan)
}

/// Runs the daemon with injected collaborators.
///
/// Resources are claimed in order (lock, journal, detach, signals, port) and
/// released in reverse. A failure after the journal opened is journalled at
/// `ERROR` before it is returned.
pub(crate) fn run_daemon_with<L, D, S>(plan: LaunchPlan<L, D, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    D: Daemonizer,
    S: SignalSource,
{
    let LaunchPlan {
        process,
        loader,
        controller,
    } = plan;
    let ProcessControl {
        mode,
        effective_uid,
        daemonizer,
        signals,
    } = process;

    if let Some(euid) = effective_uid {
        ensure_root(euid)?;
    }
    let bootstrapped = bootstrap_with(&loader)?;
    let telemetry = bootstrapped.telemetry();
    let config = bootstrapped.into_config();
    info!(
        target: PROCESS_TARGET,
        ?mode,
        "starting daemon runtime"
    );
    let mut guard = LockGuard::acquire(config.lock_path().as_std_path(), process::id())?;
    let journal = Arc::new(Journal::open(config.log_path())?);
    journal.record(Level::Info, "Matt_daemon starts");

    if matches!(mode, LaunchMode::Background) {
        daemonizer
            .daemonize()
            .map_err(|error| journalled(&journal, error.into()))?;
        telemetry.detach();
    }
    let pid = process::id();
    if guard.pid() != pid {
        guard
            .record_pid(pid)
            .map_err(|error| journalled(&journal, error))?;
    }

    let watch = signals
        .listen(controller.clone(), Arc::clone(&journal))
        .map_err(|error| journalled(&journal, error.into()))?;
    let outcome = serve(&config, &journal, &controller).map_err(|error| journalled(&journal, error));
    watch.close();

    journal.record(Level::Info, "Stopping matt_daemon");
    if let Err(error) = journal.close() {
        warn!(
            target: PROCESS_TARGET,
            error = %error,
            "failed to close journal"
        );
    }
    guard.release();
    controller.mark_stopped();
    info!(
        target: PROCESS_TARGET,
        lock = %guard.path().display(),
        "shutdown sequence completed"
    );
    outcome
}

/// Serves the control port until a shutdown trigger arrives, then drains
/// client sessions.
fn serve(
    config: &Config,
    journal: &Arc<Journal>,
    controller: &ShutdownController,
) -> Result<(), LaunchError> {
    let listener = ControlListener::bind(config.listen_host(), config.listen_port())?;
    let port = listener.local_addr().port();
    let registry = SessionRegistry::new(config.max_clients());
    let handler: Arc<dyn ConnectionHandler> = Arc::new(ControlSessionHandler::new(
        Arc::clone(journal),
        controller.clone(),
    ));
    let listener_handle = listener.start(registry.clone(), handler, Arc::clone(journal))?;
    journal.record(Level::Info, &format!("Socket listener started on port {port}"));
    controller.mark_running();
    journal.record(Level::Info, "Daemon started successfully");

    let trigger = await_trigger(controller, journal, config.heartbeat_interval());
    if let ShutdownTrigger::Signal(signal) = trigger {
        journal.record(Level::Info, &format!("Signal received: {signal}"));
    }

    listener_handle.shutdown();
    let forced = registry.close_all(config.shutdown_grace());
    if forced > 0 {
        warn!(
            target: PROCESS_TARGET,
            forced,
            "client sessions outlived the grace period"
        );
    }
    if let Err(error) = listener_handle.join() {
        warn!(
            target: PROCESS_TARGET,
            error = %error,
            "control listener did not stop cleanly"
        );
    }
    Ok(())
}

fn await_trigger(
    controller: &ShutdownController,
    journal: &Journal,
    heartbeat: Option<Duration>,
) -> ShutdownTrigger {
    loop {
        if let Some(trigger) = controller.wait_timeout(heartbeat) {
            return trigger;
        }
        journal.record(Level::Info, "Daemon is alive");
    }
}

fn journalled(journal: &Journal, error: LaunchError) -> LaunchError {
    journal.record(Level::Error, &error.to_string());
    error
}
