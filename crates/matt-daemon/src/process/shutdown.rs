//! Run-state tracking and the convergence point for every shutdown trigger.
//!
//! Signals never touch the journal or the lock from handler context: the
//! `signal-hook` iterator thread only records a [`ShutdownTrigger`] on the
//! [`ShutdownController`], and the lifecycle thread performs the teardown.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM, SIGURG};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::journal::{Journal, Level};

use super::PROCESS_TARGET;

/// Signals that stop the daemon.
pub const TERMINATION_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Coarse lifecycle phase. Transitions only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    /// Resources are being acquired.
    #[default]
    Starting,
    /// The control port is accepting clients.
    Running,
    /// Teardown has been requested and is in progress.
    Stopping,
    /// Teardown finished.
    Stopped,
}

/// What asked the daemon to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// A client sent `quit`.
    Quit,
    /// A termination signal arrived; carries the signal number.
    Signal(i32),
}

#[derive(Debug, Default)]
struct ControlState {
    run_state: RunState,
    trigger: Option<ShutdownTrigger>,
}

/// Shared handle on the run state. Cloning yields another handle on the
/// same state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownController {
    inner: Arc<(Mutex<ControlState>, Condvar)>,
}

impl ShutdownController {
    /// Creates a controller in [`RunState::Starting`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.lock().run_state
    }

    /// Trigger that won the race into [`RunState::Stopping`], if any.
    #[must_use]
    pub fn trigger(&self) -> Option<ShutdownTrigger> {
        self.lock().trigger
    }

    /// Requests shutdown. Returns `true` only for the first request; later
    /// requests, from any trigger, leave the state untouched.
    pub fn request(&self, trigger: ShutdownTrigger) -> bool {
        let (_, ready) = &*self.inner;
        let mut state = self.lock();
        if state.run_state >= RunState::Stopping {
            debug!(
                target: PROCESS_TARGET,
                ?trigger,
                "shutdown already in progress"
            );
            return false;
        }
        state.run_state = RunState::Stopping;
        state.trigger = Some(trigger);
        ready.notify_all();
        info!(
            target: PROCESS_TARGET,
            ?trigger,
            "shutdown requested"
        );
        true
    }

    /// Blocks until shutdown is requested or `timeout` elapses.
    ///
    /// Returns `None` on timeout; `timeout == None` waits indefinitely.
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> Option<ShutdownTrigger> {
        let (_, ready) = &*self.inner;
        let state = self.lock();
        let state = match timeout {
            Some(duration) => {
                ready
                    .wait_timeout_while(state, duration, |state| state.trigger.is_none())
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => ready
                .wait_while(state, |state| state.trigger.is_none())
                .unwrap_or_else(PoisonError::into_inner),
        };
        state.trigger
    }

    pub(crate) fn mark_running(&self) -> bool {
        self.advance(RunState::Running)
    }

    pub(crate) fn mark_stopped(&self) -> bool {
        self.advance(RunState::Stopped)
    }

    fn advance(&self, next: RunState) -> bool {
        let mut state = self.lock();
        if state.run_state >= next {
            return false;
        }
        state.run_state = next;
        true
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        let (state, _) = &*self.inner;
        state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Errors reported while installing signal delivery.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The signal thread could not be spawned.
    #[error("failed to spawn signal thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Source of asynchronous shutdown requests.
pub trait SignalSource: Send + Sync {
    /// Starts forwarding signals to `controller`. Informational signals are
    /// journalled without stopping the daemon.
    fn listen(
        &self,
        controller: ShutdownController,
        journal: Arc<Journal>,
    ) -> Result<SignalWatch, ShutdownError>;
}

/// Running signal listener. [`SignalWatch::close`] stops and joins it.
#[derive(Default)]
pub struct SignalWatch {
    handle: Option<Handle>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SignalWatch {
    /// Watch with nothing behind it, for sources that deliver no signals.
    #[must_use]
    pub fn inert() -> Self {
        Self::default()
    }

    /// Stops signal delivery and waits for the listener thread.
    pub fn close(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(
                target: PROCESS_TARGET,
                "signal thread panicked"
            );
        }
    }
}

/// Listens for process signals through `signal-hook`'s self-pipe iterator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignalSource;

impl SystemSignalSource {
    /// Builds a new signal source.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SignalSource for SystemSignalSource {
    fn listen(
        &self,
        controller: ShutdownController,
        journal: Arc<Journal>,
    ) -> Result<SignalWatch, ShutdownError> {
        let watched: Vec<i32> = TERMINATION_SIGNALS
            .iter()
            .copied()
            .chain(informational_signals())
            .collect();
        let mut signals =
            Signals::new(&watched).map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("matt-daemon-signals".to_owned())
            .spawn(move || {
                for signal in signals.forever() {
                    dispatch_signal(signal, &controller, &journal);
                }
            })
            .map_err(|source| ShutdownError::Spawn { source })?;
        info!(
            target: PROCESS_TARGET,
            signals = ?watched,
            "signal handlers installed"
        );
        Ok(SignalWatch {
            handle: Some(handle),
            thread: Some(thread),
        })
    }
}

fn dispatch_signal(signal: i32, controller: &ShutdownController, journal: &Journal) {
    if TERMINATION_SIGNALS.contains(&signal) {
        controller.request(ShutdownTrigger::Signal(signal));
    } else {
        journal.record(Level::Info, &format!("Signal received: {signal}"));
    }
}

fn informational_signals() -> Vec<i32> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        vec![SIGURG, nix::sys::signal::Signal::SIGPWR as i32]
    }
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        vec![SIGURG]
    }
}
