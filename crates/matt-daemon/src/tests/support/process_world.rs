//! Process supervision test world shared across BDD scenarios.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use nix::unistd::Uid;

use crate::bootstrap::{ConfigLoader, SystemConfigLoader};
use crate::journal::Journal;
use crate::process::daemonizer::{DaemonizeError, Daemonizer};
use crate::process::launch::{LaunchPlan, ProcessControl, run_daemon_with};
use crate::process::shutdown::{
    RunState, ShutdownController, ShutdownError, ShutdownTrigger, SignalSource, SignalWatch,
};
use crate::process::{LaunchError, LaunchMode};

use super::{FailingConfigLoader, TestConfigLoader};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

const LISTENER_RECORD: &str = "Socket listener started on port ";

pub type StepResult = Result<(), String>;

pub struct ProcessTestWorld {
    loader: TestConfigLoader,
    command_line: Option<Vec<String>>,
    effective_uid: Option<Uid>,
    daemonizer: TestDaemonizer,
    signals: TestSignalSource,
    controller: ShutdownController,
    handle: Option<thread::JoinHandle<Result<(), LaunchError>>>,
    result: Option<Result<(), LaunchError>>,
    second_result: Option<Result<(), LaunchError>>,
    clients: Vec<TcpStream>,
    replies: Vec<String>,
    port: Option<u16>,
    port_holder: Option<TcpListener>,
    snapshot: Option<(String, String)>,
}

impl Default for ProcessTestWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTestWorld {
    pub fn new() -> Self {
        Self {
            loader: TestConfigLoader::new(),
            command_line: None,
            effective_uid: None,
            daemonizer: TestDaemonizer::default(),
            signals: TestSignalSource::default(),
            controller: ShutdownController::new(),
            handle: None,
            result: None,
            second_result: None,
            clients: Vec::new(),
            replies: Vec::new(),
            port: None,
            port_holder: None,
            snapshot: None,
        }
    }

    pub fn start_background(&mut self) -> StepResult {
        if self.handle.is_some() {
            return Err("daemon already running".to_string());
        }
        let handle = if let Some(args) = self.command_line.clone() {
            let plan = self.plan(SystemConfigLoader::with_args(args), LaunchMode::Background);
            thread::spawn(move || run_daemon_with(plan))
        } else {
            let plan = self.plan(self.loader.clone(), LaunchMode::Background);
            thread::spawn(move || run_daemon_with(plan))
        };
        self.handle = Some(handle);
        Ok(())
    }

    /// Runs a daemon to completion on the calling thread. Only meaningful
    /// for runs expected to fail during startup.
    pub fn run_foreground(&mut self) -> StepResult {
        if self.result.is_some() {
            return Err("result already recorded".to_string());
        }
        let plan = self.plan(self.loader.clone(), LaunchMode::Foreground);
        self.result = Some(run_daemon_with(plan));
        Ok(())
    }

    pub fn run_with_invalid_configuration(&mut self) {
        let plan = self.plan(FailingConfigLoader, LaunchMode::Foreground);
        self.result = Some(run_daemon_with(plan));
    }

    /// Starts a second instance against the same lock and log while the
    /// first one is running.
    pub fn start_second_instance(&mut self) -> StepResult {
        self.snapshot = Some((self.read_lock()?, self.journal()?));
        let plan = LaunchPlan {
            process: ProcessControl {
                mode: LaunchMode::Background,
                effective_uid: None,
                daemonizer: self.daemonizer.clone(),
                signals: self.signals.clone(),
            },
            loader: self.loader.clone(),
            controller: ShutdownController::new(),
        };
        self.second_result = Some(run_daemon_with(plan));
        Ok(())
    }

    fn plan<L: ConfigLoader>(
        &self,
        loader: L,
        mode: LaunchMode,
    ) -> LaunchPlan<L, TestDaemonizer, TestSignalSource> {
        LaunchPlan {
            process: ProcessControl {
                mode,
                effective_uid: self.effective_uid,
                daemonizer: self.daemonizer.clone(),
                signals: self.signals.clone(),
            },
            loader,
            controller: self.controller.clone(),
        }
    }

    pub fn wait_until_running(&mut self) -> StepResult {
        if !self.wait_for(|world| world.controller.state() >= RunState::Running) {
            return Err("daemon never reached the running state".to_string());
        }
        let journal = self.journal()?;
        let port = journal
            .lines()
            .find_map(|line| line.split(LISTENER_RECORD).nth(1))
            .ok_or_else(|| "journal does not name the control port".to_string())?
            .trim()
            .parse::<u16>()
            .map_err(|error| error.to_string())?;
        self.port = Some(port);
        Ok(())
    }

    pub fn connect(&mut self) -> StepResult {
        let port = self.port.ok_or_else(|| "daemon port unknown".to_string())?;
        let stream = TcpStream::connect(("127.0.0.1", port)).map_err(|error| error.to_string())?;
        stream
            .set_read_timeout(Some(WAIT_TIMEOUT))
            .map_err(|error| error.to_string())?;
        let mut reply = String::new();
        BufReader::new(&stream)
            .read_line(&mut reply)
            .map_err(|error| error.to_string())?;
        let reply = reply.trim_end().to_owned();
        // Refused connections are closed by the daemon; only keep admitted ones.
        if reply == "Connection established" {
            self.clients.push(stream);
        }
        self.replies.push(reply);
        Ok(())
    }

    pub fn send(&mut self, text: &str) -> StepResult {
        let client = self
            .clients
            .first_mut()
            .ok_or_else(|| "no connected client".to_string())?;
        client
            .write_all(text.as_bytes())
            .map_err(|error| error.to_string())
    }

    pub fn disconnect_one(&mut self) -> StepResult {
        let client = self
            .clients
            .pop()
            .ok_or_else(|| "no connected client".to_string())?;
        client
            .shutdown(Shutdown::Both)
            .map_err(|error| error.to_string())
    }

    /// Races a client `quit` against a signal-driven shutdown request.
    pub fn quit_and_signal_together(&mut self, signal: i32) -> StepResult {
        let client = self
            .clients
            .first()
            .ok_or_else(|| "no connected client".to_string())?
            .try_clone()
            .map_err(|error| error.to_string())?;
        let controller = self.controller.clone();
        let quitter = thread::spawn(move || {
            let mut client = client;
            // The session may already be torn down if the signal wins.
            let _ = client.write_all(b"quit\n");
        });
        let signaller = thread::spawn(move || {
            controller.request(ShutdownTrigger::Signal(signal));
        });
        signaller
            .join()
            .map_err(|_| "signal thread panicked".to_string())?;
        quitter
            .join()
            .map_err(|_| "quit thread panicked".to_string())
    }

    pub fn deliver_signal(&self, signal: i32) {
        self.controller.request(ShutdownTrigger::Signal(signal));
    }

    pub fn join(&mut self) -> StepResult {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| "daemon not running".to_string())?;
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return Err("daemon did not stop in time".to_string());
            }
            thread::sleep(POLL_INTERVAL);
        }
        let result = handle
            .join()
            .map_err(|_| "daemon thread panicked".to_string())?;
        self.result = Some(result);
        Ok(())
    }

    pub fn wait_for_journal(&self, needle: &str) -> StepResult {
        let recorded = self.wait_for(|world| {
            world
                .journal()
                .map(|journal| journal.contains(needle))
                .unwrap_or(false)
        });
        if recorded {
            Ok(())
        } else {
            Err(format!("journal never recorded '{needle}'"))
        }
    }

    fn wait_for(&self, mut condition: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while Instant::now() < deadline {
            if condition(self) {
                return true;
            }
            thread::sleep(POLL_INTERVAL);
        }
        false
    }

    pub fn write_stale_lock(&self, content: &str) -> StepResult {
        fs::write(self.loader.lock_path(), content).map_err(|error| error.to_string())
    }

    /// Occupies a loopback port and points the daemon at it.
    pub fn occupy_port(&mut self) -> StepResult {
        let holder = TcpListener::bind(("127.0.0.1", 0)).map_err(|error| error.to_string())?;
        let port = holder
            .local_addr()
            .map_err(|error| error.to_string())?
            .port();
        self.loader.set_port(port);
        self.port_holder = Some(holder);
        Ok(())
    }

    /// Resolves the configuration from command-line flags through the
    /// production loader instead of the pre-built test configuration.
    pub fn configure_from_command_line(&mut self, heartbeat_secs: u64) {
        let args = vec![
            "Matt_daemon".to_owned(),
            "--lock-path".to_owned(),
            self.loader.lock_path().into_string(),
            "--log-path".to_owned(),
            self.loader.log_path().into_string(),
            "--listen-port".to_owned(),
            "0".to_owned(),
            "--shutdown-grace-ms".to_owned(),
            "200".to_owned(),
            "--heartbeat-secs".to_owned(),
            heartbeat_secs.to_string(),
        ];
        self.command_line = Some(args);
    }

    /// Presents `uid` as the effective uid to the privilege check.
    pub fn run_as(&mut self, uid: u32) {
        self.effective_uid = Some(Uid::from_raw(uid));
    }

    pub fn use_unwritable_log(&mut self) {
        let path = self.loader.dir().join("missing").join("matt_daemon.log");
        self.loader.set_log_path(path);
    }

    pub fn lock_path(&self) -> Utf8PathBuf {
        self.loader.lock_path()
    }

    pub fn read_lock(&self) -> Result<String, String> {
        fs::read_to_string(self.loader.lock_path()).map_err(|error| error.to_string())
    }

    pub fn journal(&self) -> Result<String, String> {
        fs::read_to_string(self.loader.log_path()).map_err(|error| error.to_string())
    }

    pub fn journal_exists(&self) -> bool {
        self.loader.log_path().exists()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn replies(&self) -> &[String] {
        &self.replies
    }

    pub fn snapshot(&self) -> Option<&(String, String)> {
        self.snapshot.as_ref()
    }

    pub fn daemonizer_calls(&self) -> usize {
        self.daemonizer.calls()
    }

    pub fn signal_installs(&self) -> usize {
        self.signals.installs()
    }

    pub fn controller(&self) -> &ShutdownController {
        &self.controller
    }

    pub fn last_result(&self) -> Option<&Result<(), LaunchError>> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&LaunchError> {
        self.result.as_ref()?.as_ref().err()
    }

    pub fn second_error(&self) -> Option<&LaunchError> {
        self.second_result.as_ref()?.as_ref().err()
    }
}

impl Drop for ProcessTestWorld {
    fn drop(&mut self) {
        // Never leave a daemon thread serving after a failed scenario.
        if self.handle.is_some() {
            self.controller.request(ShutdownTrigger::Quit);
            let _ = self.join();
        }
    }
}

#[derive(Clone, Default)]
pub struct TestDaemonizer {
    calls: Arc<AtomicUsize>,
}

impl TestDaemonizer {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Daemonizer for TestDaemonizer {
    fn daemonize(&self) -> Result<(), DaemonizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Signal source that installs nothing; scenarios request shutdown on the
/// controller directly.
#[derive(Clone, Default)]
pub struct TestSignalSource {
    installs: Arc<AtomicUsize>,
}

impl TestSignalSource {
    fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

impl SignalSource for TestSignalSource {
    fn listen(
        &self,
        _controller: ShutdownController,
        _journal: Arc<Journal>,
    ) -> Result<SignalWatch, ShutdownError> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(SignalWatch::inert())
    }
}
