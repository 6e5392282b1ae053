//! Test configuration loaders for scenarios covering success and failure paths.

use std::ffi::OsString;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use matt_daemon_config::Config;

use crate::bootstrap::ConfigLoader;

const GRACE_MS: u64 = 200;

/// Loader that keeps the lock and log under a temporary directory and binds
/// an ephemeral loopback port.
#[derive(Clone)]
pub struct TestConfigLoader {
    dir: Arc<TempDir>,
    port: u16,
    log_path: Option<Utf8PathBuf>,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temporary runtime directory");
        Self {
            dir: Arc::new(dir),
            port: 0,
            log_path: None,
        }
    }

    /// Pins the control port, e.g. to one that is already taken.
    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Points the journal somewhere else, e.g. at an unwritable location.
    pub fn set_log_path(&mut self, path: Utf8PathBuf) {
        self.log_path = Some(path);
    }

    pub fn dir(&self) -> &Utf8Path {
        Utf8Path::from_path(self.dir.path()).expect("temporary directory was not valid UTF-8")
    }

    pub fn lock_path(&self) -> Utf8PathBuf {
        self.dir().join("matt_daemon.lock")
    }

    pub fn log_path(&self) -> Utf8PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| self.dir().join("matt_daemon.log"))
    }
}

impl Default for TestConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            lock_path: self.lock_path(),
            log_path: self.log_path(),
            listen_host: "127.0.0.1".to_owned(),
            listen_port: self.port,
            shutdown_grace_ms: GRACE_MS,
            heartbeat_secs: 0,
            ..Config::default()
        })
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("Matt_daemon"),
            OsString::from("--listen-port"),
            OsString::from("not-a-port"),
        ];
        Config::load_from_iter(args)
    }
}
