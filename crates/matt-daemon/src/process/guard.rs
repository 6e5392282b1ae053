use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::errors::LaunchError;

/// Attempts made when the lock file is unlinked between opening and locking.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Exclusive claim on the lock file. Dropping the guard releases the lock.
///
/// Ownership is an advisory `flock` on the open lock file; the recorded pid
/// is informational. The lock travels with the open file description, so a
/// forked child keeps it after the parent exits.
#[derive(Debug)]
pub(crate) struct LockGuard {
    path: PathBuf,
    pid: u32,
    file: Option<Flock<File>>,
}

impl LockGuard {
    /// Claims the lock file and records `pid` inside it.
    ///
    /// An existing file nobody holds a lock on is stale and is taken over.
    /// A file locked by another open description reports
    /// [`LaunchError::AlreadyRunning`], or [`LaunchError::LockHeld`] when
    /// its pid has not been written yet.
    pub(crate) fn acquire(path: &Path, pid: u32) -> Result<Self, LaunchError> {
        for _ in 0..ACQUIRE_ATTEMPTS {
            let Some(mut file) = lock_file(path)? else {
                continue;
            };
            if let Some(previous) = read_recorded(&mut file).filter(|holder| *holder != pid) {
                warn!(
                    target: PROCESS_TARGET,
                    pid = previous,
                    file = %path.display(),
                    "lock holder not running; replacing stale lock"
                );
            }
            write_pid(&mut file, pid).map_err(|source| LaunchError::PidWrite {
                path: path.to_path_buf(),
                source,
            })?;
            info!(
                target: PROCESS_TARGET,
                pid,
                file = %path.display(),
                "acquired daemon lock"
            );
            return Ok(Self {
                path: path.to_path_buf(),
                pid,
                file: Some(file),
            });
        }
        Err(LaunchError::LockCreate {
            path: path.to_path_buf(),
            source: io::Error::other("lock file kept disappearing while it was being claimed"),
        })
    }

    /// Rewrites the lock contents after the process identity changed.
    pub(crate) fn record_pid(&mut self, pid: u32) -> Result<(), LaunchError> {
        let Some(file) = self.file.as_mut() else {
            return Err(LaunchError::PidWrite {
                path: self.path.clone(),
                source: io::Error::other("lock already released"),
            });
        };
        write_pid(file, pid).map_err(|source| LaunchError::PidWrite {
            path: self.path.clone(),
            source,
        })?;
        self.pid = pid;
        info!(
            target: PROCESS_TARGET,
            pid,
            file = %self.path.display(),
            "lock holder pid recorded"
        );
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Removes the lock file and drops the lock. Later calls are no-ops.
    ///
    /// A file at the path that is no longer ours is left alone.
    pub(crate) fn release(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if !still_linked(&self.path, &file) {
            warn!(
                target: PROCESS_TARGET,
                file = %self.path.display(),
                "lock file already removed or replaced"
            );
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(
                    target: PROCESS_TARGET,
                    file = %self.path.display(),
                    "lock released"
                );
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                warn!(
                    target: PROCESS_TARGET,
                    file = %self.path.display(),
                    "lock file already removed"
                );
            }
            Err(error) => {
                warn!(
                    target: PROCESS_TARGET,
                    file = %self.path.display(),
                    error = %error,
                    "failed to remove lock file"
                );
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens the lock file and takes a non-blocking exclusive `flock`.
///
/// Returns `None` when the file was unlinked by its previous owner after
/// we opened it; the caller retries against the fresh path.
fn lock_file(path: &Path) -> Result<Option<Flock<File>>, LaunchError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(path)
        .map_err(|source| LaunchError::LockCreate {
            path: path.to_path_buf(),
            source,
        })?;
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(locked) if still_linked(path, &locked) => Ok(Some(locked)),
        Ok(_orphaned) => Ok(None),
        Err((mut file, errno)) if errno == Errno::EWOULDBLOCK => {
            let error = match read_recorded(&mut file) {
                Some(holder) => LaunchError::AlreadyRunning {
                    path: path.to_path_buf(),
                    pid: holder,
                },
                None => LaunchError::LockHeld {
                    path: path.to_path_buf(),
                },
            };
            info!(
                target: PROCESS_TARGET,
                file = %path.display(),
                "refusing to start: existing daemon holds the lock"
            );
            Err(error)
        }
        Err((_, errno)) => Err(LaunchError::LockCreate {
            path: path.to_path_buf(),
            source: io::Error::from(errno),
        }),
    }
}

/// Whether `path` still names the inode behind `file`.
fn still_linked(path: &Path, file: &File) -> bool {
    match (fs::metadata(path), file.metadata()) {
        (Ok(on_disk), Ok(held)) => on_disk.dev() == held.dev() && on_disk.ino() == held.ino(),
        _ => false,
    }
}

fn read_recorded(file: &mut File) -> Option<u32> {
    let mut content = String::new();
    file.rewind().ok()?;
    file.read_to_string(&mut content).ok()?;
    content.trim().parse::<u32>().ok().filter(|pid| *pid != 0)
}

fn write_pid(file: &mut File, pid: u32) -> io::Result<()> {
    file.set_len(0)?;
    file.rewind()?;
    writeln!(file, "{pid}")?;
    file.sync_all()
}
