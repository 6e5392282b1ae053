//! Append-only journal backing the daemon's log file.
//!
//! Every record is formatted in full before the writer mutex is taken and is
//! emitted with a single `write_all` followed by a flush, so concurrent
//! callers never interleave partial lines and a reader opening the file sees
//! records in the order the appends completed.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, info, warn};

const JOURNAL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::journal");
const DAEMON_TAG: &str = "Matt_daemon";

/// Severity tag written into each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Failures the operator should look at.
    Error,
    /// Lifecycle events.
    Info,
    /// Messages received from clients.
    Log,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Info => "INFO",
            Self::Log => "LOG",
        }
    }
}

/// Errors raised by the journal.
#[derive(Debug, Error)]
pub enum JournalError {
    /// The destination could not be opened for appending.
    #[error("failed to open log file '{path}': {source}")]
    Unavailable {
        /// Journal path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing or flushing a record failed.
    #[error("failed to append to log file '{path}': {source}")]
    Write {
        /// Journal path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The journal was closed during shutdown.
    #[error("log file '{path}' is already closed")]
    Closed {
        /// Journal path.
        path: Utf8PathBuf,
    },
}

/// Serialised writer for the daemon log.
#[derive(Debug)]
pub struct Journal {
    path: Utf8PathBuf,
    offset: UtcOffset,
    file: Mutex<Option<File>>,
}

impl Journal {
    /// Opens `path` in append mode, creating it when missing.
    ///
    /// The local UTC offset is sampled here, while the process is still
    /// single-threaded; UTC is used when it cannot be determined.
    pub fn open(path: &Utf8Path) -> Result<Self, JournalError> {
        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o640);
        }
        let file = options
            .open(path.as_std_path())
            .map_err(|source| JournalError::Unavailable {
                path: path.to_path_buf(),
                source,
            })?;
        let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        info!(
            target: JOURNAL_TARGET,
            file = %path,
            "journal opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            offset,
            file: Mutex::new(Some(file)),
        })
    }

    /// Appends one timestamped record and flushes it before returning.
    pub fn append(&self, level: Level, message: &str) -> Result<(), JournalError> {
        let mut guard = self.lock();
        let Some(file) = guard.as_mut() else {
            return Err(JournalError::Closed {
                path: self.path.clone(),
            });
        };
        // Timestamp under the lock so record order and time order agree.
        let record = format_record(self.now(), level, message);
        file.write_all(record.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|source| JournalError::Write {
                path: self.path.clone(),
                source,
            })?;
        debug!(
            target: JOURNAL_TARGET,
            level = level.label(),
            message,
            "journal record appended"
        );
        Ok(())
    }

    /// Appends a record, reporting failures through `tracing` only.
    pub fn record(&self, level: Level, message: &str) {
        if let Err(error) = self.append(level, message) {
            warn!(
                target: JOURNAL_TARGET,
                error = %error,
                message,
                "dropped journal record"
            );
        }
    }

    /// Flushes and releases the file handle. Closing twice is a no-op.
    pub fn close(&self) -> Result<(), JournalError> {
        let Some(mut file) = self.lock().take() else {
            return Ok(());
        };
        file.flush()
            .and_then(|()| file.sync_data())
            .map_err(|source| JournalError::Write {
                path: self.path.clone(),
                source,
            })?;
        info!(
            target: JOURNAL_TARGET,
            file = %self.path,
            "journal closed"
        );
        Ok(())
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<File>> {
        // A panicking writer cannot leave a half-written record behind, so the
        // handle stays usable after poisoning.
        self.file.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

fn format_record(at: OffsetDateTime, level: Level, message: &str) -> String {
    let single_line = message.replace(['\n', '\r'], " ");
    format!(
        "[{:02} / {:02} / {:04} - {:02} : {:02} : {:02}] [ {} ] - {DAEMON_TAG}: {single_line}\n",
        at.day(),
        u8::from(at.month()),
        at.year(),
        at.hour(),
        at.minute(),
        at.second(),
        level.label(),
    )
}
