//! Per-client sessions on the control port.

use std::io::{self, BufRead, BufReader, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::command::{Command, trim_line_ending};
use crate::journal::{Journal, Level};
use crate::process::{ShutdownController, ShutdownTrigger};

use super::{LISTENER_TARGET, SessionError, SessionTicket};

/// Longest accepted message, line terminator included.
pub(crate) const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// An admitted connection together with its registry slot.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) stream: TcpStream,
    pub(crate) peer: SocketAddr,
    pub(crate) ticket: SessionTicket,
}

/// Handles admitted connections.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Serves one session to completion. Implementations should avoid
    /// panicking and must release the session's ticket when done.
    fn handle(&self, session: Session);
}

/// Journals client messages and turns `quit` into a shutdown request.
#[derive(Debug, Clone)]
pub(crate) struct ControlSessionHandler {
    journal: Arc<Journal>,
    controller: ShutdownController,
}

impl ControlSessionHandler {
    pub(crate) fn new(journal: Arc<Journal>, controller: ShutdownController) -> Self {
        Self {
            journal,
            controller,
        }
    }

    fn serve(&self, stream: &TcpStream) -> Result<(), SessionError> {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            line.clear();
            if read_message(&mut reader, &mut line)? == 0 {
                return Ok(());
            }
            let text = String::from_utf8_lossy(&line);
            match Command::interpret(&text) {
                Command::Terminate => {
                    self.journal.record(Level::Info, "Received quit command");
                    self.controller.request(ShutdownTrigger::Quit);
                    return Ok(());
                }
                Command::LogAndContinue => {
                    let message = trim_line_ending(&text);
                    self.journal
                        .record(Level::Log, &format!("Received message: {message}"));
                }
            }
        }
    }
}

impl ConnectionHandler for ControlSessionHandler {
    fn handle(&self, session: Session) {
        let Session {
            stream,
            peer,
            ticket,
        } = session;
        debug!(
            target: LISTENER_TARGET,
            %peer,
            session = ticket.id(),
            "session started"
        );
        if let Err(error) = self.serve(&stream) {
            warn!(
                target: LISTENER_TARGET,
                %peer,
                error = %error,
                "session ended with error"
            );
        }
        if let Err(error) = stream.shutdown(Shutdown::Both)
            && error.kind() != io::ErrorKind::NotConnected
        {
            debug!(
                target: LISTENER_TARGET,
                %peer,
                error = %error,
                "socket shutdown failed"
            );
        }
        drop(stream);
        let remaining = ticket.release();
        info!(
            target: LISTENER_TARGET,
            %peer,
            remaining,
            "client disconnected"
        );
        self.journal.record(
            Level::Info,
            &format!("Client disconnected. Active connections: {remaining}"),
        );
    }
}

/// Reads one line into `line`. A final fragment without a terminator is
/// returned as is; zero means end of stream.
fn read_message<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> Result<usize, SessionError> {
    let limit = u64::try_from(MAX_MESSAGE_BYTES + 1).unwrap_or(u64::MAX);
    let read = reader
        .by_ref()
        .take(limit)
        .read_until(b'\n', line)
        .map_err(|source| SessionError::Io { source })?;
    if read > MAX_MESSAGE_BYTES {
        return Err(SessionError::LineTooLong {
            limit: MAX_MESSAGE_BYTES,
        });
    }
    Ok(read)
}
