//! Capacity-bounded registry of live client sessions.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::LISTENER_TARGET;

/// Outcome of an admission attempt.
#[derive(Debug)]
pub(crate) enum Admission {
    /// The connection holds a slot until the ticket is released.
    Admitted {
        ticket: SessionTicket,
        active: usize,
    },
    /// The registry was full or closing.
    Refused { active: usize },
}

/// Shared handle on the session table.
#[derive(Debug, Clone)]
pub(crate) struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    capacity: usize,
    state: Mutex<RegistryState>,
    drained: Condvar,
}

#[derive(Debug, Default)]
struct RegistryState {
    sessions: HashMap<u64, SessionEntry>,
    next_id: u64,
    closing: bool,
}

#[derive(Debug)]
struct SessionEntry {
    peer: SocketAddr,
    connected_at: Instant,
    // Second handle on the socket so shutdown can unblock the session reader.
    stream: TcpStream,
}

impl SessionRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                capacity,
                state: Mutex::new(RegistryState::default()),
                drained: Condvar::new(),
            }),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of admitted sessions.
    #[cfg(test)]
    pub(crate) fn active(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Registers `stream` if a slot is free. The capacity check and the
    /// insert happen under one lock acquisition.
    pub(crate) fn try_admit(&self, stream: &TcpStream, peer: SocketAddr) -> io::Result<Admission> {
        let control = stream.try_clone()?;
        let mut state = self.inner.lock();
        let active = state.sessions.len();
        if state.closing || active >= self.inner.capacity {
            return Ok(Admission::Refused { active });
        }
        let id = state.next_id;
        state.next_id += 1;
        state.sessions.insert(
            id,
            SessionEntry {
                peer,
                connected_at: Instant::now(),
                stream: control,
            },
        );
        let active = state.sessions.len();
        drop(state);
        Ok(Admission::Admitted {
            ticket: SessionTicket {
                id,
                registry: Arc::clone(&self.inner),
                released: false,
            },
            active,
        })
    }

    /// Stops admissions and asks every session to finish.
    ///
    /// Sessions get their read side shut down and `grace` to unregister;
    /// whatever remains afterwards is closed in both directions. Returns the
    /// number of sessions that had to be forced.
    pub(crate) fn close_all(&self, grace: Duration) -> usize {
        let mut state = self.inner.lock();
        state.closing = true;
        for entry in state.sessions.values() {
            shutdown_quietly(entry, Shutdown::Read);
        }
        let (state, _) = self
            .inner
            .drained
            .wait_timeout_while(state, grace, |state| !state.sessions.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        for entry in state.sessions.values() {
            warn!(
                target: LISTENER_TARGET,
                peer = %entry.peer,
                "forcing session closed after grace period"
            );
            shutdown_quietly(entry, Shutdown::Both);
        }
        state.sessions.len()
    }
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) -> usize {
        let mut state = self.lock();
        if let Some(entry) = state.sessions.remove(&id) {
            debug!(
                target: LISTENER_TARGET,
                peer = %entry.peer,
                connected_for = ?entry.connected_at.elapsed(),
                "session unregistered"
            );
        }
        let remaining = state.sessions.len();
        drop(state);
        self.drained.notify_all();
        remaining
    }
}

fn shutdown_quietly(entry: &SessionEntry, how: Shutdown) {
    if let Err(error) = entry.stream.shutdown(how)
        && error.kind() != io::ErrorKind::NotConnected
    {
        debug!(
            target: LISTENER_TARGET,
            peer = %entry.peer,
            error = %error,
            "socket shutdown failed"
        );
    }
}

/// Slot held by an admitted session. Dropping it frees the slot.
#[derive(Debug)]
pub(crate) struct SessionTicket {
    id: u64,
    registry: Arc<RegistryInner>,
    released: bool,
}

impl SessionTicket {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Frees the slot and returns how many sessions remain.
    pub(crate) fn release(mut self) -> usize {
        self.released = true;
        self.registry.remove(self.id)
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        if !self.released {
            self.registry.remove(self.id);
        }
    }
}
