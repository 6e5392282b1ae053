//! Accept loop for the TCP control port.

use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::journal::{Journal, Level};

use super::{Admission, ConnectionHandler, LISTENER_TARGET, ListenerError, Session, SessionRegistry};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

const ESTABLISHED_REPLY: &[u8] = b"Connection established\n";
const REFUSED_REPLY: &[u8] = b"Connection refused\n";

/// Bound, not yet accepting, control port.
#[derive(Debug)]
pub(crate) struct ControlListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl ControlListener {
    pub(crate) fn bind(host: &str, port: u16) -> Result<Self, ListenerError> {
        let listener = bind_tcp(host, port)?;
        let addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Resolve {
                host: host.to_owned(),
                port,
                source,
            })?;
        Ok(Self { listener, addr })
    }

    /// Address actually bound; differs from the request when port 0 was used.
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Spawns the accept loop. Each admitted connection is served on its own
    /// thread by `handler`.
    pub(crate) fn start(
        self,
        registry: SessionRegistry,
        handler: Arc<dyn ConnectionHandler>,
        journal: Arc<Journal>,
    ) -> Result<ListenerHandle, ListenerError> {
        self.listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::NonBlocking { source })?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);
        let context = AcceptContext {
            registry,
            handler,
            journal,
        };
        let handle = thread::Builder::new()
            .name("matt-daemon-accept".to_owned())
            .spawn(move || run_accept_loop(&self, &shutdown_flag, &context))
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            shutdown,
            handle: Some(handle),
        })
    }
}

/// Handle to the background accept thread.
#[derive(Debug)]
pub(crate) struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    /// Asks the accept loop to stop; the port closes once it exits.
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(()) => Ok(()),
                Err(_) => Err(ListenerError::ThreadPanic),
            }
        } else {
            Ok(())
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

struct AcceptContext {
    registry: SessionRegistry,
    handler: Arc<dyn ConnectionHandler>,
    journal: Arc<Journal>,
}

fn run_accept_loop(listener: &ControlListener, shutdown: &AtomicBool, context: &AcceptContext) {
    info!(
        target: LISTENER_TARGET,
        addr = %listener.addr,
        capacity = context.registry.capacity(),
        "control listener active"
    );
    let mut last_error = None::<io::ErrorKind>;
    while !shutdown.load(Ordering::SeqCst) {
        match listener.listener.accept() {
            Ok((stream, peer)) => {
                last_error = None;
                if let Err(error) = dispatch(stream, peer, context) {
                    warn!(
                        target: LISTENER_TARGET,
                        %peer,
                        error = %error,
                        "failed to set up client connection"
                    );
                }
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: LISTENER_TARGET,
                        error = %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    info!(
        target: LISTENER_TARGET,
        addr = %listener.addr,
        "control listener stopped"
    );
}

fn dispatch(stream: TcpStream, peer: SocketAddr, context: &AcceptContext) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    match context.registry.try_admit(&stream, peer)? {
        Admission::Admitted { ticket, active } => {
            context.journal.record(
                Level::Info,
                &format!("New client connected. Active connections: {active}"),
            );
            info!(
                target: LISTENER_TARGET,
                %peer,
                active,
                "client admitted"
            );
            let mut writer = &stream;
            if let Err(error) = writer.write_all(ESTABLISHED_REPLY) {
                debug!(
                    target: LISTENER_TARGET,
                    %peer,
                    error = %error,
                    "failed to acknowledge client"
                );
            }
            let handler = Arc::clone(&context.handler);
            let session = Session {
                stream,
                peer,
                ticket,
            };
            // A failed spawn drops the session, which frees its slot.
            thread::Builder::new()
                .name(format!("matt-daemon-session-{peer}"))
                .spawn(move || handler.handle(session))?;
            Ok(())
        }
        Admission::Refused { active } => {
            context.journal.record(
                Level::Info,
                "Maximum number of clients reached. New connection will be refused.",
            );
            info!(
                target: LISTENER_TARGET,
                %peer,
                active,
                "client refused"
            );
            refuse(stream);
            Ok(())
        }
    }
}

fn refuse(mut stream: TcpStream) {
    if let Err(error) = stream
        .write_all(REFUSED_REPLY)
        .and_then(|()| stream.shutdown(Shutdown::Both))
    {
        debug!(
            target: LISTENER_TARGET,
            error = %error,
            "failed to close refused connection cleanly"
        );
    }
}

fn bind_tcp(host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}
