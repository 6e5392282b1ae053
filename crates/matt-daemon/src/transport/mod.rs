//! TCP control port: accept loop, capacity-bounded session registry and
//! per-client sessions.

mod errors;
mod listener;
mod registry;
mod session;
#[cfg(test)]
mod test_utils;

pub use self::errors::ListenerError;
pub(crate) use self::errors::SessionError;
pub(crate) use self::listener::ControlListener;
#[cfg(test)]
pub(crate) use self::listener::ListenerHandle;
pub(crate) use self::registry::{Admission, SessionRegistry, SessionTicket};
pub(crate) use self::session::{ConnectionHandler, ControlSessionHandler, Session};
#[cfg(test)]
pub(crate) use self::test_utils::HoldingHandler;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
