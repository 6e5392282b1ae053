//! Test helpers for the transport module.

use std::io::Read;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use super::{ConnectionHandler, Session};

/// Keeps each session open until its peer hangs up, counting sessions seen.
pub(crate) struct HoldingHandler {
    count: Arc<AtomicUsize>,
}

impl HoldingHandler {
    pub(crate) fn new() -> (Arc<AtomicUsize>, Arc<Self>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            count: Arc::clone(&count),
        });
        (count, handler)
    }
}

impl ConnectionHandler for HoldingHandler {
    fn handle(&self, session: Session) {
        self.count.fetch_add(1, Ordering::SeqCst);
        let Session {
            mut stream, ticket, ..
        } = session;
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink);
        drop(stream);
        ticket.release();
    }
}
