//! Session lifecycle events.
//!
//! The pool announces every session it adds; listeners subscribe either for
//! a stream of events or for the next one. Emission never blocks the pool:
//! a slow subscriber lags (and is told so by the broadcast channel) rather
//! than stalling datagram processing.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::node::Node;
use crate::session::SessionRole;

const EVENT_CAPACITY: usize = 64;

/// Announcement of a session added to the pool.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: Uuid,
    pub node: Node,
    pub role: SessionRole,
}

/// Broadcast bus for pool events.
#[derive(Clone)]
pub struct Events {
    new_session_tx: broadcast::Sender<NewSession>,
}

impl Events {
    pub fn new() -> Self {
        let (new_session_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { new_session_tx }
    }

    /// Announce a new session. A send with no subscribers is not an error.
    pub(crate) fn new_session(&self, event: NewSession) {
        let _ = self.new_session_tx.send(event);
    }

    /// Stream of future new-session events.
    pub fn subscribe_new_session(&self) -> broadcast::Receiver<NewSession> {
        self.new_session_tx.subscribe()
    }

    /// Await the next new-session event. Returns `None` if the bus closes.
    pub async fn wait_new_session(&self) -> Option<NewSession> {
        let mut rx = self.subscribe_new_session();
        loop {
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}
