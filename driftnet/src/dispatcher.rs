//! Message dispatcher: request/response correlation and typed fan-out.
//!
//! Inbound messages are matched first against outstanding requests by
//! `(remote node id, request id)`; a match goes to that request's channel
//! and nowhere else. Everything unmatched fans out to the subscribers
//! registered for its payload kind. Registration and delivery share one
//! mutex, so a response can never race past its request's registration.
//!
//! Both subscriptions and pending requests deregister themselves on drop,
//! so every exit path — first response, timeout, caller abandonment —
//! cleans its table entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::mpsc;
use tokio::time::timeout;

use drifttrust::NodeId;

use crate::error::{DriftNetError, Result};
use crate::message::{InboundMessage, PayloadKind, RequestId};

/// Buffered messages per subscriber before fan-out starts dropping.
const SUBSCRIBER_CAPACITY: usize = 64;
/// Buffered response messages per pending request (a paginated FOUND_NODES
/// batch arrives as several messages under one request id).
const RESPONSE_CAPACITY: usize = 16;

struct PendingEntry {
    expected: PayloadKind,
    tx: mpsc::Sender<InboundMessage>,
}

struct SubscriberEntry {
    token: u64,
    tx: mpsc::Sender<InboundMessage>,
}

#[derive(Default)]
struct Tables {
    pending: HashMap<(NodeId, RequestId), PendingEntry>,
    subscribers: HashMap<PayloadKind, Vec<SubscriberEntry>>,
    next_token: u64,
}

/// Counters for messages the dispatcher could not deliver.
#[derive(Default)]
pub struct DispatchCounters {
    pub unhandled: AtomicU64,
    pub dropped_full: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchStats {
    pub pending_requests: usize,
    pub unhandled: u64,
    pub dropped_full: u64,
}

#[derive(Clone, Default)]
pub struct MessageDispatcher {
    tables: Arc<Mutex<Tables>>,
    counters: Arc<DispatchCounters>,
}

impl MessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for every unmatched message of `kind`. The
    /// subscription deregisters itself when dropped.
    pub fn subscribe(&self, kind: PayloadKind) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let mut tables = self.tables.lock();
        let token = tables.next_token;
        tables.next_token += 1;
        tables
            .subscribers
            .entry(kind)
            .or_default()
            .push(SubscriberEntry { token, tx });
        Subscription {
            kind,
            token,
            rx,
            tables: self.tables.clone(),
        }
    }

    /// Draw a fresh request id for `node_id` and register the correlation
    /// entry under it, expecting responses of `expected` kind. Ids colliding
    /// with an outstanding request are redrawn.
    pub fn register_request(
        &self,
        node_id: NodeId,
        expected: PayloadKind,
    ) -> (RequestId, PendingRequest) {
        let (tx, rx) = mpsc::channel(RESPONSE_CAPACITY);
        let mut tables = self.tables.lock();
        let request_id = loop {
            let mut raw = [0u8; 4];
            OsRng.fill_bytes(&mut raw);
            let candidate = u32::from_be_bytes(raw);
            if !tables.pending.contains_key(&(node_id, candidate)) {
                break candidate;
            }
        };
        tables
            .pending
            .insert((node_id, request_id), PendingEntry { expected, tx });
        (
            request_id,
            PendingRequest {
                key: (node_id, request_id),
                rx,
                tables: self.tables.clone(),
            },
        )
    }

    /// Route one inbound message.
    pub fn dispatch(&self, message: InboundMessage) {
        let kind = message.payload.kind();
        let key = (message.node.id, message.payload.request_id());
        let mut tables = self.tables.lock();

        if let Some(entry) = tables.pending.get(&key) {
            // A matching id with the wrong kind is not this request's
            // response; let it fall through to the subscribers.
            if entry.expected == kind {
                if entry.tx.try_send(message).is_err() {
                    self.counters.dropped_full.fetch_add(1, Ordering::Relaxed);
                }
                return;
            }
        }

        let mut delivered = false;
        if let Some(subs) = tables.subscribers.get_mut(&kind) {
            subs.retain(|entry| match entry.tx.try_send(message.clone()) {
                Ok(()) => {
                    delivered = true;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.counters.dropped_full.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
        if !delivered {
            self.counters.unhandled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(kind = ?kind, "no receiver for message");
        }
    }

    pub fn stats(&self) -> DispatchStats {
        let tables = self.tables.lock();
        DispatchStats {
            pending_requests: tables.pending.len(),
            unhandled: self.counters.unhandled.load(Ordering::Relaxed),
            dropped_full: self.counters.dropped_full.load(Ordering::Relaxed),
        }
    }
}

/// A live subscription for one payload kind.
pub struct Subscription {
    kind: PayloadKind,
    token: u64,
    rx: mpsc::Receiver<InboundMessage>,
    tables: Arc<Mutex<Tables>>,
}

impl Subscription {
    /// Await the next matching message. `None` when the dispatcher is gone.
    pub async fn receive(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut tables = self.tables.lock();
        if let Some(subs) = tables.subscribers.get_mut(&self.kind) {
            subs.retain(|entry| entry.token != self.token);
        }
    }
}

/// A registered request awaiting its response(s).
pub struct PendingRequest {
    key: (NodeId, RequestId),
    rx: mpsc::Receiver<InboundMessage>,
    tables: Arc<Mutex<Tables>>,
}

impl PendingRequest {
    /// Await the next response message within `budget`.
    ///
    /// On timeout the correlation entry is removed before the error
    /// returns, so a late response cannot reach a caller that gave up.
    pub async fn next_response(&mut self, budget: Duration) -> Result<InboundMessage> {
        match timeout(budget, self.rx.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(DriftNetError::ChannelClosed("response")),
            Err(_) => {
                self.deregister();
                Err(DriftNetError::RequestTimeout)
            }
        }
    }

    fn deregister(&self) {
        self.tables.lock().pending.remove(&self.key);
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.deregister();
    }
}
