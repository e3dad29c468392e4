//! Session pool: the per-peer session registry and datagram router.
//!
//! Owns the `NodeId -> Session` map and brokers all traffic through it:
//! inbound datagrams are decoded, routed to (or spawn) the right session,
//! and the session's output is forwarded to the outbound-datagram and
//! inbound-message channels. A completed handshake proves the peer's
//! identity and address, so the pool files its record in the node
//! directory and seeds the routing table with it. The map lives behind one
//! async mutex so that per-session packet order matches the order in which
//! messages were accepted; everything under the lock is computation plus
//! bounded channel sends whose consumers never take this lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

use drifttrust::crypto::hash::hash_sha256;
use drifttrust::{NodeId, NodeIdentity};

use crate::directory::NodeDirectory;
use crate::error::{DriftNetError, Result};
use crate::events::{Events, NewSession};
use crate::message::{InboundMessage, Payload};
use crate::node::{compute_magic, recover_sender, short_id, Datagram, Magic, Node};
use crate::packet::Packet;
use crate::routing::SharedRoutingTable;
use crate::session::{Session, SessionRole};

/// Sessions with no traffic for this long are reaped.
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Consecutive AEAD failures after which a session is evicted.
const MAX_DECRYPT_FAILURES: u32 = 3;

/// Counters for traffic the pool swallowed.
#[derive(Default)]
pub struct PoolCounters {
    pub malformed_packets: AtomicU64,
    pub decryption_failures: AtomicU64,
    pub handshake_failures: AtomicU64,
    pub unknown_messages: AtomicU64,
    pub dropped_no_session: AtomicU64,
}

/// Point-in-time snapshot of the pool counters.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub sessions: usize,
    pub malformed_packets: u64,
    pub decryption_failures: u64,
    pub handshake_failures: u64,
    pub unknown_messages: u64,
    pub dropped_no_session: u64,
}

/// Identifying facts about a live session, copied out of the pool.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub role: SessionRole,
    pub remote: Node,
    pub handshake_complete: bool,
    pub last_message_at: Instant,
}

struct PoolInner {
    sessions: HashMap<NodeId, Session>,
}

#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<Mutex<PoolInner>>,
    identity: Arc<NodeIdentity>,
    local_node_id: NodeId,
    local_id_hash: [u8; 32],
    local_magic: Magic,
    idle_timeout: Duration,
    events: Events,
    directory: NodeDirectory,
    routing: SharedRoutingTable,
    outbound: mpsc::Sender<Datagram>,
    inbound_messages: mpsc::Sender<InboundMessage>,
    counters: Arc<PoolCounters>,
}

impl SessionPool {
    pub fn new(
        identity: Arc<NodeIdentity>,
        events: Events,
        directory: NodeDirectory,
        routing: SharedRoutingTable,
        outbound: mpsc::Sender<Datagram>,
        inbound_messages: mpsc::Sender<InboundMessage>,
    ) -> Self {
        let local_node_id = identity.node_id();
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                sessions: HashMap::new(),
            })),
            identity,
            local_node_id,
            local_id_hash: hash_sha256(&local_node_id),
            local_magic: compute_magic(&local_node_id),
            idle_timeout: SESSION_IDLE_TIMEOUT,
            events,
            directory,
            routing,
            outbound,
            inbound_messages,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn local_node_id(&self) -> NodeId {
        self.local_node_id
    }

    /// Explicitly create a session for `node`. Fails with `DuplicateSession`
    /// if one already exists.
    pub async fn create_session(&self, node: Node, is_initiator: bool) -> Result<Uuid> {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(&node.id) {
            return Err(DriftNetError::DuplicateSession(short_id(&node.id)));
        }
        let session = self.build_session(node, is_initiator)?;
        let id = session.id();
        self.announce(&session);
        inner.sessions.insert(node.id, session);
        Ok(id)
    }

    /// Look up the session for `node_id`, failing with `SessionNotFound`.
    pub async fn get_session(&self, node_id: &NodeId) -> Result<SessionSnapshot> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(node_id)
            .map(snapshot)
            .ok_or_else(|| DriftNetError::SessionNotFound(short_id(node_id)))
    }

    pub async fn has_session(&self, node_id: &NodeId) -> bool {
        self.inner.lock().await.sessions.contains_key(node_id)
    }

    /// Remove a session by its internal id. Missing sessions are tolerated.
    pub async fn remove_session(&self, session_id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.id() != session_id);
        inner.sessions.len() != before
    }

    /// Sessions whose last message is older than the idle threshold.
    pub async fn idle_sessions(&self) -> Vec<SessionSnapshot> {
        let inner = self.inner.lock().await;
        let now = Instant::now();
        inner
            .sessions
            .values()
            .filter(|s| now.duration_since(s.last_message_at()) >= self.idle_timeout)
            .map(snapshot)
            .collect()
    }

    /// Drop every idle session, returning how many were removed.
    pub async fn reap_idle(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let idle_timeout = self.idle_timeout;
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| {
            let keep = now.duration_since(s.last_message_at()) < idle_timeout;
            if !keep {
                tracing::debug!(remote = %s.remote(), "reaping idle session");
            }
            keep
        });
        before - inner.sessions.len()
    }

    /// Send a message to `node`, creating an initiator session if none
    /// exists. Packets reach the outbound channel in acceptance order.
    pub async fn send_message(&self, node: &Node, payload: Payload) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.sessions.contains_key(&node.id) {
            let session = self.build_session(*node, true)?;
            self.announce(&session);
            inner.sessions.insert(node.id, session);
        }
        let session = inner
            .sessions
            .get_mut(&node.id)
            .expect("session inserted above");
        let packets = session.handle_outbound_message(payload)?;
        let endpoint = session.remote().endpoint;
        for packet in packets {
            self.outbound
                .send(Datagram {
                    data: packet.encode(),
                    endpoint,
                })
                .await
                .map_err(|_| DriftNetError::ChannelClosed("outbound datagram"))?;
        }
        Ok(())
    }

    /// Decode and route one inbound datagram.
    ///
    /// Transport-level garbage is swallowed with a counter; handshake
    /// failures tear the session down; decryption failures are tolerated up
    /// to the eviction threshold.
    pub async fn handle_datagram(&self, datagram: Datagram) {
        let packet = match Packet::decode(&datagram.data, &self.local_magic) {
            Ok(packet) => packet,
            Err(e) => {
                self.counters.malformed_packets.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(endpoint = %datagram.endpoint, error = %e, "dropping datagram");
                return;
            }
        };
        let sender = recover_sender(&self.local_id_hash, packet.tag());
        if sender == self.local_node_id {
            tracing::debug!(endpoint = %datagram.endpoint, "dropping our own packet");
            return;
        }

        let mut inner = self.inner.lock().await;
        if !inner.sessions.contains_key(&sender) {
            // Only an opener may create a recipient session; anything else
            // without a session has no keys to speak with.
            if !matches!(packet, Packet::AuthTag(_)) {
                self.counters.dropped_no_session.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    sender = %short_id(&sender),
                    endpoint = %datagram.endpoint,
                    "packet for unknown session"
                );
                return;
            }
            let node = Node::new(sender, datagram.endpoint);
            match self.build_session(node, false) {
                Ok(session) => {
                    self.announce(&session);
                    inner.sessions.insert(sender, session);
                }
                Err(e) => {
                    tracing::warn!(sender = %short_id(&sender), error = %e, "session setup failed");
                    return;
                }
            }
        }

        let session = inner
            .sessions
            .get_mut(&sender)
            .expect("session present or inserted above");
        let was_complete = session.is_handshake_complete();
        let io = match session.handle_inbound_packet(packet) {
            Ok(io) => io,
            Err(DriftNetError::HandshakeFailed(reason)) => {
                self.counters.handshake_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    remote = %session.remote(),
                    %reason,
                    "handshake failed, destroying session"
                );
                inner.sessions.remove(&sender);
                return;
            }
            Err(DriftNetError::Decryption(reason)) => {
                self.counters.decryption_failures.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(remote = %session.remote(), %reason, "dropping undecryptable message");
                if session.decrypt_failures() >= MAX_DECRYPT_FAILURES {
                    tracing::warn!(remote = %session.remote(), "evicting session after repeated decryption failures");
                    inner.sessions.remove(&sender);
                }
                return;
            }
            Err(e) => {
                self.counters.unknown_messages.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(remote = %session.remote(), error = %e, "dropping message");
                return;
            }
        };

        let remote = session.remote();
        if !was_complete && session.is_handshake_complete() {
            // The handshake proved the peer's identity and address.
            self.directory.insert(remote);
            self.routing.lock().update(remote.id);
        }
        for packet in io.outbound {
            if self
                .outbound
                .send(Datagram {
                    data: packet.encode(),
                    endpoint: remote.endpoint,
                })
                .await
                .is_err()
            {
                tracing::debug!("outbound datagram channel closed");
                return;
            }
        }
        for payload in io.inbound {
            if self
                .inbound_messages
                .send(InboundMessage {
                    payload,
                    node: remote,
                })
                .await
                .is_err()
            {
                tracing::debug!("inbound message channel closed");
                return;
            }
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let sessions = self.inner.lock().await.sessions.len();
        PoolStats {
            sessions,
            malformed_packets: self.counters.malformed_packets.load(Ordering::Relaxed),
            decryption_failures: self.counters.decryption_failures.load(Ordering::Relaxed),
            handshake_failures: self.counters.handshake_failures.load(Ordering::Relaxed),
            unknown_messages: self.counters.unknown_messages.load(Ordering::Relaxed),
            dropped_no_session: self.counters.dropped_no_session.load(Ordering::Relaxed),
        }
    }

    fn build_session(&self, node: Node, is_initiator: bool) -> Result<Session> {
        if is_initiator && node.pubkey.is_none() {
            return Err(DriftNetError::HandshakeFailed(format!(
                "static key unknown for {}",
                short_id(&node.id)
            )));
        }
        let role = if is_initiator {
            SessionRole::Initiator
        } else {
            SessionRole::Recipient
        };
        Ok(Session::new(self.identity.clone(), node, role))
    }

    fn announce(&self, session: &Session) {
        self.events.new_session(NewSession {
            session_id: session.id(),
            node: session.remote(),
            role: session.role(),
        });
    }
}

fn snapshot(session: &Session) -> SessionSnapshot {
    SessionSnapshot {
        id: session.id(),
        role: session.role(),
        remote: session.remote(),
        handshake_complete: session.is_handshake_complete(),
        last_message_at: session.last_message_at(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Endpoint;
    use crate::routing::RoutingTable;
    use std::net::Ipv4Addr;

    fn make_pool() -> (SessionPool, mpsc::Receiver<Datagram>, mpsc::Receiver<InboundMessage>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let identity = Arc::new(NodeIdentity::generate());
        let routing = Arc::new(parking_lot::Mutex::new(RoutingTable::new(identity.node_id())));
        let pool = SessionPool::new(
            identity,
            Events::new(),
            NodeDirectory::new(),
            routing,
            outbound_tx,
            inbound_tx,
        );
        (pool, outbound_rx, inbound_rx)
    }

    fn peer(port: u16) -> Node {
        Node::with_identity(
            NodeIdentity::generate().public(),
            Endpoint::new(Ipv4Addr::LOCALHOST, port),
        )
    }

    #[tokio::test]
    async fn duplicate_session_rejected() {
        let (pool, _out, _inb) = make_pool();
        let node = peer(9001);
        pool.create_session(node, true).await.unwrap();
        let err = pool.create_session(node, false).await.unwrap_err();
        assert!(matches!(err, DriftNetError::DuplicateSession(_)));
        // Only the first registration survives.
        let snapshot = pool.get_session(&node.id).await.unwrap();
        assert_eq!(snapshot.role, SessionRole::Initiator);
    }

    #[tokio::test]
    async fn get_session_miss_fails() {
        let (pool, _out, _inb) = make_pool();
        let err = pool.get_session(&[9u8; 32]).await.unwrap_err();
        assert!(matches!(err, DriftNetError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn remove_session_by_uuid() {
        let (pool, _out, _inb) = make_pool();
        let node = peer(9002);
        let id = pool.create_session(node, true).await.unwrap();
        assert!(pool.remove_session(id).await);
        assert!(!pool.remove_session(id).await);
        assert!(!pool.has_session(&node.id).await);
    }

    #[tokio::test]
    async fn send_message_emits_opener_for_new_peer() {
        let (pool, mut out, _inb) = make_pool();
        let node = peer(9003);
        pool.send_message(
            &node,
            Payload::Ping {
                request_id: 1,
                enr_seq: 0,
            },
        )
        .await
        .unwrap();
        // A fresh initiator session sends the 44-byte opener.
        let datagram = out.recv().await.unwrap();
        assert_eq!(datagram.data.len(), 44);
        assert_eq!(datagram.endpoint, node.endpoint);
    }

    #[tokio::test]
    async fn sending_to_keyless_peer_fails() {
        let (pool, _out, _inb) = make_pool();
        let node = Node::new([3u8; 32], Endpoint::new(Ipv4Addr::LOCALHOST, 9004));
        let err = pool
            .send_message(
                &node,
                Payload::Ping {
                    request_id: 1,
                    enr_seq: 0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriftNetError::HandshakeFailed(_)));
    }

    #[tokio::test]
    async fn malformed_datagrams_are_counted() {
        let (pool, _out, _inb) = make_pool();
        pool.handle_datagram(Datagram {
            data: bytes::Bytes::from_static(&[0u8; 10]),
            endpoint: Endpoint::new(Ipv4Addr::LOCALHOST, 9005),
        })
        .await;
        assert_eq!(pool.stats().await.malformed_packets, 1);
    }

    #[tokio::test]
    async fn new_session_event_emitted() {
        let (outbound_tx, _outbound_rx) = mpsc::channel(64);
        let (inbound_tx, _inbound_rx) = mpsc::channel(64);
        let events = Events::new();
        let mut rx = events.subscribe_new_session();
        let identity = Arc::new(NodeIdentity::generate());
        let routing = Arc::new(parking_lot::Mutex::new(RoutingTable::new(identity.node_id())));
        let pool = SessionPool::new(
            identity,
            events,
            NodeDirectory::new(),
            routing,
            outbound_tx,
            inbound_tx,
        );
        let node = peer(9006);
        pool.create_session(node, true).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.node.id, node.id);
        assert_eq!(event.role, SessionRole::Initiator);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_reported_and_reaped() {
        let (pool, _out, _inb) = make_pool();
        pool.create_session(peer(9007), true).await.unwrap();
        assert!(pool.idle_sessions().await.is_empty());

        tokio::time::advance(SESSION_IDLE_TIMEOUT).await;
        assert_eq!(pool.idle_sessions().await.len(), 1);
        assert_eq!(pool.reap_idle().await, 1);
        assert_eq!(pool.stats().await.sessions, 0);
    }
}
