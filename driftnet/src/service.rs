//! Node service: channel wiring and task lifecycle.
//!
//! The service owns no sockets. It consumes raw datagrams from an inbound
//! channel and produces them to an outbound channel; binding UDP and
//! pumping those channels is the embedder's job. Internally it wires the
//! pool to the dispatcher, runs the idle-session reaper and the routing
//! table manager, and fans one shutdown signal out to every task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use drifttrust::NodeIdentity;

use crate::directory::NodeDirectory;
use crate::dispatcher::MessageDispatcher;
use crate::events::Events;
use crate::manager::{ManagerConfig, RoutingTableManager};
use crate::message::InboundMessage;
use crate::network::Network;
use crate::node::{Datagram, Endpoint, Node};
use crate::pool::SessionPool;
use crate::routing::RoutingTable;

/// Recommended capacity for the transport-facing datagram channels.
pub const DATAGRAM_CHANNEL_CAPACITY: usize = 256;

/// How long tasks get to wind down after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Sequence number of the local node record.
    pub enr_seq: u64,
    /// Budget for request/response exchanges.
    pub request_timeout: Duration,
    /// Interval between idle-session scans.
    pub reap_interval: Duration,
    /// Capacity of the decrypted-message channel between pool and dispatcher.
    pub inbound_message_capacity: usize,
    pub manager: ManagerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            enr_seq: 1,
            request_timeout: Duration::from_secs(5),
            reap_interval: Duration::from_secs(30),
            inbound_message_capacity: DATAGRAM_CHANNEL_CAPACITY,
            manager: ManagerConfig::default(),
        }
    }
}

pub struct NodeService {
    network: Network,
    events: Events,
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
}

impl NodeService {
    /// Build a node over the given transport channels and start its tasks.
    pub fn start(
        identity: Arc<NodeIdentity>,
        endpoint: Endpoint,
        config: NodeConfig,
        inbound: mpsc::Receiver<Datagram>,
        outbound: mpsc::Sender<Datagram>,
    ) -> Self {
        let events = Events::new();
        let (inbound_messages_tx, inbound_messages_rx) =
            mpsc::channel(config.inbound_message_capacity);
        let routing = Arc::new(Mutex::new(RoutingTable::new(identity.node_id())));
        let directory = NodeDirectory::new();
        let pool = SessionPool::new(
            identity.clone(),
            events.clone(),
            directory.clone(),
            routing.clone(),
            outbound,
            inbound_messages_tx,
        );
        let dispatcher = MessageDispatcher::new();
        let local = Node::with_identity(identity.public(), endpoint);
        let network = Network::new(
            local,
            config.enr_seq,
            pool.clone(),
            dispatcher.clone(),
            routing,
            directory,
            config.request_timeout,
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        tasks.spawn(datagram_pump(pool.clone(), inbound, shutdown_rx.clone()));
        tasks.spawn(message_pump(
            dispatcher,
            inbound_messages_rx,
            shutdown_rx.clone(),
        ));
        tasks.spawn(reaper(pool, config.reap_interval, shutdown_rx.clone()));
        let manager = RoutingTableManager::new(network.clone(), config.manager);
        tasks.spawn(manager.run(shutdown_rx));

        tracing::info!(local = %local, "node service started");
        Self {
            network,
            events,
            shutdown,
            tasks,
        }
    }

    pub fn network(&self) -> Network {
        self.network.clone()
    }

    pub fn events(&self) -> Events {
        self.events.clone()
    }

    pub fn local_node(&self) -> Node {
        self.network.local_node()
    }

    /// Admit a known peer (e.g. a bootstrap node) to the directory and the
    /// routing table without waiting for discovery.
    pub fn admit(&self, node: Node) {
        self.network.directory().insert(node);
        self.network.routing().lock().update(node.id);
    }

    /// Signal shutdown and wait for every task, aborting whatever outlives
    /// the grace period.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("shutdown grace period expired, aborting remaining tasks");
            self.tasks.shutdown().await;
        }
        tracing::info!("node service stopped");
    }
}

async fn datagram_pump(
    pool: SessionPool,
    mut inbound: mpsc::Receiver<Datagram>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            datagram = inbound.recv() => match datagram {
                Some(datagram) => pool.handle_datagram(datagram).await,
                None => break,
            },
        }
    }
}

async fn message_pump(
    dispatcher: MessageDispatcher,
    mut messages: mpsc::Receiver<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = messages.recv() => match message {
                Some(message) => dispatcher.dispatch(message),
                None => break,
            },
        }
    }
}

async fn reaper(pool: SessionPool, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let reaped = pool.reap_idle().await;
                if reaped > 0 {
                    tracing::debug!(reaped, "reaped idle sessions");
                }
            }
        }
    }
}
