//! Routing-table maintenance.
//!
//! Five daemons keep the table honest:
//!   1. a liveness sweep over the stalest bucket, removing peers that miss
//!      their ping;
//!   2. a periodic lookup toward a random target, verifying and admitting
//!      whatever it discovers;
//!   3. the FIND_NODES responder;
//!   4. the PING responder;
//!   5. a status reporter.
//!
//! All daemons watch a shared shutdown signal and exit as a group.

use std::time::Duration;

use rand::rngs::OsRng;
use rand::RngCore;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::message::{InboundMessage, NodeRecord, Payload, PayloadKind};
use crate::network::Network;
use crate::node::short_id;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Interval between liveness sweeps.
    pub ping_interval: Duration,
    /// Interval between random lookups.
    pub lookup_interval: Duration,
    /// Interval between status reports.
    pub status_interval: Duration,
    /// How long a pinged peer has to answer before it is written off.
    pub ping_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            lookup_interval: Duration::from_secs(10),
            status_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct RoutingTableManager {
    network: Network,
    local_record: NodeRecord,
    config: ManagerConfig,
}

impl RoutingTableManager {
    pub fn new(network: Network, config: ManagerConfig) -> Self {
        let local_record = NodeRecord::from_node(&network.local_node())
            .expect("local node carries its own public identity");
        Self {
            network,
            local_record,
            config,
        }
    }

    /// Run every daemon until `shutdown` flips to true.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut daemons = JoinSet::new();
        daemons.spawn(self.clone().ping_loop(shutdown.clone()));
        daemons.spawn(self.clone().lookup_loop(shutdown.clone()));
        daemons.spawn(self.clone().find_nodes_loop(shutdown.clone()));
        daemons.spawn(self.clone().pong_loop(shutdown.clone()));
        daemons.spawn(self.status_loop(shutdown));
        while daemons.join_next().await.is_some() {}
    }

    async fn ping_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tick(self.config.ping_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.ping_sweep().await,
            }
        }
    }

    /// One liveness sweep: walk the stalest bucket from its oldest member,
    /// removing peers until one answers a ping.
    pub async fn ping_sweep(&self) {
        let routing = self.network.routing();
        let Some(distance) = routing.lock().least_recently_updated_distance() else {
            tracing::warn!("routing table is empty, no one to ping");
            return;
        };
        let candidates = routing.lock().nodes_at_distance(distance);
        // `nodes_at_distance` is most-recent-first; sweep from the oldest.
        for node_id in candidates.iter().rev() {
            let Some(node) = self.network.directory().get(node_id) else {
                tracing::debug!(node = %short_id(node_id), "no record for peer, removing");
                routing.lock().remove(node_id);
                continue;
            };
            match timeout(self.config.ping_timeout, self.network.ping(&node)).await {
                Ok(Ok(_)) => break,
                _ => {
                    tracing::debug!(%node, "peer did not answer ping, removing");
                    routing.lock().remove(node_id);
                }
            }
        }
    }

    async fn lookup_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tick(self.config.lookup_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => self.lookup_sweep().await,
            }
        }
    }

    /// One discovery round: look up a random target and verify every
    /// previously unknown node the search surfaced.
    pub async fn lookup_sweep(&self) {
        if self.network.routing().lock().is_empty() {
            tracing::debug!("skipping scheduled lookup, routing table is empty");
            return;
        }
        let mut target = [0u8; 32];
        OsRng.fill_bytes(&mut target);
        let found = self.network.iterative_lookup(target).await;
        tracing::debug!(
            target = %short_id(&target),
            found = found.len(),
            "periodic lookup finished"
        );

        let mut verifications = JoinSet::new();
        for node in found {
            if node.id == self.network.local_node().id
                || self.network.routing().lock().contains(&node.id)
            {
                continue;
            }
            let network = self.network.clone();
            let budget = self.config.ping_timeout;
            verifications.spawn(async move {
                network.verify_and_add(node, budget).await;
            });
        }
        while verifications.join_next().await.is_some() {}
    }

    async fn find_nodes_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut subscription = self.network.dispatcher().subscribe(PayloadKind::FindNodes);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                request = subscription.receive() => match request {
                    Some(message) => self.handle_find_nodes(message).await,
                    None => break,
                },
            }
        }
    }

    /// Answer one FIND_NODES request. Distance zero asks for us ourselves;
    /// anything else is served from the routing table via the directory.
    pub async fn handle_find_nodes(&self, message: InboundMessage) {
        let Payload::FindNodes {
            request_id,
            distance,
        } = message.payload
        else {
            return;
        };
        let records: Vec<NodeRecord> = if distance == 0 {
            vec![self.local_record]
        } else {
            let ids = self.network.routing().lock().nodes_at_distance(distance);
            let directory = self.network.directory();
            ids.iter()
                .filter_map(|id| directory.get(id))
                .filter_map(|node| NodeRecord::from_node(&node))
                .collect()
        };
        tracing::debug!(
            node = %message.node,
            distance,
            count = records.len(),
            "answering find-nodes"
        );
        if let Err(e) = self
            .network
            .send_found_nodes(&message.node, request_id, records)
            .await
        {
            tracing::debug!(error = %e, "failed to answer find-nodes");
        }
    }

    async fn pong_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut subscription = self.network.dispatcher().subscribe(PayloadKind::Ping);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                request = subscription.receive() => match request {
                    Some(message) => self.handle_ping(message).await,
                    None => break,
                },
            }
        }
    }

    /// Answer one PING with a PONG echoing its request id.
    pub async fn handle_ping(&self, message: InboundMessage) {
        let Payload::Ping { request_id, .. } = message.payload else {
            return;
        };
        tracing::debug!(node = %message.node, "got ping, answering with pong");
        if let Err(e) = self.network.send_pong(&message.node, request_id).await {
            tracing::debug!(error = %e, "failed to answer ping");
        }
    }

    async fn status_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tick(self.config.status_interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let stats = self.network.routing().lock().stats();
                    tracing::info!(
                        total_nodes = stats.total_nodes,
                        full_buckets = ?stats.full_buckets,
                        replacements = stats.num_in_replacement_cache,
                        "routing table status"
                    );
                }
            }
        }
    }
}

/// An interval that waits one full period before its first tick.
fn tick(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
