//! High-level request/response operations over the pool and dispatcher.
//!
//! Where the pool speaks packets and the dispatcher speaks messages, this
//! layer speaks the protocol: ping a peer and await its pong, ask for nodes
//! at a distance and reassemble the paginated answer, verify a discovered
//! peer before admitting it to the routing table, and run iterative
//! lookups.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drifttrust::NodeId;

use crate::directory::NodeDirectory;
use crate::dispatcher::MessageDispatcher;
use crate::error::{DriftNetError, Result};
use crate::lookup::{IterativeLookup, LookupTransport};
use crate::message::{NodeRecord, Payload, PayloadKind, RequestId, FOUND_NODES_PAGE};
use crate::node::Node;
use crate::pool::SessionPool;
use crate::routing::BUCKET_SIZE;

pub use crate::routing::SharedRoutingTable;

#[derive(Default)]
struct NetworkCounters {
    empty_responses: AtomicU64,
}

#[derive(Clone)]
pub struct Network {
    local: Node,
    local_enr_seq: u64,
    pool: SessionPool,
    dispatcher: MessageDispatcher,
    routing: SharedRoutingTable,
    directory: NodeDirectory,
    request_timeout: Duration,
    counters: Arc<NetworkCounters>,
}

impl Network {
    pub fn new(
        local: Node,
        local_enr_seq: u64,
        pool: SessionPool,
        dispatcher: MessageDispatcher,
        routing: SharedRoutingTable,
        directory: NodeDirectory,
        request_timeout: Duration,
    ) -> Self {
        Self {
            local,
            local_enr_seq,
            pool,
            dispatcher,
            routing,
            directory,
            request_timeout,
            counters: Arc::new(NetworkCounters::default()),
        }
    }

    pub fn local_node(&self) -> Node {
        self.local
    }

    pub fn routing(&self) -> SharedRoutingTable {
        self.routing.clone()
    }

    pub fn directory(&self) -> NodeDirectory {
        self.directory.clone()
    }

    pub fn dispatcher(&self) -> MessageDispatcher {
        self.dispatcher.clone()
    }

    pub fn pool(&self) -> SessionPool {
        self.pool.clone()
    }

    /// How many FIND_NODES exchanges returned nothing at all.
    pub fn empty_responses(&self) -> u64 {
        self.counters.empty_responses.load(Ordering::Relaxed)
    }

    /// Ping `node` and await its pong.
    pub async fn ping(&self, node: &Node) -> Result<Payload> {
        let (request_id, mut pending) = self
            .dispatcher
            .register_request(node.id, PayloadKind::Pong);
        self.pool
            .send_message(
                node,
                Payload::Ping {
                    request_id,
                    enr_seq: self.local_enr_seq,
                },
            )
            .await?;
        let message = pending.next_response(self.request_timeout).await?;
        Ok(message.payload)
    }

    /// Answer a ping, echoing the request id and the address we saw the
    /// ping arrive from.
    pub async fn send_pong(&self, node: &Node, request_id: RequestId) -> Result<()> {
        self.pool
            .send_message(
                node,
                Payload::Pong {
                    request_id,
                    enr_seq: self.local_enr_seq,
                    packet_ip: node.endpoint.ip,
                    packet_port: node.endpoint.port,
                },
            )
            .await
    }

    /// Ask `node` for its peers at `distance`, reassembling the paginated
    /// response. An answer with no records at all is counted and returned
    /// as an empty list.
    pub async fn find_nodes(&self, node: &Node, distance: u16) -> Result<Vec<Node>> {
        match self.request_found_nodes(node, distance).await {
            Ok(records) => {
                let mut found = Vec::with_capacity(records.len());
                for record in records {
                    let node = record.to_node();
                    if node.id == self.local.id {
                        continue;
                    }
                    self.directory.insert(node);
                    found.push(node);
                }
                Ok(found)
            }
            Err(DriftNetError::EmptyResponse) => {
                self.counters.empty_responses.fetch_add(1, Ordering::Relaxed);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn request_found_nodes(&self, node: &Node, distance: u16) -> Result<Vec<NodeRecord>> {
        let (request_id, mut pending) = self
            .dispatcher
            .register_request(node.id, PayloadKind::FoundNodes);
        self.pool
            .send_message(
                node,
                Payload::FindNodes {
                    request_id,
                    distance,
                },
            )
            .await?;

        let first = pending.next_response(self.request_timeout).await?;
        let (total, mut records) = match first.payload {
            Payload::FoundNodes { total, nodes, .. } => (total, nodes),
            _ => return Err(DriftNetError::MalformedPacket("unexpected response kind")),
        };
        for _ in 1..total {
            let next = pending.next_response(self.request_timeout).await?;
            match next.payload {
                Payload::FoundNodes { nodes, .. } => records.extend(nodes),
                _ => return Err(DriftNetError::MalformedPacket("unexpected response kind")),
            }
        }
        if records.is_empty() {
            return Err(DriftNetError::EmptyResponse);
        }
        Ok(records)
    }

    /// Answer a FIND_NODES request with `records`, paginated to stay under
    /// the MTU. An empty answer is a single empty message.
    pub async fn send_found_nodes(
        &self,
        node: &Node,
        request_id: RequestId,
        records: Vec<NodeRecord>,
    ) -> Result<()> {
        let pages: Vec<&[NodeRecord]> = if records.is_empty() {
            vec![&[]]
        } else {
            records.chunks(FOUND_NODES_PAGE).collect()
        };
        let total = pages.len() as u8;
        for page in pages {
            self.pool
                .send_message(
                    node,
                    Payload::FoundNodes {
                        request_id,
                        total,
                        nodes: page.to_vec(),
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Confirm a discovered peer with a single ping inside `budget`; on
    /// success record it in the directory and the routing table.
    pub async fn verify_and_add(&self, node: Node, budget: Duration) -> bool {
        match tokio::time::timeout(budget, self.ping(&node)).await {
            Ok(Ok(_)) => {
                self.directory.insert(node);
                self.routing.lock().update(node.id);
                tracing::debug!(%node, "verified discovered node");
                true
            }
            _ => {
                tracing::debug!(%node, "node verification failed");
                false
            }
        }
    }

    /// Iterative lookup for the K nodes closest to `target`, seeded from
    /// the routing table. Returns immediately when the table is empty.
    pub async fn iterative_lookup(&self, target: NodeId) -> Vec<Node> {
        let seed_ids = self.routing.lock().closest(&target, BUCKET_SIZE);
        let seeds: Vec<Node> = seed_ids
            .iter()
            .filter_map(|id| self.directory.get(id))
            .collect();
        IterativeLookup::new(self.clone(), target, seeds)
            .run()
            .await
    }
}

impl LookupTransport for Network {
    fn find_nodes(
        &self,
        node: Node,
        distance: u16,
    ) -> impl std::future::Future<Output = Result<Vec<Node>>> + Send {
        let network = self.clone();
        async move { network.find_nodes(&node, distance).await }
    }
}
