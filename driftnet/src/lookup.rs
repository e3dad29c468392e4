//! Iterative k-closest lookup.
//!
//! Classic Kademlia search: keep a candidate list ordered by XOR distance
//! to the target, query the closest unqueried candidates α at a time, merge
//! whatever each responder returns, and stop when the K closest candidates
//! have all answered or failed. Peers that time out or error are never
//! queried again.
//!
//! The search is generic over a [`LookupTransport`] so it can run against
//! the real network or a simulated swarm in tests.

use std::future::Future;

use tokio::task::JoinSet;

use drifttrust::NodeId;

use crate::error::Result;
use crate::node::{log_distance, xor_distance, Node};
use crate::routing::BUCKET_SIZE;

/// Lookup concurrency.
pub const ALPHA: usize = 3;

/// The query side of a lookup: ask `node` for its peers in the bucket at
/// `distance` from the target.
pub trait LookupTransport: Clone + Send + Sync + 'static {
    fn find_nodes(
        &self,
        node: Node,
        distance: u16,
    ) -> impl Future<Output = Result<Vec<Node>>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateState {
    Unqueried,
    Pending,
    Responded,
    Failed,
}

struct Candidate {
    node: Node,
    distance: [u8; 32],
    state: CandidateState,
}

pub struct IterativeLookup<T> {
    transport: T,
    target: NodeId,
    result_width: usize,
    alpha: usize,
    /// Candidates ordered by distance to the target, nearest first.
    candidates: Vec<Candidate>,
}

impl<T: LookupTransport> IterativeLookup<T> {
    pub fn new(transport: T, target: NodeId, seeds: Vec<Node>) -> Self {
        let mut lookup = Self {
            transport,
            target,
            result_width: BUCKET_SIZE,
            alpha: ALPHA,
            candidates: Vec::new(),
        };
        for seed in seeds {
            lookup.merge(seed);
        }
        lookup
    }

    /// Run the search to completion, returning up to K responders closest
    /// to the target. An empty seed set returns immediately.
    pub async fn run(mut self) -> Vec<Node> {
        let mut in_flight: JoinSet<(NodeId, Result<Vec<Node>>)> = JoinSet::new();

        loop {
            while in_flight.len() < self.alpha {
                let Some(index) = self.next_query_index() else {
                    break;
                };
                self.candidates[index].state = CandidateState::Pending;
                let node = self.candidates[index].node;
                let distance = log_distance(&node.id, &self.target);
                let transport = self.transport.clone();
                in_flight.spawn(async move {
                    let found = transport.find_nodes(node, distance).await;
                    (node.id, found)
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                // Nothing queryable and nothing in flight: done.
                break;
            };
            let Ok((responder, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(found) => {
                    self.mark(responder, CandidateState::Responded);
                    for node in found {
                        self.merge(node);
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "lookup query failed");
                    self.mark(responder, CandidateState::Failed);
                }
            }
        }

        self.candidates
            .iter()
            .filter(|c| c.state == CandidateState::Responded)
            .take(self.result_width)
            .map(|c| c.node)
            .collect()
    }

    /// The nearest unqueried candidate among the K closest, if any.
    fn next_query_index(&self) -> Option<usize> {
        self.candidates
            .iter()
            .take(self.result_width)
            .position(|c| c.state == CandidateState::Unqueried)
    }

    /// Insert a discovered node, keeping the list ordered and duplicate-free.
    /// A rediscovered node keeps its state (and gains a public identity if
    /// the new sighting carries one).
    fn merge(&mut self, node: Node) {
        let distance = xor_distance(&self.target, &node.id);
        match self
            .candidates
            .binary_search_by(|c| c.distance.cmp(&distance))
        {
            Ok(index) => {
                let existing = &mut self.candidates[index];
                if existing.node.pubkey.is_none() {
                    existing.node.pubkey = node.pubkey;
                }
            }
            Err(index) => {
                self.candidates.insert(
                    index,
                    Candidate {
                        node,
                        distance,
                        state: CandidateState::Unqueried,
                    },
                );
            }
        }
    }

    fn mark(&mut self, node_id: NodeId, state: CandidateState) {
        if let Some(candidate) = self.candidates.iter_mut().find(|c| c.node.id == node_id) {
            candidate.state = state;
        }
    }
}

/// Convenience wrapper over [`IterativeLookup`].
pub async fn iterative_lookup<T: LookupTransport>(
    transport: T,
    target: NodeId,
    seeds: Vec<Node>,
) -> Vec<Node> {
    IterativeLookup::new(transport, target, seeds).run().await
}
