//! XOR-distance k-bucket routing table.
//!
//! 256 buckets, one per log-distance shell around the local id. Bucket
//! order is recency: the most recently seen peer sits at the tail. A full
//! bucket keeps up to K overflow candidates in a replacement cache; when a
//! bucket member is removed, the freshest candidate is promoted in its
//! place. A node id lives in at most one bucket or one replacement cache.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use drifttrust::NodeId;

use crate::node::{log_distance, xor_distance};

/// The routing table as shared between the pool, the manager and the
/// FIND_NODES responder.
pub type SharedRoutingTable = Arc<Mutex<RoutingTable>>;

/// Maximum peers per bucket (and per replacement cache).
pub const BUCKET_SIZE: usize = 16;
/// One bucket per possible log-distance.
pub const NUM_BUCKETS: usize = 256;

#[derive(Default)]
struct Bucket {
    /// Members, most recently seen last.
    nodes: Vec<NodeId>,
    /// Overflow candidates, most recently seen last.
    replacements: Vec<NodeId>,
    /// When `update` last touched this bucket.
    touched_at: Option<Instant>,
}

/// Per-table statistics, for the status reporter.
#[derive(Debug, Clone)]
pub struct RoutingTableStats {
    pub bucket_size: usize,
    pub num_buckets: usize,
    pub total_nodes: usize,
    pub full_buckets: Vec<u16>,
    pub num_in_replacement_cache: usize,
}

pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<Bucket>,
    bucket_size: usize,
}

impl RoutingTable {
    pub fn new(local_id: NodeId) -> Self {
        Self::with_bucket_size(local_id, BUCKET_SIZE)
    }

    /// A table with a non-standard K (smaller tables keep tests readable).
    pub fn with_bucket_size(local_id: NodeId, bucket_size: usize) -> Self {
        Self {
            local_id,
            buckets: (0..NUM_BUCKETS).map(|_| Bucket::default()).collect(),
            bucket_size,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.nodes.is_empty())
    }

    /// Total number of bucket members (replacement caches excluded).
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.nodes.len()).sum()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.bucket_of(node_id)
            .map(|bucket| bucket.nodes.contains(node_id))
            .unwrap_or(false)
    }

    /// Record that `node_id` was seen.
    ///
    /// Known members move to the tail; new peers append if there is room,
    /// otherwise they go to the tail of the replacement cache (whose oldest
    /// candidate falls off when it overflows). The local id is ignored.
    pub fn update(&mut self, node_id: NodeId) {
        let Some(index) = self.bucket_index(&node_id) else {
            return;
        };
        let bucket_size = self.bucket_size;
        let bucket = &mut self.buckets[index];
        bucket.touched_at = Some(Instant::now());

        if let Some(pos) = bucket.nodes.iter().position(|n| *n == node_id) {
            bucket.nodes.remove(pos);
            bucket.nodes.push(node_id);
        } else if bucket.nodes.len() < bucket_size {
            bucket.replacements.retain(|n| *n != node_id);
            bucket.nodes.push(node_id);
        } else if let Some(pos) = bucket.replacements.iter().position(|n| *n == node_id) {
            bucket.replacements.remove(pos);
            bucket.replacements.push(node_id);
        } else {
            bucket.replacements.push(node_id);
            if bucket.replacements.len() > bucket_size {
                bucket.replacements.remove(0);
            }
        }
    }

    /// Remove `node_id`, promoting the freshest replacement candidate into
    /// the vacated slot.
    pub fn remove(&mut self, node_id: &NodeId) {
        let Some(index) = self.bucket_index(node_id) else {
            return;
        };
        let bucket = &mut self.buckets[index];
        if let Some(pos) = bucket.nodes.iter().position(|n| n == node_id) {
            bucket.nodes.remove(pos);
            if let Some(candidate) = bucket.replacements.pop() {
                bucket.nodes.push(candidate);
            }
        } else {
            bucket.replacements.retain(|n| n != node_id);
        }
    }

    /// Members of the bucket at `distance`, most recently seen first.
    pub fn nodes_at_distance(&self, distance: u16) -> Vec<NodeId> {
        if distance == 0 || distance as usize > NUM_BUCKETS {
            return Vec::new();
        }
        self.buckets[distance as usize - 1]
            .nodes
            .iter()
            .rev()
            .copied()
            .collect()
    }

    /// The distance whose non-empty bucket has gone longest without an
    /// update. `None` when the table is empty.
    pub fn least_recently_updated_distance(&self) -> Option<u16> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.nodes.is_empty())
            .min_by_key(|(_, b)| b.touched_at)
            .map(|(index, _)| index as u16 + 1)
    }

    /// The `count` members closest to `target` by XOR distance, nearest
    /// first. Full 256-bit comparison; equal log-distances resolve by the
    /// bytewise order of the XOR values.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<NodeId> {
        let mut all: Vec<NodeId> = self
            .buckets
            .iter()
            .flat_map(|b| b.nodes.iter().copied())
            .collect();
        all.sort_by_key(|id| xor_distance(target, id));
        all.truncate(count);
        all
    }

    pub fn stats(&self) -> RoutingTableStats {
        RoutingTableStats {
            bucket_size: self.bucket_size,
            num_buckets: NUM_BUCKETS,
            total_nodes: self.len(),
            full_buckets: self
                .buckets
                .iter()
                .enumerate()
                .filter(|(_, b)| b.nodes.len() == self.bucket_size)
                .map(|(index, _)| index as u16 + 1)
                .collect(),
            num_in_replacement_cache: self.buckets.iter().map(|b| b.replacements.len()).sum(),
        }
    }

    fn bucket_index(&self, node_id: &NodeId) -> Option<usize> {
        match log_distance(&self.local_id, node_id) {
            0 => None,
            distance => Some(distance as usize - 1),
        }
    }

    fn bucket_of(&self, node_id: &NodeId) -> Option<&Bucket> {
        self.bucket_index(node_id).map(|i| &self.buckets[i])
    }
}
