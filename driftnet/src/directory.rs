//! In-memory directory of known node records.
//!
//! Maps node ids to full records (public identity + endpoint). Populated by
//! the pool on handshake completion and by the network layer on discovery;
//! read by the FIND_NODES responder and the liveness sweep, which only know
//! bare ids from the routing table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use drifttrust::NodeId;

use crate::node::Node;

#[derive(Clone, Default)]
pub struct NodeDirectory {
    inner: Arc<RwLock<HashMap<NodeId, Node>>>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a record. Nodes without a public identity are
    /// ignored: a record that cannot be served to peers is not a record.
    pub fn insert(&self, node: Node) {
        if node.pubkey.is_none() {
            return;
        }
        self.inner.write().insert(node.id, node);
    }

    pub fn get(&self, node_id: &NodeId) -> Option<Node> {
        self.inner.read().get(node_id).copied()
    }

    pub fn remove(&self, node_id: &NodeId) {
        self.inner.write().remove(node_id);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
