//! DriftNet — Kademlia-style node discovery and encrypted messaging over UDP.
//!
//! The core is a layered pipeline. From the wire up: the packet codec turns
//! datagrams into packets; per-peer sessions handshake and unseal them into
//! messages; the pool routes datagrams to sessions; the dispatcher
//! correlates requests with responses and fans the rest out to subscribers;
//! the routing table and its manager keep a k-bucket view of the overlay
//! fresh. Sockets live outside: the service consumes and produces raw
//! datagrams on channels.

pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod lookup;
pub mod manager;
pub mod message;
pub mod network;
pub mod node;
pub mod packet;
pub mod pool;
pub mod routing;
pub mod service;
pub mod session;

// Re-export key public types at crate root.
pub use error::{DriftNetError, Result};
pub use events::Events;
pub use message::{InboundMessage, Payload, PayloadKind};
pub use network::Network;
pub use node::{Datagram, Endpoint, Node};
pub use packet::Packet;
pub use pool::SessionPool;
pub use routing::RoutingTable;
pub use service::{NodeConfig, NodeService};
pub use session::{Session, SessionRole};
