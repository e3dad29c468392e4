//! Node addressing: identifiers, endpoints, packet tags and XOR distance.
//!
//! Every packet opens with a 32-byte tag that names the sender implicitly:
//! `tag = SHA-256(recipient_id) XOR sender_id`. The recipient recovers the
//! sender by XORing the tag with the hash of its own id. The WHOAREYOU
//! discriminator ("magic") is likewise derived from the recipient's id, so a
//! node can recognise challenges addressed to it without any session state.

use std::fmt;
use std::net::Ipv4Addr;

use bytes::Bytes;

use drifttrust::crypto::hash::{hash_sha256, hash_sha256_pair};
use drifttrust::{NodeId, PublicIdentity};

/// 32-byte packet tag.
pub type Tag = [u8; 32];
/// 32-byte WHOAREYOU discriminator.
pub type Magic = [u8; 32];
/// 32-byte handshake challenge nonce.
pub type IdNonce = [u8; 32];
/// 12-byte per-packet AEAD nonce.
pub type AuthTag = [u8; 12];

const WHO_ARE_YOU_SUFFIX: &[u8] = b"WHOAREYOU";

/// An IPv4 UDP endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// A peer: id, endpoint, and (when known) its public identity.
///
/// The public identity is required to *initiate* a handshake with the peer;
/// for inbound handshakes it is learned from the auth-response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub endpoint: Endpoint,
    pub pubkey: Option<PublicIdentity>,
}

impl Node {
    /// A peer known only by id and endpoint.
    pub fn new(id: NodeId, endpoint: Endpoint) -> Self {
        Self {
            id,
            endpoint,
            pubkey: None,
        }
    }

    /// A peer with a full public identity; the id is derived from it.
    pub fn with_identity(pubkey: PublicIdentity, endpoint: Endpoint) -> Self {
        Self {
            id: pubkey.node_id(),
            endpoint,
            pubkey: Some(pubkey),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", short_id(&self.id), self.endpoint)
    }
}

/// A raw datagram paired with the peer endpoint it came from or goes to.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub data: Bytes,
    pub endpoint: Endpoint,
}

/// Abbreviated hex form of a node id, for log lines and error messages.
pub fn short_id(id: &NodeId) -> String {
    let mut out = String::with_capacity(10);
    for byte in &id[..4] {
        out.push_str(&format!("{byte:02x}"));
    }
    out.push_str("..");
    out
}

/// The tag carried on packets sent from `local_id` to `remote_id`.
pub fn compute_tag(local_id: &NodeId, remote_id: &NodeId) -> Tag {
    let mut tag = hash_sha256(remote_id);
    for (t, l) in tag.iter_mut().zip(local_id) {
        *t ^= l;
    }
    tag
}

/// Recover the sender id from an inbound tag, given SHA-256(local_id).
pub fn recover_sender(local_id_hash: &[u8; 32], tag: &Tag) -> NodeId {
    let mut sender = *tag;
    for (s, h) in sender.iter_mut().zip(local_id_hash) {
        *s ^= h;
    }
    sender
}

/// The WHOAREYOU discriminator for packets addressed to `node_id`.
pub fn compute_magic(node_id: &NodeId) -> Magic {
    hash_sha256_pair(node_id, WHO_ARE_YOU_SUFFIX)
}

/// XOR distance between two ids, as a big-endian 256-bit value.
pub fn xor_distance(a: &NodeId, b: &NodeId) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        out[i] = x ^ y;
    }
    out
}

/// Log-distance between two ids: `floor(log2(a XOR b)) + 1`, in [1, 256].
/// Returns 0 iff the ids are equal.
pub fn log_distance(a: &NodeId, b: &NodeId) -> u16 {
    for (i, (x, y)) in a.iter().zip(b).enumerate() {
        let v = x ^ y;
        if v != 0 {
            return 256 - 8 * i as u16 - v.leading_zeros() as u16;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with_byte(index: usize, value: u8) -> NodeId {
        let mut id = [0u8; 32];
        id[index] = value;
        id
    }

    #[test]
    fn log_distance_zero_for_equal_ids() {
        let id = [0xABu8; 32];
        assert_eq!(log_distance(&id, &id), 0);
    }

    #[test]
    fn log_distance_boundaries() {
        let zero = [0u8; 32];
        // Lowest bit set: distance 1.
        assert_eq!(log_distance(&zero, &id_with_byte(31, 0x01)), 1);
        // Highest bit set: distance 256.
        assert_eq!(log_distance(&zero, &id_with_byte(0, 0x80)), 256);
        // One full byte in: distances 8 and 9.
        assert_eq!(log_distance(&zero, &id_with_byte(31, 0x80)), 8);
        assert_eq!(log_distance(&zero, &id_with_byte(30, 0x01)), 9);
    }

    #[test]
    fn log_distance_is_symmetric() {
        let a = id_with_byte(3, 0x42);
        let b = id_with_byte(17, 0x99);
        assert_eq!(log_distance(&a, &b), log_distance(&b, &a));
    }

    #[test]
    fn tag_recovers_sender() {
        let local = [0x11u8; 32];
        let remote = [0x22u8; 32];
        // `remote` sends to `local`: tag = SHA-256(local) XOR remote.
        let tag = compute_tag(&remote, &local);
        let local_hash = hash_sha256(&local);
        assert_eq!(recover_sender(&local_hash, &tag), remote);
    }

    #[test]
    fn magic_is_per_recipient() {
        assert_ne!(compute_magic(&[1u8; 32]), compute_magic(&[2u8; 32]));
    }

    #[test]
    fn xor_distance_orders_bytewise() {
        let target = [0u8; 32];
        let near = id_with_byte(31, 0x01);
        let far = id_with_byte(0, 0x01);
        assert!(xor_distance(&target, &near) < xor_distance(&target, &far));
    }
}
