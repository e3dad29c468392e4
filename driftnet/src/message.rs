//! Message payload codec.
//!
//! Every sealed packet carries one message: a 1-byte message id followed by
//! the payload body. All integers big-endian.
//!
//! ```text
//! 0x01 PING         request_id(4) || enr_seq(8)
//! 0x02 PONG         request_id(4) || enr_seq(8) || ip(4) || port(2)
//! 0x03 FIND_NODES   request_id(4) || distance(2)
//! 0x04 FOUND_NODES  request_id(4) || total(1) || count(2) || record(70) * count
//! ```
//!
//! A node record is `sign_key(32) || dh_key(32) || ip(4) || port(2)`; the
//! node id is always derived from the keys, never carried.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};

use drifttrust::PublicIdentity;

use crate::error::{DriftNetError, Result};
use crate::node::{Endpoint, Node};

/// 4-byte request correlation id, drawn at random per request.
pub type RequestId = u32;

/// Maximum records per FOUND_NODES message, keeping datagrams under the MTU.
pub const FOUND_NODES_PAGE: usize = 12;

/// Wire ids for the registered payload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadKind {
    Ping = 0x01,
    Pong = 0x02,
    FindNodes = 0x03,
    FoundNodes = 0x04,
}

impl TryFrom<u8> for PayloadKind {
    type Error = DriftNetError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(PayloadKind::Ping),
            0x02 => Ok(PayloadKind::Pong),
            0x03 => Ok(PayloadKind::FindNodes),
            0x04 => Ok(PayloadKind::FoundNodes),
            other => Err(DriftNetError::UnknownMessageType(other)),
        }
    }
}

/// A full node record as carried in FOUND_NODES responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    pub identity: PublicIdentity,
    pub endpoint: Endpoint,
}

impl NodeRecord {
    pub const ENCODED_LEN: usize = 70;

    /// Build a record for a node whose public identity is known.
    pub fn from_node(node: &Node) -> Option<Self> {
        node.pubkey.map(|identity| Self {
            identity,
            endpoint: node.endpoint,
        })
    }

    /// The node this record describes, with its id derived from the keys.
    pub fn to_node(&self) -> Node {
        Node::with_identity(self.identity, self.endpoint)
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.identity.sign_key_bytes());
        buf.put_slice(&self.identity.dh_key_bytes());
        buf.put_slice(&self.endpoint.ip.octets());
        buf.put_u16(self.endpoint.port);
    }

    fn decode(data: &[u8]) -> Self {
        let mut sign_key = [0u8; 32];
        sign_key.copy_from_slice(&data[..32]);
        let mut dh_key = [0u8; 32];
        dh_key.copy_from_slice(&data[32..64]);
        let ip = Ipv4Addr::new(data[64], data[65], data[66], data[67]);
        let port = u16::from_be_bytes([data[68], data[69]]);
        Self {
            identity: PublicIdentity::from_bytes(sign_key, dh_key),
            endpoint: Endpoint::new(ip, port),
        }
    }
}

/// Registered message payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Ping {
        request_id: RequestId,
        enr_seq: u64,
    },
    Pong {
        request_id: RequestId,
        enr_seq: u64,
        packet_ip: Ipv4Addr,
        packet_port: u16,
    },
    FindNodes {
        request_id: RequestId,
        distance: u16,
    },
    FoundNodes {
        request_id: RequestId,
        total: u8,
        nodes: Vec<NodeRecord>,
    },
}

impl Payload {
    /// The payload kind discriminant.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Ping { .. } => PayloadKind::Ping,
            Payload::Pong { .. } => PayloadKind::Pong,
            Payload::FindNodes { .. } => PayloadKind::FindNodes,
            Payload::FoundNodes { .. } => PayloadKind::FoundNodes,
        }
    }

    /// The request id carried by every payload kind.
    pub fn request_id(&self) -> RequestId {
        match self {
            Payload::Ping { request_id, .. }
            | Payload::Pong { request_id, .. }
            | Payload::FindNodes { request_id, .. }
            | Payload::FoundNodes { request_id, .. } => *request_id,
        }
    }

    /// The total number of bytes this payload will occupy when encoded.
    pub fn encoded_len(&self) -> usize {
        // 1 byte for the message id, 4 for the request id in every variant.
        5 + match self {
            Payload::Ping { .. } => 8,
            Payload::Pong { .. } => 8 + 4 + 2,
            Payload::FindNodes { .. } => 2,
            Payload::FoundNodes { nodes, .. } => 1 + 2 + nodes.len() * NodeRecord::ENCODED_LEN,
        }
    }

    /// Encode this payload into a byte buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode into a pre-allocated `BytesMut`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(self.kind() as u8);
        match self {
            Payload::Ping {
                request_id,
                enr_seq,
            } => {
                buf.put_u32(*request_id);
                buf.put_u64(*enr_seq);
            }
            Payload::Pong {
                request_id,
                enr_seq,
                packet_ip,
                packet_port,
            } => {
                buf.put_u32(*request_id);
                buf.put_u64(*enr_seq);
                buf.put_slice(&packet_ip.octets());
                buf.put_u16(*packet_port);
            }
            Payload::FindNodes {
                request_id,
                distance,
            } => {
                buf.put_u32(*request_id);
                buf.put_u16(*distance);
            }
            Payload::FoundNodes {
                request_id,
                total,
                nodes,
            } => {
                buf.put_u32(*request_id);
                buf.put_u8(*total);
                buf.put_u16(nodes.len() as u16);
                for record in nodes {
                    record.encode_into(buf);
                }
            }
        }
    }

    /// Decode a payload from a decrypted message body.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(DriftNetError::MalformedPacket("empty message"));
        }
        let kind = PayloadKind::try_from(data[0])?;
        let body = &data[1..];

        match kind {
            PayloadKind::Ping => {
                Self::ensure_len(body, 12)?;
                Ok(Payload::Ping {
                    request_id: read_u32(&body[..4]),
                    enr_seq: read_u64(&body[4..12]),
                })
            }
            PayloadKind::Pong => {
                Self::ensure_len(body, 18)?;
                Ok(Payload::Pong {
                    request_id: read_u32(&body[..4]),
                    enr_seq: read_u64(&body[4..12]),
                    packet_ip: Ipv4Addr::new(body[12], body[13], body[14], body[15]),
                    packet_port: u16::from_be_bytes([body[16], body[17]]),
                })
            }
            PayloadKind::FindNodes => {
                Self::ensure_len(body, 6)?;
                Ok(Payload::FindNodes {
                    request_id: read_u32(&body[..4]),
                    distance: u16::from_be_bytes([body[4], body[5]]),
                })
            }
            PayloadKind::FoundNodes => {
                Self::ensure_len(body, 7)?;
                let request_id = read_u32(&body[..4]);
                let total = body[4];
                let count = u16::from_be_bytes([body[5], body[6]]) as usize;
                let records = &body[7..];
                if records.len() != count * NodeRecord::ENCODED_LEN {
                    return Err(DriftNetError::MalformedPacket("bad node record list"));
                }
                let nodes = records
                    .chunks_exact(NodeRecord::ENCODED_LEN)
                    .map(NodeRecord::decode)
                    .collect();
                Ok(Payload::FoundNodes {
                    request_id,
                    total,
                    nodes,
                })
            }
        }
    }

    fn ensure_len(body: &[u8], needed: usize) -> Result<()> {
        if body.len() < needed {
            Err(DriftNetError::MalformedPacket("truncated message body"))
        } else {
            Ok(())
        }
    }
}

fn read_u32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

fn read_u64(data: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(data);
    u64::from_be_bytes(buf)
}

/// A decrypted message together with the peer it arrived from.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub payload: Payload,
    pub node: Node,
}
