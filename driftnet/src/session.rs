//! Per-peer handshake and encryption state machine.
//!
//!   Initiator                              Recipient
//!     |--- AuthTagPacket ----------------->|
//!     |<-- WhoAreYouPacket (id-nonce) -----|
//!     |--- AuthHeaderPacket (sig, key,     |
//!     |      sealed first message) ------->|
//!     |==== sealed MessagePackets =========|
//!
//! The session is a synchronous state machine: feeding it an outbound
//! message or an inbound packet returns the packets to transmit and the
//! payloads to deliver. All channel I/O happens in the pool, so per-session
//! ordering falls out of the call order. Messages submitted before the
//! handshake completes are queued and flushed, in order, on completion.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::time::Instant;
use uuid::Uuid;

use drifttrust::crypto::aead::MessageCipher;
use drifttrust::crypto::kdf::{derive_session_keys, SessionKeys};
use drifttrust::crypto::keys::EphemeralKeyPair;
use drifttrust::{NodeId, NodeIdentity, PublicIdentity};

use crate::error::{DriftNetError, Result};
use crate::message::Payload;
use crate::node::{compute_magic, compute_tag, short_id, IdNonce, Magic, Node, Tag};
use crate::packet::{
    AuthHeaderPacket, AuthTagPacket, MessagePacket, Packet, WhoAreYouPacket,
};

/// Nonce for the handshake auth-response, which has its own one-shot key.
const AUTH_RESPONSE_NONCE: [u8; 12] = [0u8; 12];
/// Auth-response plaintext: signature(64) || sign_key(32) || dh_key(32).
const AUTH_RESPONSE_LEN: usize = 128;

/// Which side of the handshake this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Initiator,
    Recipient,
}

enum SessionState {
    BeforeHandshake,
    DuringHandshake(HandshakeData),
    HandshakeComplete { keys: SessionKeys },
}

enum HandshakeData {
    /// Initiator: AuthTag sent, waiting for the WHOAREYOU challenge.
    AwaitingWhoAreYou,
    /// Recipient: challenge issued, waiting for the auth header.
    AwaitingAuthHeader { id_nonce: IdNonce },
}

/// Output of feeding one inbound packet to a session.
#[derive(Default, Debug)]
pub struct SessionIo {
    /// Packets to transmit to the remote endpoint.
    pub outbound: Vec<Packet>,
    /// Decrypted payloads to deliver upward.
    pub inbound: Vec<Payload>,
}

pub struct Session {
    id: Uuid,
    role: SessionRole,
    state: SessionState,
    identity: Arc<NodeIdentity>,
    local_node_id: NodeId,
    remote: Node,
    remote_enr_seq: u64,
    outbound_tag: Tag,
    remote_magic: Magic,
    pending: VecDeque<Payload>,
    last_message_at: Instant,
    decrypt_failures: u32,
}

impl Session {
    pub fn new(identity: Arc<NodeIdentity>, remote: Node, role: SessionRole) -> Self {
        let local_node_id = identity.node_id();
        let outbound_tag = compute_tag(&local_node_id, &remote.id);
        let remote_magic = compute_magic(&remote.id);
        Self {
            id: Uuid::new_v4(),
            role,
            state: SessionState::BeforeHandshake,
            identity,
            local_node_id,
            remote,
            remote_enr_seq: 0,
            outbound_tag,
            remote_magic,
            pending: VecDeque::new(),
            last_message_at: Instant::now(),
            decrypt_failures: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn remote(&self) -> Node {
        self.remote
    }

    pub fn remote_node_id(&self) -> NodeId {
        self.remote.id
    }

    /// The tag stamped on every packet this session sends.
    pub fn tag(&self) -> Tag {
        self.outbound_tag
    }

    pub fn is_before_handshake(&self) -> bool {
        matches!(self.state, SessionState::BeforeHandshake)
    }

    pub fn is_during_handshake(&self) -> bool {
        matches!(self.state, SessionState::DuringHandshake(_))
    }

    pub fn is_handshake_complete(&self) -> bool {
        matches!(self.state, SessionState::HandshakeComplete { .. })
    }

    /// Instant of the last message accepted or delivered by this session.
    pub fn last_message_at(&self) -> Instant {
        self.last_message_at
    }

    /// Consecutive AEAD failures since the last good message.
    pub fn decrypt_failures(&self) -> u32 {
        self.decrypt_failures
    }

    /// Accept an outbound message, returning the packets to transmit.
    ///
    /// Before the handshake completes the message is queued; an initiator's
    /// first message additionally triggers the opening AuthTag packet.
    pub fn handle_outbound_message(&mut self, payload: Payload) -> Result<Vec<Packet>> {
        match &self.state {
            SessionState::HandshakeComplete { .. } => {
                let packet = self.seal_message(payload)?;
                self.touch();
                Ok(vec![packet])
            }
            SessionState::BeforeHandshake if self.role == SessionRole::Initiator => {
                self.pending.push_back(payload);
                self.state = SessionState::DuringHandshake(HandshakeData::AwaitingWhoAreYou);
                let mut auth_tag = [0u8; 12];
                OsRng.fill_bytes(&mut auth_tag);
                tracing::debug!(remote = %self.remote, "initiating handshake");
                Ok(vec![Packet::AuthTag(AuthTagPacket {
                    tag: self.outbound_tag,
                    auth_tag,
                })])
            }
            _ => {
                self.pending.push_back(payload);
                Ok(Vec::new())
            }
        }
    }

    /// Feed an inbound packet through the state machine.
    pub fn handle_inbound_packet(&mut self, packet: Packet) -> Result<SessionIo> {
        match packet {
            Packet::AuthTag(p) => self.on_auth_tag(p),
            Packet::WhoAreYou(p) => self.on_who_are_you(p),
            Packet::AuthHeader(p) => self.on_auth_header(p),
            Packet::Message(p) => self.on_message(p),
        }
    }

    fn on_auth_tag(&mut self, _packet: AuthTagPacket) -> Result<SessionIo> {
        match &self.state {
            SessionState::BeforeHandshake if self.role == SessionRole::Recipient => {
                let mut id_nonce = [0u8; 32];
                OsRng.fill_bytes(&mut id_nonce);
                self.state = SessionState::DuringHandshake(HandshakeData::AwaitingAuthHeader {
                    id_nonce,
                });
                tracing::debug!(remote = %self.remote, "challenging initiator");
                Ok(SessionIo {
                    outbound: vec![self.who_are_you(id_nonce)],
                    inbound: Vec::new(),
                })
            }
            SessionState::DuringHandshake(HandshakeData::AwaitingAuthHeader { id_nonce }) => {
                // Retransmitted opener: repeat the same challenge.
                let id_nonce = *id_nonce;
                Ok(SessionIo {
                    outbound: vec![self.who_are_you(id_nonce)],
                    inbound: Vec::new(),
                })
            }
            _ => {
                tracing::debug!(remote = %self.remote, "ignoring duplicate auth-tag packet");
                Ok(SessionIo::default())
            }
        }
    }

    fn who_are_you(&self, id_nonce: IdNonce) -> Packet {
        Packet::WhoAreYou(WhoAreYouPacket {
            tag: self.outbound_tag,
            magic: self.remote_magic,
            id_nonce,
            enr_seq: self.remote_enr_seq,
        })
    }

    fn on_who_are_you(&mut self, packet: WhoAreYouPacket) -> Result<SessionIo> {
        match &self.state {
            SessionState::DuringHandshake(HandshakeData::AwaitingWhoAreYou) => {}
            _ => {
                tracing::debug!(remote = %self.remote, "unexpected who-are-you packet");
                return Ok(SessionIo::default());
            }
        }

        let remote_pub = self.remote.pubkey.ok_or_else(|| {
            DriftNetError::HandshakeFailed(format!(
                "static key unknown for {}",
                short_id(&self.remote.id)
            ))
        })?;

        let ephemeral = EphemeralKeyPair::generate();
        let shared = ephemeral.diffie_hellman(&remote_pub.dh_key_bytes());
        let keys = derive_session_keys(
            &shared,
            &self.local_node_id,
            &self.remote.id,
            &packet.id_nonce,
        )
        .map_err(|e| DriftNetError::HandshakeFailed(format!("key schedule: {e}")))?;

        // Sign the challenge and seal the auth-response: sig || our record.
        let signature = self.identity.sign(&packet.id_nonce);
        let public = self.identity.public();
        let mut auth_response = Vec::with_capacity(AUTH_RESPONSE_LEN);
        auth_response.extend_from_slice(&signature);
        auth_response.extend_from_slice(&public.sign_key_bytes());
        auth_response.extend_from_slice(&public.dh_key_bytes());
        let enc_auth_response = MessageCipher::new(keys.auth_response_key)
            .encrypt(&AUTH_RESPONSE_NONCE, &auth_response, b"")
            .map_err(|e| DriftNetError::HandshakeFailed(format!("auth response: {e}")))?;

        // The first queued message rides inside the auth header.
        let first = self.pending.pop_front().ok_or_else(|| {
            DriftNetError::HandshakeFailed("no pending message for auth header".into())
        })?;
        let mut auth_tag = [0u8; 12];
        OsRng.fill_bytes(&mut auth_tag);
        let ciphertext = MessageCipher::new(keys.initiator_key)
            .encrypt(&auth_tag, &first.encode(), &self.outbound_tag)
            .map_err(|e| DriftNetError::HandshakeFailed(format!("first message: {e}")))?;

        let header = Packet::AuthHeader(AuthHeaderPacket {
            tag: self.outbound_tag,
            auth_tag,
            id_nonce_sig: signature,
            ephemeral_key: ephemeral.public_key_bytes(),
            enc_auth_response: Bytes::from(enc_auth_response),
            ciphertext: Bytes::from(ciphertext),
        });

        self.remote_enr_seq = packet.enr_seq;
        self.state = SessionState::HandshakeComplete { keys };
        self.touch();
        tracing::debug!(remote = %self.remote, "handshake complete (initiator)");

        let mut outbound = vec![header];
        outbound.extend(self.flush_pending()?);
        Ok(SessionIo {
            outbound,
            inbound: Vec::new(),
        })
    }

    fn on_auth_header(&mut self, packet: AuthHeaderPacket) -> Result<SessionIo> {
        let id_nonce = match &self.state {
            SessionState::DuringHandshake(HandshakeData::AwaitingAuthHeader { id_nonce }) => {
                *id_nonce
            }
            _ => {
                tracing::debug!(remote = %self.remote, "unexpected auth-header packet");
                return Ok(SessionIo::default());
            }
        };

        let shared = self.identity.diffie_hellman(&packet.ephemeral_key);
        let keys = derive_session_keys(&shared, &self.remote.id, &self.local_node_id, &id_nonce)
            .map_err(|e| DriftNetError::HandshakeFailed(format!("key schedule: {e}")))?;

        let auth_response = MessageCipher::new(keys.auth_response_key)
            .decrypt(&AUTH_RESPONSE_NONCE, &packet.enc_auth_response, b"")
            .map_err(|_| DriftNetError::HandshakeFailed("auth response unreadable".into()))?;
        if auth_response.len() != AUTH_RESPONSE_LEN {
            return Err(DriftNetError::HandshakeFailed(
                "auth response truncated".into(),
            ));
        }
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&auth_response[..64]);
        let mut sign_key = [0u8; 32];
        sign_key.copy_from_slice(&auth_response[64..96]);
        let mut dh_key = [0u8; 32];
        dh_key.copy_from_slice(&auth_response[96..128]);

        let remote_identity = PublicIdentity::from_bytes(sign_key, dh_key);
        if remote_identity.node_id() != self.remote.id {
            return Err(DriftNetError::HandshakeFailed(
                "auth response names a different node".into(),
            ));
        }
        remote_identity
            .verify(&id_nonce, &signature)
            .map_err(|_| DriftNetError::HandshakeFailed("bad id-nonce signature".into()))?;

        let plaintext = MessageCipher::new(keys.initiator_key)
            .decrypt(&packet.auth_tag, &packet.ciphertext, &packet.tag)
            .map_err(|_| DriftNetError::HandshakeFailed("first message unreadable".into()))?;
        let payload = Payload::decode(&plaintext)
            .map_err(|_| DriftNetError::HandshakeFailed("undecodable first message".into()))?;

        self.remote.pubkey = Some(remote_identity);
        self.state = SessionState::HandshakeComplete { keys };
        self.touch();
        tracing::debug!(remote = %self.remote, "handshake complete (recipient)");

        Ok(SessionIo {
            outbound: self.flush_pending()?,
            inbound: vec![payload],
        })
    }

    fn on_message(&mut self, packet: MessagePacket) -> Result<SessionIo> {
        let keys = match &self.state {
            SessionState::HandshakeComplete { keys } => keys,
            _ => {
                tracing::debug!(remote = %self.remote, "message packet before handshake complete");
                return Ok(SessionIo::default());
            }
        };
        let read_key = match self.role {
            SessionRole::Initiator => keys.recipient_key,
            SessionRole::Recipient => keys.initiator_key,
        };
        let plaintext = MessageCipher::new(read_key)
            .decrypt(&packet.auth_tag, &packet.ciphertext, &packet.tag)
            .map_err(|e| {
                self.decrypt_failures += 1;
                DriftNetError::Decryption(e.to_string())
            })?;
        let payload = Payload::decode(&plaintext)?;
        self.decrypt_failures = 0;
        self.touch();
        Ok(SessionIo {
            outbound: Vec::new(),
            inbound: vec![payload],
        })
    }

    fn seal_message(&self, payload: Payload) -> Result<Packet> {
        let keys = match &self.state {
            SessionState::HandshakeComplete { keys } => keys,
            _ => return Err(DriftNetError::SessionClosed),
        };
        let write_key = match self.role {
            SessionRole::Initiator => keys.initiator_key,
            SessionRole::Recipient => keys.recipient_key,
        };
        let mut auth_tag = [0u8; 12];
        OsRng.fill_bytes(&mut auth_tag);
        let ciphertext = MessageCipher::new(write_key)
            .encrypt(&auth_tag, &payload.encode(), &self.outbound_tag)
            .map_err(|e| DriftNetError::Encryption(e.to_string()))?;
        Ok(Packet::Message(MessagePacket {
            tag: self.outbound_tag,
            auth_tag,
            ciphertext: Bytes::from(ciphertext),
        }))
    }

    /// Seal everything queued before the handshake completed, in order.
    fn flush_pending(&mut self) -> Result<Vec<Packet>> {
        let queued: Vec<Payload> = self.pending.drain(..).collect();
        queued.into_iter().map(|p| self.seal_message(p)).collect()
    }

    fn touch(&mut self) {
        self.last_message_at = Instant::now();
    }
}
