//! Wire packet codec.
//!
//! Four packet variants share a common prefix (the 32-byte tag) and are told
//! apart without an explicit discriminant byte:
//!
//! ```text
//! AuthTag     tag(32) || auth_tag(12)
//! WhoAreYou   tag(32) || magic(32) || id_nonce(32) || enr_seq(8)
//! AuthHeader  tag(32) || auth_tag(12) || authdata_size(2) ||
//!             id_nonce_sig(64) || ephemeral_key(32) || enc_auth_response(N) ||
//!             ciphertext
//! Message     tag(32) || auth_tag(12) || authdata_size(2) = 0 || ciphertext
//! ```
//!
//! A WHOAREYOU challenge is recognised by the recipient-derived magic at
//! bytes [32..64); auth-header and message packets are separated by the
//! authdata-size field that follows the auth-tag. All integers big-endian.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DriftNetError, Result};
use crate::node::{AuthTag, IdNonce, Magic, Tag};

/// Maximum datagram size accepted on the wire.
pub const MAX_PACKET_SIZE: usize = 1280;

/// Byte length of an `AuthTagPacket`.
const AUTH_TAG_PACKET_LEN: usize = 44;
/// Byte length of a `WhoAreYouPacket`.
const WHO_ARE_YOU_PACKET_LEN: usize = 104;
/// tag + auth-tag + authdata-size.
const MESSAGE_HEADER_LEN: usize = 46;
/// Fixed prefix of the auth header: id-nonce signature (64) + ephemeral key (32).
const AUTH_HEADER_FIXED_LEN: usize = 96;

/// Pre-handshake packet announcing an initiator. Carries no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTagPacket {
    pub tag: Tag,
    pub auth_tag: AuthTag,
}

/// The recipient's handshake challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoAreYouPacket {
    pub tag: Tag,
    pub magic: Magic,
    pub id_nonce: IdNonce,
    pub enr_seq: u64,
}

/// Handshake completion from the initiator, carrying the first sealed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaderPacket {
    pub tag: Tag,
    pub auth_tag: AuthTag,
    pub id_nonce_sig: [u8; 64],
    pub ephemeral_key: [u8; 32],
    pub enc_auth_response: Bytes,
    pub ciphertext: Bytes,
}

/// An ordinary post-handshake sealed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePacket {
    pub tag: Tag,
    pub auth_tag: AuthTag,
    pub ciphertext: Bytes,
}

/// A decoded wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    AuthTag(AuthTagPacket),
    WhoAreYou(WhoAreYouPacket),
    AuthHeader(AuthHeaderPacket),
    Message(MessagePacket),
}

impl Packet {
    /// The tag shared by every packet variant.
    pub fn tag(&self) -> &Tag {
        match self {
            Packet::AuthTag(p) => &p.tag,
            Packet::WhoAreYou(p) => &p.tag,
            Packet::AuthHeader(p) => &p.tag,
            Packet::Message(p) => &p.tag,
        }
    }

    /// The total number of bytes this packet will occupy when encoded.
    pub fn encoded_len(&self) -> usize {
        match self {
            Packet::AuthTag(_) => AUTH_TAG_PACKET_LEN,
            Packet::WhoAreYou(_) => WHO_ARE_YOU_PACKET_LEN,
            Packet::AuthHeader(p) => {
                MESSAGE_HEADER_LEN
                    + AUTH_HEADER_FIXED_LEN
                    + p.enc_auth_response.len()
                    + p.ciphertext.len()
            }
            Packet::Message(p) => MESSAGE_HEADER_LEN + p.ciphertext.len(),
        }
    }

    /// Encode this packet into a byte buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode into a pre-allocated `BytesMut`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Packet::AuthTag(p) => {
                buf.put_slice(&p.tag);
                buf.put_slice(&p.auth_tag);
            }
            Packet::WhoAreYou(p) => {
                buf.put_slice(&p.tag);
                buf.put_slice(&p.magic);
                buf.put_slice(&p.id_nonce);
                buf.put_u64(p.enr_seq);
            }
            Packet::AuthHeader(p) => {
                buf.put_slice(&p.tag);
                buf.put_slice(&p.auth_tag);
                buf.put_u16((AUTH_HEADER_FIXED_LEN + p.enc_auth_response.len()) as u16);
                buf.put_slice(&p.id_nonce_sig);
                buf.put_slice(&p.ephemeral_key);
                buf.put_slice(&p.enc_auth_response);
                buf.put_slice(&p.ciphertext);
            }
            Packet::Message(p) => {
                buf.put_slice(&p.tag);
                buf.put_slice(&p.auth_tag);
                buf.put_u16(0);
                buf.put_slice(&p.ciphertext);
            }
        }
    }

    /// Decode a packet from a raw datagram.
    ///
    /// `local_magic` is the WHOAREYOU discriminator derived from the local
    /// node id; challenges addressed to anyone else will not match and fall
    /// through to the other variants.
    pub fn decode(data: &[u8], local_magic: &Magic) -> Result<Self> {
        if data.len() > MAX_PACKET_SIZE {
            return Err(DriftNetError::MalformedPacket("oversize datagram"));
        }
        if data.len() < AUTH_TAG_PACKET_LEN {
            return Err(DriftNetError::MalformedPacket("short datagram"));
        }

        let mut tag = [0u8; 32];
        tag.copy_from_slice(&data[..32]);

        if data.len() == WHO_ARE_YOU_PACKET_LEN && data[32..64] == local_magic[..] {
            let mut magic = [0u8; 32];
            magic.copy_from_slice(&data[32..64]);
            let mut id_nonce = [0u8; 32];
            id_nonce.copy_from_slice(&data[64..96]);
            let mut seq = [0u8; 8];
            seq.copy_from_slice(&data[96..104]);
            return Ok(Packet::WhoAreYou(WhoAreYouPacket {
                tag,
                magic,
                id_nonce,
                enr_seq: u64::from_be_bytes(seq),
            }));
        }

        let mut auth_tag = [0u8; 12];
        auth_tag.copy_from_slice(&data[32..44]);

        if data.len() == AUTH_TAG_PACKET_LEN {
            return Ok(Packet::AuthTag(AuthTagPacket { tag, auth_tag }));
        }

        if data.len() < MESSAGE_HEADER_LEN {
            return Err(DriftNetError::MalformedPacket("truncated packet header"));
        }
        let authdata_size = u16::from_be_bytes([data[44], data[45]]) as usize;
        let rest = &data[MESSAGE_HEADER_LEN..];

        if authdata_size == 0 {
            return Ok(Packet::Message(MessagePacket {
                tag,
                auth_tag,
                ciphertext: Bytes::copy_from_slice(rest),
            }));
        }

        if authdata_size < AUTH_HEADER_FIXED_LEN || rest.len() < authdata_size {
            return Err(DriftNetError::MalformedPacket("bad auth header size"));
        }
        let mut id_nonce_sig = [0u8; 64];
        id_nonce_sig.copy_from_slice(&rest[..64]);
        let mut ephemeral_key = [0u8; 32];
        ephemeral_key.copy_from_slice(&rest[64..96]);
        Ok(Packet::AuthHeader(AuthHeaderPacket {
            tag,
            auth_tag,
            id_nonce_sig,
            ephemeral_key,
            enc_auth_response: Bytes::copy_from_slice(&rest[AUTH_HEADER_FIXED_LEN..authdata_size]),
            ciphertext: Bytes::copy_from_slice(&rest[authdata_size..]),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::compute_magic;

    const LOCAL_ID: [u8; 32] = [0x77u8; 32];

    fn local_magic() -> Magic {
        compute_magic(&LOCAL_ID)
    }

    #[test]
    fn auth_tag_roundtrip() {
        let packet = Packet::AuthTag(AuthTagPacket {
            tag: [1u8; 32],
            auth_tag: [2u8; 12],
        });
        let bytes = packet.encode();
        assert_eq!(bytes.len(), packet.encoded_len());
        let decoded = Packet::decode(&bytes, &local_magic()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn who_are_you_roundtrip() {
        let packet = Packet::WhoAreYou(WhoAreYouPacket {
            tag: [1u8; 32],
            magic: local_magic(),
            id_nonce: [9u8; 32],
            enr_seq: 0x0102030405060708,
        });
        let bytes = packet.encode();
        let decoded = Packet::decode(&bytes, &local_magic()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn who_are_you_for_someone_else_is_not_a_challenge() {
        let packet = Packet::WhoAreYou(WhoAreYouPacket {
            tag: [1u8; 32],
            magic: compute_magic(&[0x88u8; 32]),
            id_nonce: [9u8; 32],
            enr_seq: 0,
        });
        let bytes = packet.encode();
        let decoded = Packet::decode(&bytes, &local_magic());
        assert!(!matches!(decoded, Ok(Packet::WhoAreYou(_))));
    }

    #[test]
    fn auth_header_roundtrip() {
        let packet = Packet::AuthHeader(AuthHeaderPacket {
            tag: [1u8; 32],
            auth_tag: [2u8; 12],
            id_nonce_sig: [3u8; 64],
            ephemeral_key: [4u8; 32],
            enc_auth_response: Bytes::from(vec![5u8; 144]),
            ciphertext: Bytes::from(vec![6u8; 48]),
        });
        let bytes = packet.encode();
        assert_eq!(bytes.len(), packet.encoded_len());
        let decoded = Packet::decode(&bytes, &local_magic()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn auth_header_with_empty_auth_response_roundtrip() {
        let packet = Packet::AuthHeader(AuthHeaderPacket {
            tag: [1u8; 32],
            auth_tag: [2u8; 12],
            id_nonce_sig: [3u8; 64],
            ephemeral_key: [4u8; 32],
            enc_auth_response: Bytes::new(),
            ciphertext: Bytes::from(vec![6u8; 48]),
        });
        let decoded = Packet::decode(&packet.encode(), &local_magic()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn message_roundtrip() {
        let packet = Packet::Message(MessagePacket {
            tag: [1u8; 32],
            auth_tag: [2u8; 12],
            ciphertext: Bytes::from(vec![7u8; 100]),
        });
        let bytes = packet.encode();
        let decoded = Packet::decode(&bytes, &local_magic()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(Packet::decode(&[0u8; 43], &local_magic()).is_err());
        assert!(Packet::decode(&[], &local_magic()).is_err());
    }

    #[test]
    fn oversize_buffer_rejected() {
        let data = vec![0u8; MAX_PACKET_SIZE + 1];
        assert!(matches!(
            Packet::decode(&data, &local_magic()),
            Err(DriftNetError::MalformedPacket(_))
        ));
    }

    #[test]
    fn forty_five_byte_buffer_rejected() {
        // Too long for an AuthTag packet, too short for a message header.
        assert!(Packet::decode(&[0u8; 45], &local_magic()).is_err());
    }

    #[test]
    fn undersized_authdata_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0u8; 32]); // tag
        buf.put_slice(&[0u8; 12]); // auth_tag
        buf.put_u16(40); // below the fixed sig + key prefix
        buf.put_slice(&[0u8; 40]);
        assert!(Packet::decode(&buf, &local_magic()).is_err());
    }

    #[test]
    fn truncated_authdata_rejected() {
        let mut buf = BytesMut::new();
        buf.put_slice(&[0u8; 32]);
        buf.put_slice(&[0u8; 12]);
        buf.put_u16(120); // claims more authdata than the buffer holds
        buf.put_slice(&[0u8; 96]);
        assert!(Packet::decode(&buf, &local_magic()).is_err());
    }
}
