// Node identity: an Ed25519 signing key paired with a static X25519 key.
//
// The signing key authenticates handshake challenges; the X25519 key is the
// static half of the handshake key agreement. A node's 32-byte id is the
// SHA-256 digest of both public keys, so the id commits to the full identity.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::crypto::hash::hash_sha256_pair;
use crate::error::{DriftTrustError, Result};

/// 32-byte node identifier derived by hashing a node's public identity.
pub type NodeId = [u8; 32];

/// The public half of a node identity, as carried in node records and
/// handshake auth-responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicIdentity {
    sign_key: [u8; 32],
    dh_key: [u8; 32],
}

impl PublicIdentity {
    /// Reassemble from raw key bytes (e.g. decoded from a node record).
    pub fn from_bytes(sign_key: [u8; 32], dh_key: [u8; 32]) -> Self {
        Self { sign_key, dh_key }
    }

    /// The raw Ed25519 verifying key bytes.
    pub fn sign_key_bytes(&self) -> [u8; 32] {
        self.sign_key
    }

    /// The raw X25519 public key bytes.
    pub fn dh_key_bytes(&self) -> [u8; 32] {
        self.dh_key
    }

    /// Derive the node id: SHA-256(sign_key || dh_key).
    pub fn node_id(&self) -> NodeId {
        hash_sha256_pair(&self.sign_key, &self.dh_key)
    }

    /// Verify an Ed25519 signature made by this identity.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> Result<()> {
        let vk = VerifyingKey::from_bytes(&self.sign_key)
            .map_err(|e| DriftTrustError::InvalidKey(format!("{e}")))?;
        let sig = Signature::from_bytes(signature);
        vk.verify(message, &sig)
            .map_err(|_| DriftTrustError::SignatureVerification)
    }
}

/// The local node's full identity. Secret material is zeroized on drop by
/// the underlying dalek types.
pub struct NodeIdentity {
    signing_key: SigningKey,
    dh_secret: StaticSecret,
    public: PublicIdentity,
    node_id: NodeId,
}

impl NodeIdentity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let dh_secret = StaticSecret::random_from_rng(OsRng);
        Self::assemble(signing_key, dh_secret)
    }

    /// Reconstruct from 32-byte seeds (used in deterministic tests).
    pub fn from_seeds(sign_seed: &[u8; 32], dh_seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(sign_seed);
        let dh_secret = StaticSecret::from(dh_seed);
        Self::assemble(signing_key, dh_secret)
    }

    fn assemble(signing_key: SigningKey, dh_secret: StaticSecret) -> Self {
        let public = PublicIdentity {
            sign_key: signing_key.verifying_key().to_bytes(),
            dh_key: *PublicKey::from(&dh_secret).as_bytes(),
        };
        let node_id = public.node_id();
        Self {
            signing_key,
            dh_secret,
            public,
            node_id,
        }
    }

    /// The 32-byte node id.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The public half of this identity.
    pub fn public(&self) -> PublicIdentity {
        self.public
    }

    /// Sign arbitrary data with the static Ed25519 key.
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        let sig: Signature = self.signing_key.sign(data);
        sig.to_bytes()
    }

    /// Static-key Diffie-Hellman against a peer's (usually ephemeral) public
    /// key, returning the 32-byte shared secret.
    pub fn diffie_hellman(&self, peer_public: &[u8; 32]) -> [u8; 32] {
        let peer_pk = PublicKey::from(*peer_public);
        let shared = self.dh_secret.diffie_hellman(&peer_pk);
        *shared.as_bytes()
    }
}

/// An X25519 ephemeral keypair generated for a single handshake.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new random ephemeral keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from existing secret bytes (used in deterministic tests).
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The 32-byte public key.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Perform Diffie-Hellman with a peer's public key, returning the 32-byte
    /// shared secret.
    pub fn diffie_hellman(&self, peer_public: &[u8; 32]) -> [u8; 32] {
        let peer_pk = PublicKey::from(*peer_public);
        let shared = self.secret.diffie_hellman(&peer_pk);
        *shared.as_bytes()
    }
}
