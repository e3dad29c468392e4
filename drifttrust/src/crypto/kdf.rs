// Handshake key schedule: X25519 shared secret -> three AES-128-GCM keys.
//
// ```text
// okm = HKDF-SHA256(salt = id_nonce, ikm = shared_secret,
//                   info = "discovery v5 key agreement" || initiator_id || recipient_id,
//                   len = 48)
// initiator_key     = okm[0..16]    seals initiator -> recipient traffic
// recipient_key     = okm[16..32]   seals recipient -> initiator traffic
// auth_response_key = okm[32..48]   seals the handshake auth-response
// ```
//
// Both sides pass the ids in (initiator, recipient) order, so the schedule is
// symmetric.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::keys::NodeId;
use crate::error::{DriftTrustError, Result};

/// HKDF info label fixed by the wire protocol.
const KEY_AGREEMENT_LABEL: &[u8] = b"discovery v5 key agreement";

/// The three symmetric keys shared by a completed handshake.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub initiator_key: [u8; 16],
    pub recipient_key: [u8; 16],
    pub auth_response_key: [u8; 16],
}

/// Derive the session keys for one handshake.
pub fn derive_session_keys(
    shared_secret: &[u8; 32],
    initiator_id: &NodeId,
    recipient_id: &NodeId,
    id_nonce: &[u8; 32],
) -> Result<SessionKeys> {
    let hk = Hkdf::<Sha256>::new(Some(id_nonce), shared_secret);

    let mut info = Vec::with_capacity(KEY_AGREEMENT_LABEL.len() + 64);
    info.extend_from_slice(KEY_AGREEMENT_LABEL);
    info.extend_from_slice(initiator_id);
    info.extend_from_slice(recipient_id);

    let mut okm = [0u8; 48];
    hk.expand(&info, &mut okm)
        .map_err(|e| DriftTrustError::KeyDerivation(format!("HKDF expand error: {e}")))?;

    let mut initiator_key = [0u8; 16];
    let mut recipient_key = [0u8; 16];
    let mut auth_response_key = [0u8; 16];
    initiator_key.copy_from_slice(&okm[0..16]);
    recipient_key.copy_from_slice(&okm[16..32]);
    auth_response_key.copy_from_slice(&okm[32..48]);
    okm.zeroize();

    Ok(SessionKeys {
        initiator_key,
        recipient_key,
        auth_response_key,
    })
}
