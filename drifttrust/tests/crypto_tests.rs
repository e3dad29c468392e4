// Integration tests for the DriftTrust crypto layer.

use drifttrust::crypto::aead::MessageCipher;
use drifttrust::crypto::hash::hash_sha256;
use drifttrust::crypto::kdf::derive_session_keys;
use drifttrust::crypto::keys::{EphemeralKeyPair, NodeIdentity, PublicIdentity};

// ── Identity keys ────────────────────────────────────────────────────────

#[test]
fn identities_are_unique() {
    let a = NodeIdentity::generate();
    let b = NodeIdentity::generate();
    assert_ne!(a.node_id(), b.node_id());
    assert_ne!(a.public().sign_key_bytes(), b.public().sign_key_bytes());
    assert_ne!(a.public().dh_key_bytes(), b.public().dh_key_bytes());
}

#[test]
fn node_id_matches_record_hash() {
    // A peer that decodes our record must derive the same id we advertise.
    let local = NodeIdentity::generate();
    let record = PublicIdentity::from_bytes(
        local.public().sign_key_bytes(),
        local.public().dh_key_bytes(),
    );
    assert_eq!(record.node_id(), local.node_id());

    let joined = [
        local.public().sign_key_bytes().as_slice(),
        local.public().dh_key_bytes().as_slice(),
    ]
    .concat();
    assert_eq!(record.node_id(), hash_sha256(&joined));
}

#[test]
fn sign_and_verify_roundtrip() {
    let id = NodeIdentity::generate();
    let id_nonce = [0x5Au8; 32];
    let sig = id.sign(&id_nonce);
    id.public().verify(&id_nonce, &sig).expect("valid signature");
}

#[test]
fn tampered_signature_rejected() {
    let id = NodeIdentity::generate();
    let id_nonce = [0x5Au8; 32];
    let mut sig = id.sign(&id_nonce);
    sig[0] ^= 0xFF;
    assert!(id.public().verify(&id_nonce, &sig).is_err());
}

// ── Key agreement across handshake roles ─────────────────────────────────

#[test]
fn ephemeral_static_dh_symmetric() {
    let recipient = NodeIdentity::generate();
    let ephemeral = EphemeralKeyPair::generate();

    let initiator_view = ephemeral.diffie_hellman(&recipient.public().dh_key_bytes());
    let recipient_view = recipient.diffie_hellman(&ephemeral.public_key_bytes());
    assert_eq!(initiator_view, recipient_view);
}

#[test]
fn dh_different_peers_differ() {
    let ephemeral = EphemeralKeyPair::generate();
    let bob = NodeIdentity::generate();
    let carol = NodeIdentity::generate();
    let ab = ephemeral.diffie_hellman(&bob.public().dh_key_bytes());
    let ac = ephemeral.diffie_hellman(&carol.public().dh_key_bytes());
    assert_ne!(ab, ac);
}

// ── Full schedule: DH -> HKDF -> AEAD seal/open between the two roles ────

#[test]
fn sealed_message_crosses_roles() {
    let initiator = NodeIdentity::generate();
    let recipient = NodeIdentity::generate();
    let ephemeral = EphemeralKeyPair::generate();
    let id_nonce = [0x11u8; 32];

    let initiator_keys = derive_session_keys(
        &ephemeral.diffie_hellman(&recipient.public().dh_key_bytes()),
        &initiator.node_id(),
        &recipient.node_id(),
        &id_nonce,
    )
    .unwrap();
    let recipient_keys = derive_session_keys(
        &recipient.diffie_hellman(&ephemeral.public_key_bytes()),
        &initiator.node_id(),
        &recipient.node_id(),
        &id_nonce,
    )
    .unwrap();

    // Initiator seals with its write key; the recipient opens with the same.
    let auth_tag = [0x22u8; 12];
    let packet_tag = [0x33u8; 32];
    let ct = MessageCipher::new(initiator_keys.initiator_key)
        .encrypt(&auth_tag, b"ping 0x01020304", &packet_tag)
        .unwrap();
    let pt = MessageCipher::new(recipient_keys.initiator_key)
        .decrypt(&auth_tag, &ct, &packet_tag)
        .unwrap();
    assert_eq!(&pt, b"ping 0x01020304");

    // And the reverse direction uses the recipient key.
    let ct = MessageCipher::new(recipient_keys.recipient_key)
        .encrypt(&auth_tag, b"pong 0x01020304", &packet_tag)
        .unwrap();
    let pt = MessageCipher::new(initiator_keys.recipient_key)
        .decrypt(&auth_tag, &ct, &packet_tag)
        .unwrap();
    assert_eq!(&pt, b"pong 0x01020304");
}

#[test]
fn aad_mismatch_fails_open() {
    let keys = derive_session_keys(&[4u8; 32], &[1u8; 32], &[2u8; 32], &[3u8; 32]).unwrap();
    let cipher = MessageCipher::new(keys.initiator_key);
    let auth_tag = [0u8; 12];
    let ct = cipher.encrypt(&auth_tag, b"payload", &[0xAAu8; 32]).unwrap();
    assert!(cipher.decrypt(&auth_tag, &ct, &[0xBBu8; 32]).is_err());
}
