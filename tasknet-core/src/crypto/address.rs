//! Peer id derivation.
//!
//! A peer's address is the first 20 bytes of the SHA-256 hash of its
//! Ed25519 public key. The textual peer id is the lowercase hex encoding
//! of that address and is what the registry and the journal key on.

use super::hashing::sha256;
use super::keys::PublicKey;

/// Derive the 20-byte address of a public key.
pub fn derive_address(public_key: &PublicKey) -> [u8; 20] {
    let hash = sha256(public_key.as_bytes());
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[..20]);
    address
}

/// Derive the textual peer id of a public key.
pub fn derive_peer_id(public_key: &PublicKey) -> String {
    hex::encode(derive_address(public_key))
}
