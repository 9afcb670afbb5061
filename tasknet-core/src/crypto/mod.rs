//! Cryptographic primitives for TaskNet node identities.
//!
//! This module provides:
//! - Ed25519 key pair generation, derivation from a secret, signing and verification
//! - SHA-256 hashing
//! - Peer id derivation (hex of the first 20 bytes of SHA-256 of the public key)
//! - Network-auth tokens signed with a key derived from the shared network key

mod address;
mod hashing;
mod keys;
mod netauth;
mod signing;

pub use address::{derive_address, derive_peer_id};
pub use hashing::{sha256, sha256_concat};
pub use keys::{KeyPair, PublicKey, SecretKey};
pub use netauth::{create_net_auth, verify_net_auth, AuthInfo, NetAuth, NetKey};
pub use signing::{sign, verify, Signature};
