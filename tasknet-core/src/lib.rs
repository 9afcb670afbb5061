//! # TaskNet Core
//!
//! Identity cryptography and serialization shared by the TaskNet crates.
//!
//! This crate provides:
//! - Ed25519 node identity keys, signing and verification
//! - Peer id derivation from public keys
//! - Network-auth tokens bound to a shared network key
//! - Deterministic binary serialization used on the wire

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
pub mod error;
pub mod serialization;

// Re-export commonly used types at crate root
pub use crypto::{
    create_net_auth, derive_peer_id, verify_net_auth, AuthInfo, KeyPair, NetAuth, NetKey,
    PublicKey, SecretKey, Signature,
};
pub use error::{CryptoError, SerializationError};
