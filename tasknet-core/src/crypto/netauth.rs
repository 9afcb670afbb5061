//! Network-auth tokens.
//!
//! Nodes that share a network key prove it to each other during the peer
//! handshake. The token a node sends is a signature over the *remote*
//! node's public key, so it is bound to that one pairing and cannot be
//! replayed against a different peer. The receiver checks it against its
//! *own* public key.
//!
//! The signing key is derived from the shared secret, so any holder of the
//! network key can both mint and check tokens; the token proves membership
//! in the network, not a particular identity.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use super::hashing::sha256_concat;
use super::keys::PublicKey;
use super::signing::{sign, verify, Signature};
use crate::error::CryptoError;

/// Domain tag mixed into the key derivation.
const NET_KEY_DOMAIN: &[u8] = b"tasknet/netkey/v1";

/// Domain tag prefixed to every signed token payload.
const NET_AUTH_DOMAIN: &[u8] = b"tasknet/netauth/v1";

/// Shared network key.
#[derive(Clone)]
pub struct NetKey {
    signing_key: SigningKey,
}

impl NetKey {
    /// Derive the network key from the configured shared secret.
    pub fn new(secret: &str) -> Self {
        let seed = sha256_concat(&[NET_KEY_DOMAIN, secret.as_bytes()]);
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key())
    }
}

impl std::fmt::Debug for NetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NetKey(..)")
    }
}

/// Token carried in the `peer:auth` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAuth {
    /// Unix time (seconds) at which the token was minted.
    pub issued_at: u64,
    /// Signature over the domain tag, the nonce and `issued_at`.
    pub signature: Signature,
}

/// Fields established by a successfully verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthInfo {
    /// Unix time (seconds) the remote minted its token.
    pub issued_at: u64,
}

fn auth_payload(nonce: &PublicKey, issued_at: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(NET_AUTH_DOMAIN.len() + 32 + 8);
    payload.extend_from_slice(NET_AUTH_DOMAIN);
    payload.extend_from_slice(nonce.as_bytes());
    payload.extend_from_slice(&issued_at.to_be_bytes());
    payload
}

/// Mint a token for the peer whose public key is `nonce`.
pub fn create_net_auth(nonce: &PublicKey, netkey: &NetKey, issued_at: u64) -> NetAuth {
    let signature = sign(&netkey.signing_key, &auth_payload(nonce, issued_at));
    NetAuth { issued_at, signature }
}

/// Verify a token received from a peer.
///
/// `nonce` must be the local node's own public key. Fails with
/// [`CryptoError::MissingNetKey`] when the local node has no network key.
pub fn verify_net_auth(
    auth: &NetAuth,
    nonce: &PublicKey,
    netkey: Option<&NetKey>,
) -> Result<AuthInfo, CryptoError> {
    let netkey = netkey.ok_or(CryptoError::MissingNetKey)?;
    verify(
        &netkey.public_key(),
        &auth_payload(nonce, auth.issued_at),
        &auth.signature,
    )?;

    Ok(AuthInfo {
        issued_at: auth.issued_at,
    })
}
