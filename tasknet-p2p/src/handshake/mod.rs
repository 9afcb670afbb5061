//! Two-phase peer handshake.
//!
//! Runs on the control stream right after it is opened:
//!
//! 1. Auth: both sides send `peer:auth` with their role and, when a network
//!    key is configured, a token bound to the remote's public key. A
//!    received token must verify against the local network key. A peer
//!    without a token is admitted only if the [`TrustPolicy`] trusts its
//!    declared role.
//! 2. Info: both sides send `peer:info` with their name and addresses.
//!
//! Either phase fails on timeout. On failure the caller aborts the
//! connection; nothing is registered.

mod tiebreak;
mod trust;

use std::time::Duration;

use tasknet_core::{create_net_auth, verify_net_auth, CryptoError, PublicKey};

use crate::bus::MessageBus;
use crate::config::{P2pConfig, DEFAULT_AUTH_TIMEOUT, DEFAULT_INFO_TIMEOUT};
use crate::error::{P2pError, P2pResult};
use crate::identity::NodeIdentity;
use crate::peer::{unix_secs, PeerType};
use crate::protocol::{AuthMessage, InfoMessage, Message, MessageKind};
use crate::transport::{Connection, Multiaddr};

pub use tiebreak::{key_tail_product, should_initiate_stream};
pub use trust::{TrustGrant, TrustPolicy};

/// How long each phase may wait for the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeTimeouts {
    /// Wait for `peer:auth`.
    pub auth: Duration,
    /// Wait for `peer:info`.
    pub info: Duration,
}

impl Default for HandshakeTimeouts {
    fn default() -> Self {
        Self {
            auth: DEFAULT_AUTH_TIMEOUT,
            info: DEFAULT_INFO_TIMEOUT,
        }
    }
}

impl From<&P2pConfig> for HandshakeTimeouts {
    fn from(config: &P2pConfig) -> Self {
        Self {
            auth: config.auth_timeout,
            info: config.info_timeout,
        }
    }
}

/// What the handshake established about the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Declared role.
    pub peer_type: PeerType,
    /// Admitted without a token.
    pub public: bool,
    /// Reported name, else the name the trust policy derived.
    pub name: Option<String>,
    /// Announced addresses.
    pub addresses: Vec<String>,
    /// When the remote minted its token, if it sent one.
    pub auth_issued_at: Option<u64>,
}

impl HandshakeResult {
    /// Merge the remote's `peer:info`. A reported name wins over a derived one.
    pub fn apply_info(&mut self, info: InfoMessage) {
        if info.name.is_some() {
            self.name = info.name;
        }
        self.addresses = info.addresses;
    }
}

/// Build our `peer:auth` for the remote with public key `remote`.
pub fn create_auth_message(identity: &NodeIdentity, remote: &PublicKey) -> AuthMessage {
    AuthMessage {
        peer_type: identity.peer_type().clone(),
        auth: identity
            .netkey()
            .map(|netkey| create_net_auth(remote, netkey, unix_secs())),
    }
}

/// Validate the remote's `peer:auth`.
pub fn validate_auth(
    received: &AuthMessage,
    identity: &NodeIdentity,
    remote_addr: &Multiaddr,
    trust: &TrustPolicy,
) -> P2pResult<HandshakeResult> {
    let mut result = HandshakeResult {
        peer_type: received.peer_type.clone(),
        public: false,
        name: None,
        addresses: Vec::new(),
        auth_issued_at: None,
    };

    match &received.auth {
        Some(auth) => {
            let info = verify_net_auth(auth, &identity.public_key(), identity.netkey())
                .map_err(|e| match e {
                    CryptoError::MissingNetKey => P2pError::AuthRejected(
                        "peer sent net-auth but no local netkey is configured".to_string(),
                    ),
                    _ => P2pError::AuthRejected("invalid signature".to_string()),
                })?;
            result.auth_issued_at = Some(info.issued_at);
        }
        None => {
            let grant = trust
                .evaluate(&received.peer_type, remote_addr)
                .ok_or_else(|| P2pError::UntrustedPeer {
                    peer_type: received.peer_type.to_string(),
                })?;
            result.public = true;
            result.name = grant.name;
        }
    }

    Ok(result)
}

/// Build our `peer:info`.
pub fn create_info_message(identity: &NodeIdentity, addresses: Vec<String>) -> InfoMessage {
    InfoMessage {
        name: identity.name().map(str::to_string),
        addresses,
    }
}

/// Run both phases over `bus`.
pub async fn perform_handshake(
    identity: &NodeIdentity,
    connection: &dyn Connection,
    bus: &MessageBus,
    trust: &TrustPolicy,
    timeouts: HandshakeTimeouts,
    addresses: Vec<String>,
) -> P2pResult<HandshakeResult> {
    bus.send(Message::Auth(create_auth_message(
        identity,
        connection.remote_public_key(),
    )))?;

    let auth = match bus.await_message(MessageKind::Auth, timeouts.auth).await? {
        Message::Auth(auth) => auth,
        other => {
            return Err(P2pError::UnexpectedMessage {
                expected: MessageKind::Auth.to_string(),
                actual: other.kind().to_string(),
            })
        }
    };
    let mut result = validate_auth(&auth, identity, connection.remote_addr(), trust)?;

    bus.send(Message::Info(create_info_message(identity, addresses)))?;

    match bus.await_message(MessageKind::Info, timeouts.info).await? {
        Message::Info(info) => result.apply_info(info),
        other => {
            return Err(P2pError::UnexpectedMessage {
                expected: MessageKind::Info.to_string(),
                actual: other.kind().to_string(),
            })
        }
    }

    Ok(result)
}
