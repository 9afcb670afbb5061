//! Local node identity.

use tasknet_core::{KeyPair, NetKey, PublicKey};

use crate::peer::{PeerId, PeerType};

/// Who this node is: key pair, declared role, optional name and network key.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    keypair: KeyPair,
    peer_id: PeerId,
    peer_type: PeerType,
    name: Option<String>,
    netkey: Option<NetKey>,
    listen_addrs: Vec<String>,
}

impl NodeIdentity {
    /// Identity with the given key pair and role, no name and no network key.
    pub fn new(keypair: KeyPair, peer_type: PeerType) -> Self {
        Self {
            peer_id: PeerId::from_public_key(&keypair.public_key()),
            keypair,
            peer_type,
            name: None,
            netkey: None,
            listen_addrs: Vec::new(),
        }
    }

    /// Set the human-readable name announced in `peer:info`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the shared network secret.
    pub fn with_netkey(mut self, secret: &str) -> Self {
        self.netkey = Some(NetKey::new(secret));
        self
    }

    /// Addresses to announce in addition to the transport's own.
    pub fn with_listen_addrs(mut self, addrs: Vec<String>) -> Self {
        self.listen_addrs = addrs;
        self
    }

    /// The node's key pair.
    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// The node's public key.
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// The node's peer id.
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Declared role.
    pub fn peer_type(&self) -> &PeerType {
        &self.peer_type
    }

    /// Configured name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Network key, if configured.
    pub fn netkey(&self) -> Option<&NetKey> {
        self.netkey.as_ref()
    }

    /// Configured announce addresses.
    pub fn listen_addrs(&self) -> &[String] {
        &self.listen_addrs
    }
}
