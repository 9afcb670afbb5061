//! Admission of peers that present no network-auth token.
//!
//! A tokenless peer is admitted only if its declared role is on the trusted
//! list. The role is self-declared, so this is an allow-list of roles, not a
//! cryptographic check: anyone can claim to be a beacon.

use crate::peer::PeerType;
use crate::transport::{host_name, Multiaddr};

/// What a tokenless peer is granted on admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustGrant {
    /// Name derived from the observed remote address.
    pub name: Option<String>,
}

/// Which tokenless peers are admitted as public nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustPolicy {
    trusted_public_types: Vec<PeerType>,
}

impl Default for TrustPolicy {
    /// Trust declared beacons.
    fn default() -> Self {
        Self {
            trusted_public_types: vec![PeerType::Beacon],
        }
    }
}

impl TrustPolicy {
    /// Admit tokenless peers of the given roles.
    pub fn new(trusted_public_types: Vec<PeerType>) -> Self {
        Self {
            trusted_public_types,
        }
    }

    /// Admit no tokenless peers.
    pub fn deny_all() -> Self {
        Self::new(Vec::new())
    }

    /// Whether tokenless peers of `peer_type` are admitted.
    pub fn trusts(&self, peer_type: &PeerType) -> bool {
        self.trusted_public_types.contains(peer_type)
    }

    /// Decide on a tokenless peer. `None` means reject.
    pub fn evaluate(&self, peer_type: &PeerType, remote_addr: &Multiaddr) -> Option<TrustGrant> {
        if !self.trusts(peer_type) {
            return None;
        }
        Some(TrustGrant {
            name: host_name(remote_addr),
        })
    }
}
