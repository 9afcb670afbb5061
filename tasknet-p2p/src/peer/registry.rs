//! Registry of peers with an established session.

use std::collections::HashMap;

use super::{JournalEntry, Peer, PeerEventKind, PeerId, PeerSnapshot, PeerType};
use crate::error::{P2pError, P2pResult};

/// At most one entry per peer id.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, Peer>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. Refuses a second entry for the same id.
    pub fn add(&mut self, peer: Peer) -> P2pResult<()> {
        if self.peers.contains_key(&peer.id) {
            return Err(P2pError::DuplicateConnection {
                peer_id: peer.id.to_string(),
            });
        }
        self.peers.insert(peer.id.clone(), peer);
        Ok(())
    }

    /// Remove a peer, returning it if it was registered.
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<Peer> {
        self.peers.remove(peer_id)
    }

    /// Look up a peer by id.
    pub fn find(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.get(peer_id)
    }

    /// All peers of a role.
    pub fn find_by_type(&self, peer_type: &PeerType) -> Vec<&Peer> {
        let mut peers: Vec<&Peer> = self
            .peers
            .values()
            .filter(|peer| &peer.peer_type == peer_type)
            .collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Whether a peer is registered.
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    /// Append a journal entry to a registered peer.
    pub fn record(
        &mut self,
        peer_id: &PeerId,
        event: PeerEventKind,
    ) -> Option<(PeerSnapshot, JournalEntry)> {
        let peer = self.peers.get_mut(peer_id)?;
        let entry = peer.record(event);
        Some((peer.snapshot(), entry))
    }

    /// Snapshot of every registered peer, ordered by id.
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        let mut snapshot: Vec<PeerSnapshot> = self.peers.values().map(Peer::snapshot).collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    /// Registered ids.
    pub fn ids(&self) -> Vec<PeerId> {
        self.peers.keys().cloned().collect()
    }

    /// Iterate over registered peers.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
