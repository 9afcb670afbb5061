//! In-memory peer cache.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::PeerCache;
use crate::error::P2pResult;
use crate::peer::{JournalEntry, PeerId, PeerSnapshot};

/// Keeps every recorded event and the last flushed snapshot.
#[derive(Debug, Default)]
pub struct MemoryPeerCache {
    events: Mutex<Vec<(PeerId, JournalEntry)>>,
    peers: Mutex<Vec<PeerSnapshot>>,
    flushes: AtomicUsize,
}

impl MemoryPeerCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<(PeerId, JournalEntry)> {
        self.events.lock().clone()
    }

    /// Recorded events of one peer.
    pub fn events_for(&self, peer_id: &PeerId) -> Vec<JournalEntry> {
        self.events
            .lock()
            .iter()
            .filter(|(id, _)| id == peer_id)
            .map(|(_, entry)| *entry)
            .collect()
    }

    /// The last flushed snapshot.
    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.peers.lock().clone()
    }

    /// How many times the snapshot was flushed.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerCache for MemoryPeerCache {
    async fn record_peer_event(&self, peer: &PeerSnapshot, entry: &JournalEntry) -> P2pResult<()> {
        self.events.lock().push((peer.id.clone(), *entry));
        Ok(())
    }

    async fn flush_peers(&self, peers: &[PeerSnapshot]) -> P2pResult<()> {
        *self.peers.lock() = peers.to_vec();
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
