//! Peer cache.
//!
//! The node journals every connect and disconnect and flushes a snapshot of
//! the registry after each change. Where that goes is up to the cache:
//!
//! - [`MemoryPeerCache`]: in-process, for tests and embedding
//! - [`FilePeerCache`]: JSON files in a data directory, plus a list of
//!   every peer it has seen for redialing after a restart

mod file;
mod memory;

use async_trait::async_trait;

use crate::error::P2pResult;
use crate::peer::{JournalEntry, PeerSnapshot};

pub use file::{
    load_journal, load_peers, merge_known, save_peers, FilePeerCache, JournalLine, PeerStore,
    MAX_KNOWN_PEERS,
};
pub use memory::MemoryPeerCache;

/// Sink for peer lifecycle records.
#[async_trait]
pub trait PeerCache: Send + Sync {
    /// Record one lifecycle event of `peer`.
    async fn record_peer_event(&self, peer: &PeerSnapshot, entry: &JournalEntry) -> P2pResult<()>;

    /// Persist the current registry snapshot.
    async fn flush_peers(&self, peers: &[PeerSnapshot]) -> P2pResult<()>;
}
