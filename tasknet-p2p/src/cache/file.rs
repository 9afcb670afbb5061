//! File-backed peer cache.
//!
//! Three files live in the cache directory:
//! - `peers.json`: the last flushed snapshot, replaced atomically
//! - `known-peers.json`: every peer seen in a snapshot, latest first, kept
//!   across shutdowns so a restarted node knows whom to dial
//! - `peer-events.jsonl`: one JSON line per lifecycle event, append-only

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::PeerCache;
use crate::error::{P2pError, P2pResult};
use crate::peer::{unix_millis, JournalEntry, PeerEventKind, PeerId, PeerSnapshot, PeerType};

/// Snapshot file name.
const PEERS_FILE: &str = "peers.json";

/// Known-peers file name.
const KNOWN_FILE: &str = "known-peers.json";

/// Journal file name.
const JOURNAL_FILE: &str = "peer-events.jsonl";

/// Most peers remembered in the known-peers file.
pub const MAX_KNOWN_PEERS: usize = 256;

/// Persistent snapshot format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStore {
    /// Version of the storage format.
    pub version: u32,
    /// When the snapshot was written, unix milliseconds.
    pub updated_at: u64,
    /// Registered peers at that time.
    pub peers: Vec<PeerSnapshot>,
}

/// One line of the journal file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    /// Peer the event belongs to.
    pub peer: PeerId,
    /// Its declared role.
    pub peer_type: PeerType,
    /// Its name, if known.
    pub name: Option<String>,
    /// What happened.
    pub event: PeerEventKind,
    /// When, unix milliseconds.
    pub at: u64,
}

/// Load a snapshot file. A missing file is an empty snapshot.
pub async fn load_peers(path: &Path) -> P2pResult<Vec<PeerSnapshot>> {
    let peers = read_peers(path).await?;
    tracing::info!(count = peers.len(), path = ?path, "Loaded cached peers");
    Ok(peers)
}

async fn read_peers(path: &Path) -> P2pResult<Vec<PeerSnapshot>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut file = fs::File::open(path).await?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).await?;

    let store: PeerStore = serde_json::from_str(&contents)
        .map_err(|e| P2pError::Serialization(format!("Failed to parse peers file: {}", e)))?;
    Ok(store.peers)
}

/// Fold `current` into `known`: entries are replaced by id, the most
/// recently connected come first and the list is capped.
pub fn merge_known(mut known: Vec<PeerSnapshot>, current: &[PeerSnapshot]) -> Vec<PeerSnapshot> {
    known.retain(|old| !current.iter().any(|peer| peer.id == old.id));
    known.extend(current.iter().cloned());
    known.sort_by(|a, b| b.connected_at.cmp(&a.connected_at).then_with(|| a.id.cmp(&b.id)));
    known.truncate(MAX_KNOWN_PEERS);
    known
}

/// Write a snapshot file atomically.
pub async fn save_peers(path: &Path, peers: &[PeerSnapshot]) -> P2pResult<()> {
    let store = PeerStore {
        version: 1,
        updated_at: unix_millis(),
        peers: peers.to_vec(),
    };

    let contents = serde_json::to_string_pretty(&store)
        .map_err(|e| P2pError::Serialization(format!("Failed to serialize peers: {}", e)))?;

    // Write to temp file first, then rename (atomic)
    let temp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&temp_path, path).await?;

    tracing::debug!(count = peers.len(), path = ?path, "Flushed peers");

    Ok(())
}

/// Read every line of a journal file. A missing file is an empty journal.
pub async fn load_journal(path: &Path) -> P2pResult<Vec<JournalLine>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let contents = fs::read_to_string(path).await?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| P2pError::Serialization(format!("Bad journal line: {}", e)))
        })
        .collect()
}

/// Peer cache persisted under a directory.
pub struct FilePeerCache {
    dir: PathBuf,
    /// Serializes journal appends and snapshot writes.
    write_lock: Mutex<()>,
}

impl FilePeerCache {
    /// Open (creating if needed) a cache directory.
    pub async fn open(dir: impl Into<PathBuf>) -> P2pResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the snapshot file.
    pub fn peers_path(&self) -> PathBuf {
        self.dir.join(PEERS_FILE)
    }

    /// Path of the known-peers file.
    pub fn known_path(&self) -> PathBuf {
        self.dir.join(KNOWN_FILE)
    }

    /// Path of the journal file.
    pub fn journal_path(&self) -> PathBuf {
        self.dir.join(JOURNAL_FILE)
    }

    /// Load the last flushed snapshot: the peers connected at that time.
    pub async fn load(&self) -> P2pResult<Vec<PeerSnapshot>> {
        load_peers(&self.peers_path()).await
    }

    /// Load every peer ever flushed, most recently connected first.
    pub async fn known_peers(&self) -> P2pResult<Vec<PeerSnapshot>> {
        let peers = read_peers(&self.known_path()).await?;
        tracing::info!(count = peers.len(), path = ?self.known_path(), "Loaded known peers");
        Ok(peers)
    }
}

#[async_trait]
impl PeerCache for FilePeerCache {
    async fn record_peer_event(&self, peer: &PeerSnapshot, entry: &JournalEntry) -> P2pResult<()> {
        let line = JournalLine {
            peer: peer.id.clone(),
            peer_type: peer.peer_type.clone(),
            name: peer.name.clone(),
            event: entry.event,
            at: entry.at,
        };
        let mut encoded = serde_json::to_string(&line)
            .map_err(|e| P2pError::Serialization(format!("Failed to serialize event: {}", e)))?;
        encoded.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path())
            .await?;
        file.write_all(encoded.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn flush_peers(&self, peers: &[PeerSnapshot]) -> P2pResult<()> {
        let _guard = self.write_lock.lock().await;
        save_peers(&self.peers_path(), peers).await?;

        if peers.is_empty() {
            return Ok(());
        }
        let known = merge_known(read_peers(&self.known_path()).await?, peers);
        save_peers(&self.known_path(), &known).await
    }
}
