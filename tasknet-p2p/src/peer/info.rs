//! Peer information and identification.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tasknet_core::{derive_peer_id, PublicKey};

use crate::bus::MessageBus;
use crate::error::{P2pError, P2pResult};
use crate::handshake::HandshakeResult;
use crate::protocol::{Message, MessageKind};
use crate::transport::Connection;

/// Stable identifier of a peer, derived from its public key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Derive the peer id of a public key.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self(derive_peer_id(public_key))
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Role a node declares during the handshake.
///
/// Carried on the wire as its lowercase name, so unknown roles from newer
/// nodes survive as [`PeerType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PeerType {
    /// Public bootstrap node.
    Beacon,
    /// Task-executing node.
    Worker,
    /// Any other declared role.
    Other(String),
}

impl PeerType {
    /// Wire name of the role.
    pub fn as_str(&self) -> &str {
        match self {
            PeerType::Beacon => "beacon",
            PeerType::Worker => "worker",
            PeerType::Other(name) => name,
        }
    }
}

impl fmt::Display for PeerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for PeerType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "beacon" => PeerType::Beacon,
            "worker" => PeerType::Worker,
            _ => PeerType::Other(name),
        }
    }
}

impl From<PeerType> for String {
    fn from(peer_type: PeerType) -> Self {
        peer_type.as_str().to_string()
    }
}

impl FromStr for PeerType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PeerType::from(s.to_string()))
    }
}

/// Kind of a journaled lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerEventKind {
    /// The peer completed its handshake and was registered.
    Connect,
    /// The peer's connection went away.
    Disconnect,
}

impl fmt::Display for PeerEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEventKind::Connect => write!(f, "connect"),
            PeerEventKind::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// One entry in a peer's session journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// What happened.
    pub event: PeerEventKind,
    /// Unix time in milliseconds.
    pub at: u64,
}

impl JournalEntry {
    /// Create an entry stamped with the current time.
    pub fn now(event: PeerEventKind) -> Self {
        Self {
            event,
            at: unix_millis(),
        }
    }
}

/// Serializable view of a registered peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSnapshot {
    /// Peer id.
    pub id: PeerId,
    /// Declared role.
    pub peer_type: PeerType,
    /// Name reported by the peer or derived by the trust policy.
    pub name: Option<String>,
    /// Admitted without a network-auth token.
    pub public: bool,
    /// Addresses the peer announced.
    pub addresses: Vec<String>,
    /// Address the transport observed.
    pub remote_addr: String,
    /// Unix time in milliseconds the session was registered.
    pub connected_at: u64,
}

/// A peer with an established, authenticated session.
///
/// Clones share the underlying connection and bus; the registry owns the
/// authoritative copy and its journal.
#[derive(Clone)]
pub struct Peer {
    /// Peer id.
    pub id: PeerId,
    /// Declared role.
    pub peer_type: PeerType,
    /// Name reported by the peer or derived by the trust policy.
    pub name: Option<String>,
    /// Admitted without a network-auth token.
    pub public: bool,
    /// Addresses the peer announced in `peer:info`.
    pub addresses: Vec<String>,
    /// Address the transport observed.
    pub remote_addr: String,
    /// When the remote minted its auth token (unix seconds), if it sent one.
    pub auth_issued_at: Option<u64>,
    /// Unix time in milliseconds the session was registered.
    pub connected_at: u64,
    connection: Arc<dyn Connection>,
    bus: MessageBus,
    journal: Vec<JournalEntry>,
}

impl Peer {
    /// Build a peer from a completed handshake.
    pub fn from_handshake(
        connection: Arc<dyn Connection>,
        bus: MessageBus,
        result: HandshakeResult,
    ) -> Self {
        Self {
            id: connection.remote_peer_id().clone(),
            peer_type: result.peer_type,
            name: result.name,
            public: result.public,
            addresses: result.addresses,
            remote_addr: connection.remote_addr().to_string(),
            auth_issued_at: result.auth_issued_at,
            connected_at: unix_millis(),
            connection,
            bus,
            journal: Vec::new(),
        }
    }

    /// The underlying transport connection.
    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// The message bus of the control stream.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Lifecycle events recorded for this session.
    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    /// Append an event to the journal.
    pub fn record(&mut self, event: PeerEventKind) -> JournalEntry {
        let entry = JournalEntry::now(event);
        self.journal.push(entry);
        entry
    }

    /// Name for log lines: the reported name, else the short id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.id.short())
    }

    /// Send a message to the peer.
    pub fn send(&self, message: Message) -> P2pResult<()> {
        self.bus.send(message)
    }

    /// Ping the peer and return the time it reported, in unix milliseconds.
    pub async fn ping(&self, timeout: Duration) -> P2pResult<u64> {
        match self.bus.request(Message::Ping, timeout).await? {
            Message::Pong(pong) => Ok(pong.time),
            other => Err(P2pError::UnexpectedMessage {
                expected: MessageKind::Pong.to_string(),
                actual: other.kind().to_string(),
            }),
        }
    }

    /// Abort the underlying connection.
    pub fn disconnect(&self) {
        self.connection.abort();
    }

    /// Serializable view of this peer.
    pub fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            id: self.id.clone(),
            peer_type: self.peer_type.clone(),
            name: self.name.clone(),
            public: self.public,
            addresses: self.addresses.clone(),
            remote_addr: self.remote_addr.clone(),
            connected_at: self.connected_at,
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("peer_type", &self.peer_type)
            .field("name", &self.name)
            .field("public", &self.public)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.peer_type, self.display_name(), self.remote_addr)
    }
}

/// Current unix time in milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Current unix time in seconds.
pub fn unix_secs() -> u64 {
    unix_millis() / 1000
}
