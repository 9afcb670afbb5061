//! Per-peer session state.

use std::collections::HashMap;
use std::fmt;

use super::PeerId;
use crate::transport::ConnectionId;

/// Where the session with a remote peer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No control stream is in use.
    #[default]
    Idle,
    /// A control stream is open and the handshake is running.
    Handshaking,
    /// Handshake complete, peer is registered.
    Connected,
}

impl SessionState {
    /// Whether a new control stream for this peer must be refused.
    pub fn is_busy(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Handshaking => write!(f, "handshaking"),
            SessionState::Connected => write!(f, "connected"),
        }
    }
}

/// Session state of every peer the node has a stream with, and the
/// connection that holds it.
#[derive(Debug, Default)]
pub struct SessionTable {
    states: HashMap<PeerId, (SessionState, ConnectionId)>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a peer.
    pub fn state(&self, peer_id: &PeerId) -> SessionState {
        self.states
            .get(peer_id)
            .map(|(state, _)| *state)
            .unwrap_or_default()
    }

    /// Connection holding the peer's session, if any.
    pub fn owner(&self, peer_id: &PeerId) -> Option<ConnectionId> {
        self.states.get(peer_id).map(|(_, owner)| *owner)
    }

    /// Claim the peer for a handshake on `connection_id`. Returns `false` if
    /// it is already busy.
    pub fn begin_handshake(&mut self, peer_id: &PeerId, connection_id: ConnectionId) -> bool {
        if self.state(peer_id).is_busy() {
            return false;
        }
        self.transition(peer_id, SessionState::Handshaking, connection_id);
        true
    }

    /// Mark the peer registered on `connection_id`.
    pub fn mark_connected(&mut self, peer_id: &PeerId, connection_id: ConnectionId) {
        self.transition(peer_id, SessionState::Connected, connection_id);
    }

    /// Forget the peer if `connection_id` holds its session. Returns whether
    /// anything was released.
    pub fn release(&mut self, peer_id: &PeerId, connection_id: ConnectionId) -> bool {
        match self.states.get(peer_id) {
            Some((from, owner)) if *owner == connection_id => {
                tracing::trace!(
                    peer = %peer_id.short(),
                    connection = %connection_id,
                    from = %from,
                    to = %SessionState::Idle,
                    "Session state transition"
                );
                self.states.remove(peer_id);
                true
            }
            Some((_, owner)) => {
                tracing::trace!(
                    peer = %peer_id.short(),
                    connection = %connection_id,
                    owner = %owner,
                    "Session held by another connection"
                );
                false
            }
            None => false,
        }
    }

    /// Number of peers with an active handshake.
    pub fn handshaking(&self) -> usize {
        self.states
            .values()
            .filter(|(state, _)| *state == SessionState::Handshaking)
            .count()
    }

    fn transition(&mut self, peer_id: &PeerId, to: SessionState, connection_id: ConnectionId) {
        let from = self
            .states
            .insert(peer_id.clone(), (to, connection_id))
            .map(|(state, _)| state)
            .unwrap_or_default();
        tracing::trace!(
            peer = %peer_id.short(),
            connection = %connection_id,
            from = %from,
            to = %to,
            "Session state transition"
        );
    }
}
