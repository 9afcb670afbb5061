//! Peer sessions.
//!
//! This module provides:
//! - Peer identification and metadata
//! - The registry of established sessions
//! - Per-peer session state

pub mod info;
pub mod registry;
pub mod state;

pub use info::{
    unix_millis, unix_secs, JournalEntry, Peer, PeerEventKind, PeerId, PeerSnapshot, PeerType,
};
pub use registry::PeerRegistry;
pub use state::{SessionState, SessionTable};
