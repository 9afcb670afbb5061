//! P2P error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// P2P-specific errors.
#[derive(Debug, Error)]
pub enum P2pError {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failed to serialize or deserialize a message.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Message exceeds maximum allowed size.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Invalid network magic bytes.
    #[error("Invalid network magic: expected {expected:?}, got {actual:?}")]
    InvalidMagic { expected: [u8; 4], actual: [u8; 4] },

    /// An awaited message did not arrive in time.
    #[error("Timed out after {after:?} waiting for {kind}")]
    Timeout { kind: String, after: Duration },

    /// The remote's network-auth token failed verification.
    #[error("Auth rejected: {0}")]
    AuthRejected(String),

    /// The remote sent no token and its declared type is not trusted.
    #[error("Untrusted peer: {peer_type} provided no net-auth and is not a trusted public node")]
    UntrustedPeer { peer_type: String },

    /// A session with this peer is already established.
    #[error("Already connected to peer: {peer_id}")]
    DuplicateConnection { peer_id: String },

    /// The handler registered for the peer's type failed.
    #[error("Handler failed for {peer_type} peer: {reason}")]
    HandlerFailure { peer_type: String, reason: String },

    /// The stream or connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An await for this message kind is already outstanding.
    #[error("Already awaiting {kind}")]
    AwaitPending { kind: String },

    /// Peer sent an unexpected message.
    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage { expected: String, actual: String },

    /// Invalid peer address.
    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    /// Every dial attempt failed.
    #[error("Dial failed for {address}: {reason}")]
    DialFailed { address: String, reason: String },

    /// Connection timed out.
    #[error("Connection timeout to {addr}")]
    ConnectionTimeout { addr: String },

    /// The libp2p transport could not be set up or used.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Node is shutting down.
    #[error("Node shutting down")]
    Shutdown,
}

impl P2pError {
    /// Short label used in diagnostic logs for handshake outcomes.
    pub fn label(&self) -> &'static str {
        match self {
            P2pError::Timeout { .. } => "timeout",
            P2pError::AuthRejected(_) => "auth_rejected",
            P2pError::UntrustedPeer { .. } => "untrusted_peer",
            P2pError::DuplicateConnection { .. } => "duplicate_connection",
            P2pError::HandlerFailure { .. } => "handler_failure",
            P2pError::ConnectionClosed => "connection_closed",
            _ => "error",
        }
    }
}

impl From<tasknet_core::SerializationError> for P2pError {
    fn from(err: tasknet_core::SerializationError) -> Self {
        P2pError::Serialization(err.to_string())
    }
}

/// Result type for P2P operations.
pub type P2pResult<T> = Result<T, P2pError>;
