//! Transport abstraction.
//!
//! The session layer needs very little from the transport: connections that
//! know the remote's authenticated public key and observed address, that can
//! open protocol-tagged streams and be aborted, plus a stream of events for
//! new connections, inbound streams and closed connections.
//!
//! Two implementations ship with the crate:
//! - [`SwarmTransport`]: libp2p over TCP, secured with Noise and
//!   multiplexed with Yamux
//! - [`MemoryNetwork`]: in-process connections over `tokio::io::duplex`

mod address;
mod memory;
mod swarm;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tasknet_core::PublicKey;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::error::P2pResult;
use crate::peer::PeerId;

pub use address::{host_name, parse_dial_address, socket_multiaddr};
pub use libp2p::Multiaddr;
pub use memory::{MemoryConnection, MemoryNetwork, MemoryTransport};
pub use swarm::{SwarmConnection, SwarmTransport};

/// A bidirectional byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A boxed stream opened on a connection.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Process-unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// An established transport connection to a remote node.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Identifier of this connection.
    fn id(&self) -> ConnectionId;

    /// Public key the remote proved during connection setup.
    fn remote_public_key(&self) -> &PublicKey;

    /// Peer id derived from the remote public key.
    fn remote_peer_id(&self) -> &PeerId;

    /// Remote address as observed by the transport.
    fn remote_addr(&self) -> &Multiaddr;

    /// Open a new stream for `protocol`.
    async fn open_stream(&self, protocol: &str) -> P2pResult<BoxedStream>;

    /// Tear the connection down. Idempotent.
    fn abort(&self);

    /// Token cancelled when the connection closes.
    fn closed(&self) -> CancellationToken;

    /// Whether the connection has closed.
    fn is_closed(&self) -> bool {
        self.closed().is_cancelled()
    }
}

/// Events a transport reports to the node.
pub enum TransportEvent {
    /// A connection was established, inbound or outbound.
    Connected(Arc<dyn Connection>),

    /// The remote opened a stream on a connection.
    InboundStream {
        /// Connection carrying the stream.
        connection: Arc<dyn Connection>,
        /// Protocol the remote asked for.
        protocol: String,
        /// The stream itself.
        stream: BoxedStream,
    },

    /// A connection closed. Reported once per connection.
    Disconnected {
        /// Remote peer of the closed connection.
        peer_id: PeerId,
        /// The connection that closed.
        connection_id: ConnectionId,
    },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::Connected(connection) => {
                f.debug_tuple("Connected").field(&connection.id()).finish()
            }
            TransportEvent::InboundStream {
                connection,
                protocol,
                ..
            } => f
                .debug_struct("InboundStream")
                .field("connection", &connection.id())
                .field("protocol", protocol)
                .finish_non_exhaustive(),
            TransportEvent::Disconnected {
                peer_id,
                connection_id,
            } => f
                .debug_struct("Disconnected")
                .field("peer_id", peer_id)
                .field("connection_id", connection_id)
                .finish(),
        }
    }
}

/// A way of reaching other nodes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Dial a single address.
    async fn dial(&self, address: &Multiaddr) -> P2pResult<Arc<dyn Connection>>;

    /// Addresses this transport listens on.
    fn listen_addrs(&self) -> Vec<Multiaddr>;

    /// Stop accepting and close every connection.
    async fn shutdown(&self);
}
