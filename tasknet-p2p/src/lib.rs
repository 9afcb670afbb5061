//! Authenticated peer sessions for TaskNet.
//!
//! This crate turns raw transport connections into authenticated, named
//! peer sessions:
//!
//! - Node identity: key pair, role, optional name and network key
//! - A message bus per session with awaits, requests and handlers
//! - A two-phase handshake (`peer:auth`, then `peer:info`)
//! - A registry holding at most one session per remote peer
//! - Per-role handlers and `peer:new` / `peer:lost` notifications
//! - A peer cache journaling connects and disconnects
//!
//! # Architecture
//!
//! One controller task owns all session state. Everything else reports to
//! it over channels.
//!
//! ```text
//! Main Task (P2pNode::run())
//! ├── Transport (libp2p swarm driver / in-memory links)
//! ├── Bus Task per control stream (frame read/write loop)
//! ├── Handshake Task per session attempt
//! └── Handler Task per established peer
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use tasknet_core::KeyPair;
//! use tasknet_p2p::{NodeIdentity, P2pConfig, P2pNode, PeerType, SwarmTransport};
//!
//! let keypair = KeyPair::generate();
//! let config = P2pConfig::new("0.0.0.0:4001".parse()?);
//! let (transport, events) = SwarmTransport::bind(&keypair, &config).await?;
//! let identity = NodeIdentity::new(keypair, PeerType::Worker).with_netkey("secret");
//!
//! let node = P2pNode::new(identity, config, transport, events);
//! let handle = node.handle();
//! tokio::spawn(node.run());
//! handle.connect("/ip4/10.0.0.2/tcp/4001").await?;
//! ```

pub mod config;
pub mod error;

pub mod bus;
pub mod cache;
pub mod handlers;
pub mod handshake;
pub mod identity;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod transport;

// Re-export main types
pub use bus::MessageBus;
pub use cache::{FilePeerCache, MemoryPeerCache, PeerCache};
pub use config::{P2pConfig, CONTROL_PROTOCOL, MAX_MESSAGE_SIZE, NETWORK_MAGIC};
pub use error::{P2pError, P2pResult};
pub use handlers::{handler_fn, HandlerRegistry, PeerHandler};
pub use handshake::{HandshakeResult, HandshakeTimeouts, TrustPolicy};
pub use identity::NodeIdentity;
pub use node::{bind_default_behaviors, DialTarget, LifecycleEvent, NodeHandle, P2pNode};
pub use peer::{JournalEntry, Peer, PeerEventKind, PeerId, PeerSnapshot, PeerType};
pub use protocol::{Message, MessageKind};
pub use transport::{
    Connection, MemoryNetwork, Multiaddr, SwarmTransport, Transport, TransportEvent,
};

#[cfg(test)]
pub(crate) mod test_support {
    //! Two memory endpoints joined by one connection with a control stream.

    use std::sync::Arc;

    use tasknet_core::KeyPair;
    use tokio::sync::mpsc;

    use crate::bus::MessageBus;
    use crate::config::CONTROL_PROTOCOL;
    use crate::transport::{Connection, MemoryNetwork, MemoryTransport, TransportEvent};

    pub(crate) struct LinkedPair {
        pub a: Arc<dyn Connection>,
        pub b: Arc<dyn Connection>,
        pub bus_a: MessageBus,
        pub bus_b: MessageBus,
        _transports: (MemoryTransport, MemoryTransport),
        _events: (
            mpsc::UnboundedReceiver<TransportEvent>,
            mpsc::UnboundedReceiver<TransportEvent>,
        ),
    }

    pub(crate) async fn linked_pair(
        ka: &KeyPair,
        addr_a: &str,
        kb: &KeyPair,
        addr_b: &str,
    ) -> LinkedPair {
        let network = MemoryNetwork::new();
        let (ta, events_a) = network.listen(ka, addr_a).unwrap();
        let (tb, mut events_b) = network.listen(kb, addr_b).unwrap();

        let a: Arc<dyn Connection> = ta.connect(addr_b).unwrap();
        let b = match events_b.recv().await.unwrap() {
            TransportEvent::Connected(connection) => connection,
            other => panic!("unexpected event {other:?}"),
        };

        let stream_a = a.open_stream(CONTROL_PROTOCOL).await.unwrap();
        let stream_b = match events_b.recv().await.unwrap() {
            TransportEvent::InboundStream { stream, .. } => stream,
            other => panic!("unexpected event {other:?}"),
        };

        let bus_a = MessageBus::new(stream_a, &a.closed());
        let bus_b = MessageBus::new(stream_b, &b.closed());

        LinkedPair {
            a,
            b,
            bus_a,
            bus_b,
            _transports: (ta, tb),
            _events: (events_a, events_b),
        }
    }
}
