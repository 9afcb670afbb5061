//! In-process transport.
//!
//! Every endpoint registers under a multiaddr (usually `/memory/<n>`) on a
//! shared [`MemoryNetwork`]. Dialing links two endpoints; streams are
//! `tokio::io::duplex` pairs. Identities are taken from the endpoint's key
//! pair, so no identity exchange happens on the wire.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tasknet_core::{KeyPair, PublicKey};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{BoxedStream, Connection, ConnectionId, Multiaddr, Transport, TransportEvent};
use crate::error::{P2pError, P2pResult};
use crate::peer::PeerId;

/// Buffer size of each in-memory stream.
const STREAM_BUFFER: usize = 64 * 1024;

/// Shared registry of in-process endpoints.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<Multiaddr, Endpoint>>>,
}

#[derive(Clone)]
struct Endpoint {
    address: Multiaddr,
    public_key: PublicKey,
    peer_id: PeerId,
    events: mpsc::UnboundedSender<TransportEvent>,
    links: Arc<Mutex<Vec<Weak<Link>>>>,
}

impl Endpoint {
    /// Track a new link, forgetting links that have been freed.
    fn attach(&self, link: &Arc<Link>) {
        let mut links = self.links.lock();
        links.retain(|l| l.strong_count() > 0);
        links.push(Arc::downgrade(link));
    }
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint for `keypair` under `address`.
    pub fn listen(
        &self,
        keypair: &KeyPair,
        address: &str,
    ) -> P2pResult<(MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>)> {
        let address: Multiaddr = address
            .parse()
            .map_err(|_| P2pError::InvalidAddress(address.to_string()))?;
        let (events, events_rx) = mpsc::unbounded_channel();
        let public_key = keypair.public_key();
        let endpoint = Endpoint {
            address: address.clone(),
            peer_id: PeerId::from_public_key(&public_key),
            public_key,
            events,
            links: Arc::new(Mutex::new(Vec::new())),
        };

        let mut endpoints = self.endpoints.lock();
        if endpoints.contains_key(&address) {
            return Err(P2pError::InvalidAddress(format!("{address} already in use")));
        }
        endpoints.insert(address, endpoint.clone());

        let transport = MemoryTransport {
            network: self.clone(),
            local: endpoint,
        };
        Ok((transport, events_rx))
    }

    fn lookup(&self, address: &Multiaddr) -> Option<Endpoint> {
        self.endpoints.lock().get(address).cloned()
    }
}

/// One endpoint of a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    local: Endpoint,
}

impl MemoryTransport {
    /// Connect to `address` and return the local side of the link.
    pub fn connect(&self, address: &str) -> P2pResult<Arc<MemoryConnection>> {
        let address: Multiaddr = address
            .parse()
            .map_err(|_| P2pError::InvalidAddress(address.to_string()))?;
        self.link_to(&address)
    }

    fn link_to(&self, address: &Multiaddr) -> P2pResult<Arc<MemoryConnection>> {
        let remote = self.network.lookup(address).ok_or_else(|| P2pError::DialFailed {
            address: address.to_string(),
            reason: "no listener".to_string(),
        })?;
        if remote.peer_id == self.local.peer_id {
            return Err(P2pError::DialFailed {
                address: address.to_string(),
                reason: "cannot dial self".to_string(),
            });
        }

        Ok(link(&self.local, &remote))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dial(&self, address: &Multiaddr) -> P2pResult<Arc<dyn Connection>> {
        let connection: Arc<dyn Connection> = self.link_to(address)?;
        Ok(connection)
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        vec![self.local.address.clone()]
    }

    async fn shutdown(&self) {
        self.network.endpoints.lock().remove(&self.local.address);
        let links: Vec<Weak<Link>> = std::mem::take(&mut *self.local.links.lock());
        for link in links.iter().filter_map(Weak::upgrade) {
            link.close();
        }
    }
}

struct LinkEnd {
    connection_id: ConnectionId,
    remote_peer_id: PeerId,
    events: mpsc::UnboundedSender<TransportEvent>,
}

/// Both sides of one in-memory connection.
struct Link {
    ends: [LinkEnd; 2],
    sides: Mutex<Option<[Arc<MemoryConnection>; 2]>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Link {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        // Drop the strong side references so the link can be freed.
        self.sides.lock().take();
        for end in &self.ends {
            let _ = end.events.send(TransportEvent::Disconnected {
                peer_id: end.remote_peer_id.clone(),
                connection_id: end.connection_id,
            });
        }
    }
}

fn link(dialer: &Endpoint, listener: &Endpoint) -> Arc<MemoryConnection> {
    let link = Arc::new(Link {
        ends: [
            LinkEnd {
                connection_id: ConnectionId::next(),
                remote_peer_id: listener.peer_id.clone(),
                events: dialer.events.clone(),
            },
            LinkEnd {
                connection_id: ConnectionId::next(),
                remote_peer_id: dialer.peer_id.clone(),
                events: listener.events.clone(),
            },
        ],
        sides: Mutex::new(None),
        cancel: CancellationToken::new(),
        closed: AtomicBool::new(false),
    });

    let dial_side = Arc::new(MemoryConnection {
        link: link.clone(),
        side: 0,
        remote_public_key: listener.public_key.clone(),
        remote_addr: listener.address.clone(),
    });
    let listen_side = Arc::new(MemoryConnection {
        link: link.clone(),
        side: 1,
        remote_public_key: dialer.public_key.clone(),
        remote_addr: dialer.address.clone(),
    });
    *link.sides.lock() = Some([dial_side.clone(), listen_side.clone()]);

    dialer.attach(&link);
    listener.attach(&link);

    debug!(from = %dialer.address, to = %listener.address, "Memory link established");
    let _ = listener.events.send(TransportEvent::Connected(listen_side));
    let _ = dialer.events.send(TransportEvent::Connected(dial_side.clone()));

    dial_side
}

/// One side of an in-memory connection.
pub struct MemoryConnection {
    link: Arc<Link>,
    side: usize,
    remote_public_key: PublicKey,
    remote_addr: Multiaddr,
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id())
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.link.ends[self.side].connection_id
    }

    fn remote_public_key(&self) -> &PublicKey {
        &self.remote_public_key
    }

    fn remote_peer_id(&self) -> &PeerId {
        &self.link.ends[self.side].remote_peer_id
    }

    fn remote_addr(&self) -> &Multiaddr {
        &self.remote_addr
    }

    async fn open_stream(&self, protocol: &str) -> P2pResult<BoxedStream> {
        let remote_side = 1 - self.side;
        let remote = self
            .link
            .sides
            .lock()
            .as_ref()
            .map(|sides| sides[remote_side].clone())
            .ok_or(P2pError::ConnectionClosed)?;

        let (local, far) = tokio::io::duplex(STREAM_BUFFER);
        self.link.ends[remote_side]
            .events
            .send(TransportEvent::InboundStream {
                connection: remote,
                protocol: protocol.to_string(),
                stream: Box::new(far),
            })
            .map_err(|_| P2pError::ConnectionClosed)?;

        Ok(Box::new(local))
    }

    fn abort(&self) {
        self.link.close();
    }

    fn closed(&self) -> CancellationToken {
        self.link.cancel.clone()
    }
}
