//! Connection lifecycle controller.
//!
//! One task owns the peer registry and the per-peer session table. Transport
//! events, handshake outcomes, handler completions and commands from
//! [`NodeHandle`]s all arrive as messages to that task, so the check that a
//! peer is not already connected and the registration that follows happen
//! without interleaving.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::bus::MessageBus;
use crate::cache::{MemoryPeerCache, PeerCache};
use crate::config::{P2pConfig, CONTROL_PROTOCOL};
use crate::error::{P2pError, P2pResult};
use crate::handlers::{HandlerRegistry, PeerHandler};
use crate::handshake::{
    perform_handshake, should_initiate_stream, HandshakeResult, HandshakeTimeouts, TrustPolicy,
};
use crate::identity::NodeIdentity;
use crate::peer::{
    unix_millis, JournalEntry, Peer, PeerEventKind, PeerId, PeerRegistry, PeerSnapshot, PeerType,
    SessionState, SessionTable,
};
use crate::protocol::{Message, MessageKind, PongMessage};
use crate::transport::{
    parse_dial_address, BoxedStream, Connection, ConnectionId, Transport, TransportEvent,
};

/// Capacity of the command channel.
const COMMAND_CAPACITY: usize = 64;

/// Capacity of the internal session event channel.
const SESSION_EVENT_CAPACITY: usize = 256;

/// Lifecycle notifications for application code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A peer completed its handshake and its handler (if any) succeeded.
    PeerNew(PeerSnapshot),
    /// A registered peer's connection went away.
    PeerLost(PeerSnapshot),
}

/// One address, or alternatives tried in order until one connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    /// A single address.
    Single(String),
    /// Alternatives for the same node.
    Any(Vec<String>),
}

impl DialTarget {
    /// Parse a comma-separated list of alternatives.
    pub fn parse_list(list: &str) -> Self {
        let addresses: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();
        match addresses.len() {
            1 => DialTarget::Single(addresses[0].clone()),
            _ => DialTarget::Any(addresses),
        }
    }

    fn into_addresses(self) -> Vec<String> {
        match self {
            DialTarget::Single(address) => vec![address],
            DialTarget::Any(addresses) => addresses,
        }
    }
}

impl From<&str> for DialTarget {
    fn from(address: &str) -> Self {
        DialTarget::Single(address.to_string())
    }
}

impl From<String> for DialTarget {
    fn from(address: String) -> Self {
        DialTarget::Single(address)
    }
}

impl From<Vec<String>> for DialTarget {
    fn from(addresses: Vec<String>) -> Self {
        DialTarget::Any(addresses)
    }
}

/// Requests from a [`NodeHandle`].
enum NodeCommand {
    Connect {
        target: DialTarget,
        reply: oneshot::Sender<P2pResult<PeerId>>,
    },
    Peers(oneshot::Sender<Vec<PeerSnapshot>>),
    Peer {
        peer_id: PeerId,
        reply: oneshot::Sender<Option<Peer>>,
    },
    Disconnect {
        peer_id: PeerId,
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Outcomes reported back to the controller by spawned tasks.
enum SessionEvent {
    Established {
        connection: Arc<dyn Connection>,
        bus: MessageBus,
        result: HandshakeResult,
    },
    Failed {
        connection: Arc<dyn Connection>,
        error: P2pError,
    },
    HandlerDone {
        connection: Arc<dyn Connection>,
        peer_type: PeerType,
        result: anyhow::Result<()>,
    },
}

/// Cloneable handle for talking to a running [`P2pNode`].
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<NodeCommand>,
    events: broadcast::Sender<LifecycleEvent>,
    local_id: PeerId,
    listen_addrs: Vec<String>,
}

impl NodeHandle {
    /// This node's peer id.
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Addresses the node's transport listens on.
    pub fn listen_addrs(&self) -> &[String] {
        &self.listen_addrs
    }

    /// Subscribe to `peer:new` / `peer:lost` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Dial a node. Returns the remote peer id once the transport connects;
    /// the session is reported separately as [`LifecycleEvent::PeerNew`].
    pub async fn connect(&self, target: impl Into<DialTarget>) -> P2pResult<PeerId> {
        let (reply, rx) = oneshot::channel();
        self.command(NodeCommand::Connect {
            target: target.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| P2pError::Shutdown)?
    }

    /// Snapshot of the registered peers.
    pub async fn peers(&self) -> P2pResult<Vec<PeerSnapshot>> {
        let (reply, rx) = oneshot::channel();
        self.command(NodeCommand::Peers(reply)).await?;
        rx.await.map_err(|_| P2pError::Shutdown)
    }

    /// A registered peer, for sending messages to it.
    pub async fn peer(&self, peer_id: &PeerId) -> P2pResult<Option<Peer>> {
        let (reply, rx) = oneshot::channel();
        self.command(NodeCommand::Peer {
            peer_id: peer_id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| P2pError::Shutdown)
    }

    /// Abort the connection to a registered peer. Returns whether it was registered.
    pub async fn disconnect(&self, peer_id: &PeerId) -> P2pResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.command(NodeCommand::Disconnect {
            peer_id: peer_id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| P2pError::Shutdown)
    }

    /// Stop the node: every connection is aborted and the cache flushed.
    pub async fn shutdown(&self) -> P2pResult<()> {
        self.command(NodeCommand::Shutdown).await
    }

    async fn command(&self, command: NodeCommand) -> P2pResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| P2pError::Shutdown)
    }
}

/// Register the behaviors every session gets: `ping` answered with `pong`.
pub fn bind_default_behaviors(bus: &MessageBus) {
    bus.handle(MessageKind::Ping, |_| {
        Some(Message::Pong(PongMessage { time: unix_millis() }))
    });
}

/// Main P2P node.
pub struct P2pNode {
    /// P2P configuration.
    config: Arc<P2pConfig>,
    /// Local identity.
    identity: Arc<NodeIdentity>,
    /// Transport for dialing and stream setup.
    transport: Arc<dyn Transport>,
    /// Transport events, taken by `run`.
    transport_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    /// Handlers per peer role.
    handlers: HandlerRegistry,
    /// Admission policy for tokenless peers.
    trust: Arc<TrustPolicy>,
    /// Where lifecycle records go.
    cache: Arc<dyn PeerCache>,
    /// THE authoritative set of established sessions.
    registry: PeerRegistry,
    /// Handshake bookkeeping per peer.
    sessions: SessionTable,
    /// Lifecycle notifications.
    events_tx: broadcast::Sender<LifecycleEvent>,
    /// Command sender (for cloning into handles).
    command_tx: mpsc::Sender<NodeCommand>,
    /// Command receiver, taken by `run`.
    command_rx: Option<mpsc::Receiver<NodeCommand>>,
}

impl P2pNode {
    /// Create a node over `transport`, consuming its event stream.
    pub fn new(
        identity: NodeIdentity,
        config: P2pConfig,
        transport: Arc<dyn Transport>,
        transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);

        Self {
            config: Arc::new(config),
            identity: Arc::new(identity),
            transport,
            transport_rx: Some(transport_rx),
            handlers: HandlerRegistry::new(),
            trust: Arc::new(TrustPolicy::default()),
            cache: Arc::new(MemoryPeerCache::new()),
            registry: PeerRegistry::new(),
            sessions: SessionTable::new(),
            events_tx,
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    /// Use `cache` for journaling and snapshots.
    pub fn with_cache(mut self, cache: Arc<dyn PeerCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the trust policy for tokenless peers.
    pub fn with_trust_policy(mut self, trust: TrustPolicy) -> Self {
        self.trust = Arc::new(trust);
        self
    }

    /// Replace the handler registry.
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Register a handler for a peer role. The first registration wins.
    pub fn register_handler(&mut self, peer_type: PeerType, handler: impl PeerHandler + 'static) {
        self.handlers.register(peer_type, Arc::new(handler));
    }

    /// This node's peer id.
    pub fn local_id(&self) -> &PeerId {
        self.identity.peer_id()
    }

    /// A handle for commands and notifications.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            commands: self.command_tx.clone(),
            events: self.events_tx.clone(),
            local_id: self.identity.peer_id().clone(),
            listen_addrs: self
                .transport
                .listen_addrs()
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Run the node until shut down.
    pub async fn run(mut self) -> P2pResult<()> {
        let mut transport_rx = self.transport_rx.take().ok_or(P2pError::Shutdown)?;
        let mut command_rx = self.command_rx.take().ok_or(P2pError::Shutdown)?;
        let (session_tx, mut session_rx) = mpsc::channel::<SessionEvent>(SESSION_EVENT_CAPACITY);

        tracing::info!(
            peer_id = %self.identity.peer_id(),
            peer_type = %self.identity.peer_type(),
            addrs = ?self.transport.listen_addrs(),
            "P2P node started"
        );

        // Initial connection attempts
        for entry in &self.config.bootstrap_peers {
            let target = DialTarget::parse_list(entry);
            let transport = self.transport.clone();
            tokio::spawn(async move {
                if let Err(e) = dial_any(transport, target.into_addresses()).await {
                    tracing::warn!(error = %e, "Bootstrap dial failed");
                }
            });
        }

        loop {
            tokio::select! {
                // Handle commands, including shutdown
                command = command_rx.recv() => match command {
                    Some(NodeCommand::Shutdown) | None => {
                        tracing::info!("P2P node shutting down");
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },

                // Handle transport events
                Some(event) = transport_rx.recv() => {
                    self.handle_transport_event(event, &session_tx).await;
                }

                // Handle handshake and handler outcomes
                Some(event) = session_rx.recv() => {
                    self.handle_session_event(event, &session_tx).await;
                }
            }
        }

        self.shutdown_peers().await;
        self.transport.shutdown().await;

        Ok(())
    }

    fn handle_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::Connect { target, reply } => {
                let transport = self.transport.clone();
                tokio::spawn(async move {
                    let _ = reply.send(dial_any(transport, target.into_addresses()).await);
                });
            }
            NodeCommand::Peers(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
            NodeCommand::Peer { peer_id, reply } => {
                let _ = reply.send(self.registry.find(&peer_id).cloned());
            }
            NodeCommand::Disconnect { peer_id, reply } => {
                let found = match self.registry.find(&peer_id) {
                    Some(peer) => {
                        peer.disconnect();
                        true
                    }
                    None => false,
                };
                let _ = reply.send(found);
            }
            NodeCommand::Shutdown => {}
        }
    }

    async fn handle_transport_event(
        &mut self,
        event: TransportEvent,
        session_tx: &mpsc::Sender<SessionEvent>,
    ) {
        match event {
            TransportEvent::Connected(connection) => {
                tracing::debug!(
                    peer = %connection.remote_peer_id().short(),
                    addr = %connection.remote_addr(),
                    "Connection established"
                );
                let local_key = self.identity.public_key();
                if should_initiate_stream(&local_key, connection.remote_public_key()) {
                    self.start_session(connection, None, session_tx);
                }
            }

            TransportEvent::InboundStream {
                connection,
                protocol,
                stream,
            } => {
                if protocol != CONTROL_PROTOCOL {
                    tracing::debug!(
                        protocol = %protocol,
                        "Ignoring stream for unsupported protocol"
                    );
                    return;
                }
                self.start_session(connection, Some(stream), session_tx);
            }

            TransportEvent::Disconnected {
                peer_id,
                connection_id,
            } => {
                self.handle_disconnection(&peer_id, connection_id).await;
            }
        }
    }

    /// Run the handshake on a control stream, opening one if `stream` is `None`.
    fn start_session(
        &mut self,
        connection: Arc<dyn Connection>,
        stream: Option<BoxedStream>,
        session_tx: &mpsc::Sender<SessionEvent>,
    ) {
        let peer_id = connection.remote_peer_id().clone();

        if let Some(existing) = self.registry.find(&peer_id) {
            let error = P2pError::DuplicateConnection {
                peer_id: peer_id.to_string(),
            };
            tracing::warn!(peer = %existing, error = %error, "Dropping redundant stream");
            return;
        }
        if !self.sessions.begin_handshake(&peer_id, connection.id()) {
            tracing::debug!(
                peer = %peer_id.short(),
                connection = %connection.id(),
                "Handshake already in progress, dropping stream"
            );
            return;
        }

        let identity = self.identity.clone();
        let trust = self.trust.clone();
        let timeouts = HandshakeTimeouts::from(self.config.as_ref());
        let addresses = self.local_addresses();
        let session_tx = session_tx.clone();

        tokio::spawn(async move {
            let stream = match stream {
                Some(stream) => stream,
                None => match connection.open_stream(CONTROL_PROTOCOL).await {
                    Ok(stream) => stream,
                    Err(error) => {
                        let _ = session_tx.send(SessionEvent::Failed { connection, error }).await;
                        return;
                    }
                },
            };

            let bus = MessageBus::new(stream, &connection.closed());
            let event = match perform_handshake(
                &identity,
                connection.as_ref(),
                &bus,
                &trust,
                timeouts,
                addresses,
            )
            .await
            {
                Ok(result) => SessionEvent::Established {
                    connection,
                    bus,
                    result,
                },
                Err(error) => {
                    bus.close();
                    SessionEvent::Failed { connection, error }
                }
            };
            let _ = session_tx.send(event).await;
        });
    }

    async fn handle_session_event(
        &mut self,
        event: SessionEvent,
        session_tx: &mpsc::Sender<SessionEvent>,
    ) {
        match event {
            SessionEvent::Established {
                connection,
                bus,
                result,
            } => {
                self.handle_established(connection, bus, result, session_tx).await;
            }

            SessionEvent::Failed { connection, error } => {
                let peer_id = connection.remote_peer_id();
                if self.sessions.state(peer_id) == SessionState::Handshaking {
                    self.sessions.release(peer_id, connection.id());
                }
                match &error {
                    P2pError::ConnectionClosed => tracing::debug!(
                        peer = %peer_id.short(),
                        addr = %connection.remote_addr(),
                        "Connection closed during handshake"
                    ),
                    _ => tracing::warn!(
                        peer = %peer_id.short(),
                        addr = %connection.remote_addr(),
                        reason = error.label(),
                        error = %error,
                        "Handshake failed"
                    ),
                }
                connection.abort();
            }

            SessionEvent::HandlerDone {
                connection,
                peer_type,
                result,
            } => match result {
                Ok(()) => {
                    let peer_id = connection.remote_peer_id();
                    let current = self
                        .registry
                        .find(peer_id)
                        .filter(|peer| peer.connection().id() == connection.id());
                    if let Some(peer) = current {
                        self.emit(LifecycleEvent::PeerNew(peer.snapshot()));
                    }
                }
                Err(e) => {
                    let error = P2pError::HandlerFailure {
                        peer_type: peer_type.to_string(),
                        reason: format!("{e:#}"),
                    };
                    tracing::error!(
                        peer = %connection.remote_peer_id().short(),
                        error = %error,
                        "Error while handling new peer"
                    );
                    connection.abort();
                }
            },
        }
    }

    async fn handle_established(
        &mut self,
        connection: Arc<dyn Connection>,
        bus: MessageBus,
        result: HandshakeResult,
        session_tx: &mpsc::Sender<SessionEvent>,
    ) {
        let peer_id = connection.remote_peer_id().clone();

        if connection.is_closed() {
            tracing::debug!(peer = %peer_id.short(), "Connection closed before registration");
            self.sessions.release(&peer_id, connection.id());
            bus.close();
            return;
        }

        bind_default_behaviors(&bus);
        let peer = Peer::from_handshake(connection.clone(), bus.clone(), result);

        if let Err(e) = self.registry.add(peer) {
            tracing::warn!(error = %e, "Registry refused peer");
            self.sessions.release(&peer_id, connection.id());
            bus.close();
            return;
        }
        self.sessions.mark_connected(&peer_id, connection.id());

        let Some((snapshot, entry)) = self.registry.record(&peer_id, PeerEventKind::Connect) else {
            return;
        };
        tracing::info!(
            peer = %peer_id.short(),
            peer_type = %snapshot.peer_type,
            name = snapshot.name.as_deref().unwrap_or(""),
            public = snapshot.public,
            addr = %snapshot.remote_addr,
            "New peer"
        );
        self.record_event(&snapshot, &entry).await;
        self.flush_peers().await;

        let Some(peer) = self.registry.find(&peer_id).cloned() else {
            return;
        };
        match self.handlers.find(&peer.peer_type) {
            Some(handler) => {
                let session_tx = session_tx.clone();
                tokio::spawn(async move {
                    let connection = peer.connection().clone();
                    let peer_type = peer.peer_type.clone();
                    let result = handler.on_peer(peer).await;
                    let _ = session_tx
                        .send(SessionEvent::HandlerDone {
                            connection,
                            peer_type,
                            result,
                        })
                        .await;
                });
            }
            None => self.emit(LifecycleEvent::PeerNew(snapshot)),
        }
    }

    /// Remove the peer if `connection_id` is its registered connection.
    async fn handle_disconnection(&mut self, peer_id: &PeerId, connection_id: ConnectionId) {
        if let Some(snapshot) = self.drop_peer(peer_id, connection_id).await {
            self.flush_peers().await;
            self.emit(LifecycleEvent::PeerLost(snapshot));
        }
    }

    /// Unregister and journal the peer. The snapshot is not flushed.
    async fn drop_peer(
        &mut self,
        peer_id: &PeerId,
        connection_id: ConnectionId,
    ) -> Option<PeerSnapshot> {
        let registered = self
            .registry
            .find(peer_id)
            .is_some_and(|peer| peer.connection().id() == connection_id);
        if !registered {
            tracing::trace!(
                peer = %peer_id.short(),
                connection = %connection_id,
                "Disconnect of unregistered connection"
            );
            return None;
        }

        let mut peer = self.registry.remove(peer_id)?;
        self.sessions.release(peer_id, connection_id);
        peer.bus().close();

        tracing::info!(
            peer = %peer_id.short(),
            peer_type = %peer.peer_type,
            name = peer.display_name(),
            "Lost peer"
        );

        let entry = peer.record(PeerEventKind::Disconnect);
        let snapshot = peer.snapshot();
        self.record_event(&snapshot, &entry).await;

        Some(snapshot)
    }

    async fn record_event(&self, snapshot: &PeerSnapshot, entry: &JournalEntry) {
        if let Err(e) = self.cache.record_peer_event(snapshot, entry).await {
            tracing::warn!(error = %e, event = %entry.event, "Failed to record peer event");
        }
    }

    async fn flush_peers(&self) {
        if let Err(e) = self.cache.flush_peers(&self.registry.snapshot()).await {
            tracing::warn!(error = %e, "Failed to flush peers");
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    /// Addresses announced in `peer:info`.
    fn local_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .transport
            .listen_addrs()
            .iter()
            .map(ToString::to_string)
            .collect();
        for addr in self.identity.listen_addrs() {
            if !addresses.contains(addr) {
                addresses.push(addr.clone());
            }
        }
        addresses
    }

    /// Abort every registered connection, journal the disconnects and flush
    /// the now empty snapshot.
    ///
    /// Peers to dial after a restart are kept by the cache's known-peer list,
    /// not by the snapshot.
    async fn shutdown_peers(&mut self) {
        for peer_id in self.registry.ids() {
            let Some(connection) = self.registry.find(&peer_id).map(|p| p.connection().clone())
            else {
                continue;
            };
            connection.abort();
            if let Some(snapshot) = self.drop_peer(&peer_id, connection.id()).await {
                self.emit(LifecycleEvent::PeerLost(snapshot));
            }
        }
        self.flush_peers().await;
    }
}

/// Dial alternatives in order until one connects.
async fn dial_any(transport: Arc<dyn Transport>, addresses: Vec<String>) -> P2pResult<PeerId> {
    if addresses.is_empty() {
        return Err(P2pError::InvalidAddress("no addresses to dial".to_string()));
    }

    let mut last_error = None;
    for address in &addresses {
        let target = match parse_dial_address(address) {
            Ok(target) => target,
            Err(e) => {
                tracing::debug!(addr = %address, error = %e, "Skipping invalid address");
                last_error = Some(e);
                continue;
            }
        };
        match transport.dial(&target).await {
            Ok(connection) => return Ok(connection.remote_peer_id().clone()),
            Err(e) => {
                tracing::debug!(addr = %address, error = %e, "Dial failed");
                last_error = Some(e);
            }
        }
    }

    Err(P2pError::DialFailed {
        address: addresses.join(","),
        reason: last_error.map(|e| e.to_string()).unwrap_or_default(),
    })
}
