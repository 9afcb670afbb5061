//! libp2p transport.
//!
//! Connections run over TCP, are secured with Noise and multiplexed with
//! Yamux. The libp2p identity is the node's ed25519 key, so the remote key a
//! connection reports is the one Noise authenticated. Protocol streams are
//! opened and accepted through `libp2p-stream`.
//!
//! The swarm is owned by a single driver task. Handles talk to it over a
//! command channel, and it reports connections and inbound streams as
//! [`TransportEvent`]s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use libp2p::multiaddr::multihash::Multihash;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::SwarmEvent;
use libp2p::{identity, noise, tcp, yamux, StreamProtocol, Swarm, SwarmBuilder};
use libp2p_stream::Control;
use parking_lot::Mutex;
use tasknet_core::{KeyPair, PublicKey};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tokio_util::sync::CancellationToken;

use super::address::socket_multiaddr;
use super::{BoxedStream, Connection, ConnectionId, Multiaddr, Transport, TransportEvent};
use crate::config::{P2pConfig, CONTROL_PROTOCOL};
use crate::error::{P2pError, P2pResult};
use crate::peer::PeerId;

/// Sessions end by explicit abort, never by idling.
const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Streams kept per peer while its connection is not yet reported.
const MAX_EARLY_STREAMS: usize = 8;

/// Multihash code of an inlined public key.
const IDENTITY_MULTIHASH: u64 = 0x00;

type DialReply = oneshot::Sender<P2pResult<Arc<SwarmConnection>>>;

enum SwarmCommand {
    Dial {
        address: Multiaddr,
        reply: DialReply,
    },
    Inbound {
        peer: libp2p::PeerId,
        protocol: String,
        stream: libp2p::Stream,
    },
    Close(libp2p::swarm::ConnectionId),
    Shutdown(Option<oneshot::Sender<()>>),
}

/// Transport backed by a libp2p swarm.
pub struct SwarmTransport {
    listen_addrs: Arc<Mutex<Vec<Multiaddr>>>,
    connect_timeout: Duration,
    commands: mpsc::UnboundedSender<SwarmCommand>,
}

impl SwarmTransport {
    /// Listen on `config.bind_addr` and accept control streams.
    pub async fn bind(
        keypair: &KeyPair,
        config: &P2pConfig,
    ) -> P2pResult<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>)> {
        Self::bind_with_protocols(keypair, config, &[CONTROL_PROTOCOL]).await
    }

    /// Listen on `config.bind_addr` and accept streams for `protocols`.
    pub async fn bind_with_protocols(
        keypair: &KeyPair,
        config: &P2pConfig,
        protocols: &[&str],
    ) -> P2pResult<(Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>)> {
        let mut swarm = build_swarm(keypair)?;
        let mut control = swarm.behaviour().new_control();

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        for protocol in protocols {
            let incoming = control
                .accept(stream_protocol(protocol)?)
                .map_err(|e| P2pError::Transport(e.to_string()))?;
            tokio::spawn(forward_inbound(
                incoming,
                protocol.to_string(),
                commands.clone(),
                shutdown.clone(),
            ));
        }

        swarm
            .listen_on(socket_multiaddr(&config.bind_addr))
            .map_err(|e| P2pError::Transport(e.to_string()))?;
        let first = match timeout(config.connect_timeout, first_listen_addr(&mut swarm)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(P2pError::Transport(format!(
                    "no listen address for {}",
                    config.bind_addr
                )))
            }
        };
        tracing::info!(
            addr = %first,
            peer = %swarm.local_peer_id(),
            "Listening for inbound connections"
        );

        let listen_addrs = Arc::new(Mutex::new(vec![first]));
        let (events, events_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            swarm,
            control,
            commands: commands_rx,
            command_tx: commands.clone(),
            events,
            listen_addrs: listen_addrs.clone(),
            connections: HashMap::new(),
            pending_dials: HashMap::new(),
            early_streams: HashMap::new(),
            shutdown,
        };
        tokio::spawn(driver.run());

        let transport = Arc::new(Self {
            listen_addrs,
            connect_timeout: config.connect_timeout,
            commands,
        });
        Ok((transport, events_rx))
    }
}

impl Drop for SwarmTransport {
    fn drop(&mut self) {
        let _ = self.commands.send(SwarmCommand::Shutdown(None));
    }
}

#[async_trait]
impl Transport for SwarmTransport {
    async fn dial(&self, address: &Multiaddr) -> P2pResult<Arc<dyn Connection>> {
        tracing::debug!(addr = %address, "Connecting to peer");
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(SwarmCommand::Dial {
                address: address.clone(),
                reply,
            })
            .map_err(|_| P2pError::Shutdown)?;

        let connection = match timeout(self.connect_timeout, reply_rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(P2pError::Shutdown),
            Err(_) => {
                return Err(P2pError::ConnectionTimeout {
                    addr: address.to_string(),
                })
            }
        };
        let connection: Arc<dyn Connection> = connection;
        Ok(connection)
    }

    fn listen_addrs(&self) -> Vec<Multiaddr> {
        self.listen_addrs.lock().clone()
    }

    async fn shutdown(&self) {
        tracing::info!("Swarm transport shutting down");
        let (ack, ack_rx) = oneshot::channel();
        if self.commands.send(SwarmCommand::Shutdown(Some(ack))).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

fn build_swarm(keypair: &KeyPair) -> P2pResult<Swarm<libp2p_stream::Behaviour>> {
    let mut secret = *keypair.secret_bytes();
    let identity = identity::Keypair::ed25519_from_bytes(&mut secret)
        .map_err(|e| P2pError::Transport(e.to_string()))?;

    let swarm = SwarmBuilder::with_existing_identity(identity)
        .with_tokio()
        .with_tcp(
            tcp::Config::default().nodelay(true),
            noise::Config::new,
            yamux::Config::default,
        )
        .map_err(|e| P2pError::Transport(e.to_string()))?
        .with_dns()
        .map_err(|e| P2pError::Transport(e.to_string()))?
        .with_behaviour(|_| libp2p_stream::Behaviour::new())
        .map_err(|e| P2pError::Transport(e.to_string()))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(IDLE_CONNECTION_TIMEOUT))
        .build();
    Ok(swarm)
}

fn stream_protocol(protocol: &str) -> P2pResult<StreamProtocol> {
    StreamProtocol::try_from_owned(protocol.to_string())
        .map_err(|e| P2pError::Transport(format!("{protocol}: {e}")))
}

/// The ed25519 key inlined in a libp2p peer id.
fn public_key_of(peer: &libp2p::PeerId) -> Option<PublicKey> {
    let multihash: Multihash<64> = (*peer).into();
    if multihash.code() != IDENTITY_MULTIHASH {
        return None;
    }
    let key = identity::PublicKey::try_decode_protobuf(multihash.digest()).ok()?;
    let key = key.try_into_ed25519().ok()?;
    PublicKey::from_bytes(&key.to_bytes()).ok()
}

async fn first_listen_addr(swarm: &mut Swarm<libp2p_stream::Behaviour>) -> P2pResult<Multiaddr> {
    loop {
        match swarm.select_next_some().await {
            SwarmEvent::NewListenAddr { address, .. } => return Ok(address),
            SwarmEvent::ListenerClosed { reason, .. } => {
                let reason = match reason {
                    Ok(()) => "listener closed".to_string(),
                    Err(e) => e.to_string(),
                };
                return Err(P2pError::Transport(reason));
            }
            SwarmEvent::ListenerError { error, .. } => {
                return Err(P2pError::Transport(error.to_string()))
            }
            _ => {}
        }
    }
}

async fn forward_inbound(
    mut incoming: libp2p_stream::IncomingStreams,
    protocol: String,
    commands: mpsc::UnboundedSender<SwarmCommand>,
    shutdown: CancellationToken,
) {
    loop {
        let (peer, stream) = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = incoming.next() => match next {
                Some(inbound) => inbound,
                None => break,
            },
        };
        let command = SwarmCommand::Inbound {
            peer,
            protocol: protocol.clone(),
            stream,
        };
        if commands.send(command).is_err() {
            break;
        }
    }
}

struct Driver {
    swarm: Swarm<libp2p_stream::Behaviour>,
    control: Control,
    commands: mpsc::UnboundedReceiver<SwarmCommand>,
    command_tx: mpsc::UnboundedSender<SwarmCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
    listen_addrs: Arc<Mutex<Vec<Multiaddr>>>,
    connections: HashMap<libp2p::swarm::ConnectionId, Arc<SwarmConnection>>,
    pending_dials: HashMap<libp2p::swarm::ConnectionId, (Multiaddr, DialReply)>,
    early_streams: HashMap<libp2p::PeerId, Vec<(String, libp2p::Stream)>>,
    shutdown: CancellationToken,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SwarmCommand::Shutdown(ack)) => {
                        self.close_all();
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.close_all();
                        break;
                    }
                },

                event = self.swarm.select_next_some() => self.handle_event(event),
            }
        }
        self.shutdown.cancel();
        tracing::debug!("Swarm driver stopped");
    }

    fn handle_command(&mut self, command: SwarmCommand) {
        match command {
            SwarmCommand::Dial { address, reply } => {
                let opts = DialOpts::unknown_peer_id().address(address.clone()).build();
                let swarm_id = opts.connection_id();
                match self.swarm.dial(opts) {
                    Ok(()) => {
                        self.pending_dials.insert(swarm_id, (address, reply));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(P2pError::DialFailed {
                            address: address.to_string(),
                            reason: e.to_string(),
                        }));
                    }
                }
            }
            SwarmCommand::Inbound {
                peer,
                protocol,
                stream,
            } => self.deliver(peer, protocol, stream),
            SwarmCommand::Close(swarm_id) => {
                self.swarm.close_connection(swarm_id);
            }
            SwarmCommand::Shutdown(_) => {}
        }
    }

    fn handle_event(&mut self, event: SwarmEvent<()>) {
        match event {
            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                let pending = self.pending_dials.remove(&connection_id);
                let Some(remote_public_key) = public_key_of(&peer_id) else {
                    tracing::debug!(peer = %peer_id, "Remote identity is not an ed25519 key");
                    self.swarm.close_connection(connection_id);
                    if let Some((address, reply)) = pending {
                        let _ = reply.send(Err(P2pError::DialFailed {
                            address: address.to_string(),
                            reason: "unsupported remote key".to_string(),
                        }));
                    }
                    return;
                };

                let connection = Arc::new(SwarmConnection {
                    id: ConnectionId::next(),
                    swarm_id: connection_id,
                    peer: peer_id,
                    remote_peer_id: PeerId::from_public_key(&remote_public_key),
                    remote_public_key,
                    remote_addr: endpoint.get_remote_address().clone(),
                    control: self.control.clone(),
                    commands: self.command_tx.clone(),
                    cancel: CancellationToken::new(),
                });
                tracing::debug!(
                    addr = %connection.remote_addr,
                    peer = %connection.remote_peer_id.short(),
                    dialer = endpoint.is_dialer(),
                    "Connection established"
                );

                self.connections.insert(connection_id, connection.clone());
                let _ = self.events.send(TransportEvent::Connected(connection.clone()));
                if let Some((_, reply)) = pending {
                    let _ = reply.send(Ok(connection));
                }

                if let Some(streams) = self.early_streams.remove(&peer_id) {
                    for (protocol, stream) in streams {
                        self.deliver(peer_id, protocol, stream);
                    }
                }
            }

            SwarmEvent::OutgoingConnectionError {
                connection_id,
                error,
                ..
            } => {
                if let Some((address, reply)) = self.pending_dials.remove(&connection_id) {
                    let _ = reply.send(Err(P2pError::DialFailed {
                        address: address.to_string(),
                        reason: error.to_string(),
                    }));
                }
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                connection_id,
                cause,
                ..
            } => {
                if let Some(connection) = self.connections.remove(&connection_id) {
                    tracing::debug!(
                        addr = %connection.remote_addr,
                        cause = ?cause,
                        "Connection closed"
                    );
                    self.report_closed(&connection);
                }
                if !self.connections.values().any(|c| c.peer == peer_id) {
                    self.early_streams.remove(&peer_id);
                }
            }

            SwarmEvent::NewListenAddr { address, .. } => {
                tracing::info!(addr = %address, "Listening for inbound connections");
                let mut addrs = self.listen_addrs.lock();
                if !addrs.contains(&address) {
                    addrs.push(address);
                }
            }

            SwarmEvent::ExpiredListenAddr { address, .. } => {
                self.listen_addrs.lock().retain(|a| a != &address);
            }

            SwarmEvent::IncomingConnectionError {
                send_back_addr,
                error,
                ..
            } => {
                tracing::debug!(
                    addr = %send_back_addr,
                    error = %error,
                    "Inbound connection setup failed"
                );
            }

            _ => {}
        }
    }

    /// Hand an inbound stream to the newest open connection of `peer`.
    fn deliver(&mut self, peer: libp2p::PeerId, protocol: String, stream: libp2p::Stream) {
        let connection = self
            .connections
            .values()
            .filter(|c| c.peer == peer && !c.cancel.is_cancelled())
            .max_by_key(|c| c.id)
            .cloned();

        match connection {
            Some(connection) => {
                let _ = self.events.send(TransportEvent::InboundStream {
                    connection,
                    protocol,
                    stream: Box::new(stream.compat()),
                });
            }
            None => {
                let early = self.early_streams.entry(peer).or_default();
                if early.len() < MAX_EARLY_STREAMS {
                    early.push((protocol, stream));
                }
            }
        }
    }

    fn report_closed(&self, connection: &SwarmConnection) {
        connection.cancel.cancel();
        let _ = self.events.send(TransportEvent::Disconnected {
            peer_id: connection.remote_peer_id.clone(),
            connection_id: connection.id,
        });
    }

    fn close_all(&mut self) {
        for (swarm_id, connection) in std::mem::take(&mut self.connections) {
            self.swarm.close_connection(swarm_id);
            self.report_closed(&connection);
        }
        for (_, (address, reply)) in self.pending_dials.drain() {
            let _ = reply.send(Err(P2pError::DialFailed {
                address: address.to_string(),
                reason: "transport shut down".to_string(),
            }));
        }
        self.early_streams.clear();
    }
}

/// A Noise-secured libp2p connection.
pub struct SwarmConnection {
    id: ConnectionId,
    swarm_id: libp2p::swarm::ConnectionId,
    peer: libp2p::PeerId,
    remote_public_key: PublicKey,
    remote_peer_id: PeerId,
    remote_addr: Multiaddr,
    control: Control,
    commands: mpsc::UnboundedSender<SwarmCommand>,
    cancel: CancellationToken,
}

impl fmt::Debug for SwarmConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwarmConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

#[async_trait]
impl Connection for SwarmConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_public_key(&self) -> &PublicKey {
        &self.remote_public_key
    }

    fn remote_peer_id(&self) -> &PeerId {
        &self.remote_peer_id
    }

    fn remote_addr(&self) -> &Multiaddr {
        &self.remote_addr
    }

    async fn open_stream(&self, protocol: &str) -> P2pResult<BoxedStream> {
        if self.cancel.is_cancelled() {
            return Err(P2pError::ConnectionClosed);
        }
        let mut control = self.control.clone();
        match control.open_stream(self.peer, stream_protocol(protocol)?).await {
            Ok(stream) => Ok(Box::new(stream.compat())),
            Err(_) if self.cancel.is_cancelled() => Err(P2pError::ConnectionClosed),
            Err(e) => Err(P2pError::Transport(e.to_string())),
        }
    }

    fn abort(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let _ = self.commands.send(SwarmCommand::Close(self.swarm_id));
    }

    fn closed(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn bind() -> (KeyPair, Arc<SwarmTransport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let keypair = KeyPair::generate();
        let config = P2pConfig::new("127.0.0.1:0".parse().unwrap())
            .with_connect_timeout(Duration::from_secs(5));
        let (transport, events) = SwarmTransport::bind_with_protocols(
            &keypair,
            &config,
            &[CONTROL_PROTOCOL, "/test/1"],
        )
        .await
        .unwrap();
        (keypair, transport, events)
    }

    async fn next_connected(
        events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Arc<dyn Connection> {
        loop {
            match events.recv().await.unwrap() {
                TransportEvent::Connected(connection) => return connection,
                other => tracing::debug!(event = ?other, "skipping"),
            }
        }
    }

    #[test]
    fn test_public_key_round_trips_through_peer_id() {
        let keypair = KeyPair::generate();
        let mut secret = *keypair.secret_bytes();
        let identity = identity::Keypair::ed25519_from_bytes(&mut secret).unwrap();
        let peer = identity.public().to_peer_id();

        assert_eq!(public_key_of(&peer), Some(keypair.public_key()));
        assert_eq!(public_key_of(&libp2p::PeerId::random()), None);
    }

    #[tokio::test]
    async fn test_dial_proves_identities() {
        let (ka, ta, _events_a) = bind().await;
        let (kb, tb, mut events_b) = bind().await;
        let target = tb.listen_addrs()[0].clone();
        assert!(target.to_string().starts_with("/ip4/127.0.0.1/tcp/"));

        let conn = ta.dial(&target).await.unwrap();
        assert_eq!(conn.remote_public_key(), &kb.public_key());
        assert_eq!(conn.remote_addr(), &target);

        let inbound = next_connected(&mut events_b).await;
        assert_eq!(inbound.remote_public_key(), &ka.public_key());
        assert!(inbound.remote_addr().to_string().starts_with("/ip4/127.0.0.1/tcp/"));
    }

    #[tokio::test]
    async fn test_stream_carries_bytes() {
        let (_ka, ta, _events_a) = bind().await;
        let (_kb, tb, mut events_b) = bind().await;

        let conn = ta.dial(&tb.listen_addrs()[0]).await.unwrap();
        let mut stream = conn.open_stream("/test/1").await.unwrap();
        stream.write_all(b"hello").await.unwrap();
        stream.flush().await.unwrap();

        loop {
            match events_b.recv().await.unwrap() {
                TransportEvent::InboundStream {
                    protocol,
                    mut stream,
                    ..
                } => {
                    assert_eq!(protocol, "/test/1");
                    let mut buf = [0u8; 5];
                    stream.read_exact(&mut buf).await.unwrap();
                    assert_eq!(&buf, b"hello");
                    break;
                }
                TransportEvent::Connected(_) => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_abort_disconnects_both_sides() {
        let (_ka, ta, mut events_a) = bind().await;
        let (_kb, tb, mut events_b) = bind().await;

        let conn = ta.dial(&tb.listen_addrs()[0]).await.unwrap();
        let _ = next_connected(&mut events_a).await;
        let inbound = next_connected(&mut events_b).await;

        conn.abort();
        conn.abort();
        assert!(conn.is_closed());

        assert!(matches!(
            events_a.recv().await.unwrap(),
            TransportEvent::Disconnected { connection_id, .. } if connection_id == conn.id()
        ));
        assert!(matches!(
            events_b.recv().await.unwrap(),
            TransportEvent::Disconnected { connection_id, .. } if connection_id == inbound.id()
        ));
        assert!(matches!(
            conn.open_stream("/test/1").await,
            Err(P2pError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_dial_nobody_fails() {
        let (_ka, ta, _events_a) = bind().await;
        let (_kb, tb, _events_b) = bind().await;
        let target = tb.listen_addrs()[0].clone();
        tb.shutdown().await;
        drop(tb);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = ta.dial(&target).await;
        assert!(matches!(
            result,
            Err(P2pError::DialFailed { .. } | P2pError::ConnectionTimeout { .. })
        ));
    }
}
