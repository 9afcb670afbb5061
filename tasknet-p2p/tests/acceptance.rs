//! Acceptance tests for peer sessions.
//!
//! These tests drive whole nodes over the in-memory network (and over
//! libp2p on loopback) and check what an application sees:
//! 1. Handshake - two workers sharing a netkey learn each other's names
//! 2. Liveness - ping is answered with pong by default
//! 3. Lifecycle - `peer:new` / `peer:lost` and the journal in the peer cache
//! 4. Single session - concurrent connections and extra control streams
//!    yield one registered peer
//! 5. Rejection - wrong netkey, untrusted roles and silent remotes
//! 6. Public nodes - a tokenless beacon is admitted and named by its address
//! 7. Handlers - a failing handler aborts the connection
//! 8. Wire - session traffic between libp2p nodes is encrypted

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use tasknet_core::KeyPair;
use tasknet_p2p::config::CONTROL_PROTOCOL;
use tasknet_p2p::handshake::{perform_handshake, should_initiate_stream, HandshakeTimeouts};
use tasknet_p2p::protocol::{AuthMessage, InfoMessage};
use tasknet_p2p::transport::{MemoryTransport, Multiaddr, Transport};
use tasknet_p2p::{
    handler_fn, Connection, LifecycleEvent, MemoryNetwork, MemoryPeerCache, Message, MessageBus,
    NodeHandle, NodeIdentity, P2pConfig, P2pError, P2pNode, PeerEventKind, PeerId, PeerSnapshot,
    PeerType, SwarmTransport, TransportEvent, TrustPolicy,
};

/// Upper bound for anything that should happen promptly.
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

struct TestNode {
    keypair: KeyPair,
    handle: NodeHandle,
    events: broadcast::Receiver<LifecycleEvent>,
    cache: Arc<MemoryPeerCache>,
    task: JoinHandle<Result<(), P2pError>>,
}

impl TestNode {
    fn id(&self) -> &PeerId {
        self.handle.local_id()
    }

    async fn stop(self) {
        let _ = self.handle.shutdown().await;
        let _ = timeout(EVENT_TIMEOUT, self.task).await;
    }
}

fn worker(secret: &str, name: &str, netkey: &str) -> NodeIdentity {
    NodeIdentity::new(KeyPair::from_secret(secret), PeerType::Worker)
        .with_name(name)
        .with_netkey(netkey)
}

fn start_memory_node(network: &MemoryNetwork, identity: NodeIdentity, address: &str) -> TestNode {
    start_memory_node_with(network, identity, address, |node| node)
}

fn start_memory_node_with(
    network: &MemoryNetwork,
    identity: NodeIdentity,
    address: &str,
    configure: impl FnOnce(P2pNode) -> P2pNode,
) -> TestNode {
    let keypair = identity.keypair().clone();
    let (transport, transport_events) = network.listen(&keypair, address).unwrap();
    let cache = Arc::new(MemoryPeerCache::new());

    let node = P2pNode::new(identity, P2pConfig::default(), Arc::new(transport), transport_events)
        .with_cache(cache.clone());
    let node = configure(node);

    let handle = node.handle();
    let events = handle.subscribe();
    let task = tokio::spawn(node.run());

    TestNode {
        keypair,
        handle,
        events,
        cache,
        task,
    }
}

async fn next_event(events: &mut broadcast::Receiver<LifecycleEvent>) -> LifecycleEvent {
    timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for lifecycle event")
        .expect("event channel closed")
}

async fn expect_new(events: &mut broadcast::Receiver<LifecycleEvent>) -> PeerSnapshot {
    match next_event(events).await {
        LifecycleEvent::PeerNew(peer) => peer,
        other => panic!("expected peer:new, got {other:?}"),
    }
}

async fn expect_lost(events: &mut broadcast::Receiver<LifecycleEvent>) -> PeerSnapshot {
    match next_event(events).await {
        LifecycleEvent::PeerLost(peer) => peer,
        other => panic!("expected peer:lost, got {other:?}"),
    }
}

/// A hand-driven remote endpoint with one control stream to a node.
struct ScriptedRemote {
    connection: Arc<dyn Connection>,
    bus: MessageBus,
    _transport: MemoryTransport,
    _events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Connect `keypair` at `address` to the node at `target` and set up the
/// control stream on whichever side the tie-break picks.
async fn scripted_remote(
    network: &MemoryNetwork,
    keypair: &KeyPair,
    address: &str,
    target: &str,
    target_key: &KeyPair,
) -> ScriptedRemote {
    let (transport, mut events) = network.listen(keypair, address).unwrap();
    let connection: Arc<dyn Connection> = transport.connect(target).unwrap();

    let stream = if should_initiate_stream(&keypair.public_key(), &target_key.public_key()) {
        connection.open_stream(CONTROL_PROTOCOL).await.unwrap()
    } else {
        loop {
            match timeout(EVENT_TIMEOUT, events.recv()).await.unwrap().unwrap() {
                TransportEvent::InboundStream {
                    protocol, stream, ..
                } if protocol == CONTROL_PROTOCOL => break stream,
                _ => continue,
            }
        }
    };

    let bus = MessageBus::new(stream, &connection.closed());
    ScriptedRemote {
        connection,
        bus,
        _transport: transport,
        _events: events,
    }
}

async fn connected_pair() -> (TestNode, TestNode) {
    let network = MemoryNetwork::new();
    let mut x = start_memory_node(&network, worker("x", "x-1", "shared"), "/memory/1");
    let mut y = start_memory_node(&network, worker("y", "y-1", "shared"), "/memory/2");

    x.handle.connect("/memory/2").await.unwrap();
    expect_new(&mut x.events).await;
    expect_new(&mut y.events).await;
    (x, y)
}

#[tokio::test]
async fn test_workers_handshake_and_ping() {
    let network = MemoryNetwork::new();
    let x_addr = "/ip4/10.0.0.1/tcp/4001";
    let y_addr = "/ip4/10.0.0.2/tcp/4001";
    let mut x = start_memory_node(&network, worker("x", "x-1", "shared"), x_addr);
    let mut y = start_memory_node(&network, worker("y", "y-1", "shared"), y_addr);

    let remote = x.handle.connect(y_addr).await.unwrap();
    assert_eq!(&remote, y.id());

    let seen_by_x = expect_new(&mut x.events).await;
    let seen_by_y = expect_new(&mut y.events).await;

    assert_eq!(&seen_by_x.id, y.id());
    assert_eq!(seen_by_x.name.as_deref(), Some("y-1"));
    assert_eq!(seen_by_x.peer_type, PeerType::Worker);
    assert!(!seen_by_x.public);
    assert_eq!(seen_by_x.addresses, vec![y_addr.to_string()]);
    assert_eq!(seen_by_y.name.as_deref(), Some("x-1"));

    // Ping is answered without any application handler
    let peer = x.handle.peer(y.id()).await.unwrap().expect("y registered at x");
    let time = peer.ping(Duration::from_secs(2)).await.unwrap();
    assert!(time > 0);

    let peer = y.handle.peer(x.id()).await.unwrap().expect("x registered at y");
    peer.ping(Duration::from_secs(2)).await.unwrap();

    // One session, one notification per side
    sleep(Duration::from_millis(50)).await;
    assert!(x.events.try_recv().is_err());
    assert!(y.events.try_recv().is_err());

    x.stop().await;
    y.stop().await;
}

#[tokio::test]
async fn test_lost_peer_is_journaled() {
    let (mut x, y) = connected_pair().await;
    assert_eq!(x.cache.peers().len(), 1);

    // Y goes away
    y.stop().await;

    let lost = expect_lost(&mut x.events).await;
    assert_eq!(lost.name.as_deref(), Some("y-1"));
    assert!(x.handle.peers().await.unwrap().is_empty());

    let journal: Vec<PeerEventKind> = x
        .cache
        .events_for(&lost.id)
        .iter()
        .map(|entry| entry.event)
        .collect();
    assert_eq!(journal, vec![PeerEventKind::Connect, PeerEventKind::Disconnect]);
    assert!(x.cache.peers().is_empty());

    x.stop().await;
}

#[tokio::test]
async fn test_shutdown_flushes_empty_snapshot() {
    let (x, y) = connected_pair().await;
    let y_id = y.id().clone();
    let cache = x.cache.clone();
    assert_eq!(cache.peers().len(), 1);
    let flushes = cache.flush_count();

    x.stop().await;

    // The snapshot matches the journal: Y was disconnected, so it is gone
    assert!(cache.peers().is_empty());
    assert!(cache.flush_count() > flushes);
    let last = cache.events_for(&y_id).last().copied().expect("y journaled");
    assert_eq!(last.event, PeerEventKind::Disconnect);

    y.stop().await;
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (mut x, mut y) = connected_pair().await;

    let y_id = y.id().clone();
    assert!(x.handle.disconnect(&y_id).await.unwrap());
    expect_lost(&mut x.events).await;
    expect_lost(&mut y.events).await;

    assert!(!x.handle.disconnect(&y_id).await.unwrap());
    sleep(Duration::from_millis(50)).await;
    assert!(x.events.try_recv().is_err());

    let disconnects = x
        .cache
        .events_for(&y_id)
        .iter()
        .filter(|entry| entry.event == PeerEventKind::Disconnect)
        .count();
    assert_eq!(disconnects, 1);

    x.stop().await;
    y.stop().await;
}

#[tokio::test]
async fn test_concurrent_connections_register_one_peer() {
    let network = MemoryNetwork::new();
    let mut x = start_memory_node(&network, worker("x", "x-1", "shared"), "/memory/1");
    let mut y = start_memory_node(&network, worker("y", "y-1", "shared"), "/memory/2");

    let (from_x, from_y) = tokio::join!(
        x.handle.connect("/memory/2"),
        y.handle.connect("/memory/1")
    );
    from_x.unwrap();
    from_y.unwrap();

    expect_new(&mut x.events).await;
    expect_new(&mut y.events).await;

    sleep(Duration::from_millis(100)).await;
    assert_eq!(x.handle.peers().await.unwrap().len(), 1);
    assert_eq!(y.handle.peers().await.unwrap().len(), 1);
    assert!(x.events.try_recv().is_err());
    assert!(y.events.try_recv().is_err());

    x.stop().await;
    y.stop().await;
}

/// Expect the node to close `stream` without a word.
async fn expect_dropped(mut stream: impl AsyncRead + Unpin) {
    let mut buf = [0u8; 16];
    let read = timeout(EVENT_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("extra stream left open");
    assert!(matches!(read, Ok(0) | Err(_)), "extra stream got data: {read:?}");
}

#[tokio::test]
async fn test_extra_control_stream_dropped_while_connected() {
    let network = MemoryNetwork::new();
    let mut x = start_memory_node(&network, worker("x", "x-1", "shared"), "/memory/1");

    let z = worker("z", "z-1", "shared");
    let remote = scripted_remote(&network, z.keypair(), "/memory/3", "/memory/1", &x.keypair).await;
    perform_handshake(
        &z,
        remote.connection.as_ref(),
        &remote.bus,
        &TrustPolicy::default(),
        HandshakeTimeouts::default(),
        vec![],
    )
    .await
    .unwrap();
    let seen = expect_new(&mut x.events).await;
    assert_eq!(seen.name.as_deref(), Some("z-1"));

    // Z opens a second control stream on the same connection
    let extra = remote.connection.open_stream(CONTROL_PROTOCOL).await.unwrap();
    expect_dropped(extra).await;

    // The first session is untouched
    assert!(!remote.connection.is_closed());
    assert_eq!(x.handle.peers().await.unwrap().len(), 1);
    let reply = remote.bus.request(Message::Ping, Duration::from_secs(2)).await.unwrap();
    assert!(matches!(reply, Message::Pong(_)));

    sleep(Duration::from_millis(50)).await;
    assert!(x.events.try_recv().is_err());
    let journal: Vec<PeerEventKind> =
        x.cache.events_for(&seen.id).iter().map(|e| e.event).collect();
    assert_eq!(journal, vec![PeerEventKind::Connect]);

    x.stop().await;
}

#[tokio::test]
async fn test_extra_control_stream_dropped_during_handshake() {
    let network = MemoryNetwork::new();
    let mut x = start_memory_node(&network, worker("x", "x-1", "shared"), "/memory/1");

    let z = worker("z", "z-1", "shared");
    let remote = scripted_remote(&network, z.keypair(), "/memory/3", "/memory/1", &x.keypair).await;

    // X is waiting for Z's peer:auth on the first stream
    let extra = remote.connection.open_stream(CONTROL_PROTOCOL).await.unwrap();
    expect_dropped(extra).await;
    assert!(!remote.connection.is_closed());

    let result = perform_handshake(
        &z,
        remote.connection.as_ref(),
        &remote.bus,
        &TrustPolicy::default(),
        HandshakeTimeouts::default(),
        vec![],
    )
    .await
    .unwrap();
    assert_eq!(result.name.as_deref(), Some("x-1"));

    let seen = expect_new(&mut x.events).await;
    assert_eq!(seen.name.as_deref(), Some("z-1"));
    sleep(Duration::from_millis(50)).await;
    assert!(x.events.try_recv().is_err());
    assert_eq!(x.handle.peers().await.unwrap().len(), 1);
    assert_eq!(x.cache.events_for(&seen.id).len(), 1);

    x.stop().await;
}

#[test]
fn test_tie_break_picks_exactly_one_side() {
    for _ in 0..64 {
        let a = KeyPair::generate().public_key();
        let b = KeyPair::generate().public_key();
        assert_ne!(should_initiate_stream(&a, &b), should_initiate_stream(&b, &a));
    }
}

#[tokio::test]
async fn test_wrong_netkey_rejected() {
    let network = MemoryNetwork::new();
    let x = start_memory_node(&network, worker("x", "x-1", "shared"), "/memory/1");

    let intruder = worker("intruder", "z-1", "guessed");
    let remote =
        scripted_remote(&network, intruder.keypair(), "/memory/3", "/memory/1", &x.keypair).await;

    let result = perform_handshake(
        &intruder,
        remote.connection.as_ref(),
        &remote.bus,
        &TrustPolicy::default(),
        HandshakeTimeouts::default(),
        vec![],
    )
    .await;
    assert!(matches!(
        result,
        Err(P2pError::AuthRejected(_)) | Err(P2pError::ConnectionClosed)
    ));

    // The node refuses the session and aborts the connection
    timeout(EVENT_TIMEOUT, remote.connection.closed().cancelled())
        .await
        .expect("connection not aborted");
    assert!(x.handle.peers().await.unwrap().is_empty());

    x.stop().await;
}

#[tokio::test]
async fn test_tokenless_beacon_admitted_as_public() {
    let network = MemoryNetwork::new();
    let x_addr = "/ip4/10.0.0.1/tcp/4001";
    let beacon_addr = "/ip4/203.0.113.7/tcp/4001";
    let mut x = start_memory_node(&network, worker("x", "x-1", "shared"), x_addr);

    let beacon = KeyPair::generate();
    let remote = scripted_remote(&network, &beacon, beacon_addr, x_addr, &x.keypair).await;

    remote
        .bus
        .send(Message::Auth(AuthMessage {
            peer_type: PeerType::Beacon,
            auth: None,
        }))
        .unwrap();
    remote
        .bus
        .send(Message::Info(InfoMessage {
            name: None,
            addresses: vec![beacon_addr.into()],
        }))
        .unwrap();

    let peer = expect_new(&mut x.events).await;
    assert_eq!(peer.peer_type, PeerType::Beacon);
    assert!(peer.public);
    assert_eq!(peer.name.as_deref(), Some("203.0.113.7"));

    x.stop().await;
}

#[tokio::test]
async fn test_tokenless_unknown_role_untrusted() {
    let network = MemoryNetwork::new();
    let mut x = start_memory_node(&network, worker("x", "x-1", "shared"), "/memory/1");

    let relay = KeyPair::generate();
    let remote =
        scripted_remote(&network, &relay, "/ip4/203.0.113.8/tcp/4001", "/memory/1", &x.keypair)
            .await;

    remote
        .bus
        .send(Message::Auth(AuthMessage {
            peer_type: PeerType::Other("relay".into()),
            auth: None,
        }))
        .unwrap();

    timeout(EVENT_TIMEOUT, remote.connection.closed().cancelled())
        .await
        .expect("connection not aborted");
    assert!(x.handle.peers().await.unwrap().is_empty());
    assert!(x.events.try_recv().is_err());

    x.stop().await;
}

#[tokio::test]
async fn test_beacons_need_trust_policy() {
    let network = MemoryNetwork::new();
    let x = start_memory_node_with(&network, worker("x", "x-1", "shared"), "/memory/1", |node| {
        node.with_trust_policy(TrustPolicy::deny_all())
    });

    let beacon = KeyPair::generate();
    let remote =
        scripted_remote(&network, &beacon, "/ip4/203.0.113.7/tcp/4001", "/memory/1", &x.keypair)
            .await;
    remote
        .bus
        .send(Message::Auth(AuthMessage {
            peer_type: PeerType::Beacon,
            auth: None,
        }))
        .unwrap();

    timeout(EVENT_TIMEOUT, remote.connection.closed().cancelled())
        .await
        .expect("connection not aborted");
    assert!(x.handle.peers().await.unwrap().is_empty());

    x.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_remote_aborted_after_auth_timeout() {
    let network = MemoryNetwork::new();
    let x = start_memory_node(&network, worker("x", "x-1", "shared"), "/memory/1");

    let silent = KeyPair::generate();
    let started = tokio::time::Instant::now();
    let remote = scripted_remote(&network, &silent, "/memory/4", "/memory/1", &x.keypair).await;

    timeout(Duration::from_secs(30), remote.connection.closed().cancelled())
        .await
        .expect("connection not aborted");

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(7000), "aborted after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(10_000), "aborted after {elapsed:?}");
    assert!(x.handle.peers().await.unwrap().is_empty());

    x.stop().await;
}

#[tokio::test]
async fn test_failing_handler_aborts_connection() {
    let network = MemoryNetwork::new();
    let x_identity = worker("x", "x-1", "shared");
    let mut x = start_memory_node_with(&network, x_identity, "/memory/1", |mut node| {
        node.register_handler(
            PeerType::Worker,
            handler_fn(|_peer| async { Err(anyhow::anyhow!("worker quota exceeded")) }),
        );
        node
    });
    let y = start_memory_node(&network, worker("y", "y-1", "shared"), "/memory/2");

    y.handle.connect("/memory/1").await.unwrap();

    // X registered Y, then its handler failed: no peer:new, only peer:lost
    let lost = expect_lost(&mut x.events).await;
    assert_eq!(&lost.id, y.id());
    assert!(x.handle.peers().await.unwrap().is_empty());

    let journal: Vec<PeerEventKind> =
        x.cache.events_for(&lost.id).iter().map(|e| e.event).collect();
    assert_eq!(journal, vec![PeerEventKind::Connect, PeerEventKind::Disconnect]);

    x.stop().await;
    y.stop().await;
}

#[tokio::test]
async fn test_handler_runs_before_peer_new() {
    let network = MemoryNetwork::new();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let x_identity = worker("x", "x-1", "shared");
    let mut x = start_memory_node_with(&network, x_identity, "/memory/1", move |mut node| {
        node.register_handler(
            PeerType::Worker,
            handler_fn(move |peer| {
                let seen_tx = seen_tx.clone();
                async move {
                    seen_tx.send(peer.name.clone())?;
                    Ok(())
                }
            }),
        );
        node
    });
    let _y = start_memory_node(&network, worker("y", "y-1", "shared"), "/memory/2");

    x.handle.connect("/memory/2").await.unwrap();

    let peer = expect_new(&mut x.events).await;
    assert_eq!(peer.name.as_deref(), Some("y-1"));
    assert_eq!(seen_rx.try_recv().unwrap().as_deref(), Some("y-1"));

    x.stop().await;
}

struct SwarmNode {
    handle: NodeHandle,
    events: broadcast::Receiver<LifecycleEvent>,
    address: Multiaddr,
}

async fn start_swarm_node(identity: NodeIdentity) -> SwarmNode {
    let config = P2pConfig::new("127.0.0.1:0".parse().unwrap());
    let (transport, events) = SwarmTransport::bind(identity.keypair(), &config)
        .await
        .unwrap();
    let address = transport.listen_addrs()[0].clone();

    let node = P2pNode::new(identity, config, transport, events);
    let handle = node.handle();
    let events = handle.subscribe();
    tokio::spawn(node.run());
    SwarmNode {
        handle,
        events,
        address,
    }
}

/// The TCP socket address behind a `/ip4/../tcp/..` multiaddr.
fn socket_addr(address: &Multiaddr) -> SocketAddr {
    use libp2p::multiaddr::Protocol;

    let mut ip: Option<IpAddr> = None;
    let mut port = None;
    for protocol in address.iter() {
        match protocol {
            Protocol::Ip4(v4) => ip = Some(v4.into()),
            Protocol::Ip6(v6) => ip = Some(v6.into()),
            Protocol::Tcp(p) => port = Some(p),
            _ => {}
        }
    }
    SocketAddr::new(ip.unwrap(), port.unwrap())
}

/// Copy bytes from `from` to `to`, keeping a copy of everything that passed.
async fn relay_half(
    mut from: impl AsyncRead + Unpin,
    mut to: impl AsyncWrite + Unpin,
    seen: Arc<Mutex<Vec<u8>>>,
) {
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match from.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        seen.lock().extend_from_slice(&buf[..n]);
        if to.write_all(&buf[..n]).await.is_err() {
            break;
        }
    }
    let _ = to.shutdown().await;
}

/// Forward one TCP connection to `target` and record the bytes on the wire.
async fn start_relay(target: SocketAddr) -> (SocketAddr, Arc<Mutex<Vec<u8>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let captured = seen.clone();
    tokio::spawn(async move {
        let (inbound, _) = listener.accept().await.unwrap();
        let outbound = TcpStream::connect(target).await.unwrap();
        let (in_read, in_write) = inbound.into_split();
        let (out_read, out_write) = outbound.into_split();
        tokio::join!(
            relay_half(in_read, out_write, captured.clone()),
            relay_half(out_read, in_write, captured),
        );
    });

    (address, seen)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[tokio::test]
async fn test_swarm_end_to_end() {
    let mut x = start_swarm_node(worker("x", "x-1", "shared")).await;
    let mut y = start_swarm_node(worker("y", "y-1", "shared")).await;

    x.handle.connect(y.address.to_string()).await.unwrap();

    let seen_by_x = expect_new(&mut x.events).await;
    let seen_by_y = expect_new(&mut y.events).await;
    assert_eq!(seen_by_x.name.as_deref(), Some("y-1"));
    assert_eq!(seen_by_y.name.as_deref(), Some("x-1"));
    assert!(seen_by_y.remote_addr.starts_with("/ip4/127.0.0.1/tcp/"));

    let peer = x.handle.peer(y.handle.local_id()).await.unwrap().unwrap();
    peer.ping(Duration::from_secs(2)).await.unwrap();

    y.handle.shutdown().await.unwrap();
    let lost = expect_lost(&mut x.events).await;
    assert_eq!(&lost.id, y.handle.local_id());

    x.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_swarm_session_is_encrypted_on_the_wire() {
    let mut x = start_swarm_node(worker("x", "x-1", "shared")).await;
    let mut y = start_swarm_node(worker("y", "y-1", "shared")).await;
    let (relay, wire) = start_relay(socket_addr(&y.address)).await;

    // Dial Y through the relay, given as host:port
    x.handle.connect(relay.to_string()).await.unwrap();

    let seen_by_x = expect_new(&mut x.events).await;
    let seen_by_y = expect_new(&mut y.events).await;
    assert_eq!(seen_by_x.name.as_deref(), Some("y-1"));
    assert_eq!(seen_by_y.name.as_deref(), Some("x-1"));

    let peer = x.handle.peer(y.handle.local_id()).await.unwrap().unwrap();
    peer.ping(Duration::from_secs(2)).await.unwrap();

    let wire = wire.lock().clone();
    assert!(!wire.is_empty());
    assert!(!contains(&wire, b"x-1"));
    assert!(!contains(&wire, b"y-1"));
    assert!(!contains(&wire, b"peer:auth"));
    assert!(!contains(&wire, &tasknet_p2p::NETWORK_MAGIC));

    x.handle.shutdown().await.unwrap();
    y.handle.shutdown().await.unwrap();
}
