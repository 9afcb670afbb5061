//! Node orchestrator.
//!
//! Composes the libp2p transport, the peer cache and the per-role handlers into
//! a running P2P node.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use tasknet_p2p::{
    handler_fn, FilePeerCache, LifecycleEvent, MemoryPeerCache, NodeHandle, P2pNode, P2pResult,
    Peer, PeerCache, PeerSnapshot, PeerType, SwarmTransport, Transport,
};

use crate::config::NodeConfig;
use crate::shutdown::{shutdown_channel, wait_for_shutdown_signal, ShutdownGuard, ShutdownTx};

/// Subdirectory of the data directory holding the peer cache.
const PEER_CACHE_DIR: &str = "peers";

/// How long the worker handler waits for its first pong.
const WELCOME_PING_TIMEOUT: Duration = Duration::from_secs(3);

/// The main node structure.
pub struct Node {
    /// Node configuration.
    config: NodeConfig,

    /// Shutdown signal sender.
    shutdown_tx: ShutdownTx,
}

/// A started node.
pub struct RunningNode {
    /// Handle for commands and notifications.
    pub handle: NodeHandle,
    /// The P2P controller task.
    pub task: JoinHandle<P2pResult<()>>,
}

impl Node {
    /// Create a new node with the given configuration.
    pub fn new(config: NodeConfig) -> Self {
        let (shutdown_tx, _) = shutdown_channel();
        Self {
            config,
            shutdown_tx,
        }
    }

    /// Sender that stops [`run`](Self::run) when signalled.
    pub fn shutdown_handle(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Run the node until SIGINT/SIGTERM or the shutdown handle fires.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut guard = ShutdownGuard::new(&self.shutdown_tx);
        let running = self.start().await?;

        tokio::select! {
            result = wait_for_shutdown_signal() => result?,
            _ = guard.wait() => tracing::info!("Shutdown requested"),
        }

        tracing::info!("Shutting down node...");
        running.handle.shutdown().await?;
        running.task.await??;

        tracing::info!("Node shutdown complete");
        Ok(())
    }

    /// Bind the transport and spawn the P2P node.
    pub async fn start(&self) -> anyhow::Result<RunningNode> {
        let identity = self.config.identity();
        let mut p2p_config = self.config.p2p_config();

        let cache: Arc<dyn PeerCache> = match &self.config.data_dir {
            Some(dir) => {
                let cache = FilePeerCache::open(dir.join(PEER_CACHE_DIR)).await?;
                tracing::info!(path = ?cache.peers_path(), "Using peer cache");

                // Peers seen in earlier runs are dialed again
                let known = cache.known_peers().await?;
                for entry in redial_targets(&known, identity.peer_id().as_str()) {
                    if !p2p_config.bootstrap_peers.contains(&entry) {
                        p2p_config.bootstrap_peers.push(entry);
                    }
                }
                Arc::new(cache)
            }
            None => {
                tracing::info!("Running without persistence (no data directory)");
                Arc::new(MemoryPeerCache::new())
            }
        };

        let (transport, events) = SwarmTransport::bind(identity.keypair(), &p2p_config).await?;

        tracing::info!("Starting TaskNet node...");
        tracing::info!("  Peer id: {}", identity.peer_id());
        tracing::info!("  Node type: {}", identity.peer_type());
        tracing::info!("  Name: {}", identity.name().unwrap_or("-"));
        let netkey = if identity.netkey().is_some() { "set" } else { "none" };
        tracing::info!("  Network key: {}", netkey);
        for addr in transport.listen_addrs() {
            tracing::info!("  P2P address: {}", addr);
        }
        tracing::info!("  Bootstrap peers: {}", p2p_config.bootstrap_peers.len());

        let mut p2p_node = P2pNode::new(identity, p2p_config, transport, events).with_cache(cache);
        p2p_node.register_handler(PeerType::Beacon, handler_fn(on_beacon));
        p2p_node.register_handler(PeerType::Worker, handler_fn(on_worker));

        let handle = p2p_node.handle();
        spawn_event_logger(&handle);

        let task = tokio::spawn(async move {
            let result = p2p_node.run().await;
            match &result {
                Ok(()) => tracing::info!("P2P node stopped gracefully"),
                Err(e) => tracing::error!("P2P node error: {}", e),
            }
            result
        });

        Ok(RunningNode { handle, task })
    }
}

/// Dial targets for cached peers: each peer's addresses as alternatives.
fn redial_targets(cached: &[PeerSnapshot], local_id: &str) -> Vec<String> {
    cached
        .iter()
        .filter(|peer| peer.id.as_str() != local_id && !peer.addresses.is_empty())
        .map(|peer| peer.addresses.join(","))
        .collect()
}

async fn on_beacon(peer: Peer) -> anyhow::Result<()> {
    tracing::info!(
        peer = %peer.id.short(),
        name = peer.display_name(),
        public = peer.public,
        addresses = ?peer.addresses,
        "Beacon connected"
    );
    Ok(())
}

async fn on_worker(peer: Peer) -> anyhow::Result<()> {
    match peer.ping(WELCOME_PING_TIMEOUT).await {
        Ok(time) => tracing::info!(
            peer = %peer.id.short(),
            name = peer.display_name(),
            remote_time = time,
            "Worker connected"
        ),
        Err(e) => tracing::warn!(
            peer = %peer.id.short(),
            name = peer.display_name(),
            error = %e,
            "Worker connected but did not answer ping"
        ),
    }
    Ok(())
}

fn spawn_event_logger(handle: &NodeHandle) {
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LifecycleEvent::PeerNew(peer) => tracing::info!(
                    "peer:new {} {} ({})",
                    peer.peer_type,
                    peer.name.as_deref().unwrap_or(peer.id.short()),
                    peer.remote_addr
                ),
                LifecycleEvent::PeerLost(peer) => tracing::info!(
                    "peer:lost {} {} ({})",
                    peer.peer_type,
                    peer.name.as_deref().unwrap_or(peer.id.short()),
                    peer.remote_addr
                ),
            }
        }
    });
}
