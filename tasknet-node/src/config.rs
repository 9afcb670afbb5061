//! Node configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use tasknet_core::KeyPair;
use tasknet_p2p::{NodeIdentity, P2pConfig, PeerType};

use crate::cli::Cli;

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Data directory for the peer cache. `None` keeps it in memory.
    pub data_dir: Option<PathBuf>,

    /// P2P listen address.
    pub p2p_addr: SocketAddr,

    /// Extra addresses announced to peers.
    pub announce: Vec<String>,

    /// Nodes to dial at startup.
    pub peers: Vec<String>,

    /// Role announced to peers.
    pub node_type: PeerType,

    /// Node name.
    pub name: Option<String>,

    /// Shared network key.
    pub netkey: Option<String>,

    /// Secret for a stable identity key.
    pub identity_secret: Option<String>,

    /// Log level.
    pub log_level: String,
}

impl NodeConfig {
    /// Create a node configuration from CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            data_dir: (!cli.no_cache).then(|| cli.expanded_data_dir()),
            p2p_addr: cli.listen,
            announce: cli.announce.clone(),
            peers: cli.peers.clone(),
            node_type: cli.node_type.parse().unwrap_or(PeerType::Worker),
            name: cli.name.clone(),
            netkey: cli.netkey.clone(),
            identity_secret: cli.identity.clone(),
            log_level: cli.log_level.clone(),
        }
    }

    /// Build P2P configuration from node config.
    pub fn p2p_config(&self) -> P2pConfig {
        P2pConfig::new(self.p2p_addr).with_bootstrap_peers(self.peers.clone())
    }

    /// Build the node identity.
    pub fn identity(&self) -> NodeIdentity {
        let keypair = match &self.identity_secret {
            Some(secret) => KeyPair::from_secret(secret),
            None => KeyPair::generate(),
        };

        let mut identity = NodeIdentity::new(keypair, self.node_type.clone())
            .with_listen_addrs(self.announce.clone());
        if let Some(name) = &self.name {
            identity = identity.with_name(name.clone());
        }
        if let Some(netkey) = &self.netkey {
            identity = identity.with_netkey(netkey);
        }
        identity
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            p2p_addr: SocketAddr::from(([0, 0, 0, 0], 4001)),
            announce: Vec::new(),
            peers: Vec::new(),
            node_type: PeerType::Worker,
            name: None,
            netkey: None,
            identity_secret: None,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.p2p_addr.port(), 4001);
        assert_eq!(config.node_type, PeerType::Worker);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn test_from_cli() {
        let cli = Cli::parse_from([
            "tasknet-node",
            "--data-dir",
            "/var/lib/tasknet",
            "--node-type",
            "beacon",
            "--peer",
            "/ip4/10.0.0.1/tcp/4001",
        ]);
        let config = NodeConfig::from_cli(&cli);

        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/tasknet")));
        assert_eq!(config.node_type, PeerType::Beacon);
        assert_eq!(config.p2p_config().bootstrap_peers, vec!["/ip4/10.0.0.1/tcp/4001".to_string()]);
    }

    #[test]
    fn test_no_cache_drops_data_dir() {
        let cli = Cli::parse_from(["tasknet-node", "--no-cache"]);
        assert!(NodeConfig::from_cli(&cli).data_dir.is_none());
    }

    #[test]
    fn test_identity_is_stable_for_secret() {
        let config = NodeConfig {
            identity_secret: Some("seed".into()),
            name: Some("x-1".into()),
            netkey: Some("shared".into()),
            ..NodeConfig::default()
        };

        let first = config.identity();
        let second = config.identity();
        assert_eq!(first.peer_id(), second.peer_id());
        assert_eq!(first.name(), Some("x-1"));
        assert!(first.netkey().is_some());
    }
}
