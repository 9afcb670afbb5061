//! Command-line argument parsing.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

/// TaskNet peer node.
#[derive(Parser, Debug, Clone)]
#[command(name = "tasknet-node")]
#[command(about = "TaskNet peer node binary")]
#[command(version)]
pub struct Cli {
    /// Data directory for the peer cache.
    #[arg(long, default_value = "~/.tasknet")]
    pub data_dir: PathBuf,

    /// Keep the peer cache in memory only.
    #[arg(long)]
    pub no_cache: bool,

    /// P2P listen address.
    #[arg(long, default_value = "0.0.0.0:4001")]
    pub listen: SocketAddr,

    /// Extra address to announce in peer:info (repeatable).
    #[arg(long = "announce")]
    pub announce: Vec<String>,

    /// Node to dial at startup (repeatable). Comma-separated addresses are
    /// alternatives for the same node.
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Role announced to peers (beacon, worker, ...).
    #[arg(long, default_value = "worker")]
    pub node_type: String,

    /// Human-readable node name.
    #[arg(long)]
    pub name: Option<String>,

    /// Shared network key. Without it no auth token is sent.
    #[arg(long)]
    pub netkey: Option<String>,

    /// Secret the identity key is derived from. A fresh key is generated if absent.
    #[arg(long)]
    pub identity: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Expand the data directory path (handle ~ for home).
    pub fn expanded_data_dir(&self) -> PathBuf {
        let path_str = self.data_dir.to_string_lossy();
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        }
        self.data_dir.clone()
    }
}
