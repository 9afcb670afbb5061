//! P2P configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Protocol id of the control stream carrying the handshake and session messages.
pub const CONTROL_PROTOCOL: &str = "/tasknet/peer/1.0";

/// Magic bytes opening every frame ("TASK").
pub const NETWORK_MAGIC: [u8; 4] = [0x54, 0x41, 0x53, 0x4B];

/// Maximum frame body size in bytes (1 MB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// How long to wait for the remote `peer:auth`.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_millis(7000);

/// How long to wait for the remote `peer:info`.
pub const DEFAULT_INFO_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default timeout for establishing an outbound transport connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the lifecycle event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Default number of unclaimed messages a bus keeps per message kind.
pub const DEFAULT_INBOX_CAPACITY: usize = 16;

/// Configuration for the P2P node.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Address the TCP transport binds to.
    pub bind_addr: SocketAddr,

    /// Timeout for establishing outbound connections (including the
    /// transport identity exchange).
    pub connect_timeout: Duration,

    /// Timeout for the auth phase of the handshake.
    pub auth_timeout: Duration,

    /// Timeout for the info phase of the handshake.
    pub info_timeout: Duration,

    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,

    /// Peers to dial on startup. Each entry is an address string or a
    /// comma-separated list of alternatives tried in order.
    pub bootstrap_peers: Vec<String>,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4001)),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            info_timeout: DEFAULT_INFO_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            bootstrap_peers: Vec::new(),
        }
    }
}

impl P2pConfig {
    /// Create a new configuration with the specified bind address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the auth phase timeout.
    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Set the info phase timeout.
    pub fn with_info_timeout(mut self, timeout: Duration) -> Self {
        self.info_timeout = timeout;
        self
    }

    /// Set the lifecycle event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Add bootstrap peers to dial on startup.
    pub fn with_bootstrap_peers(mut self, peers: Vec<String>) -> Self {
        self.bootstrap_peers = peers;
        self
    }
}
