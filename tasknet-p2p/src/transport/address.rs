//! Address parsing.
//!
//! Dial addresses are multiaddrs (`/ip4/10.0.0.1/tcp/4001`,
//! `/dns4/beacon.example/tcp/4001`, `/memory/7` for the in-process network)
//! or a plain `host:port`, which is turned into the equivalent multiaddr.

use std::net::{IpAddr, SocketAddr};

use libp2p::multiaddr::Protocol;
use libp2p::Multiaddr;

use crate::error::{P2pError, P2pResult};

/// Parse a dial address.
pub fn parse_dial_address(address: &str) -> P2pResult<Multiaddr> {
    let address = address.trim();
    let invalid = || P2pError::InvalidAddress(address.to_string());

    let multiaddr = if address.starts_with('/') {
        address.parse::<Multiaddr>().map_err(|_| invalid())?
    } else {
        let (host, port) = address.rsplit_once(':').ok_or_else(invalid)?;
        let port: u16 = port.parse().map_err(|_| invalid())?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let first = match host.parse::<IpAddr>() {
            Ok(ip) => Protocol::from(ip),
            Err(_) => Protocol::Dns(host.into()),
        };
        Multiaddr::empty().with(first).with(Protocol::Tcp(port))
    };

    if !is_dialable(&multiaddr) {
        return Err(invalid());
    }
    Ok(multiaddr)
}

/// `/ip4|ip6|dns*/<host>/tcp/<port>[/...]` or `/memory/<n>`.
fn is_dialable(address: &Multiaddr) -> bool {
    let mut protocols = address.iter();
    match protocols.next() {
        Some(Protocol::Memory(_)) => true,
        Some(
            Protocol::Ip4(_)
            | Protocol::Ip6(_)
            | Protocol::Dns(_)
            | Protocol::Dns4(_)
            | Protocol::Dns6(_),
        ) => matches!(protocols.next(), Some(Protocol::Tcp(_))),
        _ => false,
    }
}

/// The multiaddr of a TCP socket address.
pub fn socket_multiaddr(addr: &SocketAddr) -> Multiaddr {
    Multiaddr::empty()
        .with(Protocol::from(addr.ip()))
        .with(Protocol::Tcp(addr.port()))
}

/// The host part of an address: its IP or DNS name.
pub fn host_name(address: &Multiaddr) -> Option<String> {
    match address.iter().next()? {
        Protocol::Ip4(ip) => Some(ip.to_string()),
        Protocol::Ip6(ip) => Some(ip.to_string()),
        Protocol::Dns(host) | Protocol::Dns4(host) | Protocol::Dns6(host) => {
            Some(host.to_string())
        }
        _ => None,
    }
}
