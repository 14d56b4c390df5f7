//! Finds an IP2SL bridge with a Lumagen behind it.
//!
//! Global Caché devices multicast an AMX-style beacon to
//! `239.255.250.250:9131` every few seconds:
//!
//! ```text
//! AMXB<-UUID=GlobalCache_000C1E0AB123><-Make=GlobalCache><-Model=iTachIP2SL><-Status=Ready>
//! ```
//!
//! For each beacon whose model names an iTach, the sender is checked by
//! opening TCP 4999 and asking the alive query.  A bridge with nothing (or
//! something else) on its serial port never answers `!S00,`.
//!
//! # How multicast discovery works (for beginners)
//!
//! Multicast is a middle ground between unicast and broadcast: the bridge
//! sends one UDP datagram to a group address, and every host that has joined
//! that group receives a copy.  Joining means telling the OS (and through
//! IGMP, the switch) that this socket wants the group's traffic.  No reply is
//! sent on UDP; the interesting part happens afterwards over TCP.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use lumagen_core::protocol::reports::ALIVE_RESPONSE_PREFIX;
use lumagen_core::{Command, Framer};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use crate::infrastructure::config::DEFAULT_BRIDGE_PORT;

/// UDP port the beacons are sent to.
pub const BEACON_PORT: u16 = 9131;
/// Multicast group of the beacons.
pub const BEACON_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 250, 250);

/// Hop limit for multicast sent from the beacon socket.
const MULTICAST_TTL: u32 = 2;

/// How long to wait for the alive answer when validating a bridge.
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(3);

/// Error type for discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The beacon socket could not be set up.
    #[error("failed to listen for beacons on port {port}: {source}")]
    Listen {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Receiving a datagram failed.
    #[error("recv error: {0}")]
    Recv(#[source] std::io::Error),
}

/// Parsed AMX discovery beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    fields: BTreeMap<String, String>,
}

impl Beacon {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn model(&self) -> Option<&str> {
        self.get("Model")
    }

    /// Whether the beacon comes from an iTach (IP2SL, WF2SL, ...).
    pub fn is_itach(&self) -> bool {
        self.model().is_some_and(|m| m.contains("iTach"))
    }
}

/// Parses `AMXB<-Key=Value><-Key=Value>...`.
///
/// Returns `None` if the header is missing.  Malformed pairs are skipped.
pub fn parse_beacon(text: &str) -> Option<Beacon> {
    let body = text.trim().strip_prefix("AMXB")?;
    let fields = body
        .split('<')
        .filter_map(|part| {
            let pair = part.strip_prefix('-')?.strip_suffix('>')?;
            let (key, value) = pair.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect();
    Some(Beacon { fields })
}

/// Listens for beacons for up to `timeout` and returns the address of the
/// first iTach that answers the alive query on port 4999.
///
/// # Errors
///
/// Returns [`DiscoveryError::Listen`] if the beacon socket cannot be bound or
/// the multicast group cannot be joined.
pub async fn discover_bridge(timeout: Duration) -> Result<Option<IpAddr>, DiscoveryError> {
    let socket = beacon_socket(BEACON_PORT).map_err(|source| DiscoveryError::Listen {
        port: BEACON_PORT,
        source,
    })?;
    debug!(group = %BEACON_GROUP, port = BEACON_PORT, "listening for bridge beacons");

    let found = listen(&socket, timeout, DEFAULT_BRIDGE_PORT).await;
    if let Err(e) = socket.leave_multicast_v4(BEACON_GROUP, Ipv4Addr::UNSPECIFIED) {
        debug!(error = %e, "leaving multicast group failed");
    }
    found
}

/// Binds the beacon port with `SO_REUSEADDR`, so discovery still works when
/// another listener (a control system, a second client) holds the port.
fn beacon_socket(port: u16) -> std::io::Result<UdpSocket> {
    let socket = shared_udp_socket(Ipv4Addr::UNSPECIFIED, port)?;
    socket.join_multicast_v4(&BEACON_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    UdpSocket::from_std(socket.into())
}

fn shared_udp_socket(ip: Ipv4Addr, port: u16) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(SocketAddr::from((ip, port))))?;
    Ok(socket)
}

/// Receive loop, split out so tests can drive it over a unicast socket.
async fn listen(
    socket: &UdpSocket,
    timeout: Duration,
    bridge_port: u16,
) -> Result<Option<IpAddr>, DiscoveryError> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 1024];
    let mut rejected: Vec<IpAddr> = Vec::new();

    loop {
        let (len, from) = match time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => {
                info!("no Lumagen bridge found before timeout");
                return Ok(None);
            }
            Ok(Err(e)) => return Err(DiscoveryError::Recv(e)),
            Ok(Ok(received)) => received,
        };

        let Ok(text) = std::str::from_utf8(&buf[..len]) else {
            warn!(%from, "ignoring non-text datagram");
            continue;
        };
        let Some(beacon) = parse_beacon(text) else {
            continue;
        };
        if !beacon.is_itach() || rejected.contains(&from.ip()) {
            continue;
        }

        info!(host = %from.ip(), model = beacon.model().unwrap_or("?"), "found iTach");
        if validate_lumagen(SocketAddr::new(from.ip(), bridge_port), VALIDATE_TIMEOUT).await {
            info!(host = %from.ip(), "Lumagen answered");
            return Ok(Some(from.ip()));
        }
        rejected.push(from.ip());
    }
}

/// Sends the alive query to `addr` and waits for the answer.
pub async fn validate_lumagen(addr: SocketAddr, timeout: Duration) -> bool {
    match time::timeout(timeout, alive_roundtrip(addr)).await {
        Ok(Ok(answered)) => answered,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "validation failed");
            false
        }
        Err(_) => {
            debug!(%addr, "validation timed out");
            false
        }
    }
}

async fn alive_roundtrip(addr: SocketAddr) -> std::io::Result<bool> {
    let mut stream = TcpStream::connect(addr).await?;
    let query = Command::alive();
    stream.write_all(&query.encode(b'\r')).await?;

    let mut framer = Framer::default();
    let mut buf = [0u8; 256];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        framer.feed(&buf[..n]);
        let answered = framer
            .frames()
            .filter_map(Result::ok)
            .any(|f| f.as_bytes().starts_with(ALIVE_RESPONSE_PREFIX.as_bytes()));
        if answered {
            return Ok(true);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
