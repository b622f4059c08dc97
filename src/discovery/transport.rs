//! Discovery Transport
//!
//! Owns the single broadcast-enabled UDP socket of a discovery session. The
//! send loop and the receive loop share it through an `Arc`.

use chrono::Local;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use super::interfaces::InterfaceEnumerator;
use super::{DiscoveredServer, DiscoveryError, ACK_PREFIX, DISCOVERY_QUERY};

/// Outcome of one discovery tick.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendReport {
    pub destinations: Vec<SocketAddrV4>,
    pub failed: usize,
}

impl SendReport {
    pub fn attempted(&self) -> usize {
        self.destinations.len()
    }
}

/// Parses a response datagram. Anything that is not valid UTF-8 starting with
/// the ack prefix is not a server.
pub fn parse_response(payload: &[u8], source: SocketAddr) -> Option<DiscoveredServer> {
    let text = std::str::from_utf8(payload).ok()?;
    let name = text.strip_prefix(ACK_PREFIX)?;
    Some(DiscoveredServer {
        name: name.to_string(),
        address: source.ip(),
        seen_at: Local::now(),
    })
}

#[derive(Debug)]
pub struct DiscoveryTransport {
    socket: UdpSocket,
    port: u16,
    multi_interface: bool,
}

impl DiscoveryTransport {
    /// Binds an ephemeral port on all interfaces with broadcast enabled.
    pub async fn bind(port: u16, multi_interface: bool) -> Result<Self, DiscoveryError> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(DiscoveryError::Bind)?;
        socket.set_broadcast(true).map_err(DiscoveryError::Broadcast)?;
        debug!(
            "Discovery socket bound to {:?}, querying port {}",
            socket.local_addr().ok(),
            port
        );

        Ok(Self {
            socket,
            port,
            multi_interface,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Global broadcast first, then one send per interface broadcast address.
    /// A failed destination is logged and skipped.
    pub async fn send_query(&self, interfaces: &dyn InterfaceEnumerator) -> SendReport {
        let mut destinations = vec![SocketAddrV4::new(Ipv4Addr::BROADCAST, self.port)];
        if self.multi_interface {
            destinations.extend(
                interfaces
                    .list_broadcast_addresses()
                    .into_iter()
                    .map(|addr| SocketAddrV4::new(addr, self.port)),
            );
        }

        let mut failed = 0;
        for destination in &destinations {
            match self.socket.send_to(DISCOVERY_QUERY, *destination).await {
                Ok(n) => trace!("Sent {} byte query to {}", n, destination),
                Err(e) => {
                    failed += 1;
                    warn!("Discovery query to {} failed: {}", destination, e);
                }
            }
        }

        SendReport {
            destinations,
            failed,
        }
    }

    /// Waits for the next datagram. `Ok(None)` for datagrams that are not
    /// server responses.
    pub async fn recv_server(
        &self,
        buf: &mut [u8],
    ) -> std::io::Result<Option<DiscoveredServer>> {
        let (len, source) = self.socket.recv_from(buf).await?;
        let server = parse_response(&buf[..len], source);
        if server.is_none() {
            trace!("Discarding {} byte datagram from {}", len, source);
        }
        Ok(server)
    }
}
