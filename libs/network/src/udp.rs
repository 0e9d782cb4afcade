//! UDP transport with multicast support
//!
//! One socket per interface and address family, bound according to the
//! interface configuration and joined to the configured multicast
//! groups. Sends use the non-blocking path; the event loop owns the
//! receive side through [`UdpTransport::recv`].

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use types::constants::MAX_PACKET_SIZE;
use types::Address;

use crate::config::InterfaceConfig;
use crate::error::{NetworkError, NetworkResult};
use crate::transport::Transport;

/// Send/receive counters per transport.
#[derive(Debug, Clone, Default)]
pub struct UdpStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_errors: u64,
    pub last_activity: Option<Instant>,
}

struct InterfaceSockets {
    v4: Option<Arc<UdpSocket>>,
    v6: Option<Arc<UdpSocket>>,
}

/// Datagram transport over per-interface UDP sockets.
pub struct UdpTransport {
    sockets: HashMap<String, InterfaceSockets>,
    stats: UdpStats,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self {
            sockets: HashMap::new(),
            stats: UdpStats::default(),
        }
    }

    pub fn stats(&self) -> &UdpStats {
        &self.stats
    }

    /// Open (or reopen) the sockets of one interface according to its
    /// configuration. A family without a bind or multicast address is
    /// left closed.
    pub async fn open_interface(
        &mut self,
        name: &str,
        config: &InterfaceConfig,
        port: u16,
    ) -> NetworkResult<()> {
        let mut sockets = InterfaceSockets { v4: None, v6: None };

        if config.bindto_v4.is_some() || config.multicast_v4.is_some() {
            let bind = config.bindto_v4.unwrap_or(Ipv4Addr::UNSPECIFIED);
            let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(bind), port)).await?;
            if let Some(group) = config.multicast_v4 {
                socket.join_multicast_v4(group, bind)?;
                socket.set_multicast_loop_v4(false)?;
                info!(interface = name, %group, "joined ipv4 multicast group");
            }
            sockets.v4 = Some(Arc::new(socket));
        }

        if config.bindto_v6.is_some() || config.multicast_v6.is_some() {
            let bind = config.bindto_v6.unwrap_or(Ipv6Addr::UNSPECIFIED);
            let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V6(bind), port)).await?;
            if let Some(group) = config.multicast_v6 {
                socket.join_multicast_v6(&group, 0)?;
                socket.set_multicast_loop_v6(false)?;
                info!(interface = name, %group, "joined ipv6 multicast group");
            }
            sockets.v6 = Some(Arc::new(socket));
        }

        info!(interface = name, port, "interface sockets open");
        self.sockets.insert(name.to_string(), sockets);
        Ok(())
    }

    /// Close an interface's sockets.
    pub fn close_interface(&mut self, name: &str) {
        if self.sockets.remove(name).is_some() {
            info!(interface = name, "interface sockets closed");
        }
    }

    /// Wait for the next datagram on any open socket. Returns the
    /// interface name, source address and bytes.
    pub async fn recv(&mut self) -> NetworkResult<(String, Address, Vec<u8>)> {
        // rebuild the select set each call; interface counts are tiny
        let sockets: Vec<(String, Arc<UdpSocket>)> = self
            .sockets
            .iter()
            .flat_map(|(name, s)| {
                s.v4.iter()
                    .chain(s.v6.iter())
                    .map(|sock| (name.clone(), sock.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        if sockets.is_empty() {
            return Err(NetworkError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "no sockets open",
            )));
        }

        let mut pending = Vec::new();
        for (i, (_, sock)) in sockets.iter().enumerate() {
            pending.push(Box::pin(async move {
                let mut buf = BytesMut::zeroed(MAX_PACKET_SIZE);
                let result = sock.recv_from(&mut buf[..]).await;
                (i, buf, result)
            }));
        }
        let ((idx, buf, result), _, _) = futures::future::select_all(pending).await;
        let (len, from) = result?;

        self.stats.packets_received += 1;
        self.stats.bytes_received += len as u64;
        self.stats.last_activity = Some(Instant::now());

        let name = sockets[idx].0.clone();
        debug!(interface = %name, %from, len, "received datagram");
        Ok((name, Address::from(from.ip()), buf[..len].to_vec()))
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UdpTransport {
    fn send_packet(
        &mut self,
        interface: &str,
        dst: &Address,
        port: u16,
        packet: &[u8],
    ) -> NetworkResult<()> {
        let sockets = self
            .sockets
            .get(interface)
            .ok_or_else(|| NetworkError::NoSuchInterface(interface.to_string()))?;

        let (socket, ip): (&Arc<UdpSocket>, IpAddr) = match (dst.to_ipv4(), dst.to_ipv6()) {
            (Some(v4), _) => (
                sockets.v4.as_ref().ok_or_else(|| {
                    NetworkError::NoSuchTarget(*dst, interface.to_string())
                })?,
                IpAddr::V4(v4),
            ),
            (_, Some(v6)) => (
                sockets.v6.as_ref().ok_or_else(|| {
                    NetworkError::NoSuchTarget(*dst, interface.to_string())
                })?,
                IpAddr::V6(v6),
            ),
            _ => return Err(NetworkError::NoSuchTarget(*dst, interface.to_string())),
        };

        match socket.try_send_to(packet, SocketAddr::new(ip, port)) {
            Ok(sent) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += sent as u64;
                self.stats.last_activity = Some(Instant::now());
                Ok(())
            }
            Err(err) => {
                self.stats.send_errors += 1;
                warn!(interface, %dst, %err, "udp send failed");
                Err(NetworkError::Io(err))
            }
        }
    }
}
