//! Transport collaborator interface
//!
//! The core hands `(bytes, destination, interface)` tuples to a
//! [`Transport`] and receives `(bytes, source, interface)` tuples from
//! whatever drives the event loop. Datagram-oriented, at-most-once
//! delivery; ordering per interface is best effort.

use types::Address;

use crate::error::NetworkResult;

/// Outbound half of the datagram transport.
pub trait Transport {
    /// Ship one packet to `dst:port` out of `interface`.
    fn send_packet(
        &mut self,
        interface: &str,
        dst: &Address,
        port: u16,
        packet: &[u8],
    ) -> NetworkResult<()>;
}

/// Transport that records every packet instead of sending it. Used by
/// the tests and useful for dry runs.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub sent: Vec<SentPacket>,
}

#[derive(Debug, Clone)]
pub struct SentPacket {
    pub interface: String,
    pub dst: Address,
    pub port: u16,
    pub packet: Vec<u8>,
}

impl Transport for RecordingTransport {
    fn send_packet(
        &mut self,
        interface: &str,
        dst: &Address,
        port: u16,
        packet: &[u8],
    ) -> NetworkResult<()> {
        self.sent.push(SentPacket {
            interface: interface.to_string(),
            dst: *dst,
            port,
            packet: packet.to_vec(),
        });
        Ok(())
    }
}
