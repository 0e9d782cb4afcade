//! Wire-level constants for the RFC 5444 packet format
//!
//! Flag bits and size limits are fixed by RFC 5444 and must remain stable.
//! The IANA values (port, multicast groups) are the "manet" assignments
//! from RFC 5498.

use std::net::{Ipv4Addr, Ipv6Addr};

/// Protocol version carried in the upper nibble of the first packet octet.
pub const RFC5444_VERSION: u8 = 0;

/// Largest packet the stack will emit or accept (fits one ethernet frame).
pub const MAX_PACKET_SIZE: usize = 1500;

/// Largest single message; messages are never fragmented across packets.
pub const MAX_MESSAGE_SIZE: usize = 1280;

/// Maximum address length in bytes (IPv6).
pub const MAX_ADDR_LEN: usize = 16;

/// IANA "manet" UDP port (RFC 5498).
pub const MANET_UDP_PORT: u16 = 269;

/// IANA "manet" IPv4 link-local multicast group (RFC 5498).
pub const MANET_MULTICAST_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 109);

/// IANA "manet" IPv6 link-local multicast group (RFC 5498).
pub const MANET_MULTICAST_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x6d);

/// Packet header flags (lower nibble of the first octet).
pub mod pkt_flags {
    /// Packet sequence number present.
    pub const HAS_SEQNO: u8 = 0x08;
    /// Packet TLV block present.
    pub const HAS_TLV: u8 = 0x04;
}

/// Message header flags (upper nibble of the second header octet).
pub mod msg_flags {
    /// Originator address present.
    pub const HAS_ORIGINATOR: u8 = 0x80;
    /// Hop limit octet present.
    pub const HAS_HOP_LIMIT: u8 = 0x40;
    /// Hop count octet present.
    pub const HAS_HOP_COUNT: u8 = 0x20;
    /// Message sequence number present.
    pub const HAS_SEQNO: u8 = 0x10;
}

/// Address block flags.
pub mod addr_flags {
    /// Shared head octets present.
    pub const HAS_HEAD: u8 = 0x80;
    /// Shared tail octets present on the wire.
    pub const HAS_FULL_TAIL: u8 = 0x40;
    /// Shared tail octets are all zero and omitted from the wire.
    pub const HAS_ZERO_TAIL: u8 = 0x20;
    /// One prefix length octet shared by all addresses.
    pub const HAS_SINGLE_PLEN: u8 = 0x10;
    /// One prefix length octet per address.
    pub const HAS_MULTI_PLEN: u8 = 0x08;
}

/// TLV flags.
pub mod tlv_flags {
    /// Extended type octet present.
    pub const HAS_TYPE_EXT: u8 = 0x80;
    /// Single address index octet present.
    pub const HAS_SINGLE_INDEX: u8 = 0x40;
    /// Start and stop address index octets present.
    pub const HAS_MULTI_INDEX: u8 = 0x20;
    /// Value (and length field) present.
    pub const HAS_VALUE: u8 = 0x10;
    /// Length field is two octets.
    pub const HAS_EXT_LEN: u8 = 0x08;
    /// Value is split evenly across the covered addresses.
    pub const IS_MULTIVALUE: u8 = 0x04;
}
