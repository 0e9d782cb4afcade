//! Variable-length network address with prefix support
//!
//! RFC 5444 carries addresses as raw octet strings whose length is set
//! per message (1..=16 bytes). In practice the stack deals with IPv4
//! (4 bytes), IPv6 (16 bytes) and MAC addresses (8-byte EUI-64 slots),
//! but the reader must accept any wire length.
//!
//! Ordering compares length first, then octets, then prefix length.
//! That ordering is the key order of the target and duplicate trees.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::constants::MAX_ADDR_LEN;

/// Errors from address construction and conversion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address length {0}, must be 1..=16")]
    InvalidLength(usize),
    #[error("prefix length {prefix} exceeds {max} for a {len}-byte address")]
    InvalidPrefix { prefix: u8, len: u8, max: u8 },
    #[error("cannot parse '{0}' as an address")]
    Unparseable(String),
}

/// A network address of 1..=16 octets plus a prefix length.
///
/// The octet buffer is fixed-size; only the first `len` bytes are
/// meaningful and the remainder is kept zeroed so that equality and
/// hashing can look at the whole struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    bytes: [u8; MAX_ADDR_LEN],
    len: u8,
    prefix_len: u8,
}

impl Address {
    /// Build an address from raw octets with a full-length prefix.
    pub fn from_slice(octets: &[u8]) -> Result<Self, AddressError> {
        if octets.is_empty() || octets.len() > MAX_ADDR_LEN {
            return Err(AddressError::InvalidLength(octets.len()));
        }
        let mut bytes = [0u8; MAX_ADDR_LEN];
        bytes[..octets.len()].copy_from_slice(octets);
        Ok(Self {
            bytes,
            len: octets.len() as u8,
            prefix_len: (octets.len() * 8) as u8,
        })
    }

    /// Replace the prefix length, checking it fits the address width.
    pub fn with_prefix(mut self, prefix_len: u8) -> Result<Self, AddressError> {
        let max = self.len * 8;
        if prefix_len > max {
            return Err(AddressError::InvalidPrefix {
                prefix: prefix_len,
                len: self.len,
                max,
            });
        }
        self.prefix_len = prefix_len;
        Ok(self)
    }

    /// Address width in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// The meaningful octets.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// True if the prefix covers the whole address.
    #[inline]
    pub fn is_host(&self) -> bool {
        self.prefix_len as usize == self.len as usize * 8
    }

    /// True if `other` falls inside this address/prefix.
    pub fn contains(&self, other: &Address) -> bool {
        if self.len != other.len {
            return false;
        }
        let full_bytes = (self.prefix_len / 8) as usize;
        let rest_bits = self.prefix_len % 8;
        if self.bytes[..full_bytes] != other.bytes[..full_bytes] {
            return false;
        }
        if rest_bits == 0 {
            return true;
        }
        let mask = 0xffu8 << (8 - rest_bits);
        (self.bytes[full_bytes] & mask) == (other.bytes[full_bytes] & mask)
    }

    /// Convert to a different address width, or report that the
    /// conversion loses information.
    ///
    /// IPv4 widens to an IPv4-mapped IPv6 address; a mapped IPv6
    /// address narrows back to IPv4. Everything else only converts
    /// to its own width.
    pub fn convert_to_len(&self, target_len: usize) -> Result<Self, AddressError> {
        if target_len == self.len() {
            return Ok(*self);
        }
        match (self.len(), target_len) {
            (4, 16) => {
                let mut bytes = [0u8; MAX_ADDR_LEN];
                bytes[10] = 0xff;
                bytes[11] = 0xff;
                bytes[12..16].copy_from_slice(self.as_bytes());
                Ok(Self {
                    bytes,
                    len: 16,
                    prefix_len: self.prefix_len + 96,
                })
            }
            (16, 4) if self.is_v4_mapped() => {
                let mut bytes = [0u8; MAX_ADDR_LEN];
                bytes[..4].copy_from_slice(&self.bytes[12..16]);
                Ok(Self {
                    bytes,
                    len: 4,
                    prefix_len: self.prefix_len.saturating_sub(96),
                })
            }
            _ => Err(AddressError::InvalidLength(target_len)),
        }
    }

    fn is_v4_mapped(&self) -> bool {
        self.len == 16
            && self.bytes[..10].iter().all(|&b| b == 0)
            && self.bytes[10] == 0xff
            && self.bytes[11] == 0xff
    }

    /// The IPv4 form, if this is a 4-byte address.
    pub fn to_ipv4(&self) -> Option<Ipv4Addr> {
        (self.len == 4).then(|| Ipv4Addr::new(self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]))
    }

    /// The IPv6 form, if this is a 16-byte address.
    pub fn to_ipv6(&self) -> Option<Ipv6Addr> {
        if self.len != 16 {
            return None;
        }
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.bytes[..16]);
        Some(Ipv6Addr::from(octets))
    }

    /// The std `IpAddr` form for 4- and 16-byte addresses.
    pub fn to_ip(&self) -> Option<IpAddr> {
        self.to_ipv4()
            .map(IpAddr::V4)
            .or_else(|| self.to_ipv6().map(IpAddr::V6))
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Self::from_slice(&ip.octets()).expect("4 octets")
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Self::from_slice(&ip.octets()).expect("16 octets")
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.len
            .cmp(&other.len)
            .then_with(|| self.as_bytes().cmp(other.as_bytes()))
            .then_with(|| self.prefix_len.cmp(&other.prefix_len))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_ip() {
            Some(ip) => write!(f, "{}", ip)?,
            None => {
                for (i, b) in self.as_bytes().iter().enumerate() {
                    if i > 0 {
                        write!(f, ":")?;
                    }
                    write!(f, "{:02x}", b)?;
                }
            }
        }
        if !self.is_host() {
            write!(f, "/{}", self.prefix_len)?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    /// Parses `10.0.0.0/8`, `fe80::/10`, or plain host addresses.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((a, p)) => (a, Some(p)),
            None => (s, None),
        };
        let ip: IpAddr = addr_part
            .parse()
            .map_err(|_| AddressError::Unparseable(s.to_string()))?;
        let addr = Address::from(ip);
        match prefix_part {
            None => Ok(addr),
            Some(p) => {
                let plen: u8 = p
                    .parse()
                    .map_err(|_| AddressError::Unparseable(s.to_string()))?;
                addr.with_prefix(plen)
            }
        }
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
