//! Codec errors for RFC 5444 parsing and message construction
//!
//! Wire errors abandon the offending packet (or message, for the
//! mandatory-TLV rule) and are surfaced through logs and counters.
//! Build errors are returned to the caller of `create_message` /
//! `forward_message` with all per-target state rolled back.

use thiserror::Error;
use types::Address;

/// Errors raised while decoding an incoming packet.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes available than a field requires.
    #[error("truncated packet: {context} needs {need} bytes at offset {offset}, {remaining} left")]
    Truncated {
        context: &'static str,
        offset: usize,
        need: usize,
        remaining: usize,
    },

    /// Packet version nibble was not zero.
    #[error("unsupported packet version {0}")]
    BadVersion(u8),

    /// A length field contradicts the surrounding structure.
    #[error("bad length field: {context} claims {claimed}, {available} available")]
    BadLengthField {
        context: &'static str,
        claimed: usize,
        available: usize,
    },

    /// An address TLV index range does not fit its address block.
    #[error("TLV index range {start}..={stop} invalid for {num_addr} addresses")]
    BadTlvIndexRange { start: u8, stop: u8, num_addr: u8 },

    /// Shared head and tail octets exceed the address length.
    #[error("address block head {head} + tail {tail} exceed address length {addr_len}")]
    AddrBlockOverflow { head: u8, tail: u8, addr_len: u8 },

    /// A consumer entry marked mandatory found no matching TLV. The
    /// containing message is skipped; the rest of the packet is parsed.
    #[error("mandatory TLV {tlv_type}/{type_ext} missing in message type {msg_type}")]
    MandatoryTlvMissing {
        msg_type: u8,
        tlv_type: u8,
        type_ext: u8,
    },
}

/// Errors raised while constructing an outgoing message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// The finished message does not fit the message scratch buffer or
    /// a selected target's packet buffer.
    #[error("message of {size} bytes exceeds buffer of {max}")]
    MsgTooLarge { size: usize, max: usize },

    /// `create_message` was called for an unregistered message type.
    #[error("no message registered for type {0}")]
    NoSuchMessage(u8),

    /// A content provider reported an error; construction was rolled back.
    #[error("content provider aborted: {0}")]
    ProviderAborted(String),

    /// An address cannot be represented at a selected target's address
    /// length (only IPv4 <-> IPv4-mapped IPv6 conversions exist).
    #[error("cannot convert {addr} to {target_len}-byte form")]
    AddressConversion { addr: Address, target_len: usize },

    /// Target key does not name a registered target.
    #[error("unknown writer target")]
    UnknownTarget,

    /// `forward_message` was handed bytes that are not one whole message.
    #[error("forwarded message malformed: {0}")]
    MalformedForward(&'static str),
}

/// Error type content providers return to abort message construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<ProviderError> for BuildError {
    fn from(err: ProviderError) -> Self {
        BuildError::ProviderAborted(err.0)
    }
}

/// Result alias for parsing operations.
pub type WireResult<T> = Result<T, WireError>;

/// Result alias for construction operations.
pub type BuildResult<T> = Result<T, BuildError>;
