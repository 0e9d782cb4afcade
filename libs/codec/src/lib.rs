//! # RFC 5444 Wire Codec
//!
//! ## Purpose
//!
//! Bit-exact reader and writer for the RFC 5444 generalized
//! packet/message/TLV format used by MANET routing protocols (NHDP,
//! OLSRv2). The reader turns one datagram into a stream of typed
//! events dispatched to registered consumers; the writer lets
//! independent content providers contribute message TLVs and
//! addresses that are compressed, serialized and packed into
//! per-target packets respecting the MTU.
//!
//! ## Architecture Role
//!
//! ```text
//! datagram bytes → [Reader] → consumer callbacks + forward decisions
//! providers      → [Writer] → per-target packets → PacketSink
//! ```
//!
//! This crate owns no sockets, no timers and no duplicate state. The
//! `network` crate supplies the protocol/interface/target tree, the
//! duplicate sets behind the reader's [`reader::ForwardingPolicy`],
//! and the aggregation timing that drives [`writer::Writer::flush`].
//!
//! ## What This Crate Does NOT Contain
//! - Socket management or multicast membership (network crate)
//! - Duplicate and forwarding sets (network crate)
//! - Routing logic of any protocol built on top of the format

pub mod consumer;
pub mod error;
pub mod print;
pub mod reader;
pub mod writer;

pub use consumer::{
    Consumer, ConsumerEntry, ConsumerResult, ConsumerScope, MessageContext, PacketContext,
    ParsedTlv, Registration, TlvMatches,
};
pub use error::{BuildError, BuildResult, ProviderError, WireError, WireResult};
pub use print::{hexdump, print_packet};
pub use reader::{
    ConsumerId, ForwardedMessage, ForwardingPolicy, PacketResult, ProcessAll, Reader,
};
pub use writer::{
    AddressHandle, ContentProvider, HeaderBuilder, MessageBuilder, MessageHeader, PacketSink,
    SeqnoOption, TargetKey, Writer,
};
