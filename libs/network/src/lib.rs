//! # RFC 5444 Distribution Layer
//!
//! ## Purpose
//!
//! The in-node plumbing around the wire codec: named protocol
//! instances with their interfaces and targets, duplicate sets
//! deciding process-once and forward-once, the aggregation timer that
//! coalesces messages into packets, the configuration surface, and a
//! UDP transport with multicast support.
//!
//! ## Architecture Role
//!
//! ```text
//! UdpTransport → Protocol::handle_packet → codec Reader → consumers
//!                        ↓ (forward decisions)
//!                 codec Writer → targets → Transport
//! ```
//!
//! Ownership is tree-shaped: [`Multiplex`] owns [`Protocol`] owns
//! [`Interface`] owns [`Target`]. One task drives everything; the
//! event loop alternates between `UdpTransport::recv`,
//! `Protocol::next_deadline` and `Protocol::handle_timeout`.

pub mod acl;
pub mod config;
pub mod dupset;
pub mod error;
pub mod interface;
pub mod protocol;
pub mod target;
pub mod transport;
pub mod udp;

pub use acl::Acl;
pub use config::{Config, InterfaceConfig, ProtocolConfig};
pub use dupset::{DuplicateResult, DuplicateSet};
pub use error::{ConfigError, NetworkError, NetworkResult};
pub use interface::Interface;
pub use protocol::{Multiplex, Protocol};
pub use target::Target;
pub use transport::{RecordingTransport, SentPacket, Transport};
pub use udp::{UdpStats, UdpTransport};
