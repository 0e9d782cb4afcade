//! # RFC 5444 Base Types
//!
//! Pure data structures shared by the codec and network layers:
//! - `Address`: variable-length network address with prefix support
//! - Circular 16-bit sequence number arithmetic
//! - Wire constants (flag bits, size limits, IANA values)
//!
//! This crate contains no I/O and no protocol logic. Parsing and
//! serialization rules live in `codec`, socket and multiplex state in
//! `network`.

pub mod addr;
pub mod constants;
pub mod seqno;

pub use addr::{Address, AddressError};
pub use constants::*;
pub use seqno::{seqno_difference, seqno_is_larger, DUPLICATE_WINDOW};
