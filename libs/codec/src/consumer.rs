//! Consumer registration and dispatch types
//!
//! A consumer binds to a parse scope (packet, message, or per-address)
//! and declares the TLV types it wants matched into entry slots. After
//! the reader binds TLVs to entries, the single block callback fires
//! with the matches; an entry marked mandatory that stays empty causes
//! the whole message to be skipped.
//!
//! TLV values are borrowed views into the datagram buffer and are only
//! valid for the duration of the callback.

use types::Address;

/// Parse scope a consumer registers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerScope {
    /// Packet-level TLV block.
    Packet,
    /// Per-message TLV block.
    Message,
    /// Per-address dispatch with address-block TLVs.
    Address,
}

/// Return code of a consumer callback. Drop codes short-circuit the
/// remaining dispatch at the corresponding scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumerResult {
    #[default]
    Okay,
    DropAddress,
    DropMessage,
    DropPacket,
}

/// One TLV selector of a consumer. Entries are exposed to the block
/// callback in the order they were supplied at registration.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerEntry {
    pub tlv_type: u8,
    pub type_ext: u8,
    /// If true and no TLV matches, the whole message is rejected.
    pub mandatory: bool,
}

impl ConsumerEntry {
    pub fn new(tlv_type: u8) -> Self {
        Self {
            tlv_type,
            type_ext: 0,
            mandatory: false,
        }
    }

    pub fn with_ext(mut self, type_ext: u8) -> Self {
        self.type_ext = type_ext;
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
}

/// A TLV as parsed off the wire. For address TLVs handed to address
/// consumers, `value` is already narrowed to the slice belonging to
/// the current address when the TLV is multivalue.
#[derive(Debug, Clone, Copy)]
pub struct ParsedTlv<'p> {
    pub tlv_type: u8,
    pub type_ext: u8,
    /// Index range within the owning address block; `0..=num_addr-1`
    /// when the TLV carried no index fields.
    pub index_start: u8,
    pub index_stop: u8,
    pub multivalue: bool,
    pub has_value: bool,
    pub value: &'p [u8],
}

/// Matches bound to one consumer's entries, index-aligned with the
/// entries array given at registration. Multiple TLVs matching one
/// entry appear in wire order.
#[derive(Debug, Default)]
pub struct TlvMatches<'p> {
    pub(crate) slots: Vec<Vec<ParsedTlv<'p>>>,
}

impl<'p> TlvMatches<'p> {
    pub(crate) fn new(entries: usize) -> Self {
        Self {
            slots: vec![Vec::new(); entries],
        }
    }

    /// All TLVs matched by entry `index`, in wire order.
    pub fn entry(&self, index: usize) -> &[ParsedTlv<'p>] {
        &self.slots[index]
    }

    /// First (wire-order) TLV matched by entry `index`.
    pub fn first(&self, index: usize) -> Option<&ParsedTlv<'p>> {
        self.slots.get(index).and_then(|s| s.first())
    }

    /// First matched value of entry `index`, if any.
    pub fn value(&self, index: usize) -> Option<&'p [u8]> {
        self.first(index).filter(|t| t.has_value).map(|t| t.value)
    }
}

/// Packet-level context exposed to packet-scope consumers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketContext {
    pub seqno: Option<u16>,
    pub has_tlv_block: bool,
}

/// Message-level context exposed to message- and address-scope
/// consumers and to the forwarding policy.
#[derive(Debug, Clone, Copy)]
pub struct MessageContext {
    pub msg_type: u8,
    pub addr_len: usize,
    pub size: usize,
    pub originator: Option<Address>,
    pub hop_limit: Option<u8>,
    pub hop_count: Option<u8>,
    pub seqno: Option<u16>,
}

/// Receiver of parse events. Implement the callbacks matching the
/// scope the consumer registers for; the rest default to `Okay`.
pub trait Consumer {
    /// Block callback for packet scope, after packet TLV matching.
    fn on_packet(&mut self, _ctx: &PacketContext, _tlvs: &TlvMatches<'_>) -> ConsumerResult {
        ConsumerResult::Okay
    }

    /// Streaming callback for every packet-level TLV (matched or not).
    fn on_packet_tlv(&mut self, _ctx: &PacketContext, _tlv: &ParsedTlv<'_>) -> ConsumerResult {
        ConsumerResult::Okay
    }

    /// Block callback for message scope, after message TLV matching.
    fn on_message(&mut self, _ctx: &MessageContext, _tlvs: &TlvMatches<'_>) -> ConsumerResult {
        ConsumerResult::Okay
    }

    /// Streaming callback for every TLV in the consumer's scope:
    /// message TLVs for message scope, covering address TLVs (with
    /// the address) for address scope.
    fn on_tlv(
        &mut self,
        _ctx: &MessageContext,
        _addr: Option<(&Address, u8)>,
        _tlv: &ParsedTlv<'_>,
    ) -> ConsumerResult {
        ConsumerResult::Okay
    }

    /// Block callback for address scope, once per address after
    /// address TLV matching.
    fn on_address(
        &mut self,
        _ctx: &MessageContext,
        _addr: &Address,
        _index: u8,
        _tlvs: &TlvMatches<'_>,
    ) -> ConsumerResult {
        ConsumerResult::Okay
    }
}

/// A consumer registration: scope, optional message type filter
/// (ignored for packet scope, `None` = all message types), the entry
/// selectors, and the callback implementation.
pub struct Registration {
    pub scope: ConsumerScope,
    pub msg_type: Option<u8>,
    pub entries: Vec<ConsumerEntry>,
    pub consumer: Box<dyn Consumer>,
}

impl Registration {
    pub fn packet(entries: Vec<ConsumerEntry>, consumer: Box<dyn Consumer>) -> Self {
        Self {
            scope: ConsumerScope::Packet,
            msg_type: None,
            entries,
            consumer,
        }
    }

    pub fn message(
        msg_type: impl Into<Option<u8>>,
        entries: Vec<ConsumerEntry>,
        consumer: Box<dyn Consumer>,
    ) -> Self {
        Self {
            scope: ConsumerScope::Message,
            msg_type: msg_type.into(),
            entries,
            consumer,
        }
    }

    pub fn address(
        msg_type: impl Into<Option<u8>>,
        entries: Vec<ConsumerEntry>,
        consumer: Box<dyn Consumer>,
    ) -> Self {
        Self {
            scope: ConsumerScope::Address,
            msg_type: msg_type.into(),
            entries,
            consumer,
        }
    }

    pub(crate) fn wants_message(&self, msg_type: u8) -> bool {
        self.msg_type.map_or(true, |t| t == msg_type)
    }
}
