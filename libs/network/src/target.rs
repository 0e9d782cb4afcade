//! Outgoing targets
//!
//! A target is one destination address on one interface. It owns the
//! per-target packet sequence counter, the refcount deciding whether
//! outgoing packets carry a sequence number, and the pending-flush
//! deadline of the aggregation timer. The packet assembly buffer
//! itself lives in the codec writer, reachable through `key`.

use codec::TargetKey;
use tokio::time::Instant;
use types::Address;

#[derive(Debug)]
pub struct Target {
    pub(crate) dst: Address,
    pub(crate) unicast: bool,
    pub(crate) refcount: usize,
    /// Writer-side packet buffer handle.
    pub(crate) key: TargetKey,
    pub(crate) pkt_seqno: u16,
    pub(crate) pktseqno_refcount: usize,
    /// Armed when the first message is queued, cleared on flush.
    pub(crate) flush_deadline: Option<Instant>,
}

impl Target {
    pub(crate) fn new(dst: Address, unicast: bool, key: TargetKey) -> Self {
        Self {
            dst,
            unicast,
            refcount: 1,
            key,
            pkt_seqno: 0,
            pktseqno_refcount: 0,
            flush_deadline: None,
        }
    }

    /// Destination address of this target.
    pub fn dst(&self) -> &Address {
        &self.dst
    }

    pub fn is_unicast(&self) -> bool {
        self.unicast
    }

    /// Last packet sequence number handed out.
    pub fn pkt_seqno(&self) -> u16 {
        self.pkt_seqno
    }

    /// Take a reference on "outgoing packets need a sequence number".
    pub fn acquire_pktseqno(&mut self) {
        self.pktseqno_refcount += 1;
    }

    pub fn release_pktseqno(&mut self) {
        self.pktseqno_refcount = self.pktseqno_refcount.saturating_sub(1);
    }
}
