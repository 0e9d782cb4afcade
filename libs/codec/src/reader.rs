//! RFC 5444 packet reader
//!
//! Parses one datagram into packet header, messages, address blocks
//! and TLV blocks, dispatching events to registered consumers in wire
//! order. Parsing is all-or-nothing per packet: a malformed structure
//! aborts the packet with a typed error and no further events fire.
//! The one exception is the mandatory-TLV rule, which skips only the
//! containing message.
//!
//! The reader never touches sockets or the writer. Forwarding-eligible
//! messages are returned to the caller as hop-patched byte copies; the
//! process/forward decisions themselves are delegated to a
//! [`ForwardingPolicy`] so the duplicate sets stay outside the codec.

use tracing::{debug, trace};

use types::constants::{addr_flags, msg_flags, pkt_flags, tlv_flags, RFC5444_VERSION};
use types::Address;

use crate::consumer::{
    Consumer, ConsumerResult, ConsumerScope, MessageContext, PacketContext, ParsedTlv,
    Registration, TlvMatches,
};
use crate::error::{WireError, WireResult};

/// Identifier of a consumer registration, used for unregistering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

/// Process/forward interrogation for each parsed message. Implemented
/// by the network layer on top of its duplicate sets; the defaults
/// process everything and forward nothing (used by tests and the
/// printer).
pub trait ForwardingPolicy {
    /// Should this message be dispatched to consumers? A `true` return
    /// is the point where the message counts as processed.
    fn should_process(&mut self, _ctx: &MessageContext) -> bool {
        true
    }

    /// Should this message be re-emitted? Hop-limit and hop-count
    /// constraints are enforced by the reader on top of this.
    fn should_forward(&mut self, _ctx: &MessageContext) -> bool {
        false
    }
}

/// Policy that processes everything and never forwards.
#[derive(Debug, Default)]
pub struct ProcessAll;

impl ForwardingPolicy for ProcessAll {}

/// A message accepted for forwarding: verbatim wire bytes with
/// hop_limit decremented and hop_count incremented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedMessage {
    pub msg_type: u8,
    pub bytes: Vec<u8>,
}

/// Outcome of a successful packet parse.
#[derive(Debug, Default)]
pub struct PacketResult {
    pub pkt_seqno: Option<u16>,
    /// Messages eligible for re-emission, in arrival order.
    pub forwards: Vec<ForwardedMessage>,
    /// Per-message rejections (mandatory TLV misses) that did not
    /// abort the packet.
    pub skipped: Vec<WireError>,
}

/// Byte cursor over one parse region.
struct Cursor<'p> {
    data: &'p [u8],
    pos: usize,
}

impl<'p> Cursor<'p> {
    fn new(data: &'p [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, context: &'static str) -> WireResult<&'p [u8]> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                context,
                offset: self.pos,
                need: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self, context: &'static str) -> WireResult<u8> {
        Ok(self.take(1, context)?[0])
    }

    fn take_u16(&mut self, context: &'static str) -> WireResult<u16> {
        let b = self.take(2, context)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}

/// Where a TLV block sits, for index validation.
enum TlvBlockKind {
    /// Packet or message scope: index fields are not allowed.
    Flat,
    /// Address block scope with this many addresses.
    AddressBlock(u8),
}

/// Parse one TLV block (2-byte length plus entries) from the cursor.
fn parse_tlv_block<'p>(
    cur: &mut Cursor<'p>,
    kind: TlvBlockKind,
) -> WireResult<Vec<ParsedTlv<'p>>> {
    let claimed = cur.take_u16("tlv block length")? as usize;
    if claimed > cur.remaining() {
        return Err(WireError::BadLengthField {
            context: "tlv block length",
            claimed,
            available: cur.remaining(),
        });
    }
    let mut block = Cursor::new(cur.take(claimed, "tlv block")?);
    let mut tlvs = Vec::new();

    while block.remaining() > 0 {
        let tlv_type = block.take_u8("tlv type")?;
        let flags = block.take_u8("tlv flags")?;

        let type_ext = if flags & tlv_flags::HAS_TYPE_EXT != 0 {
            block.take_u8("tlv type extension")?
        } else {
            0
        };

        let single = flags & tlv_flags::HAS_SINGLE_INDEX != 0;
        let multi = flags & tlv_flags::HAS_MULTI_INDEX != 0;
        if single && multi {
            return Err(WireError::BadTlvIndexRange {
                start: 0,
                stop: 0,
                num_addr: 0,
            });
        }
        let explicit_index = single || multi;
        let (index_start, index_stop) = if single {
            let i = block.take_u8("tlv index")?;
            (i, i)
        } else if multi {
            (
                block.take_u8("tlv index start")?,
                block.take_u8("tlv index stop")?,
            )
        } else {
            match kind {
                TlvBlockKind::Flat => (0, 0),
                TlvBlockKind::AddressBlock(n) => (0, n - 1),
            }
        };

        let has_value = flags & tlv_flags::HAS_VALUE != 0;
        let value: &[u8] = if has_value {
            let len = if flags & tlv_flags::HAS_EXT_LEN != 0 {
                block.take_u16("tlv value length")? as usize
            } else {
                block.take_u8("tlv value length")? as usize
            };
            block.take(len, "tlv value")?
        } else {
            if flags & tlv_flags::HAS_EXT_LEN != 0 {
                return Err(WireError::BadLengthField {
                    context: "tlv extended length without value",
                    claimed: 0,
                    available: 0,
                });
            }
            &[]
        };

        let multivalue = flags & tlv_flags::IS_MULTIVALUE != 0;

        match kind {
            TlvBlockKind::Flat => {
                if explicit_index || multivalue {
                    return Err(WireError::BadTlvIndexRange {
                        start: index_start,
                        stop: index_stop,
                        num_addr: 0,
                    });
                }
            }
            TlvBlockKind::AddressBlock(n) => {
                if index_start > index_stop || index_stop >= n {
                    return Err(WireError::BadTlvIndexRange {
                        start: index_start,
                        stop: index_stop,
                        num_addr: n,
                    });
                }
                if multivalue {
                    let covered = (index_stop - index_start) as usize + 1;
                    if !has_value || value.len() % covered != 0 {
                        return Err(WireError::BadLengthField {
                            context: "multivalue tlv split",
                            claimed: value.len(),
                            available: covered,
                        });
                    }
                }
            }
        }

        tlvs.push(ParsedTlv {
            tlv_type,
            type_ext,
            index_start,
            index_stop,
            multivalue,
            has_value,
            value,
        });
    }

    Ok(tlvs)
}

/// One parsed address block: reconstructed addresses plus its TLVs.
struct ParsedAddrBlock<'p> {
    addrs: Vec<Address>,
    tlvs: Vec<ParsedTlv<'p>>,
}

fn parse_addr_block<'p>(cur: &mut Cursor<'p>, addr_len: usize) -> WireResult<ParsedAddrBlock<'p>> {
    let num_addr = cur.take_u8("address count")?;
    if num_addr == 0 {
        return Err(WireError::BadLengthField {
            context: "empty address block",
            claimed: 0,
            available: 0,
        });
    }
    let flags = cur.take_u8("address block flags")?;

    let (head_len, head) = if flags & addr_flags::HAS_HEAD != 0 {
        let len = cur.take_u8("head length")? as usize;
        (len, cur.take(len, "head octets")?)
    } else {
        (0, &[][..])
    };

    let full_tail = flags & addr_flags::HAS_FULL_TAIL != 0;
    let zero_tail = flags & addr_flags::HAS_ZERO_TAIL != 0;
    if full_tail && zero_tail {
        return Err(WireError::BadLengthField {
            context: "address block tail flags",
            claimed: 0,
            available: 0,
        });
    }
    let (tail_len, tail) = if full_tail {
        let len = cur.take_u8("tail length")? as usize;
        (len, cur.take(len, "tail octets")?)
    } else if zero_tail {
        (cur.take_u8("tail length")? as usize, &[][..])
    } else {
        (0, &[][..])
    };

    if head_len + tail_len > addr_len {
        return Err(WireError::AddrBlockOverflow {
            head: head_len as u8,
            tail: tail_len as u8,
            addr_len: addr_len as u8,
        });
    }
    let mid_len = addr_len - head_len - tail_len;

    let mids = cur.take(mid_len * num_addr as usize, "mid octets")?;

    let single_plen = flags & addr_flags::HAS_SINGLE_PLEN != 0;
    let multi_plen = flags & addr_flags::HAS_MULTI_PLEN != 0;
    if single_plen && multi_plen {
        return Err(WireError::BadLengthField {
            context: "address block prefix flags",
            claimed: 0,
            available: 0,
        });
    }
    let plens: Option<&[u8]> = if single_plen {
        Some(cur.take(1, "prefix length")?)
    } else if multi_plen {
        Some(cur.take(num_addr as usize, "prefix lengths")?)
    } else {
        None
    };

    let mut addrs = Vec::with_capacity(num_addr as usize);
    let mut octets = [0u8; types::constants::MAX_ADDR_LEN];
    for i in 0..num_addr as usize {
        octets[..head_len].copy_from_slice(head);
        octets[head_len..head_len + mid_len].copy_from_slice(&mids[i * mid_len..(i + 1) * mid_len]);
        if full_tail {
            octets[head_len + mid_len..addr_len].copy_from_slice(tail);
        } else {
            octets[head_len + mid_len..addr_len].fill(0);
        }
        let mut addr = Address::from_slice(&octets[..addr_len]).map_err(|_| {
            WireError::BadLengthField {
                context: "address length",
                claimed: addr_len,
                available: types::constants::MAX_ADDR_LEN,
            }
        })?;
        if let Some(p) = plens {
            let plen = if single_plen { p[0] } else { p[i] };
            addr = addr.with_prefix(plen).map_err(|_| WireError::BadLengthField {
                context: "prefix length",
                claimed: plen as usize,
                available: addr_len * 8,
            })?;
        }
        addrs.push(addr);
    }

    let tlvs = parse_tlv_block(cur, TlvBlockKind::AddressBlock(num_addr))?;

    Ok(ParsedAddrBlock { addrs, tlvs })
}

/// Bind a TLV list against one registration's entries. Returns `None`
/// if a mandatory entry stayed empty (with the offending entry).
fn bind_entries<'p>(
    reg: &Registration,
    tlvs: &[ParsedTlv<'p>],
) -> Result<TlvMatches<'p>, (u8, u8)> {
    let mut matches = TlvMatches::new(reg.entries.len());
    for tlv in tlvs {
        for (slot, entry) in reg.entries.iter().enumerate() {
            if entry.tlv_type == tlv.tlv_type && entry.type_ext == tlv.type_ext {
                matches.slots[slot].push(*tlv);
            }
        }
    }
    for (slot, entry) in reg.entries.iter().enumerate() {
        if entry.mandatory && matches.slots[slot].is_empty() {
            return Err((entry.tlv_type, entry.type_ext));
        }
    }
    Ok(matches)
}

/// Narrow an address TLV to the portion covering address `index`.
/// Returns `None` if the TLV does not cover the index.
fn narrow_for_index<'p>(tlv: &ParsedTlv<'p>, index: u8) -> Option<ParsedTlv<'p>> {
    if index < tlv.index_start || index > tlv.index_stop {
        return None;
    }
    if !tlv.multivalue {
        return Some(*tlv);
    }
    let covered = (tlv.index_stop - tlv.index_start) as usize + 1;
    let chunk = tlv.value.len() / covered;
    let at = (index - tlv.index_start) as usize;
    Some(ParsedTlv {
        value: &tlv.value[at * chunk..(at + 1) * chunk],
        ..*tlv
    })
}

/// RFC 5444 packet reader with registered consumers.
#[derive(Default)]
pub struct Reader {
    registrations: Vec<(ConsumerId, Registration)>,
    next_id: u64,
}

/// Dispatch verdict after one message.
enum MessageVerdict {
    Continue,
    AbortPacket,
}

impl Reader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer. Consumers of the same scope and message
    /// type fire in registration order.
    pub fn register(&mut self, registration: Registration) -> ConsumerId {
        let id = ConsumerId(self.next_id);
        self.next_id += 1;
        self.registrations.push((id, registration));
        id
    }

    /// Remove a consumer registration.
    pub fn unregister(&mut self, id: ConsumerId) {
        self.registrations.retain(|(rid, _)| *rid != id);
    }

    /// Parse one datagram and dispatch events. Consumer callbacks that
    /// already fired before an error stand; no further events follow
    /// the error.
    pub fn handle_packet(
        &mut self,
        data: &[u8],
        policy: &mut dyn ForwardingPolicy,
    ) -> WireResult<PacketResult> {
        let mut cur = Cursor::new(data);
        let mut result = PacketResult::default();

        let first = cur.take_u8("packet header")?;
        let version = first >> 4;
        if version != RFC5444_VERSION {
            return Err(WireError::BadVersion(version));
        }
        let flags = first & 0x0f;

        if flags & pkt_flags::HAS_SEQNO != 0 {
            result.pkt_seqno = Some(cur.take_u16("packet sequence number")?);
        }

        let has_tlv_block = flags & pkt_flags::HAS_TLV != 0;
        let pkt_tlvs = if has_tlv_block {
            parse_tlv_block(&mut cur, TlvBlockKind::Flat)?
        } else {
            Vec::new()
        };

        let pkt_ctx = PacketContext {
            seqno: result.pkt_seqno,
            has_tlv_block,
        };
        if self.dispatch_packet_scope(&pkt_ctx, &pkt_tlvs) == ConsumerResult::DropPacket {
            return Ok(result);
        }

        while cur.remaining() > 0 {
            match self.parse_message(&mut cur, policy, &mut result)? {
                MessageVerdict::Continue => {}
                MessageVerdict::AbortPacket => break,
            }
        }

        Ok(result)
    }

    fn dispatch_packet_scope(
        &mut self,
        ctx: &PacketContext,
        tlvs: &[ParsedTlv<'_>],
    ) -> ConsumerResult {
        let mut bound = Vec::new();
        for (_, reg) in &self.registrations {
            if reg.scope == ConsumerScope::Packet {
                bound.push(bind_entries(reg, tlvs).ok());
            } else {
                bound.push(None);
            }
        }
        for (i, (_, reg)) in self.registrations.iter_mut().enumerate() {
            if reg.scope != ConsumerScope::Packet {
                continue;
            }
            // a packet consumer with an unmatched mandatory entry is
            // skipped; there is no message to reject at this scope
            let Some(matches) = bound[i].take() else {
                continue;
            };
            for tlv in tlvs {
                if reg.consumer.on_packet_tlv(ctx, tlv) == ConsumerResult::DropPacket {
                    return ConsumerResult::DropPacket;
                }
            }
            if reg.consumer.on_packet(ctx, &matches) == ConsumerResult::DropPacket {
                return ConsumerResult::DropPacket;
            }
        }
        ConsumerResult::Okay
    }

    fn parse_message(
        &mut self,
        cur: &mut Cursor<'_>,
        policy: &mut dyn ForwardingPolicy,
        result: &mut PacketResult,
    ) -> WireResult<MessageVerdict> {
        let data = cur.data;
        let msg_start = cur.pos;
        let msg_type = cur.take_u8("message type")?;
        let flags_addrlen = cur.take_u8("message flags")?;
        let flags = flags_addrlen >> 4;
        let addr_len = (flags_addrlen & 0x0f) as usize + 1;
        let size = cur.take_u16("message size")? as usize;

        if size < 4 || msg_start + size > data.len() {
            return Err(WireError::BadLengthField {
                context: "message size",
                claimed: size,
                available: data.len() - msg_start,
            });
        }
        let msg_end = msg_start + size;

        // bounded view over the rest of this message
        let mut mcur = Cursor::new(&data[..msg_end]);
        mcur.pos = cur.pos;

        let originator = if flags & (msg_flags::HAS_ORIGINATOR >> 4) != 0 {
            let octets = mcur.take(addr_len, "originator")?;
            Some(Address::from_slice(octets).map_err(|_| WireError::BadLengthField {
                context: "originator length",
                claimed: addr_len,
                available: types::constants::MAX_ADDR_LEN,
            })?)
        } else {
            None
        };
        let mut hop_limit_offset = None;
        let hop_limit = if flags & (msg_flags::HAS_HOP_LIMIT >> 4) != 0 {
            hop_limit_offset = Some(mcur.pos);
            Some(mcur.take_u8("hop limit")?)
        } else {
            None
        };
        let mut hop_count_offset = None;
        let hop_count = if flags & (msg_flags::HAS_HOP_COUNT >> 4) != 0 {
            hop_count_offset = Some(mcur.pos);
            Some(mcur.take_u8("hop count")?)
        } else {
            None
        };
        let seqno = if flags & (msg_flags::HAS_SEQNO >> 4) != 0 {
            Some(mcur.take_u16("message sequence number")?)
        } else {
            None
        };

        let msg_tlvs = parse_tlv_block(&mut mcur, TlvBlockKind::Flat)?;

        let ctx = MessageContext {
            msg_type,
            addr_len,
            size,
            originator,
            hop_limit,
            hop_count,
            seqno,
        };

        // bind message-scope consumers up front so the mandatory rule
        // can reject the message before anything is dispatched
        let mut bound: Vec<Option<TlvMatches<'_>>> = Vec::new();
        let mut mandatory_miss = None;
        let mut interest = false;
        for (_, reg) in &self.registrations {
            if reg.scope == ConsumerScope::Message && reg.wants_message(msg_type) {
                interest = true;
                match bind_entries(reg, &msg_tlvs) {
                    Ok(matches) => bound.push(Some(matches)),
                    Err((tlv_type, type_ext)) => {
                        mandatory_miss = Some(WireError::MandatoryTlvMissing {
                            msg_type,
                            tlv_type,
                            type_ext,
                        });
                        bound.push(None);
                    }
                }
            } else {
                if reg.scope == ConsumerScope::Address && reg.wants_message(msg_type) {
                    interest = true;
                }
                bound.push(None);
            }
        }

        let rejected = mandatory_miss.is_some();
        if let Some(err) = mandatory_miss {
            debug!(%err, "skipping message");
            result.skipped.push(err);
        }

        let process = !rejected && interest && policy.should_process(&ctx);
        let forward = policy.should_forward(&ctx);

        let mut dropped = false;
        let mut abort = false;

        if process {
            for (i, (_, reg)) in self.registrations.iter_mut().enumerate() {
                if reg.scope != ConsumerScope::Message || !reg.wants_message(msg_type) {
                    continue;
                }
                let matches = bound[i].take().expect("bound above");
                for tlv in &msg_tlvs {
                    match reg.consumer.on_tlv(&ctx, None, tlv) {
                        ConsumerResult::DropPacket => abort = true,
                        ConsumerResult::DropMessage => dropped = true,
                        _ => {}
                    }
                    if abort || dropped {
                        break;
                    }
                }
                if !abort && !dropped {
                    match reg.consumer.on_message(&ctx, &matches) {
                        ConsumerResult::DropPacket => abort = true,
                        ConsumerResult::DropMessage => dropped = true,
                        _ => {}
                    }
                }
                if abort || dropped {
                    break;
                }
            }
        }

        // address blocks are parsed even when dispatch stopped, so the
        // all-or-nothing structural validation still covers them
        let mut addr_index: u8 = 0;
        while mcur.remaining() > 0 {
            let block = parse_addr_block(&mut mcur, addr_len)?;
            for (i, addr) in block.addrs.iter().enumerate() {
                let block_index = i as u8;
                if process && !dropped && !abort {
                    match self.dispatch_address(&ctx, addr, addr_index, block_index, &block.tlvs) {
                        ConsumerResult::DropPacket => abort = true,
                        ConsumerResult::DropMessage => dropped = true,
                        _ => {}
                    }
                }
                addr_index = addr_index.saturating_add(1);
            }
        }

        if forward {
            let hop_ok = hop_limit.map_or(true, |h| h > 1) && hop_count.map_or(true, |h| h < 255);
            if hop_ok {
                let mut bytes = data[msg_start..msg_end].to_vec();
                if let Some(off) = hop_limit_offset {
                    bytes[off - msg_start] -= 1;
                }
                if let Some(off) = hop_count_offset {
                    bytes[off - msg_start] += 1;
                }
                result.forwards.push(ForwardedMessage { msg_type, bytes });
            } else {
                trace!(msg_type, ?hop_limit, ?hop_count, "hop limits forbid forwarding");
            }
        }

        cur.pos = msg_end;
        if abort {
            Ok(MessageVerdict::AbortPacket)
        } else {
            Ok(MessageVerdict::Continue)
        }
    }

    fn dispatch_address(
        &mut self,
        ctx: &MessageContext,
        addr: &Address,
        addr_index: u8,
        block_index: u8,
        block_tlvs: &[ParsedTlv<'_>],
    ) -> ConsumerResult {
        let covering: Vec<ParsedTlv<'_>> = block_tlvs
            .iter()
            .filter_map(|t| narrow_for_index(t, block_index))
            .collect();

        let mut bound = Vec::new();
        for (_, reg) in &self.registrations {
            if reg.scope == ConsumerScope::Address && reg.wants_message(ctx.msg_type) {
                bound.push(Some(bind_entries(reg, &covering)));
            } else {
                bound.push(None);
            }
        }

        for (i, (_, reg)) in self.registrations.iter_mut().enumerate() {
            if reg.scope != ConsumerScope::Address || !reg.wants_message(ctx.msg_type) {
                continue;
            }
            let matches = match bound[i].take().expect("bound above") {
                Ok(m) => m,
                // mandatory miss at address scope skips this address
                // for this consumer only
                Err(_) => continue,
            };
            for tlv in &covering {
                match reg.consumer.on_tlv(ctx, Some((addr, addr_index)), tlv) {
                    ConsumerResult::Okay => {}
                    other => return other,
                }
            }
            match reg.consumer.on_address(ctx, addr, addr_index, &matches) {
                ConsumerResult::Okay => {}
                ConsumerResult::DropAddress => return ConsumerResult::Okay,
                other => return other,
            }
        }
        ConsumerResult::Okay
    }
}
