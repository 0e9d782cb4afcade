//! Message construction state and wire serialization
//!
//! Content providers accumulate TLVs and addresses into a
//! [`MessageBuilder`]; serialization turns that neutral form into wire
//! bytes for one target address length, compressing address blocks and
//! coalescing address TLVs on the way out.

use types::constants::{addr_flags, msg_flags, tlv_flags};
use types::Address;

use crate::error::{BuildError, BuildResult};
use crate::writer::compress::{partition, BlockSpan};

/// How the message sequence number field is filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeqnoOption {
    /// No sequence number field.
    #[default]
    Omit,
    /// Writer assigns the next value of its 16-bit counter.
    Auto,
    /// Explicit value.
    Set(u16),
}

/// Header fields a registered header builder may enable. Field
/// presence on the wire follows from which options are set.
#[derive(Debug, Clone, Default)]
pub struct MessageHeader {
    pub originator: Option<Address>,
    pub hop_limit: Option<u8>,
    pub hop_count: Option<u8>,
    pub seqno: SeqnoOption,
}

/// Callback deciding the header layout of one message type.
pub trait HeaderBuilder {
    fn build_header(&mut self, msg_type: u8, header: &mut MessageHeader);
}

impl<F: FnMut(u8, &mut MessageHeader)> HeaderBuilder for F {
    fn build_header(&mut self, msg_type: u8, header: &mut MessageHeader) {
        self(msg_type, header)
    }
}

/// Handle to an address added during message construction; used to
/// attach address TLVs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressHandle(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) struct MsgTlv {
    pub tlv_type: u8,
    pub type_ext: u8,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) struct AddrTlv {
    pub tlv_type: u8,
    pub type_ext: u8,
    pub value: Vec<u8>,
    pub multivalue: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct BuildAddress {
    pub addr: Address,
    pub tlvs: Vec<AddrTlv>,
}

/// Accumulates the content of one message while providers run.
#[derive(Debug)]
pub struct MessageBuilder {
    addr_len: usize,
    pub(crate) tlvs: Vec<MsgTlv>,
    pub(crate) addrs: Vec<BuildAddress>,
}

impl MessageBuilder {
    pub(crate) fn new(addr_len: usize) -> Self {
        Self {
            addr_len,
            tlvs: Vec::new(),
            addrs: Vec::new(),
        }
    }

    /// Address length this message type was registered with.
    pub fn addr_len(&self) -> usize {
        self.addr_len
    }

    /// Add a message-scope TLV. The writer emits message TLVs in
    /// canonical order (type, extension, value), not insertion order.
    pub fn add_message_tlv(&mut self, tlv_type: u8, type_ext: u8, value: &[u8]) {
        self.tlvs.push(MsgTlv {
            tlv_type,
            type_ext,
            value: value.to_vec(),
        });
    }

    /// Add an address. The address is converted to the message's
    /// registered length; adding the same address twice returns the
    /// existing handle.
    pub fn add_address(&mut self, addr: Address) -> BuildResult<AddressHandle> {
        let addr = addr
            .convert_to_len(self.addr_len)
            .map_err(|_| BuildError::AddressConversion {
                addr,
                target_len: self.addr_len,
            })?;
        if let Some(i) = self.addrs.iter().position(|a| a.addr == addr) {
            return Ok(AddressHandle(i));
        }
        self.addrs.push(BuildAddress {
            addr,
            tlvs: Vec::new(),
        });
        Ok(AddressHandle(self.addrs.len() - 1))
    }

    /// Attach an address TLV to a previously added address. With
    /// `multivalue` set, values of adjacent addresses may be
    /// concatenated into one multivalue TLV on the wire.
    pub fn add_address_tlv(
        &mut self,
        handle: AddressHandle,
        tlv_type: u8,
        type_ext: u8,
        value: &[u8],
        multivalue: bool,
    ) {
        self.addrs[handle.0].tlvs.push(AddrTlv {
            tlv_type,
            type_ext,
            value: value.to_vec(),
            multivalue,
        });
    }
}

/// Header with the seqno already resolved by the writer.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResolvedHeader {
    pub originator: Option<Address>,
    pub hop_limit: Option<u8>,
    pub hop_count: Option<u8>,
    pub seqno: Option<u16>,
}

/// Index coverage of an emitted address TLV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexForm {
    /// Covers the whole block; no index fields on the wire.
    WholeBlock,
    Single(u8),
    Range(u8, u8),
}

fn encode_tlv(out: &mut Vec<u8>, tlv_type: u8, type_ext: u8, index: Option<IndexForm>, value: &[u8], multivalue: bool) {
    let mut flags = 0u8;
    if type_ext != 0 {
        flags |= tlv_flags::HAS_TYPE_EXT;
    }
    match index {
        Some(IndexForm::Single(_)) => flags |= tlv_flags::HAS_SINGLE_INDEX,
        Some(IndexForm::Range(_, _)) => flags |= tlv_flags::HAS_MULTI_INDEX,
        Some(IndexForm::WholeBlock) | None => {}
    }
    if !value.is_empty() {
        flags |= tlv_flags::HAS_VALUE;
        if value.len() > 255 {
            flags |= tlv_flags::HAS_EXT_LEN;
        }
        if multivalue {
            flags |= tlv_flags::IS_MULTIVALUE;
        }
    }

    out.push(tlv_type);
    out.push(flags);
    if type_ext != 0 {
        out.push(type_ext);
    }
    match index {
        Some(IndexForm::Single(i)) => out.push(i),
        Some(IndexForm::Range(a, b)) => {
            out.push(a);
            out.push(b);
        }
        _ => {}
    }
    if !value.is_empty() {
        if value.len() > 255 {
            out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        } else {
            out.push(value.len() as u8);
        }
        out.extend_from_slice(value);
    }
}

/// Serialize one finished message at `target_addr_len`, converting
/// every address. Fails with `MsgTooLarge` when the result exceeds
/// `max_size`.
pub(crate) fn serialize_message(
    msg_type: u8,
    header: &ResolvedHeader,
    builder: &MessageBuilder,
    target_addr_len: usize,
    max_size: usize,
) -> BuildResult<Vec<u8>> {
    let mut out = Vec::with_capacity(128);

    let mut flags = 0u8;
    if header.originator.is_some() {
        flags |= msg_flags::HAS_ORIGINATOR;
    }
    if header.hop_limit.is_some() {
        flags |= msg_flags::HAS_HOP_LIMIT;
    }
    if header.hop_count.is_some() {
        flags |= msg_flags::HAS_HOP_COUNT;
    }
    if header.seqno.is_some() {
        flags |= msg_flags::HAS_SEQNO;
    }

    out.push(msg_type);
    out.push(flags | (target_addr_len as u8 - 1));
    out.extend_from_slice(&[0, 0]); // size, patched below

    if let Some(orig) = header.originator {
        let orig = orig
            .convert_to_len(target_addr_len)
            .map_err(|_| BuildError::AddressConversion {
                addr: orig,
                target_len: target_addr_len,
            })?;
        out.extend_from_slice(orig.as_bytes());
    }
    if let Some(hl) = header.hop_limit {
        out.push(hl);
    }
    if let Some(hc) = header.hop_count {
        out.push(hc);
    }
    if let Some(seqno) = header.seqno {
        out.extend_from_slice(&seqno.to_be_bytes());
    }

    // message TLV block in canonical order
    let mut msg_tlvs: Vec<&MsgTlv> = builder.tlvs.iter().collect();
    msg_tlvs.sort_by(|a, b| {
        (a.tlv_type, a.type_ext, &a.value).cmp(&(b.tlv_type, b.type_ext, &b.value))
    });
    let block_start = out.len();
    out.extend_from_slice(&[0, 0]);
    for tlv in msg_tlvs {
        encode_tlv(&mut out, tlv.tlv_type, tlv.type_ext, None, &tlv.value, false);
    }
    patch_block_len(&mut out, block_start)?;

    // convert addresses, keeping append order
    let mut addrs = Vec::with_capacity(builder.addrs.len());
    for a in &builder.addrs {
        let converted = a
            .addr
            .convert_to_len(target_addr_len)
            .map_err(|_| BuildError::AddressConversion {
                addr: a.addr,
                target_len: target_addr_len,
            })?;
        addrs.push(converted);
    }

    for span in partition(&addrs) {
        encode_addr_block(&mut out, &addrs, &builder.addrs, &span)?;
    }

    if out.len() > max_size {
        return Err(BuildError::MsgTooLarge {
            size: out.len(),
            max: max_size,
        });
    }
    let size = (out.len() as u16).to_be_bytes();
    out[2] = size[0];
    out[3] = size[1];
    Ok(out)
}

fn patch_block_len(out: &mut Vec<u8>, block_start: usize) -> BuildResult<()> {
    let len = out.len() - block_start - 2;
    if len > u16::MAX as usize {
        return Err(BuildError::MsgTooLarge {
            size: len,
            max: u16::MAX as usize,
        });
    }
    let bytes = (len as u16).to_be_bytes();
    out[block_start] = bytes[0];
    out[block_start + 1] = bytes[1];
    Ok(())
}

fn encode_addr_block(
    out: &mut Vec<u8>,
    addrs: &[Address],
    sources: &[BuildAddress],
    span: &BlockSpan,
) -> BuildResult<()> {
    let block = &addrs[span.range.clone()];
    let addr_len = block[0].len();
    let num = block.len();
    let head_len = span.head_len;
    let tail_len = span.tail_len;
    let first = block[0].as_bytes();
    let tail = &first[addr_len - tail_len..];
    let zero_tail = tail_len > 0 && tail.iter().all(|&b| b == 0);

    let mut flags = 0u8;
    if head_len > 0 {
        flags |= addr_flags::HAS_HEAD;
    }
    if tail_len > 0 {
        flags |= if zero_tail {
            addr_flags::HAS_ZERO_TAIL
        } else {
            addr_flags::HAS_FULL_TAIL
        };
    }

    let full = (addr_len * 8) as u8;
    let plens: Vec<u8> = block.iter().map(|a| a.prefix_len()).collect();
    let all_full = plens.iter().all(|&p| p == full);
    let single_plen = !all_full && plens.iter().all(|&p| p == plens[0]);
    if single_plen {
        flags |= addr_flags::HAS_SINGLE_PLEN;
    } else if !all_full {
        flags |= addr_flags::HAS_MULTI_PLEN;
    }

    out.push(num as u8);
    out.push(flags);
    if head_len > 0 {
        out.push(head_len as u8);
        out.extend_from_slice(&first[..head_len]);
    }
    if tail_len > 0 {
        out.push(tail_len as u8);
        if !zero_tail {
            out.extend_from_slice(tail);
        }
    }
    for a in block {
        out.extend_from_slice(&a.as_bytes()[head_len..addr_len - tail_len]);
    }
    if single_plen {
        out.push(plens[0]);
    } else if !all_full {
        out.extend_from_slice(&plens);
    }

    let block_start = out.len();
    out.extend_from_slice(&[0, 0]);
    encode_addr_tlvs(out, sources, span)?;
    patch_block_len(out, block_start)
}

/// Emit the TLVs of one address block, coalescing contiguous runs.
fn encode_addr_tlvs(out: &mut Vec<u8>, sources: &[BuildAddress], span: &BlockSpan) -> BuildResult<()> {
    let block = &sources[span.range.clone()];
    let num = block.len();

    // (type, ext) keys in order of first appearance
    let mut keys: Vec<(u8, u8)> = Vec::new();
    for a in block {
        for t in &a.tlvs {
            if !keys.contains(&(t.tlv_type, t.type_ext)) {
                keys.push((t.tlv_type, t.type_ext));
            }
        }
    }

    for (tlv_type, type_ext) in keys {
        // one coalescing pass per "layer", so an address carrying the
        // same (type, ext) twice emits two TLVs
        let mut layer = 0;
        loop {
            let vals: Vec<Option<&AddrTlv>> = block
                .iter()
                .map(|a| {
                    a.tlvs
                        .iter()
                        .filter(|t| t.tlv_type == tlv_type && t.type_ext == type_ext)
                        .nth(layer)
                })
                .collect();
            if vals.iter().all(|v| v.is_none()) {
                break;
            }

            let mut i = 0;
            while i < num {
                if vals[i].is_none() {
                    i += 1;
                    continue;
                }
                // maximal run of addresses carrying this layer
                let mut j = i;
                while j + 1 < num && vals[j + 1].is_some() {
                    j += 1;
                }
                emit_run(out, &vals[i..=j], i, j, num, tlv_type, type_ext);
                i = j + 1;
            }
            layer += 1;
        }
    }
    Ok(())
}

fn index_form(start: usize, stop: usize, num: usize) -> IndexForm {
    if start == 0 && stop == num - 1 {
        IndexForm::WholeBlock
    } else if start == stop {
        IndexForm::Single(start as u8)
    } else {
        IndexForm::Range(start as u8, stop as u8)
    }
}

fn emit_run(
    out: &mut Vec<u8>,
    run: &[Option<&AddrTlv>],
    start: usize,
    stop: usize,
    num: usize,
    tlv_type: u8,
    type_ext: u8,
) {
    let tlvs: Vec<&AddrTlv> = run.iter().map(|v| v.expect("run is dense")).collect();

    let all_equal = tlvs.windows(2).all(|w| w[0].value == w[1].value);
    if all_equal {
        encode_tlv(
            out,
            tlv_type,
            type_ext,
            Some(index_form(start, stop, num)),
            &tlvs[0].value,
            false,
        );
        return;
    }

    let multivalue_ok = tlvs.iter().all(|t| t.multivalue)
        && tlvs.windows(2).all(|w| w[0].value.len() == w[1].value.len())
        && !tlvs[0].value.is_empty();
    if multivalue_ok {
        let mut value = Vec::with_capacity(tlvs[0].value.len() * tlvs.len());
        for t in &tlvs {
            value.extend_from_slice(&t.value);
        }
        encode_tlv(
            out,
            tlv_type,
            type_ext,
            Some(index_form(start, stop, num)),
            &value,
            true,
        );
        return;
    }

    // fall back to sub-runs of equal values
    let mut i = 0;
    while i < tlvs.len() {
        let mut j = i;
        while j + 1 < tlvs.len() && tlvs[j + 1].value == tlvs[i].value {
            j += 1;
        }
        encode_tlv(
            out,
            tlv_type,
            type_ext,
            Some(index_form(start + i, start + j, num)),
            &tlvs[i].value,
            false,
        );
        i = j + 1;
    }
}
