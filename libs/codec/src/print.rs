//! Structured dump of RFC 5444 packets
//!
//! The printer is a reader with a special set of wildcard consumers
//! that render every event as indented text. It shares all decoding
//! invariants with the reader and serves as the reference oracle in
//! the interop tests: two packets that print identically parse
//! identically.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use types::Address;

use crate::consumer::{
    Consumer, ConsumerResult, MessageContext, PacketContext, ParsedTlv, Registration, TlvMatches,
};
use crate::error::WireResult;
use crate::reader::{ProcessAll, Reader};

struct PrintState {
    out: String,
    pending: Vec<String>,
}

impl PrintState {
    fn flush_pending(&mut self, indent: &str) {
        for line in self.pending.drain(..) {
            self.out.push_str(indent);
            self.out.push_str(&line);
            self.out.push('\n');
        }
    }
}

struct PrintConsumer {
    state: Rc<RefCell<PrintState>>,
}

fn format_tlv(tlv: &ParsedTlv<'_>) -> String {
    let mut line = format!("tlv: type {}", tlv.tlv_type);
    if tlv.type_ext != 0 {
        let _ = write!(line, " ext {}", tlv.type_ext);
    }
    if tlv.has_value {
        let _ = write!(line, " value {}", hex::encode(tlv.value));
    }
    line
}

impl Consumer for PrintConsumer {
    fn on_packet_tlv(&mut self, _ctx: &PacketContext, tlv: &ParsedTlv<'_>) -> ConsumerResult {
        self.state.borrow_mut().pending.push(format_tlv(tlv));
        ConsumerResult::Okay
    }

    fn on_packet(&mut self, ctx: &PacketContext, _tlvs: &TlvMatches<'_>) -> ConsumerResult {
        let mut state = self.state.borrow_mut();
        state.out.push_str("packet\n");
        if let Some(seqno) = ctx.seqno {
            let _ = writeln!(state.out, "\tseqno: {}", seqno);
        }
        state.flush_pending("\t");
        ConsumerResult::Okay
    }

    fn on_tlv(
        &mut self,
        _ctx: &MessageContext,
        addr: Option<(&Address, u8)>,
        tlv: &ParsedTlv<'_>,
    ) -> ConsumerResult {
        // message TLVs buffer until the block callback; address TLVs
        // buffer until their address line
        let _ = addr;
        self.state.borrow_mut().pending.push(format_tlv(tlv));
        ConsumerResult::Okay
    }

    fn on_message(&mut self, ctx: &MessageContext, _tlvs: &TlvMatches<'_>) -> ConsumerResult {
        let mut state = self.state.borrow_mut();
        let _ = writeln!(
            state.out,
            "\tmessage: type {} addr_len {}",
            ctx.msg_type, ctx.addr_len
        );
        if let Some(orig) = ctx.originator {
            let _ = writeln!(state.out, "\t\toriginator: {}", orig);
        }
        if let Some(hl) = ctx.hop_limit {
            let _ = writeln!(state.out, "\t\thop_limit: {}", hl);
        }
        if let Some(hc) = ctx.hop_count {
            let _ = writeln!(state.out, "\t\thop_count: {}", hc);
        }
        if let Some(seqno) = ctx.seqno {
            let _ = writeln!(state.out, "\t\tseqno: {}", seqno);
        }
        state.flush_pending("\t\t");
        ConsumerResult::Okay
    }

    fn on_address(
        &mut self,
        _ctx: &MessageContext,
        addr: &Address,
        index: u8,
        _tlvs: &TlvMatches<'_>,
    ) -> ConsumerResult {
        let mut state = self.state.borrow_mut();
        let _ = writeln!(state.out, "\t\taddress {}: {}", index, addr);
        state.flush_pending("\t\t\t");
        ConsumerResult::Okay
    }
}

/// Render one packet as indented text. On a parse error the text
/// produced so far is discarded and the error returned.
pub fn print_packet(data: &[u8]) -> WireResult<String> {
    let state = Rc::new(RefCell::new(PrintState {
        out: String::new(),
        pending: Vec::new(),
    }));

    let mut reader = Reader::new();
    reader.register(Registration::packet(
        Vec::new(),
        Box::new(PrintConsumer { state: state.clone() }),
    ));
    reader.register(Registration::message(
        None,
        Vec::new(),
        Box::new(PrintConsumer { state: state.clone() }),
    ));
    reader.register(Registration::address(
        None,
        Vec::new(),
        Box::new(PrintConsumer { state: state.clone() }),
    ));

    reader.handle_packet(data, &mut ProcessAll)?;
    drop(reader);

    let state = Rc::try_unwrap(state).ok().expect("printer owns the state");
    Ok(state.into_inner().out)
}

/// Classic offset/hex/ascii dump, 16 bytes per line. Used for the
/// warn-path diagnostics of undecodable datagrams.
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:04x}:", i * 16);
        for b in chunk {
            let _ = write!(out, " {:02x}", b);
        }
        for _ in chunk.len()..16 {
            out.push_str("   ");
        }
        out.push_str("  ");
        for b in chunk {
            out.push(if b.is_ascii_graphic() { *b as char } else { '.' });
        }
        out.push('\n');
    }
    out
}
