//! Reader boundary behaviour
//!
//! Hand-crafted packets for the edge cases of the wire format: legal
//! oddities that must parse and malformed structures that must fail
//! with the right error class.

use std::cell::RefCell;
use std::rc::Rc;

use hex_literal::hex;

use codec::{
    Consumer, ConsumerEntry, ConsumerResult, MessageContext, PacketContext, ProcessAll, Reader,
    Registration, TlvMatches, WireError,
};
use types::Address;

#[derive(Debug, Default)]
struct Seen {
    packet_tlv_values: Vec<Vec<u8>>,
    addr_values: Vec<(u8, Option<Vec<u8>>)>, // (address index, entry 0 value)
    addrs: Vec<Address>,
    zero_len_value: Option<bool>,
}

struct Probe(Rc<RefCell<Seen>>);

impl Consumer for Probe {
    fn on_packet(&mut self, _ctx: &PacketContext, tlvs: &TlvMatches<'_>) -> ConsumerResult {
        let mut seen = self.0.borrow_mut();
        for tlv in tlvs.entry(0) {
            seen.packet_tlv_values.push(tlv.value.to_vec());
        }
        ConsumerResult::Okay
    }

    fn on_message(&mut self, _ctx: &MessageContext, tlvs: &TlvMatches<'_>) -> ConsumerResult {
        if let Some(tlv) = tlvs.first(0) {
            self.0.borrow_mut().zero_len_value = Some(tlv.has_value && tlv.value.is_empty());
        }
        ConsumerResult::Okay
    }

    fn on_address(
        &mut self,
        _ctx: &MessageContext,
        addr: &Address,
        index: u8,
        tlvs: &TlvMatches<'_>,
    ) -> ConsumerResult {
        let mut seen = self.0.borrow_mut();
        seen.addrs.push(*addr);
        seen.addr_values
            .push((index, tlvs.first(0).map(|t| t.value.to_vec())));
        ConsumerResult::Okay
    }
}

fn run_message_probe(packet: &[u8], entry: ConsumerEntry) -> Result<Seen, WireError> {
    let seen = Rc::new(RefCell::new(Seen::default()));
    let mut reader = Reader::new();
    reader.register(Registration::message(
        1,
        vec![entry],
        Box::new(Probe(seen.clone())),
    ));
    reader.handle_packet(packet, &mut ProcessAll)?;
    drop(reader);
    Ok(Rc::try_unwrap(seen).unwrap().into_inner())
}

fn run_address_probe(packet: &[u8], entry: ConsumerEntry) -> Result<Seen, WireError> {
    let seen = Rc::new(RefCell::new(Seen::default()));
    let mut reader = Reader::new();
    reader.register(Registration::address(
        1,
        vec![entry],
        Box::new(Probe(seen.clone())),
    ));
    reader.handle_packet(packet, &mut ProcessAll)?;
    drop(reader);
    Ok(Rc::try_unwrap(seen).unwrap().into_inner())
}

#[test]
fn zero_length_value_tlv_is_legal() {
    // message TLV type 5 with the value flag set and zero length
    let packet = hex!("00 01 03 00 09 00 03 05 10 00");
    let seen = run_message_probe(&packet, ConsumerEntry::new(5)).unwrap();
    assert_eq!(seen.zero_len_value, Some(true));
}

#[test]
fn single_index_and_degenerate_range_are_equivalent() {
    // TLV attached to address 0 only, once as single index, once as
    // the range [0,0]
    let single = hex!("00 01 03 00 15 00 00 02 80 03 0a 00 00 01 02 00 05 07 50 00 01 aa");
    let range = hex!("00 01 03 00 16 00 00 02 80 03 0a 00 00 01 02 00 06 07 30 00 00 01 aa");

    let a = run_address_probe(&single, ConsumerEntry::new(7)).unwrap();
    let b = run_address_probe(&range, ConsumerEntry::new(7)).unwrap();
    assert_eq!(a.addr_values, b.addr_values);
    assert_eq!(a.addr_values[0], (0, Some(vec![0xaa])));
    assert_eq!(a.addr_values[1], (1, None));
}

#[test]
fn head_plus_tail_equal_to_addr_len_is_legal() {
    // two addresses that are byte-identical: full head, no mids
    let packet = hex!("00 01 03 00 10 00 00 02 c0 02 aa bb 02 cc dd 00 00");
    let seen = run_address_probe(&packet, ConsumerEntry::new(7)).unwrap();
    let expected = Address::from_slice(&[0xaa, 0xbb, 0xcc, 0xdd]).unwrap();
    assert_eq!(seen.addrs, vec![expected, expected]);
}

#[test]
fn empty_address_block_is_illegal() {
    let packet = hex!("00 01 03 00 08 00 00 00 00");
    let err = run_address_probe(&packet, ConsumerEntry::new(7)).unwrap_err();
    assert!(matches!(err, WireError::BadLengthField { .. }));
}

#[test]
fn index_past_block_end_is_rejected() {
    // range [0,5] in a two-address block
    let packet = hex!("00 01 03 00 16 00 00 02 80 03 0a 00 00 01 02 00 06 07 30 00 05 01 aa");
    let err = run_address_probe(&packet, ConsumerEntry::new(7)).unwrap_err();
    assert_eq!(
        err,
        WireError::BadTlvIndexRange {
            start: 0,
            stop: 5,
            num_addr: 2
        }
    );
}

#[test]
fn inverted_index_range_is_rejected() {
    let packet = hex!("00 01 03 00 16 00 00 02 80 03 0a 00 00 01 02 00 06 07 30 01 00 01 aa");
    let err = run_address_probe(&packet, ConsumerEntry::new(7)).unwrap_err();
    assert!(matches!(err, WireError::BadTlvIndexRange { .. }));
}

#[test]
fn head_and_tail_overflowing_addr_len_is_rejected() {
    let packet = hex!("00 01 03 00 0f 00 00 01 c0 03 0a 0b 0c 02 0d 0e");
    let err = run_address_probe(&packet, ConsumerEntry::new(7)).unwrap_err();
    assert_eq!(
        err,
        WireError::AddrBlockOverflow {
            head: 3,
            tail: 2,
            addr_len: 4
        }
    );
}

#[test]
fn tlv_block_longer_than_message_is_rejected() {
    // TLV block claims 5 bytes, message ends after 2
    let packet = hex!("00 01 03 00 08 00 05 00 00");
    let mut reader = Reader::new();
    let err = reader.handle_packet(&packet, &mut ProcessAll).unwrap_err();
    assert!(matches!(err, WireError::BadLengthField { .. }));
}

#[test]
fn truncated_tlv_value_is_rejected() {
    // TLV claims a 9-byte value with 2 bytes present
    let packet = hex!("00 01 03 00 0b 00 05 05 10 09 aa bb");
    let mut reader = Reader::new();
    let err = reader.handle_packet(&packet, &mut ProcessAll).unwrap_err();
    assert!(matches!(
        err,
        WireError::Truncated { .. } | WireError::BadLengthField { .. }
    ));
}

#[test]
fn packet_tlv_block_reaches_packet_consumers() {
    let seen = Rc::new(RefCell::new(Seen::default()));
    let mut reader = Reader::new();
    reader.register(Registration::packet(
        vec![ConsumerEntry::new(0x2a)],
        Box::new(Probe(seen.clone())),
    ));
    // packet with TLV block only, no messages
    let packet = hex!("04 00 04 2a 10 01 aa");
    reader.handle_packet(&packet, &mut ProcessAll).unwrap();
    assert_eq!(seen.borrow().packet_tlv_values, vec![vec![0xaa]]);
}

#[test]
fn packet_with_seqno_and_tlvs_parses_both() {
    let seen = Rc::new(RefCell::new(Seen::default()));
    let mut reader = Reader::new();
    reader.register(Registration::packet(
        vec![ConsumerEntry::new(0x2a)],
        Box::new(Probe(seen.clone())),
    ));
    let packet = hex!("0c 12 34 00 04 2a 10 01 bb");
    let result = reader.handle_packet(&packet, &mut ProcessAll).unwrap();
    assert_eq!(result.pkt_seqno, Some(0x1234));
    assert_eq!(seen.borrow().packet_tlv_values, vec![vec![0xbb]]);
}

#[test]
fn satisfied_mandatory_entry_exposes_all_matches() {
    // two TLVs of type 5: the entry slot chains both in wire order
    let packet = hex!("00 01 03 00 0e 00 08 05 10 01 aa 05 10 01 bb");
    let seen = Rc::new(RefCell::new(Vec::new()));
    struct Values(Rc<RefCell<Vec<Vec<u8>>>>);
    impl Consumer for Values {
        fn on_message(&mut self, _ctx: &MessageContext, tlvs: &TlvMatches<'_>) -> ConsumerResult {
            for tlv in tlvs.entry(0) {
                self.0.borrow_mut().push(tlv.value.to_vec());
            }
            ConsumerResult::Okay
        }
    }
    let mut reader = Reader::new();
    reader.register(Registration::message(
        1,
        vec![ConsumerEntry::new(5).mandatory()],
        Box::new(Values(seen.clone())),
    ));
    let result = reader.handle_packet(&packet, &mut ProcessAll).unwrap();
    assert!(result.skipped.is_empty());
    assert_eq!(*seen.borrow(), vec![vec![0xaa], vec![0xbb]]);
}

#[test]
fn message_and_packet_tlv_index_flags_are_rejected_outside_blocks() {
    // message TLV with a single-index flag is malformed
    let packet = hex!("00 01 03 00 0a 00 04 05 50 00 00");
    let mut reader = Reader::new();
    let err = reader.handle_packet(&packet, &mut ProcessAll).unwrap_err();
    assert!(matches!(err, WireError::BadTlvIndexRange { .. }));
}
