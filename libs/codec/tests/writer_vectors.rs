//! Writer wire vectors
//!
//! Byte-exact expectations for the writer's canonical encoding: TLV
//! ordering, address compression, TLV coalescing, MTU handling.

use std::cell::RefCell;
use std::rc::Rc;

use hex_literal::hex;
use proptest::prelude::*;

use codec::{
    print_packet, Consumer, ConsumerResult, ContentProvider, MessageBuilder, MessageContext,
    PacketSink, ProcessAll, ProviderError, Reader, Registration, TargetKey, TlvMatches, Writer,
};
use types::Address;

#[derive(Default)]
struct Sink {
    seqno: Option<u16>,
    packets: Vec<Vec<u8>>,
}

impl PacketSink for Sink {
    fn prepare_header(&mut self, _target: TargetKey) -> Option<u16> {
        self.seqno
    }
    fn send_packet(&mut self, _target: TargetKey, packet: &[u8]) {
        self.packets.push(packet.to_vec());
    }
}

/// Provider replaying fixed TLVs and addresses.
#[derive(Default, Clone)]
struct FixedContent {
    tlvs: Vec<(u8, u8, Vec<u8>)>,
    addrs: Vec<(Address, Vec<(u8, u8, Vec<u8>, bool)>)>,
}

impl ContentProvider for FixedContent {
    fn add_message_tlvs(&mut self, msg: &mut MessageBuilder) -> Result<(), ProviderError> {
        for (tlv_type, type_ext, value) in &self.tlvs {
            msg.add_message_tlv(*tlv_type, *type_ext, value);
        }
        Ok(())
    }
    fn add_addresses(&mut self, msg: &mut MessageBuilder) -> Result<(), ProviderError> {
        for (addr, tlvs) in &self.addrs {
            let handle = msg
                .add_address(*addr)
                .map_err(|e| ProviderError::new(e.to_string()))?;
            for (tlv_type, type_ext, value, multivalue) in tlvs {
                msg.add_address_tlv(handle, *tlv_type, *type_ext, value, *multivalue);
            }
        }
        Ok(())
    }
}

fn emit(msg_size: usize, packet_size: usize, content: FixedContent) -> Result<Vec<Vec<u8>>, codec::BuildError> {
    let mut writer = Writer::new(msg_size);
    writer.register_message(1, 4);
    writer
        .register_content_provider(1, 0, Box::new(content))
        .unwrap();
    let target = writer.register_target(packet_size, 4);
    let mut sink = Sink::default();
    writer.create_message(1, &mut |_| true, &mut sink)?;
    writer.flush(target, false, &mut sink)?;
    Ok(sink.packets)
}

fn v4(s: &str) -> Address {
    s.parse().unwrap()
}

#[test]
fn two_message_tlvs_match_reference_dump() {
    // message type 1, addr len 4, two message TLVs carrying the
    // 32-bit values 23 and 42 in network order
    let content = FixedContent {
        tlvs: vec![
            (0, 0, 23u32.to_be_bytes().to_vec()),
            (1, 0, 42u32.to_be_bytes().to_vec()),
        ],
        addrs: vec![],
    };
    let packets = emit(128, 128, content).unwrap();
    assert_eq!(
        packets,
        vec![hex!("00 01 03 00 14 00 0e 00 10 04 00 00 00 17 01 10 04 00 00 00 2a").to_vec()]
    );
}

#[test]
fn message_tlvs_are_emitted_in_canonical_order() {
    // same TLVs added in reverse order produce identical bytes
    let content = FixedContent {
        tlvs: vec![
            (1, 0, 42u32.to_be_bytes().to_vec()),
            (0, 0, 23u32.to_be_bytes().to_vec()),
        ],
        addrs: vec![],
    };
    let packets = emit(128, 128, content).unwrap();
    assert_eq!(
        packets,
        vec![hex!("00 01 03 00 14 00 0e 00 10 04 00 00 00 17 01 10 04 00 00 00 2a").to_vec()]
    );
}

#[test]
fn address_head_compression() {
    // 10.0.0.1 and 10.0.0.2 share a three-byte head; no prefix list
    // because /32 is the full length
    let content = FixedContent {
        tlvs: vec![],
        addrs: vec![(v4("10.0.0.1"), vec![]), (v4("10.0.0.2"), vec![])],
    };
    let packets = emit(128, 128, content).unwrap();
    assert_eq!(
        packets,
        vec![hex!("00 01 03 00 10 00 00 02 80 03 0a 00 00 01 02 00 00").to_vec()]
    );
}

#[test]
fn shared_prefix_list_uses_single_plen() {
    let content = FixedContent {
        tlvs: vec![],
        addrs: vec![
            (v4("10.0.0.0").with_prefix(24).unwrap(), vec![]),
            (v4("10.0.1.0").with_prefix(24).unwrap(), vec![]),
        ],
    };
    let packets = emit(128, 128, content).unwrap();
    // head 10.0, omitted all-zero tail byte, mids 0 and 1, single
    // prefix length 24
    assert_eq!(
        packets,
        vec![hex!("00 01 03 00 11 00 00 02 b0 02 0a 00 01 00 01 18 00 00").to_vec()]
    );
}

#[test]
fn identical_address_tlvs_coalesce_to_whole_block() {
    let content = FixedContent {
        tlvs: vec![],
        addrs: vec![
            (v4("10.0.0.1"), vec![(7, 0, vec![0x2a], false)]),
            (v4("10.0.0.2"), vec![(7, 0, vec![0x2a], false)]),
        ],
    };
    let packets = emit(128, 128, content).unwrap();
    // one TLV without index fields covering both addresses
    assert_eq!(
        packets,
        vec![hex!("00 01 03 00 14 00 00 02 80 03 0a 00 00 01 02 00 04 07 10 01 2a").to_vec()]
    );
}

#[test]
fn differing_multivalue_tlvs_concatenate() {
    let content = FixedContent {
        tlvs: vec![],
        addrs: vec![
            (v4("10.0.0.1"), vec![(7, 0, vec![0x11], true)]),
            (v4("10.0.0.2"), vec![(7, 0, vec![0x22], true)]),
        ],
    };
    let packets = emit(128, 128, content).unwrap();
    // one multivalue TLV, payload split over both addresses
    assert_eq!(
        packets,
        vec![hex!("00 01 03 00 15 00 00 02 80 03 0a 00 00 01 02 00 05 07 14 02 11 22").to_vec()]
    );

    // the reader hands each address its own slice
    let seen = Rc::new(RefCell::new(Vec::new()));
    struct AddrTlvs(Rc<RefCell<Vec<(u8, Vec<u8>)>>>);
    impl Consumer for AddrTlvs {
        fn on_tlv(
            &mut self,
            _ctx: &MessageContext,
            addr: Option<(&Address, u8)>,
            tlv: &codec::ParsedTlv<'_>,
        ) -> ConsumerResult {
            if let Some((_, index)) = addr {
                self.0.borrow_mut().push((index, tlv.value.to_vec()));
            }
            ConsumerResult::Okay
        }
    }
    let mut reader = Reader::new();
    reader.register(Registration::address(
        1,
        Vec::new(),
        Box::new(AddrTlvs(seen.clone())),
    ));
    reader.handle_packet(&packets[0], &mut ProcessAll).unwrap();
    assert_eq!(
        *seen.borrow(),
        vec![(0, vec![0x11]), (1, vec![0x22])]
    );
}

#[test]
fn differing_plain_tlvs_fall_back_to_single_index() {
    let content = FixedContent {
        tlvs: vec![],
        addrs: vec![
            (v4("10.0.0.1"), vec![(7, 0, vec![0x11], false)]),
            (v4("10.0.0.2"), vec![(7, 0, vec![0x22], false)]),
        ],
    };
    let packets = emit(128, 128, content).unwrap();
    let text = print_packet(&packets[0]).unwrap();
    assert_eq!(text.matches("tlv: type 7").count(), 2);
    assert!(text.contains("value 11"));
    assert!(text.contains("value 22"));
}

#[test]
fn fragmentation_is_refused() {
    // 80 bytes of content against a 64-byte MTU target: construction
    // fails and send_packet never runs
    let content = FixedContent {
        tlvs: vec![(5, 0, vec![0xaa; 80])],
        addrs: vec![],
    };
    let err = emit(1280, 64, content).unwrap_err();
    assert!(matches!(err, codec::BuildError::MsgTooLarge { .. }));
}

#[test]
fn preemptive_flush_keeps_messages_whole() {
    // two messages that don't fit one packet together: the first is
    // flushed before the second is queued, neither is split
    let content = FixedContent {
        tlvs: vec![(5, 0, vec![0xaa; 40])],
        addrs: vec![],
    };
    let mut writer = Writer::new(128);
    writer.register_message(1, 4);
    writer
        .register_content_provider(1, 0, Box::new(content))
        .unwrap();
    let target = writer.register_target(64, 4);
    let mut sink = Sink::default();
    writer.create_message(1, &mut |_| true, &mut sink).unwrap();
    writer.create_message(1, &mut |_| true, &mut sink).unwrap();
    writer.flush(target, false, &mut sink).unwrap();

    assert_eq!(sink.packets.len(), 2);
    for packet in &sink.packets {
        // each packet holds exactly one whole message
        let size = u16::from_be_bytes([packet[3], packet[4]]) as usize;
        assert_eq!(packet.len(), 1 + size);
    }
}

#[test]
fn conversion_to_v6_target_maps_v4_addresses() {
    let content = FixedContent {
        tlvs: vec![],
        addrs: vec![(v4("10.0.0.1"), vec![])],
    };
    let mut writer = Writer::new(1280);
    writer.register_message(1, 4);
    writer
        .register_content_provider(1, 0, Box::new(content))
        .unwrap();
    let target = writer.register_target(1500, 16);
    let mut sink = Sink::default();
    writer.create_message(1, &mut |_| true, &mut sink).unwrap();
    writer.flush(target, false, &mut sink).unwrap();

    let text = print_packet(&sink.packets[0]).unwrap();
    assert!(text.contains("addr_len 16"));
    assert!(text.contains("::ffff:10.0.0.1"));
}

proptest! {
    /// Compression may regroup addresses into blocks but must never
    /// lose, reorder or alter them.
    #[test]
    fn compression_preserves_address_list(raw in prop::collection::vec((any::<[u8; 4]>(), 0u8..=32), 1..20)) {
        let mut addrs = Vec::new();
        for (bytes, plen) in &raw {
            let addr = Address::from_slice(bytes).unwrap().with_prefix(*plen).unwrap();
            if !addrs.iter().any(|(a, _)| *a == addr) {
                addrs.push((addr, vec![]));
            }
        }
        let expected: Vec<Address> = addrs.iter().map(|(a, _)| *a).collect();

        let content = FixedContent { tlvs: vec![], addrs };
        let packets = emit(1280, 1500, content).unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        struct Addrs(Rc<RefCell<Vec<Address>>>);
        impl Consumer for Addrs {
            fn on_address(
                &mut self,
                _ctx: &MessageContext,
                addr: &Address,
                _index: u8,
                _tlvs: &TlvMatches<'_>,
            ) -> ConsumerResult {
                self.0.borrow_mut().push(*addr);
                ConsumerResult::Okay
            }
        }
        let mut reader = Reader::new();
        reader.register(Registration::address(1, Vec::new(), Box::new(Addrs(seen.clone()))));
        reader.handle_packet(&packets[0], &mut ProcessAll).unwrap();

        prop_assert_eq!(&*seen.borrow(), &expected);
    }
}
