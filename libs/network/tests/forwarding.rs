//! Forwarding and process-once behaviour across interfaces

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use std::time::Duration;

use hex_literal::hex;
use tokio::time::Instant;

use codec::{Consumer, ConsumerResult, MessageContext, Registration, TlvMatches};
use network::{Protocol, RecordingTransport};
use types::Address;

fn v4(s: &str) -> Address {
    s.parse().unwrap()
}

/// One message: type 1, originator 10.0.0.99, hop_limit 3, hop_count 1,
/// seqno 7, no TLVs, no addresses.
const PACKET: [u8; 15] = hex!("00 01 f3 00 0e 0a 00 00 63 03 01 00 07 00 00");

/// The same message as it must leave the node: hop_limit decremented,
/// hop_count incremented.
const FORWARDED: [u8; 15] = hex!("00 01 f3 00 0e 0a 00 00 63 02 02 00 07 00 00");

fn three_interface_protocol() -> Protocol {
    let mut protocol = Protocol::new("rfc5444", true);
    protocol.reconfigure(269, Duration::from_millis(100));
    for (iface, dst) in [("ifA", "10.0.0.2"), ("ifB", "10.0.1.2"), ("ifC", "10.0.2.2")] {
        protocol.add_interface(iface);
        protocol.add_target(iface, v4(dst)).unwrap();
    }
    protocol
}

#[test]
fn message_floods_to_every_other_interface() {
    let mut protocol = three_interface_protocol();
    let mut transport = RecordingTransport::default();
    let now = Instant::now();

    protocol
        .handle_packet("ifA", v4("10.0.0.2"), &PACKET, now, &mut transport)
        .unwrap();
    // queued until the aggregation timer fires
    assert!(transport.sent.is_empty());
    assert!(protocol.next_deadline().is_some());

    protocol.handle_timeout(now + Duration::from_millis(100), &mut transport);

    let interfaces: HashSet<&str> = transport.sent.iter().map(|s| s.interface.as_str()).collect();
    assert_eq!(interfaces, HashSet::from(["ifB", "ifC"]));
    for sent in &transport.sent {
        assert_eq!(sent.packet, FORWARDED);
        assert_eq!(sent.port, 269);
    }
}

#[test]
fn second_arrival_does_not_reforward() {
    let mut protocol = three_interface_protocol();
    let mut transport = RecordingTransport::default();
    let now = Instant::now();

    protocol
        .handle_packet("ifA", v4("10.0.0.2"), &PACKET, now, &mut transport)
        .unwrap();
    protocol.handle_timeout(now + Duration::from_millis(100), &mut transport);
    let after_first = transport.sent.len();
    assert_eq!(after_first, 2);

    // same (type, originator, seqno) from another neighbor
    protocol
        .handle_packet("ifB", v4("10.0.1.7"), &PACKET, now, &mut transport)
        .unwrap();
    protocol.handle_timeout(now + Duration::from_millis(300), &mut transport);
    assert_eq!(transport.sent.len(), after_first);
}

#[test]
fn own_messages_are_not_forwarded() {
    let mut protocol = three_interface_protocol();
    protocol.add_local_originator(v4("10.0.0.99"));
    let mut transport = RecordingTransport::default();
    let now = Instant::now();

    protocol
        .handle_packet("ifA", v4("10.0.0.2"), &PACKET, now, &mut transport)
        .unwrap();
    protocol.handle_timeout(now + Duration::from_secs(1), &mut transport);
    assert!(transport.sent.is_empty());
}

#[test]
fn exhausted_hop_limit_stops_forwarding() {
    // hop_limit 1: the message must die here
    let packet = hex!("00 01 f3 00 0e 0a 00 00 63 01 01 00 07 00 00");
    let mut protocol = three_interface_protocol();
    let mut transport = RecordingTransport::default();
    let now = Instant::now();

    protocol
        .handle_packet("ifA", v4("10.0.0.2"), &packet, now, &mut transport)
        .unwrap();
    protocol.handle_timeout(now + Duration::from_secs(1), &mut transport);
    assert!(transport.sent.is_empty());
}

struct Counting(Rc<RefCell<usize>>);

impl Consumer for Counting {
    fn on_message(&mut self, _ctx: &MessageContext, _tlvs: &TlvMatches<'_>) -> ConsumerResult {
        *self.0.borrow_mut() += 1;
        ConsumerResult::Okay
    }
}

#[test]
fn messages_are_processed_at_most_once() {
    let mut protocol = three_interface_protocol();
    let count = Rc::new(RefCell::new(0));
    protocol.register_consumer(Registration::message(
        1,
        Vec::new(),
        Box::new(Counting(count.clone())),
    ));
    let mut transport = RecordingTransport::default();
    let now = Instant::now();

    protocol
        .handle_packet("ifA", v4("10.0.0.2"), &PACKET, now, &mut transport)
        .unwrap();
    protocol
        .handle_packet("ifB", v4("10.0.1.7"), &PACKET, now, &mut transport)
        .unwrap();
    assert_eq!(*count.borrow(), 1);
}

#[test]
fn acl_rejects_before_any_dispatch() {
    let mut protocol = Protocol::new("rfc5444", true);
    let config = network::Config::parse(
        r#"
[interface.ifA]
acl = ["reject 10.0.0.0/8"]
"#,
    )
    .unwrap();
    protocol.apply_config(&config);

    let count = Rc::new(RefCell::new(0));
    protocol.register_consumer(Registration::message(
        1,
        Vec::new(),
        Box::new(Counting(count.clone())),
    ));
    let mut transport = RecordingTransport::default();
    let now = Instant::now();

    protocol
        .handle_packet("ifA", v4("10.0.0.2"), &PACKET, now, &mut transport)
        .unwrap();
    assert_eq!(*count.borrow(), 0);

    protocol
        .handle_packet("ifA", v4("192.168.1.1"), &PACKET, now, &mut transport)
        .unwrap();
    assert_eq!(*count.borrow(), 1);
}

#[test]
fn malformed_datagrams_are_dropped_silently() {
    let mut protocol = three_interface_protocol();
    let mut transport = RecordingTransport::default();
    let now = Instant::now();

    // bad version nibble
    protocol
        .handle_packet("ifA", v4("10.0.0.2"), &[0xf0, 0x00], now, &mut transport)
        .unwrap();
    // truncated header
    protocol
        .handle_packet("ifA", v4("10.0.0.2"), &[], now, &mut transport)
        .unwrap();
    assert!(transport.sent.is_empty());
}

#[test]
fn repeated_packet_seqno_from_same_source_is_dropped() {
    let mut protocol = three_interface_protocol();
    let count = Rc::new(RefCell::new(0));
    protocol.register_consumer(Registration::message(
        1,
        Vec::new(),
        Box::new(Counting(count.clone())),
    ));
    let mut transport = RecordingTransport::default();
    let now = Instant::now();

    // packet seqno 5 carrying a message without originator/seqno, so
    // only the packet-level dedup can reject the repeat
    let packet = hex!("08 00 05 01 03 00 06 00 00");
    protocol
        .handle_packet("ifA", v4("10.0.0.2"), &packet, now, &mut transport)
        .unwrap();
    protocol
        .handle_packet("ifA", v4("10.0.0.2"), &packet, now, &mut transport)
        .unwrap();
    assert_eq!(*count.borrow(), 1);

    // a different source is unaffected
    protocol
        .handle_packet("ifA", v4("10.0.0.3"), &packet, now, &mut transport)
        .unwrap();
    assert_eq!(*count.borrow(), 2);
}
