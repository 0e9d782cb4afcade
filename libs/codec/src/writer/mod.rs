//! RFC 5444 message writer
//!
//! Multiple content providers contribute message TLVs and addresses to
//! one message; the writer serializes the result and distributes the
//! bytes over the packet buffers of the selected targets. A message
//! that does not fit the remaining space of a target's packet triggers
//! a preemptive flush of that packet; a message that cannot fit any
//! packet at all fails with `MsgTooLarge` and leaves every target
//! buffer untouched.
//!
//! The writer owns no sockets and no timers. Finished packets are
//! handed to a [`PacketSink`], which also decides whether the packet
//! carries a sequence number. Aggregation timing lives in the network
//! layer.

mod compress;
mod message;

pub use message::{AddressHandle, HeaderBuilder, MessageBuilder, MessageHeader, SeqnoOption};

use std::collections::BTreeMap;

use bytes::BytesMut;
use tracing::trace;

use types::constants::{pkt_flags, RFC5444_VERSION};

use crate::error::{BuildError, BuildResult, ProviderError};
use message::{serialize_message, ResolvedHeader};

/// Worst-case packet header: version/flags octet plus sequence number.
const PKT_HEADER_MAX: usize = 3;

/// Handle to a registered writer target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetKey(usize);

/// Contributes content to messages of one registered type. Providers
/// run in ascending priority order (ties in registration order): first
/// all `add_message_tlvs` passes, then all `add_addresses` passes.
pub trait ContentProvider {
    fn add_message_tlvs(&mut self, _msg: &mut MessageBuilder) -> Result<(), ProviderError> {
        Ok(())
    }

    fn add_addresses(&mut self, _msg: &mut MessageBuilder) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Receives finished packets and decides their sequence numbering.
pub trait PacketSink {
    /// Called once per finalized packet before the header is built.
    /// Return the packet sequence number to embed, or `None` for a
    /// header without one.
    fn prepare_header(&mut self, target: TargetKey) -> Option<u16>;

    /// Ship one finished packet.
    fn send_packet(&mut self, target: TargetKey, packet: &[u8]);
}

struct ProviderSlot {
    priority: i32,
    provider: Box<dyn ContentProvider>,
}

struct MessageRegistration {
    addr_len: usize,
    header_builder: Option<Box<dyn HeaderBuilder>>,
    providers: Vec<ProviderSlot>,
}

struct TargetState {
    packet_size: usize,
    addr_len: usize,
    buf: BytesMut,
}

impl TargetState {
    fn budget(&self) -> usize {
        self.packet_size.saturating_sub(PKT_HEADER_MAX)
    }
}

/// The writer half of one protocol instance.
pub struct Writer {
    msg_size: usize,
    msg_seqno: u16,
    messages: BTreeMap<u8, MessageRegistration>,
    targets: Vec<Option<TargetState>>,
}

impl Writer {
    /// `msg_size` bounds the scratch space for one message being built.
    pub fn new(msg_size: usize) -> Self {
        Self {
            msg_size,
            msg_seqno: 0,
            messages: BTreeMap::new(),
            targets: Vec::new(),
        }
    }

    pub fn msg_size(&self) -> usize {
        self.msg_size
    }

    /// Seed the 16-bit message sequence counter.
    pub fn set_msg_seqno(&mut self, seqno: u16) {
        self.msg_seqno = seqno;
    }

    /// Hand out the next message sequence number.
    pub fn next_msg_seqno(&mut self) -> u16 {
        self.msg_seqno = self.msg_seqno.wrapping_add(1);
        self.msg_seqno
    }

    /// Register a message type with its address length. Registering an
    /// existing type is a no-op.
    pub fn register_message(&mut self, msg_type: u8, addr_len: usize) {
        self.messages.entry(msg_type).or_insert(MessageRegistration {
            addr_len,
            header_builder: None,
            providers: Vec::new(),
        });
    }

    /// Install the header builder of a registered message type.
    pub fn set_header_builder(
        &mut self,
        msg_type: u8,
        builder: Box<dyn HeaderBuilder>,
    ) -> BuildResult<()> {
        let reg = self
            .messages
            .get_mut(&msg_type)
            .ok_or(BuildError::NoSuchMessage(msg_type))?;
        reg.header_builder = Some(builder);
        Ok(())
    }

    /// Add a content provider for a registered message type.
    pub fn register_content_provider(
        &mut self,
        msg_type: u8,
        priority: i32,
        provider: Box<dyn ContentProvider>,
    ) -> BuildResult<()> {
        let reg = self
            .messages
            .get_mut(&msg_type)
            .ok_or(BuildError::NoSuchMessage(msg_type))?;
        // stable position keeps registration order inside one priority
        let pos = reg
            .providers
            .iter()
            .position(|s| s.priority > priority)
            .unwrap_or(reg.providers.len());
        reg.providers.insert(pos, ProviderSlot { priority, provider });
        Ok(())
    }

    /// Register an outgoing target with its packet (MTU) size and the
    /// address length of its destination.
    pub fn register_target(&mut self, packet_size: usize, addr_len: usize) -> TargetKey {
        let state = TargetState {
            packet_size,
            addr_len,
            buf: BytesMut::with_capacity(packet_size),
        };
        match self.targets.iter().position(|t| t.is_none()) {
            Some(i) => {
                self.targets[i] = Some(state);
                TargetKey(i)
            }
            None => {
                self.targets.push(Some(state));
                TargetKey(self.targets.len() - 1)
            }
        }
    }

    /// Drop a target; pending bytes are discarded.
    pub fn unregister_target(&mut self, key: TargetKey) {
        if let Some(slot) = self.targets.get_mut(key.0) {
            *slot = None;
        }
    }

    /// True if the target has accumulated messages awaiting a flush.
    pub fn target_pending(&self, key: TargetKey) -> bool {
        self.targets
            .get(key.0)
            .and_then(|t| t.as_ref())
            .is_some_and(|t| !t.buf.is_empty())
    }

    fn target_mut(&mut self, key: TargetKey) -> BuildResult<&mut TargetState> {
        self.targets
            .get_mut(key.0)
            .and_then(|t| t.as_mut())
            .ok_or(BuildError::UnknownTarget)
    }

    fn select_targets(
        &self,
        selector: &mut dyn FnMut(TargetKey) -> bool,
    ) -> Vec<(TargetKey, usize, usize)> {
        self.targets
            .iter()
            .enumerate()
            .filter_map(|(i, t)| t.as_ref().map(|t| (TargetKey(i), t)))
            .filter(|(k, _)| selector(*k))
            .map(|(k, t)| (k, t.addr_len, t.budget()))
            .collect()
    }

    /// Build one message of `msg_type` and queue it on every target the
    /// selector accepts. Fails atomically: on error no target buffer
    /// has changed and nothing was flushed.
    pub fn create_message(
        &mut self,
        msg_type: u8,
        selector: &mut dyn FnMut(TargetKey) -> bool,
        sink: &mut dyn PacketSink,
    ) -> BuildResult<()> {
        let selected = self.select_targets(selector);
        if selected.is_empty() {
            return Ok(());
        }

        if !self.messages.contains_key(&msg_type) {
            return Err(BuildError::NoSuchMessage(msg_type));
        }

        let mut header = MessageHeader::default();
        if let Some(hb) = self
            .messages
            .get_mut(&msg_type)
            .and_then(|r| r.header_builder.as_mut())
        {
            hb.build_header(msg_type, &mut header);
        }
        let seqno = match header.seqno {
            SeqnoOption::Omit => None,
            SeqnoOption::Set(v) => Some(v),
            SeqnoOption::Auto => {
                self.msg_seqno = self.msg_seqno.wrapping_add(1);
                Some(self.msg_seqno)
            }
        };
        let resolved = ResolvedHeader {
            originator: header.originator,
            hop_limit: header.hop_limit,
            hop_count: header.hop_count,
            seqno,
        };

        let reg = self
            .messages
            .get_mut(&msg_type)
            .expect("checked above");
        let mut builder = MessageBuilder::new(reg.addr_len);
        for slot in reg.providers.iter_mut() {
            slot.provider.add_message_tlvs(&mut builder)?;
        }
        for slot in reg.providers.iter_mut() {
            slot.provider.add_addresses(&mut builder)?;
        }

        // one wire variant per distinct target address length
        let mut variants: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
        for (_, addr_len, _) in &selected {
            if !variants.contains_key(addr_len) {
                let bytes =
                    serialize_message(msg_type, &resolved, &builder, *addr_len, self.msg_size)?;
                variants.insert(*addr_len, bytes);
            }
        }

        self.queue_on_targets(&selected, &variants, sink)
    }

    /// Queue a verbatim, already-serialized message on the selected
    /// targets. The bytes are treated as opaque except for the minimal
    /// header validation needed to pack them.
    pub fn forward_message(
        &mut self,
        bytes: &[u8],
        selector: &mut dyn FnMut(TargetKey) -> bool,
        sink: &mut dyn PacketSink,
    ) -> BuildResult<()> {
        if bytes.len() < 4 {
            return Err(BuildError::MalformedForward("shorter than a message header"));
        }
        let size = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        if size != bytes.len() {
            return Err(BuildError::MalformedForward("size field mismatch"));
        }
        if bytes.len() > self.msg_size {
            return Err(BuildError::MsgTooLarge {
                size: bytes.len(),
                max: self.msg_size,
            });
        }

        let selected = self.select_targets(selector);
        if selected.is_empty() {
            return Ok(());
        }

        let addr_len = selected[0].1;
        let mut variants = BTreeMap::new();
        variants.insert(addr_len, bytes.to_vec());
        // forwarded bytes are opaque: every target gets the same copy
        let selected: Vec<_> = selected
            .into_iter()
            .map(|(k, _, budget)| (k, addr_len, budget))
            .collect();
        self.queue_on_targets(&selected, &variants, sink)
    }

    fn queue_on_targets(
        &mut self,
        selected: &[(TargetKey, usize, usize)],
        variants: &BTreeMap<usize, Vec<u8>>,
        sink: &mut dyn PacketSink,
    ) -> BuildResult<()> {
        // atomicity pre-check: each variant must fit an empty packet
        for (_, addr_len, budget) in selected {
            let len = variants[addr_len].len();
            if len > *budget {
                return Err(BuildError::MsgTooLarge {
                    size: len,
                    max: *budget,
                });
            }
        }

        for (key, addr_len, _) in selected {
            let bytes = &variants[addr_len];
            let needs_flush = {
                let t = self.target_mut(*key)?;
                !t.buf.is_empty() && t.buf.len() + bytes.len() > t.budget()
            };
            if needs_flush {
                self.flush(*key, false, sink)?;
            }
            self.target_mut(*key)?.buf.extend_from_slice(bytes);
        }
        Ok(())
    }

    /// Finalize the target's pending packet and hand it to the sink.
    /// Empty buffers emit nothing; `force` only records that the
    /// caller wanted a flush regardless of content.
    pub fn flush(
        &mut self,
        key: TargetKey,
        force: bool,
        sink: &mut dyn PacketSink,
    ) -> BuildResult<()> {
        let t = self.target_mut(key)?;
        if t.buf.is_empty() {
            if force {
                trace!(?key, "suppressing empty forced flush");
            }
            return Ok(());
        }

        let seqno = sink.prepare_header(key);
        let mut flags = 0u8;
        if seqno.is_some() {
            flags |= pkt_flags::HAS_SEQNO;
        }
        let mut packet = Vec::with_capacity(t.buf.len() + PKT_HEADER_MAX);
        packet.push((RFC5444_VERSION << 4) | flags);
        if let Some(s) = seqno {
            packet.extend_from_slice(&s.to_be_bytes());
        }
        packet.extend_from_slice(&t.buf);
        t.buf.clear();

        sink.send_packet(key, &packet);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink collecting packets per target, without sequence numbers.
    #[derive(Default)]
    pub(crate) struct CollectSink {
        pub packets: Vec<(TargetKey, Vec<u8>)>,
        pub seqno: Option<u16>,
    }

    impl PacketSink for CollectSink {
        fn prepare_header(&mut self, _target: TargetKey) -> Option<u16> {
            self.seqno
        }
        fn send_packet(&mut self, target: TargetKey, packet: &[u8]) {
            self.packets.push((target, packet.to_vec()));
        }
    }

    struct TwoTlvProvider;

    impl ContentProvider for TwoTlvProvider {
        fn add_message_tlvs(&mut self, msg: &mut MessageBuilder) -> Result<(), ProviderError> {
            msg.add_message_tlv(0, 0, &23u32.to_be_bytes());
            msg.add_message_tlv(1, 0, &42u32.to_be_bytes());
            Ok(())
        }
    }

    #[test]
    fn create_message_without_targets_is_a_no_op() {
        let mut writer = Writer::new(128);
        writer.register_message(1, 4);
        let mut sink = CollectSink::default();
        writer
            .create_message(1, &mut |_| true, &mut sink)
            .unwrap();
        assert!(sink.packets.is_empty());
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let mut writer = Writer::new(128);
        writer.register_target(128, 4);
        let mut sink = CollectSink::default();
        let err = writer
            .create_message(9, &mut |_| true, &mut sink)
            .unwrap_err();
        assert_eq!(err, BuildError::NoSuchMessage(9));
    }

    #[test]
    fn message_queues_until_flush() {
        let mut writer = Writer::new(128);
        writer.register_message(1, 4);
        writer
            .register_content_provider(1, 0, Box::new(TwoTlvProvider))
            .unwrap();
        let target = writer.register_target(128, 4);
        let mut sink = CollectSink::default();

        writer.create_message(1, &mut |_| true, &mut sink).unwrap();
        assert!(sink.packets.is_empty());
        assert!(writer.target_pending(target));

        writer.flush(target, false, &mut sink).unwrap();
        assert_eq!(sink.packets.len(), 1);
        assert!(!writer.target_pending(target));
    }

    #[test]
    fn flush_of_empty_target_emits_nothing() {
        let mut writer = Writer::new(128);
        let target = writer.register_target(128, 4);
        let mut sink = CollectSink::default();
        writer.flush(target, true, &mut sink).unwrap();
        assert!(sink.packets.is_empty());
    }

    #[test]
    fn oversized_message_fails_without_send() {
        let mut writer = Writer::new(1024);
        writer.register_message(1, 4);
        struct BigProvider;
        impl ContentProvider for BigProvider {
            fn add_message_tlvs(&mut self, msg: &mut MessageBuilder) -> Result<(), ProviderError> {
                msg.add_message_tlv(5, 0, &[0xaa; 80]);
                Ok(())
            }
        }
        writer
            .register_content_provider(1, 0, Box::new(BigProvider))
            .unwrap();
        let target = writer.register_target(64, 4);
        let mut sink = CollectSink::default();

        let err = writer
            .create_message(1, &mut |_| true, &mut sink)
            .unwrap_err();
        assert!(matches!(err, BuildError::MsgTooLarge { .. }));
        assert!(sink.packets.is_empty());
        assert!(!writer.target_pending(target));
    }

    #[test]
    fn provider_error_aborts_construction() {
        let mut writer = Writer::new(128);
        writer.register_message(1, 4);
        struct Failing;
        impl ContentProvider for Failing {
            fn add_addresses(&mut self, _: &mut MessageBuilder) -> Result<(), ProviderError> {
                Err(ProviderError::new("no link state yet"))
            }
        }
        writer
            .register_content_provider(1, 0, Box::new(Failing))
            .unwrap();
        let target = writer.register_target(128, 4);
        let mut sink = CollectSink::default();

        let err = writer
            .create_message(1, &mut |_| true, &mut sink)
            .unwrap_err();
        assert!(matches!(err, BuildError::ProviderAborted(_)));
        assert!(!writer.target_pending(target));
    }

    #[test]
    fn forwarded_bytes_validate_size_field() {
        let mut writer = Writer::new(128);
        writer.register_target(128, 4);
        let mut sink = CollectSink::default();
        // claims 20 bytes but is 7
        let bad = [0x01, 0x03, 0x00, 0x14, 0x00, 0x00, 0x00];
        let err = writer
            .forward_message(&bad, &mut |_| true, &mut sink)
            .unwrap_err();
        assert!(matches!(err, BuildError::MalformedForward(_)));
    }
}
