//! Protocol instances and the process-wide multiplex registry
//!
//! A protocol owns the codec reader and writer, the processed and
//! forwarded duplicate sets, and its interfaces with their targets.
//! Everything is tree-shaped: `Multiplex` owns `Protocol` owns
//! `Interface` owns `Target`; callers address nodes by name and
//! destination address, never by pointer.
//!
//! `handle_packet` is the inbound glue: ACL check, received-set
//! dedup, parse with the duplicate-set policy, then re-emission of
//! forwardable messages on every interface except the ingress one.

use std::collections::HashSet;
use std::time::Duration;

use codec::{
    BuildError, ForwardingPolicy, MessageContext, PacketSink, Reader, Registration, TargetKey,
    Writer,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use types::constants::{pkt_flags, MAX_MESSAGE_SIZE, MAX_PACKET_SIZE};
use types::Address;

use crate::config::Config;
use crate::dupset::{DuplicateResult, DuplicateSet};
use crate::error::{NetworkError, NetworkResult};
use crate::interface::Interface;
use crate::target::Target;
use crate::transport::Transport;

/// Default validity time for duplicate entries when no message TLV
/// supplied one.
const DEFAULT_VTIME: Duration = Duration::from_secs(300);

/// Duplicate-set backed process/forward decisions, built per packet.
struct DupPolicy<'a> {
    processed: &'a mut DuplicateSet,
    forwarded: &'a mut DuplicateSet,
    local_addrs: &'a [Address],
    vtime: Duration,
    now: Instant,
}

impl ForwardingPolicy for DupPolicy<'_> {
    fn should_process(&mut self, ctx: &MessageContext) -> bool {
        match (ctx.originator, ctx.seqno) {
            (Some(originator), Some(seqno)) => self
                .processed
                .add(ctx.msg_type, originator, seqno, self.vtime, self.now)
                .is_fresh(),
            // untracked messages are processed unconditionally
            _ => true,
        }
    }

    fn should_forward(&mut self, ctx: &MessageContext) -> bool {
        let (Some(originator), Some(seqno)) = (ctx.originator, ctx.seqno) else {
            return false;
        };
        if self.local_addrs.contains(&originator) {
            return false;
        }
        if ctx.hop_limit.is_some_and(|h| h <= 1) || ctx.hop_count.is_some_and(|h| h == 255) {
            return false;
        }
        self.forwarded
            .add(ctx.msg_type, originator, seqno, self.vtime, self.now)
            .is_fresh()
    }
}

/// Packet sink over the interface tree: resolves writer targets back
/// to their interface, decides packet sequence numbering, and hands
/// finished packets to the transport.
struct MuxSink<'a> {
    interfaces: &'a mut Vec<Interface>,
    transport: &'a mut dyn Transport,
    protocol_pktseqno_refcount: usize,
    port: u16,
}

impl MuxSink<'_> {
    fn locate(&self, key: TargetKey) -> Option<usize> {
        self.interfaces
            .iter()
            .position(|i| i.all_targets().any(|t| t.key == key))
    }
}

impl PacketSink for MuxSink<'_> {
    fn prepare_header(&mut self, key: TargetKey) -> Option<u16> {
        let idx = self.locate(key)?;
        let protocol_refs = self.protocol_pktseqno_refcount;
        let target = self.interfaces[idx]
            .all_targets_mut()
            .find(|t| t.key == key)?;
        if target.pktseqno_refcount > 0 || protocol_refs > 0 {
            target.pkt_seqno = target.pkt_seqno.wrapping_add(1);
            Some(target.pkt_seqno)
        } else {
            None
        }
    }

    fn send_packet(&mut self, key: TargetKey, packet: &[u8]) {
        let Some(idx) = self.locate(key) else {
            return;
        };
        let dst = {
            let target = self.interfaces[idx]
                .all_targets_mut()
                .find(|t| t.key == key)
                .expect("located above");
            target.flush_deadline = None;
            target.dst
        };
        let name = self.interfaces[idx].name.as_str();
        debug!(interface = name, %dst, len = packet.len(), "sending packet");
        if let Err(err) = self.transport.send_packet(name, &dst, self.port, packet) {
            warn!(interface = name, %dst, %err, "packet send failed");
        }
    }
}

/// One named protocol instance.
pub struct Protocol {
    name: String,
    refcount: usize,
    port: u16,
    fixed_local_port: bool,
    aggregation_interval: Duration,
    vtime: Duration,
    reader: Reader,
    writer: Writer,
    processed_set: DuplicateSet,
    forwarded_set: DuplicateSet,
    pktseqno_refcount: usize,
    interfaces: Vec<Interface>,
    local_addrs: Vec<Address>,
}

impl Protocol {
    pub fn new(name: &str, fixed_local_port: bool) -> Self {
        let mut writer = Writer::new(MAX_MESSAGE_SIZE);
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u16)
            .unwrap_or(0);
        writer.set_msg_seqno(seed);
        Self {
            name: name.to_string(),
            refcount: 1,
            port: 0,
            fixed_local_port,
            aggregation_interval: Duration::from_millis(100),
            vtime: DEFAULT_VTIME,
            reader: Reader::new(),
            writer,
            processed_set: DuplicateSet::new(),
            forwarded_set: DuplicateSet::new(),
            pktseqno_refcount: 0,
            interfaces: Vec::new(),
            local_addrs: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn fixed_local_port(&self) -> bool {
        self.fixed_local_port
    }

    /// Codec reader, for consumer registration.
    pub fn reader(&mut self) -> &mut Reader {
        &mut self.reader
    }

    /// Codec writer, for message and provider registration.
    pub fn writer(&mut self) -> &mut Writer {
        &mut self.writer
    }

    /// Register a consumer on this protocol's reader.
    pub fn register_consumer(&mut self, registration: Registration) -> codec::ConsumerId {
        self.reader.register(registration)
    }

    /// Addresses this node originates with; messages from them are
    /// never forwarded.
    pub fn add_local_originator(&mut self, addr: Address) {
        if !self.local_addrs.contains(&addr) {
            self.local_addrs.push(addr);
        }
    }

    /// Validity time used for duplicate entries.
    pub fn set_vtime(&mut self, vtime: Duration) {
        self.vtime = vtime;
    }

    /// Take/release a protocol-wide "packets need sequence numbers"
    /// reference. Target-level references win over this one.
    pub fn acquire_pktseqno(&mut self) {
        self.pktseqno_refcount += 1;
    }

    pub fn release_pktseqno(&mut self) {
        self.pktseqno_refcount = self.pktseqno_refcount.saturating_sub(1);
    }

    /// Take a "packets need sequence numbers" reference on one target.
    pub fn acquire_target_pktseqno(
        &mut self,
        interface: &str,
        dst: &Address,
    ) -> NetworkResult<()> {
        let iface = self
            .interface_mut(interface)
            .ok_or_else(|| NetworkError::NoSuchInterface(interface.to_string()))?;
        let name = iface.name.clone();
        iface
            .all_targets_mut()
            .find(|t| t.dst == *dst)
            .ok_or(NetworkError::NoSuchTarget(*dst, name))?
            .acquire_pktseqno();
        Ok(())
    }

    pub fn release_target_pktseqno(
        &mut self,
        interface: &str,
        dst: &Address,
    ) -> NetworkResult<()> {
        let iface = self
            .interface_mut(interface)
            .ok_or_else(|| NetworkError::NoSuchInterface(interface.to_string()))?;
        let name = iface.name.clone();
        iface
            .all_targets_mut()
            .find(|t| t.dst == *dst)
            .ok_or(NetworkError::NoSuchTarget(*dst, name))?
            .release_pktseqno();
        Ok(())
    }

    /// Change the wire port. Interfaces pick the new port up through
    /// their listeners.
    pub fn reconfigure(&mut self, port: u16, aggregation_interval: Duration) {
        if self.port != port {
            info!(protocol = %self.name, port, "reconfiguring protocol port");
            self.port = port;
            for iface in &mut self.interfaces {
                let config = iface.config.clone();
                iface.reconfigure(config, &mut self.writer);
            }
        }
        self.aggregation_interval = aggregation_interval;
    }

    /// Apply a parsed configuration: protocol settings plus one
    /// interface section per name. Existing interfaces are reused;
    /// interfaces absent from the config are removed.
    pub fn apply_config(&mut self, config: &Config) {
        self.reconfigure(config.protocol.port, config.protocol.aggregation_interval());

        let keep: Vec<String> = config.interface.keys().cloned().collect();
        let removed: Vec<String> = self
            .interfaces
            .iter()
            .map(|i| i.name.clone())
            .filter(|n| !keep.iter().any(|k| k.eq_ignore_ascii_case(n)))
            .collect();
        for name in removed {
            self.remove_interface(&name);
        }

        for (name, iface_config) in &config.interface {
            if self.interface(name).is_none() {
                self.add_interface(name);
            }
            let idx = self
                .interfaces
                .iter()
                .position(|i| i.name.eq_ignore_ascii_case(name))
                .expect("added above");
            self.interfaces[idx].reconfigure(iface_config.clone(), &mut self.writer);
        }
    }

    /// Add an interface, or take another reference on an existing one.
    pub fn add_interface(&mut self, name: &str) -> &mut Interface {
        if let Some(i) = self
            .interfaces
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(name))
        {
            self.interfaces[i].refcount += 1;
            return &mut self.interfaces[i];
        }
        info!(protocol = %self.name, interface = name, "adding interface");
        self.interfaces.push(Interface::new(name));
        self.interfaces.last_mut().expect("just pushed")
    }

    /// Drop one reference; the interface and its targets are torn down
    /// with the last one.
    pub fn remove_interface(&mut self, name: &str) {
        let Some(i) = self
            .interfaces
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(name))
        else {
            return;
        };
        if self.interfaces[i].refcount > 1 {
            self.interfaces[i].refcount -= 1;
            return;
        }
        info!(protocol = %self.name, interface = name, "removing interface");
        let iface = self.interfaces.remove(i);
        for t in iface.all_targets() {
            self.writer.unregister_target(t.key);
        }
    }

    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    pub fn interface_mut(&mut self, name: &str) -> Option<&mut Interface> {
        self.interfaces
            .iter_mut()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Add a unicast target, or take another reference on it.
    pub fn add_target(&mut self, interface: &str, dst: Address) -> NetworkResult<()> {
        let writer = &mut self.writer;
        let iface = self
            .interfaces
            .iter_mut()
            .find(|i| i.name.eq_ignore_ascii_case(interface))
            .ok_or_else(|| NetworkError::NoSuchInterface(interface.to_string()))?;
        if let Some(t) = iface.target_mut(&dst) {
            t.refcount += 1;
            return Ok(());
        }
        let key = writer.register_target(MAX_PACKET_SIZE, dst.len());
        iface.targets.push(Target::new(dst, true, key));
        iface.refcount += 1;
        Ok(())
    }

    /// Drop one reference on a unicast target.
    pub fn remove_target(&mut self, interface: &str, dst: &Address) {
        let Some(iface) = self
            .interfaces
            .iter_mut()
            .find(|i| i.name.eq_ignore_ascii_case(interface))
        else {
            return;
        };
        let Some(i) = iface.targets.iter().position(|t| t.dst == *dst) else {
            return;
        };
        if iface.targets[i].refcount > 1 {
            iface.targets[i].refcount -= 1;
            return;
        }
        let target = iface.targets.remove(i);
        iface.refcount = iface.refcount.saturating_sub(1);
        self.writer.unregister_target(target.key);
    }

    /// Handle one received datagram: ACL, packet-level dedup, parse
    /// with consumer dispatch, then controlled re-flooding. Wire
    /// errors drop the datagram and are not surfaced to the caller.
    pub fn handle_packet(
        &mut self,
        interface: &str,
        source: Address,
        data: &[u8],
        now: Instant,
        transport: &mut dyn Transport,
    ) -> NetworkResult<()> {
        let if_index = self
            .interfaces
            .iter()
            .position(|i| i.name.eq_ignore_ascii_case(interface))
            .ok_or_else(|| NetworkError::NoSuchInterface(interface.to_string()))?;

        if !self.interfaces[if_index].config.acl.check(&source) {
            debug!(%source, interface, "datagram refused by acl");
            return Ok(());
        }

        // packet-level dedup by (source, packet seqno) before parsing
        if data.len() >= 3 && data[0] >> 4 == 0 && data[0] & pkt_flags::HAS_SEQNO != 0 {
            let pkt_seqno = u16::from_be_bytes([data[1], data[2]]);
            let result = self.interfaces[if_index].received_set.add(
                0,
                source,
                pkt_seqno,
                self.vtime,
                now,
            );
            if !matches!(result, DuplicateResult::New | DuplicateResult::Newest) {
                debug!(%source, pkt_seqno, ?result, "dropping repeated packet");
                return Ok(());
            }
        }

        let mut policy = DupPolicy {
            processed: &mut self.processed_set,
            forwarded: &mut self.forwarded_set,
            local_addrs: &self.local_addrs,
            vtime: self.vtime,
            now,
        };
        let result = match self.reader.handle_packet(data, &mut policy) {
            Ok(result) => result,
            Err(err) => {
                warn!(%source, interface, %err, "dropping malformed datagram");
                debug!("\n{}", codec::hexdump(data));
                return Ok(());
            }
        };

        if !result.forwards.is_empty() {
            let exclude: HashSet<TargetKey> = self.interfaces[if_index]
                .all_targets()
                .map(|t| t.key)
                .collect();
            for forward in &result.forwards {
                info!(msg_type = forward.msg_type, "forwarding message");
                let mut sink = MuxSink {
                    interfaces: &mut self.interfaces,
                    transport,
                    protocol_pktseqno_refcount: self.pktseqno_refcount,
                    port: self.port,
                };
                if let Err(err) = self.writer.forward_message(
                    &forward.bytes,
                    &mut |k| !exclude.contains(&k),
                    &mut sink,
                ) {
                    warn!(msg_type = forward.msg_type, %err, "forwarding failed");
                }
            }
            self.arm_pending_targets(now);
        }

        Ok(())
    }

    /// Build a message of `msg_type` for one specific target.
    pub fn send_to(
        &mut self,
        interface: &str,
        dst: &Address,
        msg_type: u8,
        now: Instant,
        transport: &mut dyn Transport,
    ) -> NetworkResult<()> {
        let iface = self
            .interface(interface)
            .ok_or_else(|| NetworkError::NoSuchInterface(interface.to_string()))?;
        let key = iface
            .all_targets()
            .find(|t| t.dst == *dst)
            .map(|t| t.key)
            .ok_or_else(|| NetworkError::NoSuchTarget(*dst, interface.to_string()))?;

        let mut selector = move |k| k == key;
        self.create_on(msg_type, &mut selector, now, transport)
    }

    /// Build a message of `msg_type` for every target the filter
    /// accepts. The filter sees interface name and destination.
    pub fn broadcast(
        &mut self,
        msg_type: u8,
        filter: &mut dyn FnMut(&str, &Address) -> bool,
        now: Instant,
        transport: &mut dyn Transport,
    ) -> NetworkResult<()> {
        let selected: HashSet<TargetKey> = self
            .interfaces
            .iter()
            .flat_map(|i| {
                i.all_targets()
                    .filter(|t| filter(&i.name, &t.dst))
                    .map(|t| t.key)
                    .collect::<Vec<_>>()
            })
            .collect();
        let mut selector = move |k| selected.contains(&k);
        self.create_on(msg_type, &mut selector, now, transport)
    }

    fn create_on(
        &mut self,
        msg_type: u8,
        selector: &mut dyn FnMut(TargetKey) -> bool,
        now: Instant,
        transport: &mut dyn Transport,
    ) -> NetworkResult<()> {
        let mut sink = MuxSink {
            interfaces: &mut self.interfaces,
            transport,
            protocol_pktseqno_refcount: self.pktseqno_refcount,
            port: self.port,
        };
        self.writer
            .create_message(msg_type, selector, &mut sink)
            .map_err(NetworkError::Build)?;
        self.arm_pending_targets(now);
        Ok(())
    }

    /// Flush one target's pending packet immediately.
    pub fn flush(
        &mut self,
        interface: &str,
        dst: &Address,
        force: bool,
        transport: &mut dyn Transport,
    ) -> NetworkResult<()> {
        let iface = self
            .interface(interface)
            .ok_or_else(|| NetworkError::NoSuchInterface(interface.to_string()))?;
        let key = iface
            .all_targets()
            .find(|t| t.dst == *dst)
            .map(|t| t.key)
            .ok_or_else(|| NetworkError::NoSuchTarget(*dst, interface.to_string()))?;

        let mut sink = MuxSink {
            interfaces: &mut self.interfaces,
            transport,
            protocol_pktseqno_refcount: self.pktseqno_refcount,
            port: self.port,
        };
        self.writer
            .flush(key, force, &mut sink)
            .map_err(NetworkError::Build)?;
        Ok(())
    }

    fn arm_pending_targets(&mut self, now: Instant) {
        let interval = self.aggregation_interval;
        let writer = &self.writer;
        for iface in &mut self.interfaces {
            for target in iface.all_targets_mut() {
                if target.flush_deadline.is_none() && writer.target_pending(target.key) {
                    target.flush_deadline = Some(now + interval);
                }
            }
        }
    }

    /// Earliest point in time `handle_timeout` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        let flushes = self
            .interfaces
            .iter()
            .flat_map(|i| i.all_targets())
            .filter_map(|t| t.flush_deadline);
        let expiries = [
            self.processed_set.next_expiry(),
            self.forwarded_set.next_expiry(),
        ]
        .into_iter()
        .flatten()
        .chain(
            self.interfaces
                .iter()
                .filter_map(|i| i.received_set.next_expiry()),
        );
        flushes.chain(expiries).min()
    }

    /// Run expired aggregation flushes and duplicate-set maintenance.
    pub fn handle_timeout(&mut self, now: Instant, transport: &mut dyn Transport) {
        let due: Vec<TargetKey> = self
            .interfaces
            .iter_mut()
            .flat_map(|i| i.all_targets_mut())
            .filter(|t| t.flush_deadline.is_some_and(|d| d <= now))
            .map(|t| {
                t.flush_deadline = None;
                t.key
            })
            .collect();

        for key in due {
            let mut sink = MuxSink {
                interfaces: &mut self.interfaces,
                transport,
                protocol_pktseqno_refcount: self.pktseqno_refcount,
                port: self.port,
            };
            if let Err(err) = self.writer.flush(key, false, &mut sink) {
                // the target disappeared between arming and firing
                if !matches!(err, BuildError::UnknownTarget) {
                    warn!(%err, "aggregation flush failed");
                }
            }
        }

        self.processed_set.purge_expired(now);
        self.forwarded_set.purge_expired(now);
        for iface in &mut self.interfaces {
            iface.received_set.purge_expired(now);
        }
    }
}

/// Process-wide registry of protocols, keyed case-insensitively by
/// name. `add` with an existing name returns the instance with an
/// additional reference.
#[derive(Default)]
pub struct Multiplex {
    protocols: Vec<Protocol>,
}

impl Multiplex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_protocol(&mut self, name: &str, fixed_local_port: bool) -> &mut Protocol {
        if let Some(i) = self
            .protocols
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
        {
            self.protocols[i].refcount += 1;
            return &mut self.protocols[i];
        }
        info!(protocol = name, "adding protocol");
        self.protocols.push(Protocol::new(name, fixed_local_port));
        self.protocols.last_mut().expect("just pushed")
    }

    pub fn remove_protocol(&mut self, name: &str) {
        let Some(i) = self
            .protocols
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
        else {
            return;
        };
        if self.protocols[i].refcount > 1 {
            self.protocols[i].refcount -= 1;
            return;
        }
        info!(protocol = name, "removing protocol");
        self.protocols.remove(i);
    }

    pub fn protocol(&self, name: &str) -> Option<&Protocol> {
        self.protocols
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn protocol_mut(&mut self, name: &str) -> Option<&mut Protocol> {
        self.protocols
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}
