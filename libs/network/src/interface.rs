//! RFC 5444 interfaces
//!
//! An interface is a named member of one protocol. It owns its unicast
//! targets (keyed by destination address) and the two well-known
//! multicast targets, the received-packet duplicate set, and the
//! socket configuration the transport collaborator applies. Listeners
//! are notified when the socket configuration changes.

use codec::Writer;
use tracing::info;
use types::constants::MAX_PACKET_SIZE;
use types::Address;

use crate::config::InterfaceConfig;
use crate::dupset::DuplicateSet;
use crate::target::Target;

/// Callback fired after an interface's socket configuration changed.
pub type InterfaceListener = Box<dyn FnMut(&str, &InterfaceConfig)>;

pub struct Interface {
    pub(crate) name: String,
    pub(crate) refcount: usize,
    pub(crate) config: InterfaceConfig,
    pub(crate) received_set: DuplicateSet,
    pub(crate) targets: Vec<Target>,
    pub(crate) multicast4: Option<Target>,
    pub(crate) multicast6: Option<Target>,
    pub(crate) listeners: Vec<InterfaceListener>,
}

impl Interface {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            refcount: 1,
            config: InterfaceConfig::default(),
            received_set: DuplicateSet::new(),
            targets: Vec::new(),
            multicast4: None,
            multicast6: None,
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    /// Unicast target for `dst`, if registered.
    pub fn target(&self, dst: &Address) -> Option<&Target> {
        self.targets.iter().find(|t| t.dst == *dst)
    }

    pub(crate) fn target_mut(&mut self, dst: &Address) -> Option<&mut Target> {
        self.targets.iter_mut().find(|t| t.dst == *dst)
    }

    pub fn multicast4(&self) -> Option<&Target> {
        self.multicast4.as_ref()
    }

    pub fn multicast6(&self) -> Option<&Target> {
        self.multicast6.as_ref()
    }

    /// All targets of this interface, unicast and multicast.
    pub fn all_targets(&self) -> impl Iterator<Item = &Target> {
        self.targets
            .iter()
            .chain(self.multicast4.iter())
            .chain(self.multicast6.iter())
    }

    pub(crate) fn all_targets_mut(&mut self) -> impl Iterator<Item = &mut Target> {
        self.targets
            .iter_mut()
            .chain(self.multicast4.iter_mut())
            .chain(self.multicast6.iter_mut())
    }

    /// Register a listener for socket configuration changes.
    pub fn add_listener(&mut self, listener: InterfaceListener) {
        self.listeners.push(listener);
    }

    /// Apply a new socket configuration, recreating only the multicast
    /// targets whose group address actually changed.
    pub(crate) fn reconfigure(&mut self, config: InterfaceConfig, writer: &mut Writer) {
        info!(interface = %self.name, "reconfiguring interface");

        let new_v4 = config.multicast_v4.map(Address::from);
        let old_v4 = self.multicast4.as_ref().map(|t| t.dst);
        if new_v4 != old_v4 {
            if let Some(old) = self.multicast4.take() {
                writer.unregister_target(old.key);
            }
            if let Some(dst) = new_v4 {
                let key = writer.register_target(MAX_PACKET_SIZE, dst.len());
                self.multicast4 = Some(Target::new(dst, false, key));
            }
        }

        let new_v6 = config.multicast_v6.map(Address::from);
        let old_v6 = self.multicast6.as_ref().map(|t| t.dst);
        if new_v6 != old_v6 {
            if let Some(old) = self.multicast6.take() {
                writer.unregister_target(old.key);
            }
            if let Some(dst) = new_v6 {
                let key = writer.register_target(MAX_PACKET_SIZE, dst.len());
                self.multicast6 = Some(Target::new(dst, false, key));
            }
        }

        self.config = config;

        let name = self.name.clone();
        for listener in &mut self.listeners {
            listener(&name, &self.config);
        }
    }
}
