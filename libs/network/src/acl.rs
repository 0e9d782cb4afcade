//! Source-address access control lists
//!
//! Every datagram received on an interface is checked against the
//! interface's ACL before parsing. Rules are evaluated in order, first
//! match wins; without a match the default policy applies.
//!
//! Config syntax (one string per rule): `accept <addr>[/<plen>]`,
//! `reject <addr>[/<plen>]`, `default_accept`, `default_reject`.

use std::str::FromStr;

use serde::{de, Deserialize, Deserializer};

use types::Address;

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AclRule {
    Accept(Address),
    Reject(Address),
}

/// Ordered accept/reject prefix list with a default policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acl {
    rules: Vec<AclRule>,
    default_accept: bool,
}

impl Default for Acl {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_accept: true,
        }
    }
}

impl Acl {
    /// ACL accepting everything.
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// True if `addr` passes the list.
    pub fn check(&self, addr: &Address) -> bool {
        for rule in &self.rules {
            match rule {
                AclRule::Accept(prefix) if prefix.contains(addr) => return true,
                AclRule::Reject(prefix) if prefix.contains(addr) => return false,
                _ => {}
            }
        }
        self.default_accept
    }

    /// Parse a rule list in config order.
    pub fn from_rules<S: AsRef<str>>(rules: &[S]) -> Result<Self, ConfigError> {
        let mut acl = Self::default();
        for rule in rules {
            let rule = rule.as_ref().trim();
            match rule {
                "default_accept" => acl.default_accept = true,
                "default_reject" => acl.default_accept = false,
                _ => {
                    let (verdict, addr) = rule
                        .split_once(char::is_whitespace)
                        .ok_or_else(|| ConfigError::InvalidAclRule(rule.to_string()))?;
                    let addr = Address::from_str(addr.trim())
                        .map_err(|_| ConfigError::InvalidAclRule(rule.to_string()))?;
                    match verdict {
                        "accept" => acl.rules.push(AclRule::Accept(addr)),
                        "reject" => acl.rules.push(AclRule::Reject(addr)),
                        _ => return Err(ConfigError::InvalidAclRule(rule.to_string())),
                    }
                }
            }
        }
        Ok(acl)
    }
}

impl<'de> Deserialize<'de> for Acl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rules = Vec::<String>::deserialize(deserializer)?;
        Acl::from_rules(&rules).map_err(de::Error::custom)
    }
}
