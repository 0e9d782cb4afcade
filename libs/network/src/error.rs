//! Network layer errors
//!
//! Configuration problems are reported to the caller and never abort
//! the process; wire errors from the codec are handled inside
//! `Protocol::handle_packet` (drop + log) and do not surface here.

use thiserror::Error;

pub use codec::{BuildError, WireError};

/// Errors of the multiplex layer and transports.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("no protocol named '{0}'")]
    NoSuchProtocol(String),

    #[error("no interface named '{0}'")]
    NoSuchInterface(String),

    #[error("no target {0} on interface '{1}'")]
    NoSuchTarget(types::Address, String),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("transport: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from parsing or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid port {0}, must be 1..=65535")]
    InvalidPort(u16),

    #[error("invalid acl rule '{0}'")]
    InvalidAclRule(String),

    #[error("aggregation interval must not be zero")]
    ZeroAggregationInterval,

    #[error(transparent)]
    Parse(#[from] toml::de::Error),
}

pub type NetworkResult<T> = Result<T, NetworkError>;
