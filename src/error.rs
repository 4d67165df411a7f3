//! Error types for batmand

use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

pub use crate::protocol::ProtocolError;

/// Main error type for batmand operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or incompatible advertisement
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport-level failures
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Route mutation rejected by the route collaborator
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation not allowed in the daemon's current lifecycle state
    #[error("Invalid daemon state: {0}")]
    InvalidState(String),
}

/// Errors raised by the packet transport and the tunnel collaborator
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Sending a datagram failed
    #[error("Send on interface {if_index} failed: {reason}")]
    SendFailed {
        /// Interface the datagram was sent on
        if_index: usize,
        /// Description from the transport
        reason: String,
    },

    /// Receiving failed (not a timeout)
    #[error("Receive failed: {reason}")]
    ReceiveFailed {
        /// Description from the transport
        reason: String,
    },

    /// Socket could not be bound
    #[error("Failed to bind {address}: {reason}")]
    BindFailed {
        /// Address we tried to bind
        address: String,
        /// Description from the OS
        reason: String,
    },

    /// Interface index unknown to the transport
    #[error("Unknown interface index {0}")]
    UnknownInterface(usize),

    /// Gateway tunnel could not be established
    #[error("Tunnel to gateway {gateway} failed: {reason}")]
    TunnelFailed {
        /// Gateway originator address
        gateway: Ipv4Addr,
        /// Description from the tunnel collaborator
        reason: String,
    },
}

/// Route collaborator failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The kernel (or whatever backs the route table) refused the mutation
    #[error("Route {destination}/{prefix_len} rejected: {reason}")]
    Rejected {
        /// Destination network
        destination: Ipv4Addr,
        /// Destination prefix length
        prefix_len: u8,
        /// Description from the collaborator
        reason: String,
    },

    /// Backend unavailable
    #[error("Route table unavailable: {0}")]
    Unavailable(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file missing
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path that was looked up
        path: PathBuf,
    },

    /// JSON could not be (de)serialized
    #[error("Serialization failed: {reason}")]
    SerializationFailed {
        /// serde_json error description
        reason: String,
    },

    /// A field holds an unusable value
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue {
        /// Field name as it appears in the config file
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    /// At least one interface is required
    #[error("No interfaces configured")]
    NoInterfaces,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
