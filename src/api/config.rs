//! Daemon configuration
//!
//! This module defines [`DaemonConfig`] and its JSON persistence. The file is
//! human-readable pretty JSON; every field except the interface list has a
//! default, so a minimal file only names the interfaces.

use crate::error::{ConfigError, Result};
use crate::network::BatmanIf;
use crate::protocol::{
    HnaEntry, BATMAN_PORT, DEFAULT_HOP_PENALTY, DEFAULT_JITTER_MS, DEFAULT_ORIGINATOR_INTERVAL_MS,
    DEFAULT_PURGE_INTERVAL_MS, DEFAULT_PURGE_TIMEOUT_MS, DEFAULT_TTL, HEADER_LEN,
    MAX_AGGREGATION_BYTES, MAX_AGGREGATION_MS,
};
use crate::routing::gateway::DEFAULT_GW_PENALTY_MS;
use crate::routing::{RouteTables, RoutingClass, RoutingSettings};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;

/// Largest aggregation budget accepted; one Ethernet MTU
pub const MAX_AGGREGATION_BUDGET: usize = 1500;

/// One mesh interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Device name
    pub name: String,

    /// Our address on the device
    pub address: Ipv4Addr,

    /// Prefix length of the attached network
    pub prefix_len: u8,

    /// Broadcast address; derived from address and prefix when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<Ipv4Addr>,
}

impl InterfaceConfig {
    /// Interface with a derived broadcast address.
    pub fn new(name: impl Into<String>, address: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            name: name.into(),
            address,
            prefix_len,
            broadcast: None,
        }
    }

    /// Set an explicit broadcast address
    pub fn with_broadcast(mut self, broadcast: Ipv4Addr) -> Self {
        self.broadcast = Some(broadcast);
        self
    }
}

/// Complete daemon configuration
///
/// Instances are usually loaded with [`load_config`], which also validates
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Mesh interfaces; the first one is the primary interface
    pub interfaces: Vec<InterfaceConfig>,

    /// UDP port OGMs are exchanged on
    pub port: u16,

    /// Interval between own OGMs, in milliseconds
    pub originator_interval_ms: u64,

    /// Maximum deviation from the originator interval, in milliseconds
    pub jitter_ms: u64,

    /// TTL of own OGMs
    pub ttl: u8,

    /// Silence after which originators and neighbors are dropped
    pub purge_timeout_ms: u64,

    /// Interval between purge sweeps
    pub purge_interval_ms: u64,

    /// Whether forwarded OGMs are aggregated
    pub aggregation: bool,

    /// Byte ceiling of one aggregate
    pub aggregation_bytes: usize,

    /// How long a forwarded OGM may wait to be aggregated
    pub aggregation_window_ms: u64,

    /// Per-hop TQ penalty, out of 255
    pub hop_penalty: u8,

    /// Gateway selection policy
    pub routing_class: RoutingClass,

    /// Gateway to use whenever it is reachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_gateway: Option<Ipv4Addr>,

    /// Gateway class we advertise, 0 when we are no gateway
    pub gateway_class: u8,

    /// Backoff base after a gateway failure, in milliseconds
    pub gateway_penalty_ms: u64,

    /// Networks announced on our behalf
    pub announced_networks: Vec<HnaEntry>,

    /// Routing table numbers
    pub tables: RouteTables,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            port: BATMAN_PORT,
            originator_interval_ms: DEFAULT_ORIGINATOR_INTERVAL_MS,
            jitter_ms: DEFAULT_JITTER_MS,
            ttl: DEFAULT_TTL,
            purge_timeout_ms: DEFAULT_PURGE_TIMEOUT_MS,
            purge_interval_ms: DEFAULT_PURGE_INTERVAL_MS,
            aggregation: true,
            aggregation_bytes: MAX_AGGREGATION_BYTES,
            aggregation_window_ms: MAX_AGGREGATION_MS,
            hop_penalty: DEFAULT_HOP_PENALTY,
            routing_class: RoutingClass::Disabled,
            preferred_gateway: None,
            gateway_class: 0,
            gateway_penalty_ms: DEFAULT_GW_PENALTY_MS,
            announced_networks: Vec::new(),
            tables: RouteTables::default(),
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> crate::error::Error {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
    .into()
}

impl DaemonConfig {
    /// Configuration for the given interfaces, defaults elsewhere.
    pub fn new(interfaces: Vec<InterfaceConfig>) -> Self {
        Self {
            interfaces,
            ..Default::default()
        }
    }

    /// Add an interface
    pub fn with_interface(mut self, interface: InterfaceConfig) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Set the UDP port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the originator interval and jitter
    pub fn with_originator_interval(mut self, interval_ms: u64, jitter_ms: u64) -> Self {
        self.originator_interval_ms = interval_ms;
        self.jitter_ms = jitter_ms;
        self
    }

    /// Set the purge timeout
    pub fn with_purge_timeout(mut self, timeout_ms: u64) -> Self {
        self.purge_timeout_ms = timeout_ms;
        self
    }

    /// Enable or disable aggregation
    pub fn with_aggregation(mut self, enabled: bool) -> Self {
        self.aggregation = enabled;
        self
    }

    /// Set the gateway selection policy
    pub fn with_routing_class(mut self, class: RoutingClass) -> Self {
        self.routing_class = class;
        self
    }

    /// Set the preferred gateway
    pub fn with_preferred_gateway(mut self, gateway: Ipv4Addr) -> Self {
        self.preferred_gateway = Some(gateway);
        self
    }

    /// Advertise ourselves as a gateway of the given class
    pub fn with_gateway_class(mut self, class: u8) -> Self {
        self.gateway_class = class;
        self
    }

    /// Announce a network
    pub fn with_announced_network(mut self, entry: HnaEntry) -> Self {
        self.announced_networks.push(entry);
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - no interface is configured
    /// - two interfaces share an address, or a prefix length is out of range
    /// - an interval or the purge timeout is zero
    /// - the jitter is not smaller than the originator interval
    /// - the TTL is zero
    /// - the aggregation budget cannot hold one header or exceeds 1500 bytes
    /// - an announced network has an invalid prefix length, or more than 255
    ///   networks are announced
    pub fn validate(&self) -> Result<()> {
        if self.interfaces.is_empty() {
            return Err(ConfigError::NoInterfaces.into());
        }

        let mut seen = HashSet::new();
        for iface in &self.interfaces {
            if !seen.insert(iface.address) {
                return Err(invalid(
                    "interfaces",
                    format!("address {} used twice", iface.address),
                ));
            }
            if iface.prefix_len == 0 || iface.prefix_len > 32 {
                return Err(invalid(
                    "interfaces",
                    format!("{}: prefix length {} out of range", iface.name, iface.prefix_len),
                ));
            }
        }

        if self.originator_interval_ms == 0 {
            return Err(invalid("originator_interval_ms", "must be greater than 0"));
        }
        if self.jitter_ms >= self.originator_interval_ms {
            return Err(invalid(
                "jitter_ms",
                format!(
                    "{} is not smaller than the originator interval {}",
                    self.jitter_ms, self.originator_interval_ms
                ),
            ));
        }
        if self.purge_timeout_ms == 0 {
            return Err(invalid("purge_timeout_ms", "must be greater than 0"));
        }
        if self.purge_interval_ms == 0 {
            return Err(invalid("purge_interval_ms", "must be greater than 0"));
        }
        if self.ttl == 0 {
            return Err(invalid("ttl", "must be greater than 0"));
        }

        if self.aggregation_bytes < HEADER_LEN || self.aggregation_bytes > MAX_AGGREGATION_BUDGET {
            return Err(invalid(
                "aggregation_bytes",
                format!(
                    "{} not within {}..={}",
                    self.aggregation_bytes, HEADER_LEN, MAX_AGGREGATION_BUDGET
                ),
            ));
        }

        if let Some(entry) = self.announced_networks.iter().find(|entry| !entry.is_valid()) {
            return Err(invalid(
                "announced_networks",
                format!("{}: prefix length must be 1..=32", entry),
            ));
        }
        if self.announced_networks.len() > u8::MAX as usize {
            return Err(invalid("announced_networks", "at most 255 networks fit in an OGM"));
        }

        Ok(())
    }

    /// Routing core tunables derived from this configuration.
    pub fn routing_settings(&self) -> RoutingSettings {
        RoutingSettings {
            originator_interval_ms: self.originator_interval_ms,
            jitter_ms: self.jitter_ms,
            ttl: self.ttl,
            purge_timeout_ms: self.purge_timeout_ms,
            purge_interval_ms: self.purge_interval_ms,
            aggregation: self.aggregation,
            aggregation_bytes: self.aggregation_bytes,
            aggregation_window_ms: self.aggregation_window_ms,
            hop_penalty: self.hop_penalty,
            routing_class: self.routing_class,
            preferred_gateway: self.preferred_gateway,
            own_gwflags: self.gateway_class,
            gw_penalty_ms: self.gateway_penalty_ms,
            tables: self.tables,
            own_hna: self.announced_networks.clone(),
        }
    }

    /// Interface records in index order.
    pub fn batman_interfaces(&self) -> Vec<BatmanIf> {
        self.interfaces
            .iter()
            .enumerate()
            .map(|(index, iface)| {
                let batman_if = BatmanIf::new(index, iface.name.clone(), iface.address, iface.prefix_len);
                match iface.broadcast {
                    Some(broadcast) => batman_if.with_broadcast(broadcast),
                    None => batman_if,
                }
            })
            .collect()
    }
}

/// Save configuration to a JSON file
///
/// # Example
///
/// ```no_run
/// use batmand::api::config::{save_config, DaemonConfig, InterfaceConfig};
/// use std::net::Ipv4Addr;
/// use std::path::Path;
///
/// let config = DaemonConfig::new(vec![InterfaceConfig::new(
///     "wlan0",
///     Ipv4Addr::new(10, 0, 0, 1),
///     24,
/// )]);
/// save_config(Path::new("batmand.json"), &config).unwrap();
/// ```
pub fn save_config(path: &Path, config: &DaemonConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(|e| ConfigError::SerializationFailed {
        reason: format!("Failed to serialize config: {}", e),
    })?;

    std::fs::write(path, json)?;
    Ok(())
}

/// Load and validate configuration from a JSON file
///
/// # Errors
///
/// Returns an error if:
/// - The file doesn't exist
/// - The file contains invalid JSON or does not match the schema
/// - The configuration fails [`DaemonConfig::validate`]
pub fn load_config(path: &Path) -> Result<DaemonConfig> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }

    let json = std::fs::read_to_string(path)?;
    let config: DaemonConfig =
        serde_json::from_str(&json).map_err(|e| ConfigError::SerializationFailed {
            reason: format!("Failed to deserialize config: {}", e),
        })?;

    config.validate()?;
    Ok(config)
}

/// Check if a configuration file exists
pub fn config_exists(path: &Path) -> bool {
    path.exists() && path.is_file()
}

/// Get default configuration
///
/// The result has no interfaces and therefore does not validate until one
/// is added.
///
/// # Example
///
/// ```
/// use batmand::api::config::default_config;
///
/// let config = default_config();
/// assert_eq!(config.originator_interval_ms, 1000);
/// assert!(config.validate().is_err());
/// ```
pub fn default_config() -> DaemonConfig {
    DaemonConfig::default()
}
