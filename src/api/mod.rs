//! Daemon API
//!
//! Configuration, the main loop and read-only views of the routing state.
//! The binary in `src/bin/batmand.rs` is a thin wrapper over this module.

pub mod config;
pub mod daemon;
pub mod status;

pub use config::{
    config_exists, default_config, load_config, save_config, DaemonConfig, InterfaceConfig,
};
pub use daemon::{Daemon, DaemonBuilder, DaemonState, DaemonStats, RoutingHandle};
pub use status::{gateway_list, originator_table, GatewayStatus, NeighborStatus, OriginatorStatus};
