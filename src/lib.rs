//! # batmand
//!
//! A B.A.T.M.A.N. mesh routing daemon. Every node periodically floods
//! originator messages (OGMs); each node learns, per originator, which
//! neighbor delivers the most of that originator's recent sequence numbers
//! and installs a route through it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use batmand::api::{DaemonBuilder, DaemonConfig, InterfaceConfig};
//! use batmand::network::UdpTransport;
//! use std::net::Ipv4Addr;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DaemonConfig::new(vec![InterfaceConfig::new(
//!         "wlan0",
//!         Ipv4Addr::new(10, 0, 0, 1),
//!         24,
//!     )]);
//!     let transport = UdpTransport::bind(&config.batman_interfaces(), config.port).await?;
//!     let mut daemon = DaemonBuilder::new(config).build(transport)?;
//!
//!     daemon.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Layout
//!
//! - [`protocol`]: OGM and HNA wire format
//! - [`collections`]: sequence windows, the originator table, quality rings
//! - [`routing`]: originator tracking, route selection, forwarding, purging
//! - [`network`]: transport, route table, tunnel and clock collaborators
//! - [`api`]: configuration and the daemon main loop

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod api;
pub mod collections;
pub mod error;
pub mod network;
pub mod protocol;
pub mod routing;

// Re-export main types
pub use api::{Daemon, DaemonBuilder, DaemonConfig, DaemonState, InterfaceConfig, RoutingHandle};
pub use error::{ConfigError, Error, NetworkError, ProtocolError, Result, RouteError};
pub use network::{BatmanIf, Clock, Datagram, JitterSource, RouteTable, Transport, TunnelControl};
pub use protocol::{HnaEntry, Ogm, OgmHeader};
pub use routing::{Originator, RoutingClass, RoutingSettings, RoutingState};
