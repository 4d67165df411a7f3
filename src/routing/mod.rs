//! Routing core
//!
//! This module holds the B.A.T.M.A.N. routing logic:
//! - Originator tracking with per-neighbor sliding windows
//! - Best next-hop selection with tie-break hysteresis
//! - Route installation diffing (host routes and announced networks)
//! - Internet gateway selection with failure backoff
//! - OGM forwarding with aggregation
//! - Periodic purging of silent nodes
//!
//! # Architecture
//!
//! - **RoutingState**: process-wide state, passed by `&mut` into every
//!   operation
//! - **Originator**: everything known about one advertising node
//! - **RouteInstaller**: turns next-hop decisions into route mutations
//! - **GatewayList**: tracks gateways and drives the tunnel collaborator
//! - **ForwardQueue**: time-ordered transmissions, own and forwarded
//!
//! # Example
//!
//! ```
//! use batmand::network::{BatmanIf, RecordingRouteTable, RecordingTunnel};
//! use batmand::protocol::{Ogm, OgmHeader, COMPAT_VERSION};
//! use batmand::routing::{ForwardQueue, RoutingSettings, RoutingState};
//! use std::net::Ipv4Addr;
//!
//! let routes = RecordingRouteTable::new();
//! let mut state = RoutingState::new(
//!     RoutingSettings::default(),
//!     vec![BatmanIf::new(0, "mesh0", Ipv4Addr::new(10, 0, 0, 1), 24)],
//!     Box::new(routes.clone()),
//!     Box::new(RecordingTunnel::new()),
//! );
//! let mut queue = ForwardQueue::new();
//!
//! let header = OgmHeader {
//!     orig: Ipv4Addr::new(10, 0, 0, 2),
//!     flags: 0,
//!     ttl: 50,
//!     seqno: 1,
//!     gwflags: 0,
//!     version: COMPAT_VERSION,
//!     tq: 255,
//!     hna_len: 0,
//! };
//! let ogm = Ogm::new(header, &[]);
//!
//! // The link is not known to be bidirectional yet: the OGM is answered
//! // but no route is installed.
//! state.receive_ogm(&mut queue, &ogm, Ipv4Addr::new(10, 0, 0, 2), 0, 0);
//! assert_eq!(routes.installed_count(), 0);
//! assert_eq!(queue.len(), 1);
//! ```

pub mod forwarding;
pub mod gateway;
pub mod originator;
pub mod purge;
pub mod receive;
pub mod routes;
pub mod state;

pub use forwarding::{apply_hop_penalty, ForwardDecision, ForwardPacket, ForwardQueue};
pub use gateway::{gateway_speeds, GatewayList, GatewayNode, GatewayState, RoutingClass};
pub use originator::{NeighborKey, NeighborNode, Originator};
pub use receive::{DropReason, ReceiveOutcome};
pub use routes::{RouteInstaller, RouteTables};
pub use state::{RoutingSettings, RoutingState};
