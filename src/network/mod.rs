//! Network module
//!
//! The narrow interfaces through which the routing core reaches the outside
//! world, plus the implementations shipped with the crate:
//!
//! - [`Transport`]: receive datagrams with a timeout, send to an interface
//! - [`RouteTable`]: idempotent route add/delete
//! - [`TunnelControl`]: start/stop the gateway tunnel session
//! - [`Clock`] and [`JitterSource`]: time and randomness
//!
//! [`udp`] is the socket-backed transport used by the daemon binary,
//! [`memory`] holds in-process doubles for tests and simulations, and
//! [`logging`] holds route/tunnel collaborators that only log.

pub mod interface;
pub mod logging;
pub mod memory;
pub mod udp;

use crate::error::{NetworkError, RouteError};
use std::fmt;
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

pub use interface::BatmanIf;
pub use logging::{LoggingRouteTable, LoggingTunnel};
pub use memory::{
    ManualClock, MemoryNetwork, MemoryTransport, RecordingRouteTable, RecordingTunnel,
    SentDatagram, TunnelEvent,
};
pub use udp::UdpTransport;

/// A datagram handed to the routing core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Source address (the neighbor that transmitted it)
    pub neighbor: Ipv4Addr,
    /// Index of the local interface it arrived on
    pub if_index: usize,
    /// Raw payload
    pub payload: Vec<u8>,
}

/// Packet transport
pub trait Transport: Send {
    /// Wait up to `timeout` for the next datagram.
    ///
    /// `Ok(None)` means the timeout elapsed (or an ignorable datagram was
    /// discarded); the caller simply loops.
    fn recv(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Datagram>, NetworkError>> + Send;

    /// Send `payload` out of interface `if_index` to `destination`.
    fn send(
        &mut self,
        if_index: usize,
        destination: Ipv4Addr,
        payload: &[u8],
    ) -> Result<(), NetworkError>;
}

/// Kind of route entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteType {
    /// Regular forwarding entry
    Unicast,
    /// Continue the lookup in the next table
    Throw,
    /// Reject with "network unreachable"
    Unreachable,
}

/// Add or delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteAction {
    /// Install the route
    Add,
    /// Remove the route
    Delete,
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A route as handed to [`RouteTable::add_del_route`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteSpec {
    /// Destination network or host
    pub destination: Ipv4Addr,
    /// Destination prefix length
    pub prefix_len: u8,
    /// Next hop; `None` for on-link destinations and non-unicast routes
    pub gateway: Option<Ipv4Addr>,
    /// Outgoing interface index
    pub if_index: Option<usize>,
    /// Routing table number
    pub table: u8,
    /// Entry kind
    pub route_type: RouteType,
}

impl RouteSpec {
    /// Unicast route to `destination/prefix_len` via neighbor `via`.
    ///
    /// A destination that is the neighbor itself is on-link and gets no
    /// gateway.
    pub fn unicast(
        destination: Ipv4Addr,
        prefix_len: u8,
        via: Ipv4Addr,
        if_index: usize,
        table: u8,
    ) -> Self {
        Self {
            destination,
            prefix_len,
            gateway: (destination != via || prefix_len != 32).then_some(via),
            if_index: Some(if_index),
            table,
            route_type: RouteType::Unicast,
        }
    }

    /// Throw route for `destination/prefix_len`.
    pub fn throw(destination: Ipv4Addr, prefix_len: u8, table: u8) -> Self {
        Self {
            destination,
            prefix_len,
            gateway: None,
            if_index: None,
            table,
            route_type: RouteType::Throw,
        }
    }

    /// Unreachable default route.
    pub fn unreachable_default(table: u8) -> Self {
        Self {
            destination: Ipv4Addr::UNSPECIFIED,
            prefix_len: 0,
            gateway: None,
            if_index: None,
            table,
            route_type: RouteType::Unreachable,
        }
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.route_type {
            RouteType::Unicast => write!(f, "{}/{}", self.destination, self.prefix_len)?,
            RouteType::Throw => write!(f, "throw {}/{}", self.destination, self.prefix_len)?,
            RouteType::Unreachable => {
                write!(f, "unreachable {}/{}", self.destination, self.prefix_len)?
            },
        }
        if let Some(gateway) = self.gateway {
            write!(f, " via {}", gateway)?;
        }
        if let Some(if_index) = self.if_index {
            write!(f, " dev #{}", if_index)?;
        }
        write!(f, " table {}", self.table)
    }
}

/// Kernel route manipulation
pub trait RouteTable: Send {
    /// Add or delete one route. Must be idempotent; the caller never retries.
    fn add_del_route(&mut self, route: &RouteSpec, action: RouteAction) -> Result<(), RouteError>;
}

/// Gateway tunnel session
pub trait TunnelControl: Send {
    /// Start a session with `gateway`.
    fn start(&mut self, gateway: Ipv4Addr, gwflags: u8) -> Result<(), NetworkError>;

    /// Tear down the running session, if any.
    fn stop(&mut self);
}

/// Millisecond time source
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;
}

/// Monotonic clock following the tokio timer.
///
/// Under a paused tokio runtime this advances with virtual time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    /// Clock starting at zero now.
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Uniform random numbers for send-time jitter
pub trait JitterSource: Send {
    /// Value in `0..max`; zero when `max` is zero.
    fn random(&mut self, max: u64) -> u64;
}

impl<R: rand::RngCore + Send> JitterSource for R {
    fn random(&mut self, max: u64) -> u64 {
        use rand::Rng;
        if max == 0 {
            0
        } else {
            self.gen_range(0..max)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_unicast_route_to_neighbor_is_on_link() {
        let neighbor = Ipv4Addr::new(10, 0, 0, 2);
        let route = RouteSpec::unicast(neighbor, 32, neighbor, 0, 66);
        assert_eq!(route.gateway, None);

        let remote = Ipv4Addr::new(10, 0, 0, 9);
        let route = RouteSpec::unicast(remote, 32, neighbor, 0, 66);
        assert_eq!(route.gateway, Some(neighbor));
    }

    #[test]
    fn test_route_display() {
        let route = RouteSpec::unicast(
            Ipv4Addr::new(10, 0, 0, 9),
            32,
            Ipv4Addr::new(10, 0, 0, 2),
            1,
            66,
        );
        assert_eq!(route.to_string(), "10.0.0.9/32 via 10.0.0.2 dev #1 table 66");
        assert_eq!(
            RouteSpec::unreachable_default(67).to_string(),
            "unreachable 0.0.0.0/0 table 67"
        );
    }

    #[test]
    fn test_jitter_source_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(rng.random(0), 0);
        for _ in 0..1000 {
            assert!(rng.random(200) < 200);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_follows_tokio_time() {
        let clock = SystemClock::new();
        assert_eq!(clock.now_ms(), 0);
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(clock.now_ms(), 1500);
    }
}
