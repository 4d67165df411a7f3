//! In-memory collaborators
//!
//! Doubles for every network-facing trait so that the routing core can be
//! exercised without sockets, kernel routes or wall-clock time:
//!
//! - [`MemoryNetwork`] / [`MemoryTransport`]: a broadcast medium with
//!   explicitly configured (possibly one-way) links between interface
//!   addresses
//! - [`RecordingRouteTable`]: logs every route mutation and tracks the
//!   resulting installed set
//! - [`RecordingTunnel`]: logs tunnel start/stop
//! - [`ManualClock`]: time that only moves when told to
//!
//! All handles are cheap clones sharing state, so a test can keep one copy
//! for assertions while the daemon owns another.

use super::{Clock, Datagram, RouteAction, RouteSpec, RouteTable, Transport, TunnelControl};
use crate::error::{NetworkError, RouteError};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A datagram observed leaving a [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentDatagram {
    /// Sending interface address
    pub from: Ipv4Addr,
    /// Sending interface index
    pub if_index: usize,
    /// Destination given by the sender
    pub destination: Ipv4Addr,
    /// Payload
    pub payload: Vec<u8>,
}

struct Port {
    if_index: usize,
    inbox: mpsc::UnboundedSender<Datagram>,
}

#[derive(Default)]
struct Medium {
    ports: HashMap<Ipv4Addr, Port>,
    // directed: (from, to)
    links: HashSet<(Ipv4Addr, Ipv4Addr)>,
    failing: HashSet<Ipv4Addr>,
    sent: Vec<SentDatagram>,
}

/// Shared broadcast medium connecting [`MemoryTransport`]s
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    medium: Arc<Mutex<Medium>>,
}

impl MemoryNetwork {
    /// Empty medium.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node owning one interface per address, in index order.
    ///
    /// # Panics
    ///
    /// Panics if an address is already attached.
    pub fn attach(&self, addresses: &[Ipv4Addr]) -> MemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut medium = self.medium.lock();
        for (if_index, address) in addresses.iter().enumerate() {
            if medium.ports.contains_key(address) {
                panic!("address {} attached twice", address);
            }
            medium.ports.insert(
                *address,
                Port {
                    if_index,
                    inbox: tx.clone(),
                },
            );
        }
        MemoryTransport {
            medium: Arc::clone(&self.medium),
            addresses: addresses.to_vec(),
            inbox: rx,
        }
    }

    /// Link two interfaces in both directions.
    pub fn connect(&self, a: Ipv4Addr, b: Ipv4Addr) {
        let mut medium = self.medium.lock();
        medium.links.insert((a, b));
        medium.links.insert((b, a));
    }

    /// Let `from` reach `to` without the reverse direction.
    pub fn connect_one_way(&self, from: Ipv4Addr, to: Ipv4Addr) {
        self.medium.lock().links.insert((from, to));
    }

    /// Remove the link between two interfaces in both directions.
    pub fn disconnect(&self, a: Ipv4Addr, b: Ipv4Addr) {
        let mut medium = self.medium.lock();
        medium.links.remove(&(a, b));
        medium.links.remove(&(b, a));
    }

    /// Make sends from `address` fail (or succeed again).
    pub fn set_failing(&self, address: Ipv4Addr, failing: bool) {
        let mut medium = self.medium.lock();
        if failing {
            medium.failing.insert(address);
        } else {
            medium.failing.remove(&address);
        }
    }

    /// Deliver `payload` to `to` as if `from` had sent it, regardless of
    /// links.
    ///
    /// # Panics
    ///
    /// Panics if `to` is not attached.
    pub fn inject(&self, from: Ipv4Addr, to: Ipv4Addr, payload: Vec<u8>) {
        let medium = self.medium.lock();
        let Some(port) = medium.ports.get(&to) else {
            panic!("inject to unattached address {}", to);
        };
        let _ = port.inbox.send(Datagram {
            neighbor: from,
            if_index: port.if_index,
            payload,
        });
    }

    /// Every datagram sent so far, in order.
    pub fn sent(&self) -> Vec<SentDatagram> {
        self.medium.lock().sent.clone()
    }

    /// Datagrams sent from `address`.
    pub fn sent_from(&self, address: Ipv4Addr) -> Vec<SentDatagram> {
        self.medium
            .lock()
            .sent
            .iter()
            .filter(|datagram| datagram.from == address)
            .cloned()
            .collect()
    }

    /// Forget the send log.
    pub fn clear_sent(&self) {
        self.medium.lock().sent.clear();
    }
}

/// One node's view of a [`MemoryNetwork`]
pub struct MemoryTransport {
    medium: Arc<Mutex<Medium>>,
    addresses: Vec<Ipv4Addr>,
    inbox: mpsc::UnboundedReceiver<Datagram>,
}

impl MemoryTransport {
    /// Addresses of this node's interfaces.
    pub fn addresses(&self) -> &[Ipv4Addr] {
        &self.addresses
    }
}

impl Transport for MemoryTransport {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<Datagram>, NetworkError> {
        match tokio::time::timeout(timeout, self.inbox.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(datagram)) => Ok(Some(datagram)),
            Ok(None) => Err(NetworkError::ReceiveFailed {
                reason: "memory network closed".to_string(),
            }),
        }
    }

    fn send(
        &mut self,
        if_index: usize,
        destination: Ipv4Addr,
        payload: &[u8],
    ) -> Result<(), NetworkError> {
        let from = *self
            .addresses
            .get(if_index)
            .ok_or(NetworkError::UnknownInterface(if_index))?;

        let mut medium = self.medium.lock();
        if medium.failing.contains(&from) {
            return Err(NetworkError::SendFailed {
                if_index,
                reason: "interface down".to_string(),
            });
        }
        medium.sent.push(SentDatagram {
            from,
            if_index,
            destination,
            payload: payload.to_vec(),
        });

        for (&address, port) in &medium.ports {
            if !medium.links.contains(&(from, address)) {
                continue;
            }
            // Receivers that went away are simply unreachable.
            let _ = port.inbox.send(Datagram {
                neighbor: from,
                if_index: port.if_index,
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct RouteLog {
    mutations: Vec<(RouteAction, RouteSpec)>,
    installed: BTreeSet<RouteKey>,
    failing: bool,
}

// BTreeSet ordering key; RouteSpec itself has no total order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RouteKey {
    table: u8,
    destination: Ipv4Addr,
    prefix_len: u8,
    gateway: Option<Ipv4Addr>,
    if_index: Option<usize>,
    kind: u8,
}

impl From<&RouteSpec> for RouteKey {
    fn from(route: &RouteSpec) -> Self {
        Self {
            table: route.table,
            destination: route.destination,
            prefix_len: route.prefix_len,
            gateway: route.gateway,
            if_index: route.if_index,
            kind: route.route_type as u8,
        }
    }
}

/// Route table that records every call
#[derive(Clone, Default)]
pub struct RecordingRouteTable {
    log: Arc<Mutex<RouteLog>>,
}

impl RecordingRouteTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, in order.
    pub fn mutations(&self) -> Vec<(RouteAction, RouteSpec)> {
        self.log.lock().mutations.clone()
    }

    /// Number of calls so far.
    pub fn mutation_count(&self) -> usize {
        self.log.lock().mutations.len()
    }

    /// Calls that touched `destination/prefix_len`.
    pub fn mutations_for(&self, destination: Ipv4Addr, prefix_len: u8) -> Vec<(RouteAction, RouteSpec)> {
        self.log
            .lock()
            .mutations
            .iter()
            .filter(|(_, route)| route.destination == destination && route.prefix_len == prefix_len)
            .cloned()
            .collect()
    }

    /// Whether a route to `destination/prefix_len` is currently installed in
    /// `table`, and via which gateway.
    pub fn installed_via(&self, destination: Ipv4Addr, prefix_len: u8, table: u8) -> Option<Option<Ipv4Addr>> {
        self.log
            .lock()
            .installed
            .iter()
            .find(|key| {
                key.destination == destination && key.prefix_len == prefix_len && key.table == table
            })
            .map(|key| key.gateway)
    }

    /// Number of installed routes.
    pub fn installed_count(&self) -> usize {
        self.log.lock().installed.len()
    }

    /// Make every following call fail (still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.log.lock().failing = failing;
    }

    /// Forget the call log, keeping the installed set.
    pub fn clear_mutations(&self) {
        self.log.lock().mutations.clear();
    }
}

impl RouteTable for RecordingRouteTable {
    fn add_del_route(&mut self, route: &RouteSpec, action: RouteAction) -> Result<(), RouteError> {
        let mut log = self.log.lock();
        log.mutations.push((action, route.clone()));
        if log.failing {
            return Err(RouteError::Rejected {
                destination: route.destination,
                prefix_len: route.prefix_len,
                reason: "route table set to fail".to_string(),
            });
        }
        let key = RouteKey::from(route);
        match action {
            RouteAction::Add => {
                log.installed.insert(key);
            },
            RouteAction::Delete => {
                log.installed.remove(&key);
            },
        }
        Ok(())
    }
}

/// Tunnel call observed by a [`RecordingTunnel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelEvent {
    /// `start` was called
    Started {
        /// Gateway address
        gateway: Ipv4Addr,
        /// Gateway class
        gwflags: u8,
    },
    /// `stop` was called while a session was running
    Stopped {
        /// Gateway the session was with
        gateway: Ipv4Addr,
    },
}

#[derive(Default)]
struct TunnelLog {
    events: Vec<TunnelEvent>,
    active: Option<Ipv4Addr>,
    refuse: HashSet<Ipv4Addr>,
}

/// Tunnel collaborator that records every call
#[derive(Clone, Default)]
pub struct RecordingTunnel {
    log: Arc<Mutex<TunnelLog>>,
}

impl RecordingTunnel {
    /// Idle tunnel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every start/stop so far.
    pub fn events(&self) -> Vec<TunnelEvent> {
        self.log.lock().events.clone()
    }

    /// Gateway of the running session.
    pub fn active(&self) -> Option<Ipv4Addr> {
        self.log.lock().active
    }

    /// Make `start` fail for `gateway`.
    pub fn refuse(&self, gateway: Ipv4Addr) {
        self.log.lock().refuse.insert(gateway);
    }
}

impl TunnelControl for RecordingTunnel {
    fn start(&mut self, gateway: Ipv4Addr, gwflags: u8) -> Result<(), NetworkError> {
        let mut log = self.log.lock();
        log.events.push(TunnelEvent::Started { gateway, gwflags });
        if log.refuse.contains(&gateway) {
            return Err(NetworkError::TunnelFailed {
                gateway,
                reason: "gateway refused connection".to_string(),
            });
        }
        log.active = Some(gateway);
        Ok(())
    }

    fn stop(&mut self) {
        let mut log = self.log.lock();
        if let Some(gateway) = log.active.take() {
            log.events.push(TunnelEvent::Stopped { gateway });
        }
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Clock reading `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Jump to `ms`.
    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    /// Move forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[tokio::test(start_paused = true)]
    async fn test_linked_ports_receive() {
        let network = MemoryNetwork::new();
        let mut a = network.attach(&[addr(1)]);
        let mut b = network.attach(&[addr(2)]);
        network.connect(addr(1), addr(2));

        a.send(0, Ipv4Addr::BROADCAST, b"hello").unwrap();
        let datagram = b.recv(Duration::from_millis(10)).await.unwrap().unwrap();

        assert_eq!(datagram.neighbor, addr(1));
        assert_eq!(datagram.if_index, 0);
        assert_eq!(datagram.payload, b"hello");
        // no loopback
        assert_eq!(a.recv(Duration::from_millis(10)).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_way_link() {
        let network = MemoryNetwork::new();
        let mut a = network.attach(&[addr(1)]);
        let mut b = network.attach(&[addr(2)]);
        network.connect_one_way(addr(1), addr(2));

        b.send(0, Ipv4Addr::BROADCAST, b"back").unwrap();
        assert_eq!(a.recv(Duration::from_millis(10)).await.unwrap(), None);

        a.send(0, Ipv4Addr::BROADCAST, b"forth").unwrap();
        assert!(b.recv(Duration::from_millis(10)).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incoming_interface_index() {
        let network = MemoryNetwork::new();
        let mut a = network.attach(&[addr(1)]);
        let mut b = network.attach(&[addr(20), addr(21)]);
        network.connect(addr(1), addr(21));

        a.send(0, Ipv4Addr::BROADCAST, b"x").unwrap();
        let datagram = b.recv(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(datagram.if_index, 1);
    }

    #[test]
    fn test_failing_interface() {
        let network = MemoryNetwork::new();
        let mut a = network.attach(&[addr(1)]);
        network.set_failing(addr(1), true);

        assert!(matches!(
            a.send(0, Ipv4Addr::BROADCAST, b"x"),
            Err(NetworkError::SendFailed { if_index: 0, .. })
        ));
        assert!(matches!(
            a.send(3, Ipv4Addr::BROADCAST, b"x"),
            Err(NetworkError::UnknownInterface(3))
        ));
        assert!(network.sent().is_empty());
    }

    #[test]
    fn test_recording_route_table() {
        let routes = RecordingRouteTable::new();
        let mut handle = routes.clone();
        let route = RouteSpec::unicast(addr(9), 32, addr(2), 0, 66);

        handle.add_del_route(&route, RouteAction::Add).unwrap();
        assert_eq!(routes.installed_via(addr(9), 32, 66), Some(Some(addr(2))));

        handle.add_del_route(&route, RouteAction::Delete).unwrap();
        assert_eq!(routes.installed_via(addr(9), 32, 66), None);
        assert_eq!(routes.mutation_count(), 2);

        routes.set_failing(true);
        assert!(handle.add_del_route(&route, RouteAction::Add).is_err());
        assert_eq!(routes.installed_count(), 0);
    }

    #[test]
    fn test_recording_tunnel() {
        let tunnel = RecordingTunnel::new();
        let mut handle = tunnel.clone();
        tunnel.refuse(addr(5));

        assert!(handle.start(addr(5), 0x21).is_err());
        assert_eq!(tunnel.active(), None);

        handle.start(addr(6), 0x21).unwrap();
        handle.stop();
        handle.stop();

        assert_eq!(
            tunnel.events(),
            vec![
                TunnelEvent::Started {
                    gateway: addr(5),
                    gwflags: 0x21
                },
                TunnelEvent::Started {
                    gateway: addr(6),
                    gwflags: 0x21
                },
                TunnelEvent::Stopped { gateway: addr(6) },
            ]
        );
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        let shared = clock.clone();
        shared.advance(50);
        assert_eq!(clock.now_ms(), 150);
        clock.set(10);
        assert_eq!(shared.now_ms(), 10);
    }
}
