//! Process-wide routing state
//!
//! [`RoutingState`] owns everything the routing core mutates: the local
//! interfaces, the originator registry, the gateway list and the route
//! installer. The daemon keeps it behind a single lock; every core operation
//! (receive, purge, own-OGM scheduling, gateway maintenance) takes it by
//! `&mut`.

use super::gateway::{GatewayList, RoutingClass, DEFAULT_GW_PENALTY_MS};
use super::originator::Originator;
use super::routes::{RouteInstaller, RouteTables};
use crate::collections::HashTable;
use crate::network::{BatmanIf, RouteTable, TunnelControl};
use crate::protocol::{
    HnaEntry, OgmHeader, DEFAULT_HOP_PENALTY, DEFAULT_JITTER_MS, DEFAULT_ORIGINATOR_INTERVAL_MS,
    DEFAULT_PURGE_INTERVAL_MS, DEFAULT_PURGE_TIMEOUT_MS, DEFAULT_TTL, MAX_AGGREGATION_BYTES,
    MAX_AGGREGATION_MS,
};
use std::net::Ipv4Addr;

/// Initial bucket count of the originator registry
const ORIGINATOR_TABLE_SIZE: usize = 128;

/// Tunables of the routing core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingSettings {
    /// Interval between own OGMs per interface
    pub originator_interval_ms: u64,
    /// Maximum deviation from the interval
    pub jitter_ms: u64,
    /// TTL of own OGMs
    pub ttl: u8,
    /// Inactivity after which originators and neighbors are dropped
    pub purge_timeout_ms: u64,
    /// Interval between purge sweeps
    pub purge_interval_ms: u64,
    /// Whether forwarded OGMs are aggregated
    pub aggregation: bool,
    /// Byte ceiling of one aggregate
    pub aggregation_bytes: usize,
    /// How long a forwarded OGM may wait for company
    pub aggregation_window_ms: u64,
    /// TQ penalty applied per hop, out of 255
    pub hop_penalty: u8,
    /// Gateway selection policy
    pub routing_class: RoutingClass,
    /// Gateway that wins whenever it is eligible
    pub preferred_gateway: Option<Ipv4Addr>,
    /// Our own gateway class, 0 when we are no gateway
    pub own_gwflags: u8,
    /// Backoff base after a gateway failure
    pub gw_penalty_ms: u64,
    /// Routing table numbers
    pub tables: RouteTables,
    /// Networks announced on our behalf
    pub own_hna: Vec<HnaEntry>,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        Self {
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
            own_gwflags: 0,
            gw_penalty_ms: DEFAULT_GW_PENALTY_MS,
            tables: RouteTables::default(),
            own_hna: Vec::new(),
        }
    }
}

/// Find or insert the registry entry for `address`.
fn ensure_originator(
    originators: &mut HashTable<Ipv4Addr, Originator>,
    address: Ipv4Addr,
    num_ifs: usize,
) -> &mut Originator {
    if !originators.contains(&address) {
        tracing::info!(orig = %address, "creating new originator");
        if let Err(dup) = originators.insert(address, Originator::new(address, num_ifs)) {
            panic!("originator {} inserted twice", dup.key);
        }
        originators.grow_if_needed();
    }
    match originators.find_mut(&address) {
        Some(orig) => orig,
        None => panic!("originator {} vanished after insert", address),
    }
}

/// Everything the routing core knows
pub struct RoutingState {
    pub(crate) settings: RoutingSettings,
    pub(crate) interfaces: Vec<BatmanIf>,
    pub(crate) originators: HashTable<Ipv4Addr, Originator>,
    pub(crate) gateways: GatewayList,
    pub(crate) routes: RouteInstaller,
}

impl RoutingState {
    /// State for `interfaces`, installing routes into `route_table` and
    /// reaching gateways through `tunnel`.
    pub fn new(
        settings: RoutingSettings,
        interfaces: Vec<BatmanIf>,
        route_table: Box<dyn RouteTable>,
        tunnel: Box<dyn TunnelControl>,
    ) -> Self {
        let gateways = GatewayList::new(
            tunnel,
            settings.routing_class,
            settings.preferred_gateway,
            settings.gw_penalty_ms,
        );
        let routes = RouteInstaller::new(route_table, settings.tables);
        Self {
            settings,
            interfaces,
            originators: HashTable::new(ORIGINATOR_TABLE_SIZE),
            gateways,
            routes,
        }
    }

    /// Tunables in use.
    pub fn settings(&self) -> &RoutingSettings {
        &self.settings
    }

    /// Local interfaces, primary first.
    pub fn interfaces(&self) -> &[BatmanIf] {
        &self.interfaces
    }

    /// The originator registry.
    pub fn originators(&self) -> &HashTable<Ipv4Addr, Originator> {
        &self.originators
    }

    /// Registry entry for `address`.
    pub fn originator(&self, address: Ipv4Addr) -> Option<&Originator> {
        self.originators.find(&address)
    }

    /// Known gateways.
    pub fn gateways(&self) -> &GatewayList {
        &self.gateways
    }

    /// Route installation counters.
    pub fn routes(&self) -> &RouteInstaller {
        &self.routes
    }

    /// Whether `address` belongs to one of our interfaces.
    pub fn is_own_address(&self, address: Ipv4Addr) -> bool {
        self.interfaces.iter().any(|iface| iface.address == address)
    }

    /// Whether `address` is the limited broadcast or one of our interfaces'
    /// broadcast addresses.
    pub fn is_broadcast_address(&self, address: Ipv4Addr) -> bool {
        address == Ipv4Addr::BROADCAST || self.interfaces.iter().any(|iface| iface.broadcast == address)
    }

    /// Registry entry for `address`, created on first sight.
    pub fn get_or_create(&mut self, address: Ipv4Addr) -> &mut Originator {
        let num_ifs = self.interfaces.len();
        ensure_originator(&mut self.originators, address, num_ifs)
    }

    /// Feed an accepted OGM from `header.orig`, heard from `neighbor` on
    /// `if_index`, into the registry and bring its routes up to date.
    pub fn update_originator(
        &mut self,
        header: &OgmHeader,
        hna: &[u8],
        neighbor: Ipv4Addr,
        if_index: usize,
        now: u64,
    ) {
        let num_ifs = self.interfaces.len();
        let orig = ensure_originator(&mut self.originators, header.orig, num_ifs);

        let best = orig.record_advertisement(header, neighbor, if_index, now);
        orig.announced = hna.to_vec();
        self.routes.update_routes(orig, best, hna);

        if orig.gwflags != header.gwflags {
            tracing::debug!(
                orig = %orig.address,
                old = orig.gwflags,
                new = header.gwflags,
                "gateway class changed"
            );
            orig.gwflags = header.gwflags;
            self.gateways.update(header.orig, header.gwflags, now);
        }
    }

    /// Pick a gateway if gateway routing is on and none is in use.
    pub fn maintain_gateway(&mut self, now: u64) {
        if self.settings.routing_class != RoutingClass::Disabled && self.gateways.current().is_none() {
            self.gateways.choose(&self.originators, now);
        }
    }

    /// The tunnel to `gateway` failed: back off and choose again.
    pub fn report_gateway_failure(&mut self, gateway: Ipv4Addr, now: u64) {
        self.gateways.report_failure(gateway, now);
        self.gateways.choose(&self.originators, now);
    }

    /// Install the static routes.
    pub fn start(&mut self) {
        tracing::info!(
            interfaces = self.interfaces.len(),
            announced = self.settings.own_hna.len(),
            "installing static routes"
        );
        self.routes
            .install_static_routes(&self.interfaces, &self.settings.own_hna);
    }

    /// Remove every route this state installed and leave the gateway.
    ///
    /// Runs a purge far enough in the future that every originator expires,
    /// so each learned route is deleted exactly once.
    pub fn shutdown(&mut self, now: u64) {
        let horizon = now
            + 5 * self.settings.purge_timeout_ms
            + self.settings.originator_interval_ms;
        let purged = self.purge(horizon);
        self.gateways.shutdown();
        self.routes
            .remove_static_routes(&self.interfaces, &self.settings.own_hna);
        tracing::info!(purged, "routing state torn down");
    }

    /// Dump the originator table and gateway list at debug level.
    pub fn log_tables(&self) {
        if !tracing::enabled!(tracing::Level::DEBUG) {
            return;
        }
        tracing::debug!(
            originators = self.originators.len(),
            buckets = self.originators.size(),
            "originator table"
        );
        for orig in self.originators.values() {
            let router = orig.router_node();
            let neighbors: Vec<String> = orig
                .neighbors
                .iter()
                .map(|n| format!("{}#{}:{}", n.address, n.if_index, n.packet_count))
                .collect();
            tracing::debug!(
                orig = %orig.address,
                router = ?router.map(|r| r.address),
                packet_count = router.map_or(0, |r| r.packet_count),
                neighbors = %neighbors.join(" "),
                "originator"
            );
        }
        for gw in self.gateways.nodes() {
            tracing::debug!(
                gateway = %gw.orig,
                gwflags = gw.gwflags,
                state = ?gw.state,
                unavail_factor = gw.unavail_factor,
                current = self.gateways.current() == Some(gw.orig),
                "gateway"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{RecordingRouteTable, RecordingTunnel};
    use crate::protocol::COMPAT_VERSION;
    use crate::routing::originator::NeighborKey;

    fn a(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn header(orig: Ipv4Addr, seqno: u16, gwflags: u8) -> OgmHeader {
        OgmHeader {
            orig,
            flags: 0,
            ttl: 50,
            seqno,
            gwflags,
            version: COMPAT_VERSION,
            tq: 255,
            hna_len: 0,
        }
    }

    fn state(settings: RoutingSettings) -> (RoutingState, RecordingRouteTable, RecordingTunnel) {
        let routes = RecordingRouteTable::new();
        let tunnel = RecordingTunnel::new();
        let state = RoutingState::new(
            settings,
            vec![BatmanIf::new(0, "mesh0", a(1), 24)],
            Box::new(routes.clone()),
            Box::new(tunnel.clone()),
        );
        (state, routes, tunnel)
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let (mut state, _, _) = state(RoutingSettings::default());
        state.get_or_create(a(9)).last_seqno = 42;
        assert_eq!(state.get_or_create(a(9)).last_seqno, 42);
        assert_eq!(state.originators().len(), 1);
        assert_eq!(state.originator(a(9)).unwrap().bidirect_link.len(), 1);
    }

    #[test]
    fn test_registry_grows() {
        let (mut state, _, _) = state(RoutingSettings::default());
        for i in 0..=(ORIGINATOR_TABLE_SIZE * 4) as u32 {
            state.get_or_create(Ipv4Addr::from(0x0a01_0000 + i));
        }
        assert_eq!(state.originators().size(), ORIGINATOR_TABLE_SIZE * 2);
        assert_eq!(state.originators().len(), ORIGINATOR_TABLE_SIZE * 4 + 1);
    }

    #[test]
    fn test_update_installs_host_route() {
        let (mut state, routes, _) = state(RoutingSettings::default());
        state.update_originator(&header(a(9), 100, 0), &[], a(2), 0, 10);

        let orig = state.originator(a(9)).unwrap();
        assert_eq!(orig.router, Some(NeighborKey::new(a(2), 0)));
        assert_eq!(routes.installed_via(a(9), 32, 66), Some(Some(a(2))));
    }

    #[test]
    fn test_gateway_class_change_notifies_list() {
        let settings = RoutingSettings {
            routing_class: RoutingClass::Fast,
            ..RoutingSettings::default()
        };
        let (mut state, _, tunnel) = state(settings);

        state.update_originator(&header(a(9), 1, 0x21), &[], a(9), 0, 10);
        assert_eq!(state.gateways().nodes().len(), 1);

        state.maintain_gateway(11);
        assert_eq!(tunnel.active(), Some(a(9)));

        state.update_originator(&header(a(9), 2, 0), &[], a(9), 0, 20);
        assert_eq!(tunnel.active(), None);
        assert_eq!(state.gateways().current(), None);
    }

    #[test]
    fn test_static_routes_and_shutdown() {
        let settings = RoutingSettings {
            own_hna: vec![HnaEntry::new(Ipv4Addr::new(192, 168, 5, 0), 24)],
            ..RoutingSettings::default()
        };
        let (mut state, routes, _) = state(settings);
        state.start();
        // unreachable default, two throw routes for mesh0, one for the HNA
        assert_eq!(routes.installed_count(), 4);

        state.update_originator(&header(a(9), 1, 0), &[], a(2), 0, 10);
        assert_eq!(routes.installed_count(), 5);

        state.shutdown(20);
        assert_eq!(routes.installed_count(), 0);
        assert!(state.originators().is_empty());
    }
}
