//! Route installation
//!
//! Diffs an originator's desired next hop and HNA announcement against what
//! was installed before and hands only the difference to the
//! [`RouteTable`] collaborator. Failures are logged and counted; in-memory
//! state always follows the decision so the next advertisement cycle can
//! retry.

use super::originator::{NeighborKey, Originator};
use crate::network::{BatmanIf, RouteAction, RouteSpec, RouteTable};
use crate::protocol::{decode_hna, parse_hna, HnaEntry};
use serde::{Deserialize, Serialize};

/// Routing table numbers used for the different route classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTables {
    /// Announced networks (HNA)
    pub networks: u8,
    /// Originator host routes
    pub hosts: u8,
    /// Catch-all unreachable route
    pub unreachable: u8,
    /// Default route through the gateway tunnel
    pub tunnel: u8,
}

impl Default for RouteTables {
    fn default() -> Self {
        Self {
            networks: 65,
            hosts: 66,
            unreachable: 67,
            tunnel: 68,
        }
    }
}

/// Applies route decisions to a [`RouteTable`]
pub struct RouteInstaller {
    table: Box<dyn RouteTable>,
    tables: RouteTables,
    mutations: u64,
    failures: u64,
}

impl RouteInstaller {
    /// Installer writing to `table`.
    pub fn new(table: Box<dyn RouteTable>, tables: RouteTables) -> Self {
        Self {
            table,
            tables,
            mutations: 0,
            failures: 0,
        }
    }

    /// Table numbers in use.
    pub fn tables(&self) -> RouteTables {
        self.tables
    }

    /// Route mutations issued so far.
    pub fn mutations(&self) -> u64 {
        self.mutations
    }

    /// Route mutations the collaborator rejected.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn apply(&mut self, route: &RouteSpec, action: RouteAction) {
        self.mutations += 1;
        match self.table.add_del_route(route, action) {
            Ok(()) => tracing::debug!(%action, route = %route, "route updated"),
            Err(e) => {
                self.failures += 1;
                tracing::warn!(%action, route = %route, error = %e, "route mutation failed");
            },
        }
    }

    fn host_route(&self, orig: &Originator, via: NeighborKey) -> RouteSpec {
        RouteSpec::unicast(orig.address, 32, via.address, via.if_index, self.tables.hosts)
    }

    fn hna_route(&self, entry: HnaEntry, via: NeighborKey) -> RouteSpec {
        RouteSpec::unicast(
            entry.network,
            entry.prefix_len,
            via.address,
            via.if_index,
            self.tables.networks,
        )
    }

    fn add_hna(&mut self, orig: &Originator, raw: &[u8], via: NeighborKey) {
        for entry in decode_hna(raw, orig.address) {
            let route = self.hna_route(entry, via);
            self.apply(&route, RouteAction::Add);
        }
    }

    fn del_hna(&mut self, raw: &[u8], via: NeighborKey) {
        for entry in parse_hna(raw).filter(HnaEntry::is_valid) {
            let route = self.hna_route(entry, via);
            self.apply(&route, RouteAction::Delete);
        }
    }

    /// Bring the installed routes for `orig` in line with `candidate` and
    /// `hna`.
    ///
    /// - no candidate: drop the host route and HNA routes, clear the router
    /// - new router: move host route and HNA routes to the new next hop
    /// - same router, different HNA: replace the HNA routes only
    /// - nothing changed: no collaborator calls
    ///
    /// # Panics
    ///
    /// Panics if `candidate` is not one of `orig`'s neighbors.
    pub fn update_routes(&mut self, orig: &mut Originator, candidate: Option<NeighborKey>, hna: &[u8]) {
        if let Some(key) = candidate {
            if orig.neighbor(key).is_none() {
                panic!(
                    "originator {}: route candidate {} on interface {} is not a neighbor",
                    orig.address, key.address, key.if_index
                );
            }
        }

        match candidate {
            None => {
                let Some(old) = orig.router else {
                    return;
                };
                tracing::info!(orig = %orig.address, router = %old.address, "deleting route");
                let old_hna = std::mem::take(&mut orig.hna);
                self.del_hna(&old_hna, old);
                let route = self.host_route(orig, old);
                self.apply(&route, RouteAction::Delete);
                orig.router = None;
            },
            Some(new) if orig.router != Some(new) => {
                match orig.router {
                    Some(old) => {
                        tracing::info!(
                            orig = %orig.address,
                            from = %old.address,
                            to = %new.address,
                            if_index = new.if_index,
                            "route changed"
                        );
                        let old_hna = std::mem::take(&mut orig.hna);
                        self.del_hna(&old_hna, old);
                        let route = self.host_route(orig, old);
                        self.apply(&route, RouteAction::Delete);
                    },
                    None => tracing::info!(
                        orig = %orig.address,
                        via = %new.address,
                        if_index = new.if_index,
                        "adding route"
                    ),
                }
                let route = self.host_route(orig, new);
                self.apply(&route, RouteAction::Add);
                self.add_hna(orig, hna, new);
                orig.hna = hna.to_vec();
                orig.router = Some(new);
            },
            Some(router) => {
                if orig.hna != hna {
                    tracing::debug!(orig = %orig.address, "announced networks changed");
                    let old_hna = std::mem::take(&mut orig.hna);
                    self.del_hna(&old_hna, router);
                    self.add_hna(orig, hna, router);
                    orig.hna = hna.to_vec();
                }
            },
        }
    }

    fn static_routes(&self, interfaces: &[BatmanIf], own_hna: &[HnaEntry]) -> Vec<RouteSpec> {
        let mut routes = vec![RouteSpec::unreachable_default(self.tables.unreachable)];
        for iface in interfaces {
            routes.push(RouteSpec::throw(iface.network(), iface.prefix_len, self.tables.hosts));
            routes.push(RouteSpec::throw(iface.network(), iface.prefix_len, self.tables.networks));
        }
        for entry in own_hna.iter().filter(|entry| entry.is_valid()) {
            routes.push(RouteSpec::throw(entry.network, entry.prefix_len, self.tables.networks));
        }
        routes
    }

    /// Install the routes that exist for the daemon's whole lifetime: the
    /// unreachable default and throw routes for local networks.
    pub fn install_static_routes(&mut self, interfaces: &[BatmanIf], own_hna: &[HnaEntry]) {
        for route in self.static_routes(interfaces, own_hna) {
            self.apply(&route, RouteAction::Add);
        }
    }

    /// Remove what [`install_static_routes`](Self::install_static_routes)
    /// added.
    pub fn remove_static_routes(&mut self, interfaces: &[BatmanIf], own_hna: &[HnaEntry]) {
        for route in self.static_routes(interfaces, own_hna) {
            self.apply(&route, RouteAction::Delete);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{RecordingRouteTable, RouteType};
    use crate::protocol::{Ogm, OgmHeader, COMPAT_VERSION};
    use std::net::Ipv4Addr;

    fn a(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn hna(entries: &[(Ipv4Addr, u8)]) -> Vec<u8> {
        let header = OgmHeader {
            orig: a(100),
            flags: 0,
            ttl: 50,
            seqno: 1,
            gwflags: 0,
            version: COMPAT_VERSION,
            tq: 255,
            hna_len: 0,
        };
        let entries: Vec<_> = entries.iter().map(|&(n, p)| HnaEntry::new(n, p)).collect();
        Ogm::new(header, &entries).hna_bytes().to_vec()
    }

    fn originator_with_neighbors(neighbors: &[NeighborKey]) -> Originator {
        let mut orig = Originator::new(a(100), 2);
        let header = OgmHeader {
            orig: a(100),
            flags: 0,
            ttl: 50,
            seqno: 1,
            gwflags: 0,
            version: COMPAT_VERSION,
            tq: 255,
            hna_len: 0,
        };
        for key in neighbors {
            orig.record_advertisement(&header, key.address, key.if_index, 0);
        }
        orig
    }

    fn installer() -> (RouteInstaller, RecordingRouteTable) {
        let routes = RecordingRouteTable::new();
        (
            RouteInstaller::new(Box::new(routes.clone()), RouteTables::default()),
            routes,
        )
    }

    #[test]
    fn test_first_route_installs_host_and_hna() {
        let (mut installer, routes) = installer();
        let n1 = NeighborKey::new(a(1), 0);
        let mut orig = originator_with_neighbors(&[n1]);
        let announced = hna(&[(Ipv4Addr::new(192, 168, 7, 0), 24)]);

        installer.update_routes(&mut orig, Some(n1), &announced);

        assert_eq!(orig.router, Some(n1));
        assert_eq!(routes.installed_via(a(100), 32, 66), Some(Some(a(1))));
        assert_eq!(
            routes.installed_via(Ipv4Addr::new(192, 168, 7, 0), 24, 65),
            Some(Some(a(1)))
        );
        assert_eq!(routes.mutation_count(), 2);
    }

    #[test]
    fn test_identical_update_is_noop() {
        let (mut installer, routes) = installer();
        let n1 = NeighborKey::new(a(1), 0);
        let mut orig = originator_with_neighbors(&[n1]);
        let announced = hna(&[(Ipv4Addr::new(192, 168, 7, 0), 24)]);

        installer.update_routes(&mut orig, Some(n1), &announced);
        let before = routes.mutation_count();
        installer.update_routes(&mut orig, Some(n1), &announced);

        assert_eq!(routes.mutation_count(), before);
        assert_eq!(installer.mutations(), before as u64);
    }

    #[test]
    fn test_router_change_moves_routes() {
        let (mut installer, routes) = installer();
        let n1 = NeighborKey::new(a(1), 0);
        let n2 = NeighborKey::new(a(2), 1);
        let mut orig = originator_with_neighbors(&[n1, n2]);
        let announced = hna(&[(Ipv4Addr::new(172, 16, 0, 0), 12)]);

        installer.update_routes(&mut orig, Some(n1), &announced);
        routes.clear_mutations();
        installer.update_routes(&mut orig, Some(n2), &announced);

        let mutations = routes.mutations();
        assert_eq!(mutations.len(), 4);
        assert_eq!(mutations[0].0, RouteAction::Delete);
        assert_eq!(mutations[1].0, RouteAction::Delete);
        assert_eq!(mutations[2].0, RouteAction::Add);
        assert_eq!(mutations[2].1.destination, a(100));
        assert_eq!(mutations[2].1.if_index, Some(1));
        assert_eq!(mutations[3].0, RouteAction::Add);
        assert_eq!(routes.installed_via(a(100), 32, 66), Some(Some(a(2))));
        assert_eq!(routes.installed_count(), 2);
    }

    #[test]
    fn test_hna_change_keeps_host_route() {
        let (mut installer, routes) = installer();
        let n1 = NeighborKey::new(a(1), 0);
        let mut orig = originator_with_neighbors(&[n1]);

        installer.update_routes(&mut orig, Some(n1), &hna(&[(Ipv4Addr::new(10, 1, 0, 0), 16)]));
        routes.clear_mutations();
        installer.update_routes(&mut orig, Some(n1), &hna(&[(Ipv4Addr::new(10, 2, 0, 0), 16)]));

        let mutations = routes.mutations();
        assert_eq!(mutations.len(), 2);
        assert!(mutations.iter().all(|(_, route)| route.table == 65));
        assert_eq!(routes.installed_via(Ipv4Addr::new(10, 1, 0, 0), 16, 65), None);
        assert!(routes.installed_via(Ipv4Addr::new(10, 2, 0, 0), 16, 65).is_some());
    }

    #[test]
    fn test_no_candidate_removes_everything() {
        let (mut installer, routes) = installer();
        let n1 = NeighborKey::new(a(1), 0);
        let mut orig = originator_with_neighbors(&[n1]);

        installer.update_routes(&mut orig, Some(n1), &hna(&[(Ipv4Addr::new(10, 1, 0, 0), 16)]));
        installer.update_routes(&mut orig, None, &[]);

        assert_eq!(orig.router, None);
        assert!(orig.hna.is_empty());
        assert_eq!(routes.installed_count(), 0);

        // and again: nothing left to delete
        let before = routes.mutation_count();
        installer.update_routes(&mut orig, None, &[]);
        assert_eq!(routes.mutation_count(), before);
    }

    #[test]
    fn test_failures_do_not_block_state() {
        let (mut installer, routes) = installer();
        let n1 = NeighborKey::new(a(1), 0);
        let mut orig = originator_with_neighbors(&[n1]);
        routes.set_failing(true);

        installer.update_routes(&mut orig, Some(n1), &[]);

        assert_eq!(orig.router, Some(n1));
        assert_eq!(installer.failures(), 1);
    }

    #[test]
    #[should_panic(expected = "is not a neighbor")]
    fn test_unknown_candidate_panics() {
        let (mut installer, _) = installer();
        let mut orig = originator_with_neighbors(&[NeighborKey::new(a(1), 0)]);
        installer.update_routes(&mut orig, Some(NeighborKey::new(a(9), 0)), &[]);
    }

    #[test]
    fn test_static_routes_round_trip() {
        let (mut installer, routes) = installer();
        let interfaces = vec![
            BatmanIf::new(0, "wlan0", Ipv4Addr::new(10, 10, 0, 1), 16),
            BatmanIf::new(1, "eth0", Ipv4Addr::new(192, 168, 1, 1), 24),
        ];
        let own = vec![HnaEntry::new(Ipv4Addr::new(172, 20, 0, 0), 16)];

        installer.install_static_routes(&interfaces, &own);
        assert_eq!(routes.installed_count(), 6);
        let mutations = routes.mutations();
        assert_eq!(mutations[0].1.route_type, RouteType::Unreachable);
        assert_eq!(mutations[0].1.table, 67);

        installer.remove_static_routes(&interfaces, &own);
        assert_eq!(routes.installed_count(), 0);
    }
}
