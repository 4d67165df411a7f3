//! Purge sweep
//!
//! Drops originators and neighbor records that have been silent for longer
//! than the purge timeout, frees retired gateway entries, and re-enables
//! interfaces that were deactivated after a send failure.

use super::originator::{NeighborNode, Originator};
use super::routes::RouteInstaller;
use super::state::RoutingState;
use crate::collections::Cursor;
use std::net::Ipv4Addr;

/// Drop `orig`'s expired neighbor records, moving its route away from them
/// first. Returns the number of records dropped.
fn purge_neighbors(orig: &mut Originator, routes: &mut RouteInstaller, timeout: u64, now: u64) -> usize {
    let expired = |node: &NeighborNode| node.last_valid + timeout < now;
    if !orig.neighbors.iter().any(|node| expired(node)) {
        return 0;
    }

    if orig.router_node().map_or(false, |router| expired(router)) {
        tracing::debug!(orig = %orig.address, "router timed out");
        routes.update_routes(orig, None, &[]);
    }

    let before = orig.neighbors.len();
    orig.neighbors.retain(|node| !expired(node));
    let dropped = before - orig.neighbors.len();
    tracing::debug!(orig = %orig.address, dropped, "neighbors timed out");

    let best = orig.best_neighbor();
    let reroute = match (orig.router, best) {
        (None, Some(_)) => true,
        (Some(router), Some(best)) => {
            let count = |key| orig.neighbor(key).map_or(0, |node| node.packet_count);
            best != router && count(best) > count(router)
        },
        (_, None) => false,
    };
    if reroute {
        let hna = orig.announced.clone();
        routes.update_routes(orig, best, &hna);
    }
    dropped
}

impl RoutingState {
    /// Run one purge sweep at `now`. Returns the number of originators
    /// removed.
    pub fn purge(&mut self, now: u64) -> usize {
        let timeout = self.settings.purge_timeout_ms;
        let mut removed = 0;
        let mut gateways_changed = false;
        let mut cursor: Option<Cursor<Ipv4Addr>> = None;

        while let Some(at) = self.originators.next(cursor.as_ref()) {
            let Some(orig) = self.originators.get_at_mut(&at) else {
                panic!("originator iterator desynchronized at {}", at.key());
            };

            if orig.last_valid + timeout < now {
                tracing::info!(
                    orig = %orig.address,
                    last_valid = orig.last_valid,
                    "originator timed out"
                );
                if orig.gwflags != 0 {
                    gateways_changed |= self.gateways.retire(orig.address, now);
                }
                self.routes.update_routes(orig, None, &[]);
                self.originators.remove_at(&at);
                removed += 1;
            } else {
                purge_neighbors(orig, &mut self.routes, timeout, now);
            }
            cursor = Some(at);
        }

        let freed = self.gateways.purge(now, timeout);
        if gateways_changed || freed > 0 {
            self.gateways.choose(&self.originators, now);
        }

        for iface in self.interfaces.iter_mut().filter(|iface| !iface.active) {
            tracing::info!(interface = %iface.name, "reactivating interface");
            iface.active = true;
        }

        removed
    }
}
