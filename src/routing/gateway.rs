//! Internet gateway selection
//!
//! Originators advertising a non-zero gateway class are tracked in a
//! [`GatewayList`]. When gateway routing is enabled the list picks one of them
//! and keeps a tunnel session to it through the [`TunnelControl`]
//! collaborator.
//!
//! Entries are never freed straight away. A gateway that stops advertising
//! (or whose originator is purged) moves to [`GatewayState::PendingRemoval`];
//! selection skips it, and only a later purge sweep frees it.

use super::originator::Originator;
use crate::collections::HashTable;
use crate::network::TunnelControl;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Default backoff base after a gateway failure, in milliseconds
pub const DEFAULT_GW_PENALTY_MS: u64 = 30_000;

/// Gateway selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingClass {
    /// Do not use gateways
    #[default]
    Disabled,
    /// Maximize link quality times advertised bandwidth class
    Fast,
    /// Same scoring as [`RoutingClass::Fast`]; no separate stability metric
    /// exists
    Stable,
    /// Maximize link quality alone
    BestStatistic,
}

/// Lifecycle of a gateway entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    /// Eligible for selection
    Active,
    /// No longer eligible, freed by the purge sweep
    PendingRemoval {
        /// When the entry was retired
        since: u64,
    },
}

/// One known gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayNode {
    /// Address of the gateway's originator
    pub orig: Ipv4Addr,
    /// Advertised gateway class
    pub gwflags: u8,
    /// Lifecycle state
    pub state: GatewayState,
    /// Number of failures; the backoff grows with its square
    pub unavail_factor: u32,
    /// Time of the last failure
    pub last_failure: u64,
}

impl GatewayNode {
    fn new(orig: Ipv4Addr, gwflags: u8) -> Self {
        Self {
            orig,
            gwflags,
            state: GatewayState::Active,
            unavail_factor: 0,
            last_failure: 0,
        }
    }

    /// Whether the backoff after the last failure is still running.
    pub fn in_backoff(&self, now: u64, penalty_ms: u64) -> bool {
        let factor = self.unavail_factor as u64;
        factor * factor * penalty_ms + self.last_failure > now
    }
}

/// Decode a gateway class byte into (download, upload) in kbit/s.
///
/// Bit layout `dddddsuuu`: the top bit plus the next four select a
/// download magnitude, the low three bits an upload fraction.
pub fn gateway_speeds(gwflags: u8) -> (u32, u32) {
    let sbit = ((gwflags & 0x80) >> 7) as u32;
    let dpart = ((gwflags & 0x78) >> 3) as u32;
    let upart = (gwflags & 0x07) as u32;

    let down = 32 * (sbit + 2) * (1u32 << dpart);
    let up = ((upart + 1) * down) / 8;
    (down, up)
}

/// Gateway bookkeeping and selection
pub struct GatewayList {
    nodes: Vec<GatewayNode>,
    current: Option<Ipv4Addr>,
    tunnel: Box<dyn TunnelControl>,
    routing_class: RoutingClass,
    preferred: Option<Ipv4Addr>,
    penalty_ms: u64,
}

impl GatewayList {
    /// Empty list driving `tunnel`.
    pub fn new(
        tunnel: Box<dyn TunnelControl>,
        routing_class: RoutingClass,
        preferred: Option<Ipv4Addr>,
        penalty_ms: u64,
    ) -> Self {
        Self {
            nodes: Vec::new(),
            current: None,
            tunnel,
            routing_class,
            preferred,
            penalty_ms,
        }
    }

    /// Selection policy in use.
    pub fn routing_class(&self) -> RoutingClass {
        self.routing_class
    }

    /// Gateway of the running tunnel session.
    pub fn current(&self) -> Option<Ipv4Addr> {
        self.current
    }

    /// All entries, including those pending removal.
    pub fn nodes(&self) -> &[GatewayNode] {
        &self.nodes
    }

    /// Entry for `orig`.
    pub fn get(&self, orig: Ipv4Addr) -> Option<&GatewayNode> {
        self.nodes.iter().find(|node| node.orig == orig)
    }

    fn get_mut(&mut self, orig: Ipv4Addr) -> Option<&mut GatewayNode> {
        self.nodes.iter_mut().find(|node| node.orig == orig)
    }

    /// React to an originator's gateway class changing to `gwflags`.
    ///
    /// Non-zero classes create or revive the entry; zero retires it.
    pub fn update(&mut self, orig: Ipv4Addr, gwflags: u8, now: u64) {
        if gwflags == 0 {
            self.retire(orig, now);
            return;
        }

        let (down, up) = gateway_speeds(gwflags);
        match self.get_mut(orig) {
            Some(node) => {
                node.gwflags = gwflags;
                if node.state != GatewayState::Active {
                    tracing::info!(gateway = %orig, "gateway announcement restored");
                    node.state = GatewayState::Active;
                }
            },
            None => {
                tracing::info!(
                    gateway = %orig,
                    gwflags,
                    down_kbit = down,
                    up_kbit = up,
                    "found new gateway"
                );
                self.nodes.push(GatewayNode::new(orig, gwflags));
            },
        }
    }

    /// Mark `orig`'s entry for removal and leave its tunnel if it is the
    /// current gateway. Returns whether an active entry was retired.
    pub fn retire(&mut self, orig: Ipv4Addr, now: u64) -> bool {
        let Some(node) = self.get_mut(orig) else {
            return false;
        };
        if node.state != GatewayState::Active {
            return false;
        }
        node.state = GatewayState::PendingRemoval { since: now };
        tracing::info!(gateway = %orig, "gateway retired");

        if self.current == Some(orig) {
            self.tunnel.stop();
            self.current = None;
        }
        true
    }

    /// Free entries that have been pending removal for more than twice the
    /// purge timeout. Returns the number freed.
    pub fn purge(&mut self, now: u64, purge_timeout: u64) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|node| match node.state {
            GatewayState::PendingRemoval { since } if since + 2 * purge_timeout < now => {
                tracing::debug!(gateway = %node.orig, "freeing gateway entry");
                false
            },
            _ => true,
        });
        before - self.nodes.len()
    }

    /// The tunnel to `gateway` failed: back off from it and drop the session.
    pub fn report_failure(&mut self, gateway: Ipv4Addr, now: u64) {
        let Some(node) = self.get_mut(gateway) else {
            return;
        };
        node.unavail_factor += 1;
        node.last_failure = now;
        tracing::warn!(
            %gateway,
            unavail_factor = node.unavail_factor,
            "gateway failure reported"
        );

        if self.current == Some(gateway) {
            self.tunnel.stop();
            self.current = None;
        }
    }

    /// Pick the best eligible gateway and move the tunnel to it if it
    /// differs from the current one.
    ///
    /// Eligible means active, outside its failure backoff, and reachable
    /// through an installed router. A reachable preferred gateway wins
    /// outright.
    pub fn choose(&mut self, originators: &HashTable<Ipv4Addr, Originator>, now: u64) {
        if self.routing_class == RoutingClass::Disabled {
            return;
        }

        let mut best: Option<(Ipv4Addr, u8)> = None;
        let mut max_score = 0u64;
        let mut max_packets = 0u32;

        for node in &self.nodes {
            if node.state != GatewayState::Active {
                continue;
            }
            if node.in_backoff(now, self.penalty_ms) {
                continue;
            }
            let Some(orig) = originators.find(&node.orig) else {
                continue;
            };
            let Some(router) = orig.router_node() else {
                continue;
            };

            let packets = router.packet_count;
            let better = match self.routing_class {
                RoutingClass::Fast | RoutingClass::Stable => {
                    let score = packets as u64 * node.gwflags as u64;
                    // Packet count only breaks ties against the current best.
                    let better = score > max_score || (score == max_score && packets > max_packets);
                    if better {
                        max_score = score;
                    }
                    better
                },
                RoutingClass::BestStatistic => packets > max_packets,
                RoutingClass::Disabled => false,
            };
            if better {
                max_packets = packets;
                best = Some((node.orig, node.gwflags));
            }

            if self.preferred == Some(node.orig) {
                best = Some((node.orig, node.gwflags));
                break;
            }
        }

        let chosen = best.map(|(orig, _)| orig);
        if chosen == self.current {
            return;
        }

        if let Some(old) = self.current.take() {
            tracing::info!(gateway = %old, "leaving gateway");
            self.tunnel.stop();
        }

        let Some((gateway, gwflags)) = best else {
            return;
        };
        match self.tunnel.start(gateway, gwflags) {
            Ok(()) => {
                tracing::info!(%gateway, gwflags, "using gateway");
                self.current = Some(gateway);
                if let Some(node) = self.get_mut(gateway) {
                    node.unavail_factor = 0;
                }
            },
            Err(e) => {
                tracing::warn!(%gateway, error = %e, "cannot reach gateway");
                if let Some(node) = self.get_mut(gateway) {
                    node.unavail_factor += 1;
                    node.last_failure = now;
                }
            },
        }
    }

    /// Tear the tunnel down for good.
    pub fn shutdown(&mut self) {
        if self.current.take().is_some() {
            self.tunnel.stop();
        }
    }
}
