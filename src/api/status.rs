//! Diagnostic snapshots
//!
//! Plain serializable copies of the originator table and gateway list, taken
//! under the state lock and handed to whoever asked (status output, tests,
//! a control socket living outside this crate).

use crate::protocol::{parse_hna, HnaEntry};
use crate::routing::{gateway_speeds, GatewayState, RoutingState};
use serde::Serialize;
use std::net::Ipv4Addr;

/// One neighbor record of an originator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborStatus {
    /// Neighbor address
    pub address: Ipv4Addr,
    /// Incoming interface
    pub if_index: usize,
    /// Sequence numbers received this way within the window
    pub packet_count: u32,
    /// Smoothed TQ
    pub tq_avg: u8,
    /// Last time an OGM arrived this way
    pub last_valid: u64,
}

/// One originator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginatorStatus {
    /// Originator address
    pub address: Ipv4Addr,
    /// Installed next hop
    pub router: Option<Ipv4Addr>,
    /// Interface of the installed next hop
    pub router_if: Option<usize>,
    /// Packet count of the installed next hop
    pub packet_count: u32,
    /// Newest accepted sequence number
    pub last_seqno: u16,
    /// Last time an OGM was accepted
    pub last_valid: u64,
    /// Advertised gateway class
    pub gwflags: u8,
    /// Networks currently routed through this originator
    pub announced: Vec<HnaEntry>,
    /// All neighbor records
    pub neighbors: Vec<NeighborStatus>,
}

/// One gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    /// Gateway originator address
    pub address: Ipv4Addr,
    /// Advertised class
    pub gwflags: u8,
    /// Decoded download speed, kbit/s
    pub down_kbit: u32,
    /// Decoded upload speed, kbit/s
    pub up_kbit: u32,
    /// Failure count driving the backoff
    pub unavail_factor: u32,
    /// Retired, waiting to be freed
    pub pending_removal: bool,
    /// Tunnel currently runs to this gateway
    pub current: bool,
}

/// Snapshot of every originator, ordered by address.
pub fn originator_table(state: &RoutingState) -> Vec<OriginatorStatus> {
    let mut table: Vec<OriginatorStatus> = state
        .originators()
        .values()
        .map(|orig| {
            let router = orig.router_node();
            OriginatorStatus {
                address: orig.address,
                router: router.map(|node| node.address),
                router_if: router.map(|node| node.if_index),
                packet_count: router.map_or(0, |node| node.packet_count),
                last_seqno: orig.last_seqno,
                last_valid: orig.last_valid,
                gwflags: orig.gwflags,
                announced: parse_hna(&orig.hna).filter(HnaEntry::is_valid).collect(),
                neighbors: orig
                    .neighbors
                    .iter()
                    .map(|node| NeighborStatus {
                        address: node.address,
                        if_index: node.if_index,
                        packet_count: node.packet_count,
                        tq_avg: node.tq_avg,
                        last_valid: node.last_valid,
                    })
                    .collect(),
            }
        })
        .collect();
    table.sort_by_key(|status| status.address);
    table
}

/// Snapshot of the gateway list.
pub fn gateway_list(state: &RoutingState) -> Vec<GatewayStatus> {
    let current = state.gateways().current();
    state
        .gateways()
        .nodes()
        .iter()
        .map(|node| {
            let (down_kbit, up_kbit) = gateway_speeds(node.gwflags);
            GatewayStatus {
                address: node.orig,
                gwflags: node.gwflags,
                down_kbit,
                up_kbit,
                unavail_factor: node.unavail_factor,
                pending_removal: matches!(node.state, GatewayState::PendingRemoval { .. }),
                current: current == Some(node.orig),
            }
        })
        .collect()
}
