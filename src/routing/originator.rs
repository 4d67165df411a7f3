//! Originator and neighbor records
//!
//! An [`Originator`] exists for every address that advertised itself and has
//! not been purged. It owns one [`NeighborNode`] per (neighbor address,
//! incoming interface) pair over which its OGMs arrived. The neighbor's
//! sliding window counts how many of the originator's last sequence numbers
//! came in through that neighbor; that count is the link-quality score used
//! to pick the router (best next hop).

use crate::collections::bitfield::{seq_diff, LinkWindow};
use crate::collections::ring::QualityRing;
use crate::protocol::{OgmHeader, BIDIRECT_TIMEOUT};
use std::net::Ipv4Addr;

/// Identifies a neighbor record within its originator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NeighborKey {
    /// Neighbor address
    pub address: Ipv4Addr,
    /// Local interface the neighbor was heard on
    pub if_index: usize,
}

impl NeighborKey {
    /// Key for `address` heard on `if_index`.
    pub fn new(address: Ipv4Addr, if_index: usize) -> Self {
        Self { address, if_index }
    }
}

/// Reception statistics for one (originator, neighbor, interface) triple
#[derive(Debug, Clone)]
pub struct NeighborNode {
    /// Neighbor address
    pub address: Ipv4Addr,
    /// Incoming interface
    pub if_index: usize,
    /// Which of the originator's recent sequence numbers arrived this way
    pub seq_bits: LinkWindow,
    /// Popcount of `seq_bits`
    pub packet_count: u32,
    /// TTL of the newest OGM received this way
    pub last_ttl: u8,
    /// Time of the last OGM received this way
    pub last_valid: u64,
    /// Recent TQ samples
    pub tq_ring: QualityRing,
    /// Mean of `tq_ring`
    pub tq_avg: u8,
}

impl NeighborNode {
    fn new(key: NeighborKey) -> Self {
        Self {
            address: key.address,
            if_index: key.if_index,
            seq_bits: LinkWindow::new(),
            packet_count: 0,
            last_ttl: 0,
            last_valid: 0,
            tq_ring: QualityRing::new(),
            tq_avg: 0,
        }
    }

    /// This record's key.
    pub fn key(&self) -> NeighborKey {
        NeighborKey::new(self.address, self.if_index)
    }

    fn record(&mut self, diff: i32, mark: bool) -> bool {
        let is_new = self.seq_bits.record(diff, mark);
        self.packet_count = self.seq_bits.popcount();
        is_new
    }
}

/// Everything known about one advertising node
#[derive(Debug, Clone)]
pub struct Originator {
    /// Originator address
    pub address: Ipv4Addr,
    /// Newest sequence number accepted
    pub last_seqno: u16,
    /// Time of the last accepted OGM
    pub last_valid: u64,
    /// Advertised gateway class
    pub gwflags: u8,
    /// HNA trailer the current host route's networks were installed from
    pub hna: Vec<u8>,
    /// HNA trailer of the newest accepted OGM
    pub announced: Vec<u8>,
    /// Installed next hop; always one of `neighbors`
    pub router: Option<NeighborKey>,
    /// Neighbor records, in creation order
    pub neighbors: Vec<NeighborNode>,
    /// Per local interface: which of our own OGMs this node echoed back
    pub bcast_own: Vec<LinkWindow>,
    /// Popcounts of `bcast_own`
    pub bcast_own_sum: Vec<u32>,
    /// Per local interface: newest own sequence number echoed with the
    /// direct-link flag
    pub bidirect_link: Vec<Option<u16>>,
    seen_seqno: bool,
}

impl Originator {
    /// Fresh record for `address` on a node with `num_ifs` interfaces.
    pub fn new(address: Ipv4Addr, num_ifs: usize) -> Self {
        Self {
            address,
            last_seqno: 0,
            last_valid: 0,
            gwflags: 0,
            hna: Vec::new(),
            announced: Vec::new(),
            router: None,
            neighbors: Vec::new(),
            bcast_own: vec![LinkWindow::new(); num_ifs],
            bcast_own_sum: vec![0; num_ifs],
            bidirect_link: vec![None; num_ifs],
            seen_seqno: false,
        }
    }

    /// Neighbor record by key.
    pub fn neighbor(&self, key: NeighborKey) -> Option<&NeighborNode> {
        self.neighbors.iter().find(|n| n.key() == key)
    }

    /// The installed router's record.
    ///
    /// # Panics
    ///
    /// Panics if `router` names a neighbor that is not in the list.
    pub fn router_node(&self) -> Option<&NeighborNode> {
        let key = self.router?;
        match self.neighbor(key) {
            Some(node) => Some(node),
            None => panic!(
                "originator {}: router {} on interface {} missing from neighbor list",
                self.address, key.address, key.if_index
            ),
        }
    }

    /// Packet count of the installed router, zero without one.
    pub fn router_packet_count(&self) -> u32 {
        self.router_node().map_or(0, |node| node.packet_count)
    }

    /// Whether `seqno` was already received through any neighbor.
    pub fn is_duplicate(&self, seqno: u16) -> bool {
        self.neighbors
            .iter()
            .any(|n| n.seq_bits.bit_status(self.last_seqno, seqno))
    }

    /// Whether this node recently echoed our OGM on `if_index`, whose next
    /// own sequence number is `out_seqno`.
    pub fn is_bidirectional(&self, if_index: usize, out_seqno: u16) -> bool {
        match self.bidirect_link.get(if_index).copied().flatten() {
            Some(echoed) => out_seqno.wrapping_sub(echoed) <= BIDIRECT_TIMEOUT,
            None => false,
        }
    }

    /// Account for one of our own OGMs echoed back by this node.
    ///
    /// Only a direct-link echo of the OGM sent in the last cycle
    /// (`out_seqno - 2`) proves the link works in both directions.
    pub fn record_echo(&mut self, if_index: usize, out_seqno: u16, echoed_seqno: u16, direct_link: bool) {
        if if_index >= self.bidirect_link.len() || !direct_link {
            return;
        }
        let expected = out_seqno.wrapping_sub(2);
        if echoed_seqno != expected {
            tracing::trace!(
                neighbor = %self.address,
                echoed_seqno,
                expected,
                "stale echo of own OGM"
            );
            return;
        }
        self.bidirect_link[if_index] = Some(echoed_seqno);
        self.bcast_own[if_index].mark(0);
        self.bcast_own_sum[if_index] = self.bcast_own[if_index].popcount();
    }

    /// Slide the own-broadcast window of `if_index` after we sent an OGM.
    pub fn shift_bcast_own(&mut self, if_index: usize) {
        if let Some(window) = self.bcast_own.get_mut(if_index) {
            window.shift(1);
            self.bcast_own_sum[if_index] = window.popcount();
        }
    }

    fn consider(best: &mut Option<(NeighborKey, u32)>, router: Option<NeighborKey>, node: &NeighborNode) {
        let max = best.map_or(0, |(_, count)| count);
        if node.packet_count > max || (node.packet_count == max && router == Some(node.key())) {
            *best = Some((node.key(), node.packet_count));
        }
    }

    /// Neighbor with the highest packet count, preferring the installed
    /// router on ties.
    pub fn best_neighbor(&self) -> Option<NeighborKey> {
        let mut best = None;
        for node in &self.neighbors {
            Self::consider(&mut best, self.router, node);
        }
        best.map(|(key, _)| key)
    }

    /// Feed an accepted OGM into the neighbor windows.
    ///
    /// Every other neighbor's window is moved to the new reference without
    /// marking, so all counts stay comparable. The matching neighbor (created
    /// if needed) gets the sequence number marked. Returns the best neighbor
    /// after the update.
    pub fn record_advertisement(
        &mut self,
        header: &OgmHeader,
        neighbor: Ipv4Addr,
        if_index: usize,
        now: u64,
    ) -> Option<NeighborKey> {
        let diff = if self.seen_seqno {
            seq_diff(header.seqno, self.last_seqno)
        } else {
            // Nothing to compare against yet: force a fresh window.
            LinkWindow::RANGE + 1
        };
        let key = NeighborKey::new(neighbor, if_index);
        let router = self.router;
        let mut best = None;

        for node in self.neighbors.iter_mut().filter(|n| n.key() != key) {
            node.record(diff, false);
            Self::consider(&mut best, router, node);
        }

        let index = match self.neighbors.iter().position(|n| n.key() == key) {
            Some(index) => index,
            None => {
                tracing::debug!(orig = %self.address, %neighbor, if_index, "creating neighbor");
                self.neighbors.push(NeighborNode::new(key));
                self.neighbors.len() - 1
            },
        };

        let node = &mut self.neighbors[index];
        if node.record(diff, true) {
            node.last_ttl = header.ttl;
            node.tq_ring.push(header.tq);
            node.tq_avg = node.tq_ring.average();
            self.last_seqno = header.seqno;
            self.seen_seqno = true;
        }
        node.last_valid = now;
        Self::consider(&mut best, router, node);

        self.last_valid = now;
        best.map(|(key, _)| key)
    }
}
