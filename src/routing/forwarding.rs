//! OGM forwarding and aggregation
//!
//! Every outgoing transmission, own or forwarded, passes through the
//! [`ForwardQueue`]: a list of [`ForwardPacket`]s kept sorted by send time.
//! Forwarded records that are not yet due may be folded into an existing
//! entry (aggregation), up to the configured byte ceiling.
//!
//! An entry goes out either on a single interface (direct-link or
//! unidirectional replies, and own OGMs of secondary interfaces) or on every
//! active interface. In the second case the direct-link flag of each record
//! is only kept on the interface the record came in on.

use super::state::RoutingState;
use crate::network::{BatmanIf, JitterSource, Transport};
use crate::protocol::{
    encode_aggregate, flags, HnaEntry, Ogm, OgmHeader, COMPAT_VERSION, TQ_MAX_VALUE,
};
use std::collections::VecDeque;
use std::net::Ipv4Addr;

/// Records per aggregate; one bit each in the direct-link mask
pub const MAX_AGGREGATION_PACKETS: usize = 64;

/// How a received OGM should be rebroadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForwardDecision {
    /// Set the direct-link flag
    pub direct_link: bool,
    /// Set the unidirectional flag
    pub unidirectional: bool,
}

/// Scale `tq` down by `penalty` out of [`TQ_MAX_VALUE`].
pub fn apply_hop_penalty(tq: u8, penalty: u8) -> u8 {
    let max = TQ_MAX_VALUE as u32;
    ((tq as u32 * (max - penalty as u32)) / max) as u8
}

/// One scheduled transmission
#[derive(Debug, Clone)]
pub struct ForwardPacket {
    /// When to send
    pub send_time: u64,
    /// Interface the first record belongs to (incoming interface for
    /// forwards, sending interface for own OGMs)
    pub if_index: usize,
    /// Whether this is one of our own OGMs
    pub own: bool,
    /// Records, first one is the base
    pub records: Vec<Ogm>,
    /// Total wire size of `records`
    pub len: usize,
    /// Bit `i` set: record `i` was received on a direct link
    pub direct_link_flags: u64,
    /// Incoming interface of each record, parallel to `records`
    pub incoming: Vec<usize>,
}

fn is_single_interface(header: &OgmHeader) -> bool {
    header.has_flag(flags::UNIDIRECTIONAL)
        || (header.has_flag(flags::DIRECTLINK) && header.ttl == 1)
}

impl ForwardPacket {
    fn new(send_time: u64, if_index: usize, own: bool) -> Self {
        Self {
            send_time,
            if_index,
            own,
            records: Vec::new(),
            len: 0,
            direct_link_flags: 0,
            incoming: Vec::new(),
        }
    }

    fn push(&mut self, record: Ogm, if_index: usize, direct_link: bool) {
        if direct_link {
            self.direct_link_flags |= 1 << self.records.len();
        }
        self.len += record.wire_len();
        self.records.push(record);
        self.incoming.push(if_index);
    }

    /// Whether this entry is only sent on [`if_index`](Self::if_index).
    pub fn single_interface(&self) -> bool {
        match self.records.first() {
            Some(base) => is_single_interface(&base.header) || (self.own && self.if_index != 0),
            None => false,
        }
    }

    fn can_absorb(&self, record: &Ogm, if_index: usize, now: u64, window: u64, max_bytes: usize) -> bool {
        if self.send_time <= now || self.send_time > now + window {
            return false;
        }
        if self.len + record.wire_len() > max_bytes || self.records.len() >= MAX_AGGREGATION_PACKETS {
            return false;
        }
        if is_single_interface(&record.header) {
            self.single_interface() && self.if_index == if_index
        } else {
            !self.single_interface()
        }
    }

    /// Records as they go out on `iface`.
    fn records_for(&self, iface: &BatmanIf) -> Vec<Ogm> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let mut record = record.clone();
                let direct = self.direct_link_flags & (1 << i) != 0 && self.incoming[i] == iface.index;
                record.header.set_flag(flags::DIRECTLINK, direct);
                record
            })
            .collect()
    }
}

/// Pending transmissions, ordered by send time
#[derive(Debug, Default)]
pub struct ForwardQueue {
    packets: VecDeque<ForwardPacket>,
}

impl ForwardQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Pending entries in send order.
    pub fn iter(&self) -> impl Iterator<Item = &ForwardPacket> + '_ {
        self.packets.iter()
    }

    /// Send time of the earliest entry.
    pub fn next_send_time(&self) -> Option<u64> {
        self.packets.front().map(|packet| packet.send_time)
    }

    /// Drop every pending entry.
    pub fn clear(&mut self) {
        self.packets.clear();
    }

    /// Insert keeping send-time order; equal times keep arrival order.
    fn insert(&mut self, packet: ForwardPacket) {
        let pos = self
            .packets
            .iter()
            .position(|queued| queued.send_time > packet.send_time)
            .unwrap_or(self.packets.len());
        self.packets.insert(pos, packet);
    }

    /// Take the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: u64) -> Option<ForwardPacket> {
        match self.packets.front() {
            Some(packet) if packet.send_time <= now => self.packets.pop_front(),
            _ => None,
        }
    }

    /// Queue the next own OGM of interface `if_index`.
    ///
    /// The send time is one originator interval from `now`, shifted by up to
    /// the configured jitter either way. The interface's sequence number
    /// advances and every originator's own-broadcast window slides.
    pub fn schedule_own(
        &mut self,
        state: &mut RoutingState,
        if_index: usize,
        now: u64,
        jitter: &mut dyn JitterSource,
    ) {
        let settings = &state.settings;
        let Some(iface) = state.interfaces.get_mut(if_index) else {
            tracing::warn!(if_index, "cannot schedule OGM on unknown interface");
            return;
        };

        let header = OgmHeader {
            orig: iface.address,
            flags: 0,
            ttl: settings.ttl,
            seqno: iface.out_seqno,
            gwflags: settings.own_gwflags,
            version: COMPAT_VERSION,
            tq: TQ_MAX_VALUE,
            hna_len: 0,
        };
        let hna: &[HnaEntry] = if iface.is_primary() {
            settings.own_hna.as_slice()
        } else {
            &[]
        };
        let ogm = Ogm::new(header, hna);

        let send_time = (now + settings.originator_interval_ms).saturating_sub(settings.jitter_ms)
            + jitter.random(2 * settings.jitter_ms);
        tracing::trace!(
            interface = %iface.name,
            seqno = iface.out_seqno,
            send_time,
            "scheduling own OGM"
        );
        iface.out_seqno = iface.out_seqno.wrapping_add(1);

        let mut packet = ForwardPacket::new(send_time, if_index, true);
        packet.push(ogm, if_index, false);
        self.insert(packet);

        for orig in state.originators.values_mut() {
            orig.shift_bcast_own(if_index);
        }
    }

    /// Queue `ogm`, received from `neighbor` on `if_index`, for rebroadcast.
    ///
    /// Returns `false` when the TTL is exhausted and nothing was queued.
    pub fn schedule_forward(
        &mut self,
        state: &RoutingState,
        ogm: &Ogm,
        neighbor: Ipv4Addr,
        if_index: usize,
        decision: ForwardDecision,
        now: u64,
    ) -> bool {
        let settings = &state.settings;
        let mut record = ogm.clone();
        let header = &mut record.header;

        if header.ttl <= 1 {
            tracing::trace!(orig = %header.orig, "ttl exhausted, not forwarding");
            return false;
        }

        // Propagate our router's smoothed view unless the OGM came from it.
        if let Some(router) = state
            .originator(header.orig)
            .and_then(|orig| orig.router_node())
        {
            if router.tq_avg != 0 && router.address != neighbor {
                header.tq = router.tq_avg;
                if router.last_ttl != 0 {
                    header.ttl = router.last_ttl;
                }
            }
        }

        header.ttl -= 1;
        if header.ttl == 0 {
            tracing::trace!(orig = %header.orig, "ttl exhausted, not forwarding");
            return false;
        }
        header.tq = apply_hop_penalty(header.tq, settings.hop_penalty);
        header.flags = 0;
        header.set_flag(flags::UNIDIRECTIONAL, decision.unidirectional);
        header.set_flag(flags::DIRECTLINK, decision.direct_link);

        tracing::trace!(
            orig = %header.orig,
            seqno = header.seqno,
            ttl = header.ttl,
            tq = header.tq,
            direct_link = decision.direct_link,
            unidirectional = decision.unidirectional,
            "forwarding OGM"
        );

        if settings.aggregation {
            let window = settings.aggregation_window_ms;
            let max_bytes = settings.aggregation_bytes;
            if let Some(packet) = self
                .packets
                .iter_mut()
                .find(|packet| packet.can_absorb(&record, if_index, now, window, max_bytes))
            {
                packet.push(record, if_index, decision.direct_link);
                return true;
            }
        }

        let send_time = if settings.aggregation {
            now + settings.aggregation_window_ms
        } else {
            now
        };
        let mut packet = ForwardPacket::new(send_time, if_index, false);
        packet.push(record, if_index, decision.direct_link);
        self.insert(packet);
        true
    }

    /// Transmit every entry due at `now`, rescheduling own OGMs. Returns the
    /// number of entries sent.
    pub fn flush_due<T: Transport>(
        &mut self,
        state: &mut RoutingState,
        transport: &mut T,
        jitter: &mut dyn JitterSource,
        now: u64,
    ) -> usize {
        let mut flushed = 0;
        while let Some(packet) = self.pop_due(now) {
            transmit(state, transport, &packet);
            if packet.own {
                self.schedule_own(state, packet.if_index, now, jitter);
            }
            flushed += 1;
        }
        flushed
    }
}

fn transmit<T: Transport>(state: &mut RoutingState, transport: &mut T, packet: &ForwardPacket) {
    if packet.single_interface() {
        let Some(iface) = state.interfaces.get_mut(packet.if_index) else {
            return;
        };
        if iface.active {
            send_on(iface, transport, &encode_aggregate(&packet.records));
        }
        return;
    }

    for iface in state.interfaces.iter_mut().filter(|iface| iface.active) {
        let payload = encode_aggregate(&packet.records_for(iface));
        send_on(iface, transport, &payload);
    }
}

fn send_on<T: Transport>(iface: &mut BatmanIf, transport: &mut T, payload: &[u8]) {
    match transport.send(iface.index, iface.broadcast, payload) {
        Ok(()) => tracing::trace!(interface = %iface.name, len = payload.len(), "sent"),
        Err(e) => {
            tracing::warn!(
                interface = %iface.name,
                error = %e,
                "send failed, deactivating interface"
            );
            iface.active = false;
        },
    }
}
