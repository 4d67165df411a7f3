//! OGM receive pipeline
//!
//! Checks run in a fixed order and the first that matches drops the record.
//! Drops are normal protocol behavior and are only logged at trace/debug
//! level. Records that pass feed the originator registry when the link they
//! came over is bidirectional, and are then considered for rebroadcast.

use super::forwarding::{ForwardDecision, ForwardQueue};
use super::state::RoutingState;
use crate::error::ProtocolError;
use crate::network::Datagram;
use crate::protocol::{check_version_compatibility, decode_datagram, flags, Ogm};
use std::fmt;
use std::net::Ipv4Addr;

/// Why a received record was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Protocol version differs from ours
    IncompatibleVersion {
        /// Version carried by the record
        version: u8,
    },
    /// Sent by one of our own interfaces
    OwnBroadcast,
    /// Source address is a broadcast address
    BroadcastNeighbor,
    /// Originator address is a broadcast address
    BroadcastOriginator,
    /// Our own OGM rebroadcast by a neighbor; only feeds link detection
    OwnOriginatorEcho,
    /// Unidirectional flag over a link not known to be bidirectional
    UnidirectionalLink,
    /// Arrived on an interface we do not have
    UnknownInterface,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::IncompatibleVersion { version } => {
                write!(f, "incompatible version {}", version)
            },
            DropReason::OwnBroadcast => write!(f, "own broadcast"),
            DropReason::BroadcastNeighbor => write!(f, "neighbor is a broadcast address"),
            DropReason::BroadcastOriginator => write!(f, "originator is a broadcast address"),
            DropReason::OwnOriginatorEcho => write!(f, "echo of own OGM"),
            DropReason::UnidirectionalLink => write!(f, "unidirectional link"),
            DropReason::UnknownInterface => write!(f, "unknown interface"),
        }
    }
}

/// What happened to a received record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Rejected before touching routing state
    Dropped(DropReason),
    /// Accepted
    Processed {
        /// The link to the neighbor is bidirectional
        bidirectional: bool,
        /// The sequence number was seen before
        duplicate: bool,
        /// A rebroadcast was queued
        forwarded: bool,
    },
}

impl RoutingState {
    /// Process one OGM record heard from `neighbor` on `if_index`.
    pub fn receive_ogm(
        &mut self,
        queue: &mut ForwardQueue,
        ogm: &Ogm,
        neighbor: Ipv4Addr,
        if_index: usize,
        now: u64,
    ) -> ReceiveOutcome {
        let header = &ogm.header;
        let Some(iface) = self.interfaces.get(if_index) else {
            tracing::debug!(%neighbor, if_index, "drop OGM: unknown interface");
            return ReceiveOutcome::Dropped(DropReason::UnknownInterface);
        };
        let if_address = iface.address;
        let out_seqno = iface.out_seqno;

        tracing::trace!(
            %neighbor,
            orig = %header.orig,
            seqno = header.seqno,
            ttl = header.ttl,
            tq = header.tq,
            flags = header.flags,
            if_index,
            "received OGM"
        );

        let compat = check_version_compatibility(header.version);
        if !compat.is_compatible() {
            tracing::debug!(%neighbor, %compat, "drop OGM");
            return ReceiveOutcome::Dropped(DropReason::IncompatibleVersion {
                version: header.version,
            });
        }

        if self.is_own_address(neighbor) {
            tracing::trace!(%neighbor, "drop OGM: own broadcast");
            return ReceiveOutcome::Dropped(DropReason::OwnBroadcast);
        }

        if self.is_broadcast_address(neighbor) {
            tracing::debug!(%neighbor, "drop OGM: sender is a broadcast address");
            return ReceiveOutcome::Dropped(DropReason::BroadcastNeighbor);
        }

        if self.is_broadcast_address(header.orig) {
            tracing::debug!(%neighbor, orig = %header.orig, "drop OGM: originator is a broadcast address");
            return ReceiveOutcome::Dropped(DropReason::BroadcastOriginator);
        }

        if self.is_own_address(header.orig) {
            let direct_link = header.has_flag(flags::DIRECTLINK) && if_address == header.orig;
            self.get_or_create(neighbor)
                .record_echo(if_index, out_seqno, header.seqno, direct_link);
            tracing::trace!(%neighbor, seqno = header.seqno, direct_link, "drop OGM: own echo");
            return ReceiveOutcome::Dropped(DropReason::OwnOriginatorEcho);
        }

        let bidirectional = self
            .get_or_create(neighbor)
            .is_bidirectional(if_index, out_seqno);

        if header.has_flag(flags::UNIDIRECTIONAL) && !bidirectional {
            tracing::trace!(%neighbor, orig = %header.orig, "drop OGM: unidirectional link");
            return ReceiveOutcome::Dropped(DropReason::UnidirectionalLink);
        }

        let duplicate = self.get_or_create(header.orig).is_duplicate(header.seqno);

        if bidirectional && !duplicate {
            self.update_originator(header, ogm.hna_bytes(), neighbor, if_index, now);
        }

        let decision = self.forward_decision(header.orig, neighbor, bidirectional, duplicate);
        let forwarded = match decision {
            Some(decision) => queue.schedule_forward(self, ogm, neighbor, if_index, decision, now),
            None => false,
        };

        ReceiveOutcome::Processed {
            bidirectional,
            duplicate,
            forwarded,
        }
    }

    fn forward_decision(
        &self,
        orig: Ipv4Addr,
        neighbor: Ipv4Addr,
        bidirectional: bool,
        duplicate: bool,
    ) -> Option<ForwardDecision> {
        let router = self
            .originator(orig)
            .and_then(|node| node.router)
            .map(|key| key.address);

        if orig == neighbor {
            if bidirectional && router == Some(neighbor) {
                return Some(ForwardDecision {
                    direct_link: true,
                    unidirectional: false,
                });
            }
            // Not (yet) our best link to this neighbor: reply on the incoming
            // interface so it can learn about the link.
            return Some(ForwardDecision {
                direct_link: true,
                unidirectional: true,
            });
        }

        if bidirectional && !duplicate && router == Some(neighbor) {
            Some(ForwardDecision::default())
        } else {
            None
        }
    }

    /// Decode a datagram and process each of its records.
    ///
    /// A malformed datagram is rejected as a whole before any record is
    /// looked at.
    pub fn receive_datagram(
        &mut self,
        queue: &mut ForwardQueue,
        datagram: &Datagram,
        now: u64,
    ) -> Result<Vec<ReceiveOutcome>, ProtocolError> {
        let records = decode_datagram(&datagram.payload)?;
        Ok(records
            .iter()
            .map(|ogm| self.receive_ogm(queue, ogm, datagram.neighbor, datagram.if_index, now))
            .collect())
    }
}
