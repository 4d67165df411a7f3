//! Protocol module
//!
//! Wire format of originator messages (OGMs), the protocol constants shared
//! by the routing core, and whole-datagram validation.
//!
//! A datagram is one or more OGM records back to back. Each record is a
//! fixed 12-byte header followed by `hna_len` five-byte announced-network
//! entries. See [`packet`] for the codec.

pub mod packet;
pub mod versioning;

use thiserror::Error;

pub use packet::{
    decode_hna, encode_aggregate, flags, parse_aggregate, parse_hna, HnaEntry, Ogm, OgmHeader, HEADER_LEN,
    HNA_RECORD_LEN,
};
pub use versioning::{check_version_compatibility, VersionCompatibility, COMPAT_VERSION};

/// Protocol-level errors
///
/// Any of these drops the whole datagram; no routing state is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes than one OGM header
    #[error("Packet too short: {len} bytes (header is 12 bytes)")]
    PacketTooShort {
        /// Bytes available
        len: usize,
    },

    /// `hna_len` announces more entries than the buffer holds
    #[error("HNA length mismatch: {declared} entries declared, {available} bytes available")]
    HnaLengthMismatch {
        /// Entry count from the header
        declared: u8,
        /// Bytes left after the header
        available: usize,
    },

    /// Bytes after the last record that do not form a complete header
    #[error("Trailing garbage: {len} bytes at offset {offset}")]
    TrailingBytes {
        /// Offset of the leftover bytes
        offset: usize,
        /// Number of leftover bytes
        len: usize,
    },

    /// Datagram larger than we accept
    #[error("Packet too large: {len} bytes (max: {max} bytes)")]
    TooLarge {
        /// Datagram size
        len: usize,
        /// Accepted maximum
        max: usize,
    },
}

/// UDP port OGMs are exchanged on
pub const BATMAN_PORT: u16 = 4305;

/// Largest datagram accepted from the network
pub const MAX_PACKET_SIZE: usize = 2000;

/// Highest transmission-quality value
pub const TQ_MAX_VALUE: u8 = 255;

/// TTL of freshly originated OGMs
pub const DEFAULT_TTL: u8 = 50;

/// Default originator interval in milliseconds
pub const DEFAULT_ORIGINATOR_INTERVAL_MS: u64 = 1000;

/// Default send-time jitter in milliseconds
pub const DEFAULT_JITTER_MS: u64 = 100;

/// Default inactivity timeout for originators, neighbors and gateways
pub const DEFAULT_PURGE_TIMEOUT_MS: u64 = 200_000;

/// Default interval between purge sweeps
pub const DEFAULT_PURGE_INTERVAL_MS: u64 = 1000;

/// Byte ceiling of one aggregated datagram
pub const MAX_AGGREGATION_BYTES: usize = 512;

/// How long a forwarded record may wait for others to join it
pub const MAX_AGGREGATION_MS: u64 = 100;

/// Default TQ penalty applied per hop
pub const DEFAULT_HOP_PENALTY: u8 = 10;

/// How many of our own sequence numbers an echo may lag behind and still
/// count as proof of a bidirectional link
pub const BIDIRECT_TIMEOUT: u16 = 2;

/// Validate and split a received datagram.
///
/// The datagram is rejected as a whole if it is oversized or if any record
/// is truncated.
///
/// # Example
/// ```
/// use batmand::protocol::{decode_datagram, ProtocolError};
///
/// let err = decode_datagram(&[1, 2, 3]).unwrap_err();
/// assert_eq!(err, ProtocolError::PacketTooShort { len: 3 });
/// ```
pub fn decode_datagram(bytes: &[u8]) -> Result<Vec<Ogm>, ProtocolError> {
    if bytes.len() > MAX_PACKET_SIZE {
        return Err(ProtocolError::TooLarge {
            len: bytes.len(),
            max: MAX_PACKET_SIZE,
        });
    }
    parse_aggregate(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn header(seqno: u16) -> OgmHeader {
        OgmHeader {
            orig: Ipv4Addr::new(10, 0, 0, 1),
            flags: 0,
            ttl: DEFAULT_TTL,
            seqno,
            gwflags: 0,
            version: COMPAT_VERSION,
            tq: TQ_MAX_VALUE,
            hna_len: 0,
        }
    }

    #[test]
    fn test_decode_datagram_too_large() {
        let bytes = vec![0u8; MAX_PACKET_SIZE + 1];
        assert_eq!(
            decode_datagram(&bytes),
            Err(ProtocolError::TooLarge {
                len: MAX_PACKET_SIZE + 1,
                max: MAX_PACKET_SIZE
            })
        );
    }

    #[test]
    fn test_decode_datagram_single_record() {
        let ogm = Ogm::new(header(7), &[]);
        let bytes = encode_aggregate(std::slice::from_ref(&ogm));

        let decoded = decode_datagram(&bytes).unwrap();
        assert_eq!(decoded, vec![ogm]);
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::PacketTooShort { len: 5 };
        assert_eq!(
            err.to_string(),
            "Packet too short: 5 bytes (header is 12 bytes)"
        );
    }
}
