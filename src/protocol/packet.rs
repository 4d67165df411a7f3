//! OGM codec
//!
//! Explicit parsing and serialization of OGM records. Nothing here aliases
//! raw memory: every field is read from a bounds-checked byte slice and
//! written with big-endian helpers.
//!
//! ```text
//!  0               4       5     6           8         9         10   11
//! +---------------+-------+-----+-----------+---------+---------+----+-------+
//! | orig (IPv4)   | flags | ttl | seqno(BE) | gwflags | version | tq | hna_n |
//! +---------------+-------+-----+-----------+---------+---------+----+-------+
//! | hna_n x { network (IPv4, 4 bytes), prefix_len (1 byte) }                 |
//! +--------------------------------------------------------------------------+
//! ```

use super::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Size of the fixed OGM header
pub const HEADER_LEN: usize = 12;

/// Size of one announced-network record
pub const HNA_RECORD_LEN: usize = 5;

/// Bits of the `flags` header byte
pub mod flags {
    /// Sender has not yet verified the link back to us
    pub const UNIDIRECTIONAL: u8 = 0x80;
    /// Record was received directly from its originator on this interface
    pub const DIRECTLINK: u8 = 0x40;
}

/// Fixed part of an OGM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OgmHeader {
    /// Originator address
    pub orig: Ipv4Addr,
    /// See [`flags`]
    pub flags: u8,
    /// Remaining hops
    pub ttl: u8,
    /// Originator sequence number
    pub seqno: u16,
    /// Gateway class, 0 if the originator is not a gateway
    pub gwflags: u8,
    /// Compatibility version
    pub version: u8,
    /// Transmission quality towards the originator
    pub tq: u8,
    /// Number of trailing HNA records
    pub hna_len: u8,
}

impl OgmHeader {
    /// Whether every bit of `flag` is set.
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }

    /// Set or clear `flag`.
    pub fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.orig.octets());
        buf.push(self.flags);
        buf.push(self.ttl);
        buf.extend_from_slice(&self.seqno.to_be_bytes());
        buf.push(self.gwflags);
        buf.push(self.version);
        buf.push(self.tq);
        buf.push(self.hna_len);
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtocolError::PacketTooShort { len: bytes.len() });
        }
        Ok(Self {
            orig: Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]),
            flags: bytes[4],
            ttl: bytes[5],
            seqno: u16::from_be_bytes([bytes[6], bytes[7]]),
            gwflags: bytes[8],
            version: bytes[9],
            tq: bytes[10],
            hna_len: bytes[11],
        })
    }
}

/// One announced network (host/network announcement)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HnaEntry {
    /// Network address
    pub network: Ipv4Addr,
    /// Prefix length, valid range 1..=32
    pub prefix_len: u8,
}

impl HnaEntry {
    /// Create an entry.
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            network,
            prefix_len,
        }
    }

    /// Prefix length within 1..=32.
    pub fn is_valid(&self) -> bool {
        (1..=32).contains(&self.prefix_len)
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.network.octets());
        buf.push(self.prefix_len);
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            network: Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]),
            prefix_len: bytes[4],
        }
    }
}

impl fmt::Display for HnaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// A complete OGM record: header plus the raw HNA trailer.
///
/// The trailer is kept as bytes so that route installation can compare
/// announcements exactly as they were received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ogm {
    /// Fixed header
    pub header: OgmHeader,
    hna: Vec<u8>,
}

impl Ogm {
    /// Build a record from a header and announced networks.
    ///
    /// `header.hna_len` is overwritten with the entry count.
    ///
    /// # Panics
    ///
    /// Panics if more than 255 entries are given; configuration validation
    /// caps the announced networks below that.
    pub fn new(mut header: OgmHeader, hna: &[HnaEntry]) -> Self {
        let Ok(count) = u8::try_from(hna.len()) else {
            panic!("{} HNA entries do not fit in one OGM", hna.len());
        };
        header.hna_len = count;
        let mut raw = Vec::with_capacity(hna.len() * HNA_RECORD_LEN);
        for entry in hna {
            entry.encode_into(&mut raw);
        }
        Self { header, hna: raw }
    }

    /// Raw HNA trailer.
    pub fn hna_bytes(&self) -> &[u8] {
        &self.hna
    }

    /// Size of this record on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.hna.len()
    }

    /// Decoded HNA entries, skipping (and logging) invalid prefix lengths.
    pub fn announced_networks(&self) -> Vec<HnaEntry> {
        decode_hna(&self.hna, self.header.orig)
    }

    /// Append the wire form to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        self.header.encode_into(buf);
        buf.extend_from_slice(&self.hna);
    }

    /// Wire form of this record alone.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        self.encode_into(&mut buf);
        buf
    }
}

/// Every entry of an HNA trailer, valid or not.
pub fn parse_hna(raw: &[u8]) -> impl Iterator<Item = HnaEntry> + '_ {
    raw.chunks_exact(HNA_RECORD_LEN).map(HnaEntry::decode)
}

/// Decode an HNA trailer, dropping entries with prefix length 0 or above 32.
pub fn decode_hna(raw: &[u8], orig: Ipv4Addr) -> Vec<HnaEntry> {
    parse_hna(raw)
        .filter(|entry| {
            if entry.is_valid() {
                true
            } else {
                tracing::warn!(
                    %orig,
                    network = %entry.network,
                    prefix_len = entry.prefix_len,
                    "ignoring announced network with invalid prefix length"
                );
                false
            }
        })
        .collect()
}

/// Concatenate records into one datagram payload.
pub fn encode_aggregate(records: &[Ogm]) -> Vec<u8> {
    let total = records.iter().map(Ogm::wire_len).sum();
    let mut buf = Vec::with_capacity(total);
    for record in records {
        record.encode_into(&mut buf);
    }
    buf
}

/// Split a datagram payload into records.
///
/// Fails on the first inconsistency; a datagram is either fully valid or
/// rejected.
pub fn parse_aggregate(bytes: &[u8]) -> Result<Vec<Ogm>, ProtocolError> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let rest = &bytes[offset..];
        if rest.len() < HEADER_LEN {
            return Err(if offset == 0 {
                ProtocolError::PacketTooShort { len: rest.len() }
            } else {
                ProtocolError::TrailingBytes {
                    offset,
                    len: rest.len(),
                }
            });
        }

        let header = OgmHeader::decode(rest)?;
        let hna_bytes = header.hna_len as usize * HNA_RECORD_LEN;
        let available = rest.len() - HEADER_LEN;
        if hna_bytes > available {
            return Err(ProtocolError::HnaLengthMismatch {
                declared: header.hna_len,
                available,
            });
        }

        records.push(Ogm {
            header,
            hna: rest[HEADER_LEN..HEADER_LEN + hna_bytes].to_vec(),
        });
        offset += HEADER_LEN + hna_bytes;
    }

    if records.is_empty() {
        return Err(ProtocolError::PacketTooShort { len: 0 });
    }
    Ok(records)
}
