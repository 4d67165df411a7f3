//! Common test helpers and utilities
//!
//! Shared fixtures for the integration tests: addresses, OGM builders and a
//! routing state wired to recording collaborators.

#![allow(dead_code)]

use batmand::network::{BatmanIf, RecordingRouteTable, RecordingTunnel};
use batmand::protocol::{HnaEntry, Ogm, OgmHeader, COMPAT_VERSION, DEFAULT_TTL, TQ_MAX_VALUE};
use batmand::routing::{RoutingSettings, RoutingState};
use std::net::Ipv4Addr;
use tempfile::TempDir;

/// Host `last` in 10.0.0.0/24
pub fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

/// Header of a plain OGM from `orig`
pub fn header(orig: Ipv4Addr, seqno: u16) -> OgmHeader {
    OgmHeader {
        orig,
        flags: 0,
        ttl: DEFAULT_TTL,
        seqno,
        gwflags: 0,
        version: COMPAT_VERSION,
        tq: TQ_MAX_VALUE,
        hna_len: 0,
    }
}

/// Header of an OGM from a gateway of class `gwflags`
pub fn gateway_header(orig: Ipv4Addr, seqno: u16, gwflags: u8) -> OgmHeader {
    OgmHeader {
        gwflags,
        ..header(orig, seqno)
    }
}

/// OGM from `orig` announcing `hna`
pub fn ogm_with_hna(orig: Ipv4Addr, seqno: u16, hna: &[HnaEntry]) -> Ogm {
    Ogm::new(header(orig, seqno), hna)
}

/// A routing state with one interface, 10.0.0.1/24, plus handles to its
/// route table and tunnel.
pub fn create_test_state(
    settings: RoutingSettings,
) -> (RoutingState, RecordingRouteTable, RecordingTunnel) {
    create_test_state_on(settings, &[addr(1)])
}

/// A routing state with one /24 interface per address.
pub fn create_test_state_on(
    settings: RoutingSettings,
    addresses: &[Ipv4Addr],
) -> (RoutingState, RecordingRouteTable, RecordingTunnel) {
    let routes = RecordingRouteTable::new();
    let tunnel = RecordingTunnel::new();
    let interfaces = addresses
        .iter()
        .enumerate()
        .map(|(index, address)| BatmanIf::new(index, format!("mesh{}", index), *address, 24))
        .collect();
    let state = RoutingState::new(
        settings,
        interfaces,
        Box::new(routes.clone()),
        Box::new(tunnel.clone()),
    );
    (state, routes, tunnel)
}

/// Create a temporary directory for configuration files
///
/// The directory will be automatically cleaned up when the returned `TempDir` is dropped.
pub fn create_temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_state() {
        let (state, routes, tunnel) = create_test_state(RoutingSettings::default());
        assert_eq!(state.interfaces().len(), 1);
        assert!(state.originators().is_empty());
        assert_eq!(routes.mutation_count(), 0);
        assert!(tunnel.events().is_empty());
    }

    #[test]
    fn test_gateway_header() {
        let header = gateway_header(addr(5), 7, 0x21);
        assert_eq!(header.gwflags, 0x21);
        assert_eq!(header.seqno, 7);
    }
}
