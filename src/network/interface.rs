//! Local mesh interfaces.

use std::net::Ipv4Addr;

/// A local interface taking part in the mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatmanIf {
    /// Position in the interface list; index 0 is the primary interface
    pub index: usize,
    /// Device name, for logging
    pub name: String,
    /// Our address on this interface
    pub address: Ipv4Addr,
    /// Broadcast address OGMs are sent to
    pub broadcast: Ipv4Addr,
    /// Prefix length of the attached network
    pub prefix_len: u8,
    /// Sequence number the next own OGM on this interface will carry
    pub out_seqno: u16,
    /// Inactive interfaces are skipped when sending
    pub active: bool,
}

impl BatmanIf {
    /// Interface with the broadcast address derived from the prefix.
    pub fn new(index: usize, name: impl Into<String>, address: Ipv4Addr, prefix_len: u8) -> Self {
        let host_bits = u32::MAX.checked_shr(prefix_len as u32).unwrap_or(0);
        Self {
            index,
            name: name.into(),
            address,
            broadcast: Ipv4Addr::from(u32::from(address) | host_bits),
            prefix_len,
            out_seqno: 1,
            active: true,
        }
    }

    /// Override the derived broadcast address.
    pub fn with_broadcast(mut self, broadcast: Ipv4Addr) -> Self {
        self.broadcast = broadcast;
        self
    }

    /// Network mask of the attached network.
    pub fn netmask(&self) -> Ipv4Addr {
        let mask = u32::MAX
            .checked_shl(32 - self.prefix_len as u32)
            .unwrap_or(0);
        Ipv4Addr::from(mask)
    }

    /// Network address of the attached network.
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.address) & u32::from(self.netmask()))
    }

    /// Whether `addr` lies in the attached network.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & u32::from(self.netmask()) == u32::from(self.network())
    }

    /// Whether this is the primary interface.
    pub fn is_primary(&self) -> bool {
        self.index == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_derived_from_prefix() {
        let iface = BatmanIf::new(0, "wlan0", Ipv4Addr::new(10, 10, 3, 7), 16);
        assert_eq!(iface.broadcast, Ipv4Addr::new(10, 10, 255, 255));
        assert_eq!(iface.network(), Ipv4Addr::new(10, 10, 0, 0));
        assert_eq!(iface.netmask(), Ipv4Addr::new(255, 255, 0, 0));
        assert_eq!(iface.out_seqno, 1);
        assert!(iface.active);
    }

    #[test]
    fn test_contains() {
        let iface = BatmanIf::new(1, "eth1", Ipv4Addr::new(192, 168, 5, 1), 24);
        assert!(iface.contains(Ipv4Addr::new(192, 168, 5, 200)));
        assert!(!iface.contains(Ipv4Addr::new(192, 168, 6, 1)));
        assert!(!iface.is_primary());
    }

    #[test]
    fn test_edge_prefix_lengths() {
        let host = BatmanIf::new(0, "lo", Ipv4Addr::new(10, 0, 0, 1), 32);
        assert_eq!(host.broadcast, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(host.netmask(), Ipv4Addr::new(255, 255, 255, 255));

        let all = BatmanIf::new(0, "any", Ipv4Addr::new(10, 0, 0, 1), 0);
        assert_eq!(all.broadcast, Ipv4Addr::BROADCAST);
        assert_eq!(all.netmask(), Ipv4Addr::UNSPECIFIED);
        assert!(all.contains(Ipv4Addr::new(8, 8, 8, 8)));
    }
}
