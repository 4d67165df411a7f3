//! UDP transport
//!
//! One socket bound to the wildcard address on the OGM port, with broadcast
//! enabled. The incoming interface of a datagram is derived from the subnet
//! its source address belongs to; datagrams from outside every configured
//! subnet are ignored. Choosing the egress device for a broadcast is left to
//! the kernel's routing of the interface broadcast address.

use super::{BatmanIf, Datagram, Transport};
use crate::error::NetworkError;
use crate::protocol::MAX_PACKET_SIZE;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Socket-backed [`Transport`]
pub struct UdpTransport {
    socket: UdpSocket,
    port: u16,
    interfaces: Vec<BatmanIf>,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Bind `0.0.0.0:port` for the given interfaces.
    pub async fn bind(interfaces: &[BatmanIf], port: u16) -> Result<Self, NetworkError> {
        let address = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        let socket = UdpSocket::bind(address)
            .await
            .map_err(|e| NetworkError::BindFailed {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        socket
            .set_broadcast(true)
            .map_err(|e| NetworkError::BindFailed {
                address: address.to_string(),
                reason: format!("cannot enable broadcast: {}", e),
            })?;

        tracing::info!(%address, interfaces = interfaces.len(), "UDP transport bound");

        Ok(Self {
            socket,
            port,
            interfaces: interfaces.to_vec(),
            // one spare byte to detect oversized datagrams
            buf: vec![0u8; MAX_PACKET_SIZE + 1],
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::ReceiveFailed {
                reason: e.to_string(),
            })
    }

    fn interface_for(&self, source: Ipv4Addr) -> Option<usize> {
        self.interfaces
            .iter()
            .find(|iface| iface.contains(source))
            .map(|iface| iface.index)
    }
}

impl Transport for UdpTransport {
    async fn recv(&mut self, timeout: Duration) -> Result<Option<Datagram>, NetworkError> {
        let (len, source) =
            match tokio::time::timeout(timeout, self.socket.recv_from(&mut self.buf)).await {
                Err(_) => return Ok(None),
                Ok(Err(e)) => {
                    return Err(NetworkError::ReceiveFailed {
                        reason: e.to_string(),
                    })
                },
                Ok(Ok(received)) => received,
            };

        let SocketAddr::V4(source) = source else {
            return Ok(None);
        };
        let Some(if_index) = self.interface_for(*source.ip()) else {
            tracing::trace!(source = %source, "datagram from outside the mesh subnets ignored");
            return Ok(None);
        };

        Ok(Some(Datagram {
            neighbor: *source.ip(),
            if_index,
            payload: self.buf[..len].to_vec(),
        }))
    }

    fn send(
        &mut self,
        if_index: usize,
        destination: Ipv4Addr,
        payload: &[u8],
    ) -> Result<(), NetworkError> {
        if if_index >= self.interfaces.len() {
            return Err(NetworkError::UnknownInterface(if_index));
        }
        let target = SocketAddr::V4(SocketAddrV4::new(destination, self.port));
        self.socket
            .try_send_to(payload, target)
            .map(|_| ())
            .map_err(|e| NetworkError::SendFailed {
                if_index,
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_exchange() {
        let iface = BatmanIf::new(0, "lo", Ipv4Addr::LOCALHOST, 8);
        let mut receiver = UdpTransport::bind(std::slice::from_ref(&iface), 0)
            .await
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let mut sender = UdpTransport::bind(std::slice::from_ref(&iface), 0)
            .await
            .unwrap();
        sender.port = port;

        sender.send(0, Ipv4Addr::LOCALHOST, b"ogm").unwrap();
        let datagram = receiver
            .recv(Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(datagram.neighbor, Ipv4Addr::LOCALHOST);
        assert_eq!(datagram.if_index, 0);
        assert_eq!(datagram.payload, b"ogm");
    }

    #[tokio::test]
    async fn test_unknown_interface() {
        let iface = BatmanIf::new(0, "lo", Ipv4Addr::LOCALHOST, 8);
        let mut transport = UdpTransport::bind(&[iface], 0).await.unwrap();
        assert!(matches!(
            transport.send(4, Ipv4Addr::LOCALHOST, b"x"),
            Err(NetworkError::UnknownInterface(4))
        ));
    }
}
